use std::fmt;

use stowage_metadata::ObjectMetadataPatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadType {
    Resumable,
    Multipart,
    Media,
}

/// Lifecycle of an upload: `Active` until it is finalized or cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Active,
    Finished,
    Cancelled,
}

impl UploadStatus {
    /// Value reported in the `x-goog-upload-status` header.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Finished => "final",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Upload {
    pub id: String,
    pub bucket: String,
    pub object: String,
    pub upload_type: UploadType,
    /// Persistence key holding the bytes received so far.
    pub path: String,
    pub status: UploadStatus,
    pub metadata: ObjectMetadataPatch,
    pub size: u64,
    /// `Authorization` header captured when the upload started, used for
    /// the rules check at finalize time.
    pub authorization: Option<String>,
}

impl Upload {
    pub fn is_finished(&self) -> bool {
        self.status == UploadStatus::Finished
    }
}

pub(crate) fn staging_path(id: &str, bucket: &str, object: &str) -> String {
    format!("{id}_b_{bucket}_o_{object}")
}
