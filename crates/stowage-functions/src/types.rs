use serde::Serialize;
use stowage_common::time;
use stowage_metadata::{CloudStorageObjectMetadata, ObjectMetadata};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageAction {
    Finalize,
    MetadataUpdate,
    Delete,
    Archive,
}

impl StorageAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Finalize => "finalize",
            Self::MetadataUpdate => "metadataUpdate",
            Self::Delete => "delete",
            Self::Archive => "archive",
        }
    }

    pub fn cloud_event_verb(self) -> &'static str {
        match self {
            Self::Finalize => "finalized",
            Self::MetadataUpdate => "metadataUpdated",
            Self::Delete => "deleted",
            Self::Archive => "archived",
        }
    }
}

impl std::fmt::Display for StorageAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn object_resource_name(object: &ObjectMetadata) -> String {
    format!("projects/_/buckets/{}/objects/{}", object.bucket, object.name)
}

#[derive(Debug, Clone, Serialize)]
pub struct LegacyEventResource {
    pub service: &'static str,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct LegacyEventParams {
    pub bucket: String,
    pub project: String,
}

/// Background-function envelope understood by first generation triggers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyEvent {
    pub event_id: String,
    pub timestamp: String,
    pub event_type: String,
    pub resource: LegacyEventResource,
    pub params: LegacyEventParams,
    pub data: CloudStorageObjectMetadata,
}

impl LegacyEvent {
    pub fn new(
        action: StorageAction,
        object: &ObjectMetadata,
        project_id: &str,
        base_url: &str,
    ) -> Self {
        let now = time::now();
        Self {
            event_id: format!("{}-{}", now.timestamp_millis(), Uuid::new_v4()),
            timestamp: time::to_serialized_date(&now),
            event_type: format!("google.storage.object.{action}"),
            resource: LegacyEventResource {
                service: "storage.googleapis.com",
                name: object_resource_name(object),
                kind: "storage#object",
            },
            params: LegacyEventParams {
                bucket: object.bucket.clone(),
                project: project_id.to_string(),
            },
            data: CloudStorageObjectMetadata::new(object, base_url),
        }
    }
}

/// CloudEvents 1.0 structured-mode envelope for second generation triggers.
#[derive(Debug, Clone, Serialize)]
pub struct CloudEvent {
    pub specversion: &'static str,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub source: String,
    pub subject: String,
    pub time: String,
    pub data: CloudStorageObjectMetadata,
}

impl CloudEvent {
    pub fn new(action: StorageAction, object: &ObjectMetadata, base_url: &str) -> Self {
        Self {
            specversion: "1.0",
            id: Uuid::new_v4().to_string(),
            kind: format!("google.cloud.storage.object.v1.{}", action.cloud_event_verb()),
            source: format!("//storage.googleapis.com/{}", object_resource_name(object)),
            subject: format!("objects/{}", object.name),
            time: time::to_serialized_date(&object.updated),
            data: CloudStorageObjectMetadata::new(object, base_url),
        }
    }
}
