pub mod multipart;
pub mod service;
pub mod types;

pub use multipart::{ObjectUploadMultipart, parse_object_upload_multipart_request};
pub use service::{
    MediaUploadRequest, MultipartUploadRequest, StartResumableUploadRequest, UploadService,
    firebase_resumable_upload_url, resumable_upload_url,
};
pub use types::{Upload, UploadStatus, UploadType};
