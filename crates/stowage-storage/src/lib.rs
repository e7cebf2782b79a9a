pub mod admin_config;
pub mod export;
pub mod key;
pub mod layer;
pub mod list;
pub mod requests;
#[cfg(test)]
pub(crate) mod testing;

pub use admin_config::{AdminSdkConfigProvider, StaticAdminSdkConfig, default_storage_bucket};
pub use key::ObjectKey;
pub use layer::StorageLayer;
pub use list::{DEFAULT_MAX_RESULTS, ListObjectsResponse};
pub use requests::{
    CopyObjectRequest, CreateDownloadTokenRequest, DeleteDownloadTokenRequest,
    DeleteObjectRequest, GetObjectRequest, ListObjectsRequest, UpdateObjectMetadataRequest,
};
