pub mod bucket;
pub mod object;
pub mod patch;
pub mod rules_resource;
pub mod wire;

pub use bucket::BucketMetadata;
pub use object::{DOWNLOAD_TOKENS_METADATA_KEY, ObjectMetadata};
pub use patch::{MetadataValue, ObjectMetadataPatch, Patch};
pub use rules_resource::RulesResourceMetadata;
pub use wire::{
    CloudStorageBucketMetadata, CloudStorageObjectMetadata, OutgoingFirebaseMetadata,
    RewriteResponse,
};
