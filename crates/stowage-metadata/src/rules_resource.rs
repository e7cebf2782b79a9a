use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::object::ObjectMetadata;

/// Object fields exposed to security rules as `resource` and
/// `request.resource`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RulesResourceMetadata {
    pub name: String,
    pub bucket: String,
    pub generation: i64,
    pub metageneration: i64,
    pub size: u64,
    pub time_created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub md5_hash: String,
    pub crc32c: u32,
    pub etag: String,
    pub content_type: String,
    pub content_encoding: String,
    pub content_disposition: Option<String>,
    pub content_language: Option<String>,
    pub cache_control: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl From<&ObjectMetadata> for RulesResourceMetadata {
    fn from(object: &ObjectMetadata) -> Self {
        Self {
            name: object.name.clone(),
            bucket: object.bucket.clone(),
            generation: object.generation,
            metageneration: object.metageneration,
            size: object.size,
            time_created: object.time_created,
            updated: object.updated,
            md5_hash: object.md5_hash.clone(),
            crc32c: object.crc32c,
            etag: object.etag.clone(),
            content_type: object.content_type.clone(),
            content_encoding: object.content_encoding.clone(),
            content_disposition: object.content_disposition.clone(),
            content_language: object.content_language.clone(),
            cache_control: object.cache_control.clone(),
            metadata: object.custom_metadata.clone(),
        }
    }
}
