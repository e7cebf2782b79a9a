use std::collections::BTreeMap;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Serialize;
use stowage_common::{hash, time};

use crate::bucket::BucketMetadata;
use crate::object::{DOWNLOAD_TOKENS_METADATA_KEY, ObjectMetadata};

const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

pub fn encode_uri_component(value: &str) -> String {
    utf8_percent_encode(value, URI_COMPONENT).to_string()
}

/// Object metadata as returned by the Firebase flavoured API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingFirebaseMetadata {
    pub name: String,
    pub bucket: String,
    pub generation: String,
    pub metageneration: String,
    pub content_type: String,
    pub time_created: String,
    pub updated: String,
    pub storage_class: String,
    pub size: String,
    pub md5_hash: String,
    pub content_encoding: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_disposition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_tokens: Option<String>,
    pub crc32c: String,
    pub etag: String,
}

impl From<&ObjectMetadata> for OutgoingFirebaseMetadata {
    fn from(object: &ObjectMetadata) -> Self {
        Self {
            name: object.name.clone(),
            bucket: object.bucket.clone(),
            generation: object.generation.to_string(),
            metageneration: object.metageneration.to_string(),
            content_type: object.content_type.clone(),
            time_created: time::to_serialized_date(&object.time_created),
            updated: time::to_serialized_date(&object.updated),
            storage_class: object.storage_class.clone(),
            size: object.size.to_string(),
            md5_hash: object.md5_hash.clone(),
            content_encoding: object.content_encoding.clone(),
            content_disposition: object.content_disposition.clone(),
            content_language: object.content_language.clone(),
            cache_control: object.cache_control.clone(),
            custom_time: object.custom_time.clone(),
            metadata: (!object.custom_metadata.is_empty()).then(|| object.custom_metadata.clone()),
            download_tokens: (!object.download_tokens.is_empty())
                .then(|| object.download_tokens.join(",")),
            crc32c: object.crc32c.to_string(),
            etag: object.etag.clone(),
        }
    }
}

/// Object resource as returned by the Cloud Storage JSON API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudStorageObjectMetadata {
    pub kind: &'static str,
    pub id: String,
    pub self_link: String,
    pub media_link: String,
    pub name: String,
    pub bucket: String,
    pub generation: String,
    pub metageneration: String,
    pub content_type: String,
    pub storage_class: String,
    pub size: String,
    pub md5_hash: String,
    pub crc32c: String,
    pub etag: String,
    pub content_encoding: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_disposition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_time: Option<String>,
    pub time_created: String,
    pub updated: String,
    pub time_storage_class_updated: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl CloudStorageObjectMetadata {
    pub fn new(object: &ObjectMetadata, base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/');
        let encoded_name = encode_uri_component(&object.name);
        let mut metadata = object.custom_metadata.clone();
        if !object.download_tokens.is_empty() {
            metadata.insert(
                DOWNLOAD_TOKENS_METADATA_KEY.to_string(),
                object.download_tokens.join(","),
            );
        }

        Self {
            kind: "storage#object",
            id: format!("{}/{}/{}", object.bucket, object.name, object.generation),
            self_link: format!(
                "{base_url}/storage/v1/b/{}/o/{encoded_name}",
                object.bucket
            ),
            media_link: format!(
                "{base_url}/download/storage/v1/b/{}/o/{encoded_name}?generation={}&alt=media",
                object.bucket, object.generation
            ),
            name: object.name.clone(),
            bucket: object.bucket.clone(),
            generation: object.generation.to_string(),
            metageneration: object.metageneration.to_string(),
            content_type: object.content_type.clone(),
            storage_class: object.storage_class.clone(),
            size: object.size.to_string(),
            md5_hash: object.md5_hash.clone(),
            crc32c: hash::crc32c_to_base64(object.crc32c),
            etag: object.etag.clone(),
            content_encoding: object.content_encoding.clone(),
            content_disposition: object.content_disposition.clone(),
            content_language: object.content_language.clone(),
            cache_control: object.cache_control.clone(),
            custom_time: object.custom_time.clone(),
            time_created: time::to_serialized_date(&object.time_created),
            updated: time::to_serialized_date(&object.updated),
            time_storage_class_updated: time::to_serialized_date(&object.time_created),
            metadata,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudStorageBucketMetadata {
    pub kind: &'static str,
    pub id: String,
    pub self_link: String,
    pub project_number: String,
    pub name: String,
    pub time_created: String,
    pub updated: String,
    pub metageneration: String,
    pub location: String,
    pub location_type: String,
    pub storage_class: String,
    pub etag: String,
}

impl CloudStorageBucketMetadata {
    pub fn new(bucket: &BucketMetadata, base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/');
        Self {
            kind: "storage#bucket",
            id: bucket.name.clone(),
            self_link: format!("{base_url}/v1/b/{}", bucket.name),
            project_number: bucket.project_number.clone(),
            name: bucket.name.clone(),
            time_created: time::to_serialized_date(&bucket.time_created),
            updated: time::to_serialized_date(&bucket.updated),
            metageneration: bucket.metageneration.to_string(),
            location: bucket.location.clone(),
            location_type: bucket.location_type.clone(),
            storage_class: bucket.storage_class.clone(),
            etag: bucket.etag.clone(),
        }
    }
}

/// Response body of a copy issued through the `rewriteTo` endpoint. The
/// rewrite always completes in one call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RewriteResponse {
    pub kind: &'static str,
    pub total_bytes_rewritten: String,
    pub object_size: String,
    pub done: bool,
    pub resource: CloudStorageObjectMetadata,
}

impl RewriteResponse {
    pub fn new(object: &ObjectMetadata, base_url: &str) -> Self {
        Self {
            kind: "storage#rewriteResponse",
            total_bytes_rewritten: object.size.to_string(),
            object_size: object.size.to_string(),
            done: true,
            resource: CloudStorageObjectMetadata::new(object, base_url),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::patch::ObjectMetadataPatch;

    fn object() -> ObjectMetadata {
        let mut object = ObjectMetadata::new(
            "demo",
            "dir/a b.txt",
            b"123456789",
            &ObjectMetadataPatch::default().with_custom_metadata([("k", Some("v"))]),
        );
        object.download_tokens = vec!["t1".to_string(), "t2".to_string()];
        object
    }

    #[test]
    fn firebase_projection_stringifies_numbers() {
        let json = serde_json::to_value(OutgoingFirebaseMetadata::from(&object())).unwrap();
        assert_eq!(json["size"], Value::from("9"));
        assert_eq!(json["metageneration"], Value::from("1"));
        assert_eq!(json["downloadTokens"], Value::from("t1,t2"));
        assert_eq!(json["crc32c"], Value::from(0xE306_9283u32.to_string()));
        assert_eq!(json["metadata"]["k"], Value::from("v"));
        assert!(json.get("cacheControl").is_none());
    }

    #[test]
    fn cloud_projection_folds_tokens_into_metadata() {
        let object = object();
        let json =
            serde_json::to_value(CloudStorageObjectMetadata::new(&object, "http://127.0.0.1:9199/"))
                .unwrap();
        assert_eq!(json["kind"], Value::from("storage#object"));
        assert_eq!(json["crc32c"], Value::from("4waSgw=="));
        assert_eq!(json["metadata"][DOWNLOAD_TOKENS_METADATA_KEY], Value::from("t1,t2"));
        assert_eq!(
            json["selfLink"],
            Value::from("http://127.0.0.1:9199/storage/v1/b/demo/o/dir%2Fa%20b.txt")
        );
        assert_eq!(
            json["id"],
            Value::from(format!("demo/dir/a b.txt/{}", object.generation))
        );
    }

    #[test]
    fn rewrite_reports_full_object_size() {
        let response = RewriteResponse::new(&object(), "http://localhost");
        assert!(response.done);
        assert_eq!(response.total_bytes_rewritten, "9");
        assert_eq!(response.object_size, "9");
    }
}
