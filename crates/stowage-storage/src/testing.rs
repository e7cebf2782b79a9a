use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use stowage_functions::{MulticastTarget, StorageCloudFunctions};
use stowage_metadata::{ObjectMetadata, ObjectMetadataPatch};
use stowage_persistence::DiskPersistence;
use stowage_rules::{AdminCredentialValidator, RulesValidationRequest, RulesValidator};
use stowage_upload::{MediaUploadRequest, MultipartUploadRequest, UploadService};

use crate::layer::StorageLayer;

/// Denies every path containing `private` and records what it was asked.
#[derive(Default)]
pub struct ScriptedRules {
    pub requests: Mutex<Vec<RulesValidationRequest>>,
}

#[async_trait]
impl RulesValidator for ScriptedRules {
    async fn validate(&self, request: RulesValidationRequest) -> stowage_common::Result<bool> {
        let permitted = !request.path.contains("private");
        self.requests.lock().unwrap().push(request);
        Ok(permitted)
    }
}

/// Allows everything after a fixed delay.
pub struct SlowRules(pub Duration);

#[async_trait]
impl RulesValidator for SlowRules {
    async fn validate(&self, _request: RulesValidationRequest) -> stowage_common::Result<bool> {
        tokio::time::sleep(self.0).await;
        Ok(true)
    }
}

#[derive(Default)]
pub struct RecordingTarget {
    pub calls: Mutex<Vec<serde_json::Value>>,
}

impl RecordingTarget {
    /// Event types received so far, waiting briefly for `count` of them.
    pub async fn event_types(&self, count: usize) -> Vec<String> {
        for _ in 0..200 {
            if self.calls.lock().unwrap().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|body| body.get("eventType").and_then(|value| value.as_str()))
            .map(str::to_string)
            .collect()
    }
}

#[async_trait]
impl MulticastTarget for RecordingTarget {
    async fn post(
        &self,
        _path: &str,
        body: serde_json::Value,
        _content_type: &str,
    ) -> stowage_common::Result<u16> {
        self.calls.lock().unwrap().push(body);
        Ok(200)
    }
}

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub persistence: Arc<DiskPersistence>,
    pub uploads: UploadService,
    pub rules: Arc<ScriptedRules>,
    pub target: Arc<RecordingTarget>,
    /// Behind `ScriptedRules` and owner-only admin checks.
    pub layer: StorageLayer,
    /// Shares the index with `layer`, no checks.
    pub admin: StorageLayer,
}

pub async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let persistence = Arc::new(DiskPersistence::new(dir.path().join("storage")).await.unwrap());
    let uploads = UploadService::new(persistence.clone());
    let rules = Arc::new(ScriptedRules::default());
    let target = Arc::new(RecordingTarget::default());
    let functions = StorageCloudFunctions::new(Some(target.clone()), "demo-project", "http://127.0.0.1:9199");

    let admin = StorageLayer::new("demo-project", persistence.clone(), functions);
    let layer = admin
        .clone()
        .with_rules_validator(rules.clone())
        .with_admin_validator(Arc::new(AdminCredentialValidator));

    Fixture {
        dir,
        persistence,
        uploads,
        rules,
        target,
        layer,
        admin,
    }
}

impl Fixture {
    /// Stores an object through the admin layer.
    pub async fn media(&self, bucket: &str, object: &str, data: &'static [u8]) -> ObjectMetadata {
        let upload = self
            .uploads
            .media_upload(MediaUploadRequest {
                bucket: bucket.to_string(),
                object: object.to_string(),
                data: Bytes::from_static(data),
                authorization: None,
            })
            .await
            .unwrap();
        self.admin.upload_object(upload).await.unwrap()
    }

    pub async fn multipart(
        &self,
        bucket: &str,
        object: &str,
        metadata: &str,
        data: &'static [u8],
    ) -> ObjectMetadata {
        let upload = self
            .uploads
            .multipart_upload(MultipartUploadRequest {
                bucket: bucket.to_string(),
                object: object.to_string(),
                metadata: ObjectMetadataPatch::from_json(metadata.as_bytes()).unwrap(),
                data: Bytes::from_static(data),
                authorization: None,
            })
            .await
            .unwrap();
        self.admin.upload_object(upload).await.unwrap()
    }
}
