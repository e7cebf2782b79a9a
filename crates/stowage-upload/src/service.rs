use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use stowage_common::{Result, StorageError};
use stowage_metadata::ObjectMetadataPatch;
use stowage_persistence::Persistence;
use tokio::sync::{RwLock, watch};
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::types::{Upload, UploadStatus, UploadType, staging_path};

#[derive(Debug, Clone)]
pub struct StartResumableUploadRequest {
    pub bucket: String,
    pub object: String,
    pub metadata: ObjectMetadataPatch,
    pub authorization: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MultipartUploadRequest {
    pub bucket: String,
    pub object: String,
    pub metadata: ObjectMetadataPatch,
    pub data: Bytes,
    pub authorization: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MediaUploadRequest {
    pub bucket: String,
    pub object: String,
    pub data: Bytes,
    pub authorization: Option<String>,
}

/// Status reported when a replayed finalize finds nothing recorded.
const DEFAULT_RESPONSE_CODE: u16 = 200;

struct UploadSession {
    upload: Upload,
    /// Status of the first finalize; `None` while it is still being stored.
    response_code: watch::Sender<Option<u16>>,
}

/// Tracks resumable uploads and stages their bytes until the storage layer
/// takes them over. Multipart and media uploads are staged but not tracked.
#[derive(Clone)]
pub struct UploadService {
    persistence: Arc<dyn Persistence>,
    uploads: Arc<RwLock<HashMap<String, UploadSession>>>,
}

impl UploadService {
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self {
            persistence,
            uploads: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn start_resumable_upload(&self, request: StartResumableUploadRequest) -> Result<Upload> {
        let upload = self.new_upload(
            request.bucket,
            request.object,
            UploadType::Resumable,
            request.metadata,
            request.authorization,
        );
        // An empty file lets a zero-byte upload be finalized.
        self.persistence.delete_file(&upload.path, true).await?;
        self.persistence.append_bytes(&upload.path, &[]).await?;

        debug!(upload_id = %upload.id, bucket = %upload.bucket, object = %upload.object, "resumable upload started");
        let (response_code, _) = watch::channel(None);
        self.uploads.write().await.insert(
            upload.id.clone(),
            UploadSession {
                upload: upload.clone(),
                response_code,
            },
        );
        Ok(upload)
    }

    /// Appends `bytes` to an active resumable upload.
    pub async fn continue_resumable_upload(&self, upload_id: &str, bytes: &[u8]) -> Result<Upload> {
        let mut uploads = self.uploads.write().await;
        let upload = &mut session_mut(&mut uploads, upload_id)?.upload;
        if upload.status != UploadStatus::Active {
            return Err(StorageError::UploadNotActive(upload_id.to_string()));
        }

        self.persistence.append_bytes(&upload.path, bytes).await?;
        upload.size += bytes.len() as u64;
        Ok(upload.clone())
    }

    /// Marks an active upload finished. A repeated finalize reports
    /// `UploadPreviouslyFinalized` with the status the first one produced,
    /// waiting for [`UploadService::set_response_code`] if the first is still
    /// in flight.
    pub async fn finalize_resumable_upload(&self, upload_id: &str) -> Result<Upload> {
        let mut response_code = {
            let mut uploads = self.uploads.write().await;
            let session = session_mut(&mut uploads, upload_id)?;
            let upload = &mut session.upload;
            match upload.status {
                UploadStatus::Finished => session.response_code.subscribe(),
                UploadStatus::Cancelled => {
                    return Err(StorageError::UploadNotActive(upload_id.to_string()));
                }
                UploadStatus::Active => {
                    upload.status = UploadStatus::Finished;
                    debug!(upload_id, size = upload.size, "resumable upload finalized");
                    return Ok(upload.clone());
                }
            }
        };

        let status = response_code
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|code| *code);
        Err(StorageError::UploadPreviouslyFinalized {
            upload_id: upload_id.to_string(),
            status,
        })
    }

    /// Cancels an active upload and drops its staged bytes.
    pub async fn cancel_resumable_upload(&self, upload_id: &str) -> Result<Upload> {
        let mut uploads = self.uploads.write().await;
        let upload = &mut session_mut(&mut uploads, upload_id)?.upload;
        match upload.status {
            UploadStatus::Finished => Err(StorageError::NotCancellable(upload_id.to_string())),
            UploadStatus::Cancelled => Err(StorageError::UploadNotActive(upload_id.to_string())),
            UploadStatus::Active => {
                upload.status = UploadStatus::Cancelled;
                self.persistence.delete_file(&upload.path, true).await?;
                debug!(upload_id, "resumable upload cancelled");
                Ok(upload.clone())
            }
        }
    }

    pub async fn get_resumable_upload(&self, upload_id: &str) -> Result<Upload> {
        self.uploads
            .read()
            .await
            .get(upload_id)
            .map(|session| session.upload.clone())
            .ok_or_else(|| StorageError::not_found(format!("upload {upload_id}")))
    }

    /// Stages a multipart upload; the returned upload is already finished.
    pub async fn multipart_upload(&self, request: MultipartUploadRequest) -> Result<Upload> {
        let upload = self.new_upload(
            request.bucket,
            request.object,
            UploadType::Multipart,
            request.metadata,
            request.authorization,
        );
        self.one_shot_upload(upload, &request.data).await
    }

    /// Stages a media upload: the whole body is the object.
    pub async fn media_upload(&self, request: MediaUploadRequest) -> Result<Upload> {
        let upload = self.new_upload(
            request.bucket,
            request.object,
            UploadType::Media,
            ObjectMetadataPatch::default(),
            request.authorization,
        );
        self.one_shot_upload(upload, &request.data).await
    }

    /// Records the status returned for a finalize so a replay can repeat it.
    /// Unknown ids are ignored.
    pub async fn set_response_code(&self, upload_id: &str, code: u16) {
        if let Some(session) = self.uploads.read().await.get(upload_id) {
            session.response_code.send_replace(Some(code));
        }
    }

    /// Status of the first finalize, or 200 when none was recorded.
    pub async fn get_previous_response_code(&self, upload_id: &str) -> u16 {
        self.uploads
            .read()
            .await
            .get(upload_id)
            .and_then(|session| *session.response_code.borrow())
            .unwrap_or(DEFAULT_RESPONSE_CODE)
    }

    async fn one_shot_upload(&self, mut upload: Upload, data: &[u8]) -> Result<Upload> {
        self.persistence.delete_file(&upload.path, true).await?;
        self.persistence.append_bytes(&upload.path, data).await?;
        upload.size = data.len() as u64;
        upload.status = UploadStatus::Finished;
        Ok(upload)
    }

    fn new_upload(
        &self,
        bucket: String,
        object: String,
        upload_type: UploadType,
        metadata: ObjectMetadataPatch,
        authorization: Option<String>,
    ) -> Upload {
        let id = Uuid::new_v4().to_string();
        Upload {
            path: staging_path(&id, &bucket, &object),
            id,
            bucket,
            object,
            upload_type,
            status: UploadStatus::Active,
            metadata,
            size: 0,
            authorization,
        }
    }
}

fn session_mut<'a>(
    uploads: &'a mut HashMap<String, UploadSession>,
    upload_id: &str,
) -> Result<&'a mut UploadSession> {
    uploads
        .get_mut(upload_id)
        .ok_or_else(|| StorageError::not_found(format!("upload {upload_id}")))
}

/// Session URL for the Cloud Storage JSON API resumable protocol.
pub fn resumable_upload_url(base: &str, bucket: &str, object: &str, upload_id: &str) -> Result<Url> {
    let mut url = parse_base(base)?;
    url.set_path(&format!("/upload/storage/v1/b/{bucket}/o"));
    url.query_pairs_mut()
        .append_pair("name", object)
        .append_pair("uploadType", "resumable")
        .append_pair("upload_id", upload_id);
    Ok(url)
}

/// Session URL for the Firebase Storage resumable protocol.
pub fn firebase_resumable_upload_url(
    base: &str,
    bucket: &str,
    object: &str,
    upload_id: &str,
) -> Result<Url> {
    let mut url = parse_base(base)?;
    url.set_path(&format!("/v0/b/{bucket}/o"));
    url.query_pairs_mut()
        .append_pair("name", object)
        .append_pair("upload_id", upload_id)
        .append_pair("upload_protocol", "resumable");
    Ok(url)
}

fn parse_base(base: &str) -> Result<Url> {
    Url::parse(base).map_err(|err| StorageError::InvalidArgument(format!("invalid base url {base}: {err}")))
}

#[cfg(test)]
mod tests {
    use stowage_persistence::DiskPersistence;

    use super::*;

    async fn service() -> (tempfile::TempDir, Arc<DiskPersistence>, UploadService) {
        let dir = tempfile::tempdir().unwrap();
        let persistence = Arc::new(DiskPersistence::new(dir.path().to_path_buf()).await.unwrap());
        let service = UploadService::new(persistence.clone());
        (dir, persistence, service)
    }

    fn start_request() -> StartResumableUploadRequest {
        StartResumableUploadRequest {
            bucket: "demo".to_string(),
            object: "a.txt".to_string(),
            metadata: ObjectMetadataPatch::default(),
            authorization: Some("Bearer token".to_string()),
        }
    }

    #[tokio::test]
    async fn resumable_chunks_accumulate_until_finalize() {
        let (_dir, persistence, service) = service().await;
        let upload = service.start_resumable_upload(start_request()).await.unwrap();
        assert_eq!(upload.status, UploadStatus::Active);
        assert_eq!(upload.path, format!("{}_b_demo_o_a.txt", upload.id));

        service.continue_resumable_upload(&upload.id, b"hel").await.unwrap();
        let upload = service.continue_resumable_upload(&upload.id, b"lo").await.unwrap();
        assert_eq!(upload.size, 5);

        let queried = service.get_resumable_upload(&upload.id).await.unwrap();
        assert_eq!(queried.size, 5);
        assert_eq!(queried.status.as_str(), "active");

        let finished = service.finalize_resumable_upload(&upload.id).await.unwrap();
        assert!(finished.is_finished());
        assert_eq!(finished.authorization.as_deref(), Some("Bearer token"));
        assert_eq!(
            persistence.read_bytes(&finished.path, None, 0).await.unwrap(),
            Bytes::from_static(b"hello")
        );

        let err = service
            .continue_resumable_upload(&upload.id, b"more")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::UploadNotActive(_)));
    }

    #[tokio::test]
    async fn repeated_finalize_replays_recorded_status() {
        let (_dir, _persistence, service) = service().await;
        let upload = service.start_resumable_upload(start_request()).await.unwrap();
        service.finalize_resumable_upload(&upload.id).await.unwrap();
        service.set_response_code(&upload.id, 403).await;

        for _ in 0..2 {
            let err = service.finalize_resumable_upload(&upload.id).await.unwrap_err();
            assert!(matches!(
                err,
                StorageError::UploadPreviouslyFinalized { status: Some(403), .. }
            ));
            assert_eq!(err.http_status(), 403);
            assert_eq!(service.get_previous_response_code(&upload.id).await, 403);
        }
    }

    #[tokio::test]
    async fn cancel_transitions_and_removes_staged_bytes() {
        let (_dir, persistence, service) = service().await;
        let upload = service.start_resumable_upload(start_request()).await.unwrap();
        service.continue_resumable_upload(&upload.id, b"abc").await.unwrap();

        let cancelled = service.cancel_resumable_upload(&upload.id).await.unwrap();
        assert_eq!(cancelled.status, UploadStatus::Cancelled);
        assert!(persistence.read_bytes(&upload.path, None, 0).await.unwrap_err().is_not_found());

        let err = service.cancel_resumable_upload(&upload.id).await.unwrap_err();
        assert!(matches!(err, StorageError::UploadNotActive(_)));
        let err = service.finalize_resumable_upload(&upload.id).await.unwrap_err();
        assert!(matches!(err, StorageError::UploadNotActive(_)));
        let err = service.continue_resumable_upload(&upload.id, b"x").await.unwrap_err();
        assert!(matches!(err, StorageError::UploadNotActive(_)));
    }

    #[tokio::test]
    async fn finished_upload_cannot_be_cancelled() {
        let (_dir, _persistence, service) = service().await;
        let upload = service.start_resumable_upload(start_request()).await.unwrap();
        service.finalize_resumable_upload(&upload.id).await.unwrap();

        let err = service.cancel_resumable_upload(&upload.id).await.unwrap_err();
        assert!(matches!(err, StorageError::NotCancellable(_)));
        assert_eq!(err.http_status(), 400);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let (_dir, _persistence, service) = service().await;
        assert!(service.get_resumable_upload("nope").await.unwrap_err().is_not_found());
        assert!(service.finalize_resumable_upload("nope").await.unwrap_err().is_not_found());
        assert!(service.cancel_resumable_upload("nope").await.unwrap_err().is_not_found());
        assert!(
            service
                .continue_resumable_upload("nope", b"x")
                .await
                .unwrap_err()
                .is_not_found()
        );
        service.set_response_code("nope", 403).await;
        assert_eq!(service.get_previous_response_code("nope").await, 200);
    }

    #[tokio::test]
    async fn one_shot_uploads_are_finished_immediately() {
        let (_dir, persistence, service) = service().await;
        let multipart = service
            .multipart_upload(MultipartUploadRequest {
                bucket: "demo".to_string(),
                object: "m.txt".to_string(),
                metadata: ObjectMetadataPatch::from_json(br#"{"contentType":"text/plain"}"#)
                    .unwrap(),
                data: Bytes::from_static(b"multi"),
                authorization: None,
            })
            .await
            .unwrap();
        assert!(multipart.is_finished());
        assert_eq!(multipart.upload_type, UploadType::Multipart);
        assert_eq!(multipart.size, 5);

        let media = service
            .media_upload(MediaUploadRequest {
                bucket: "demo".to_string(),
                object: "raw.bin".to_string(),
                data: Bytes::from_static(b"\x00\x01"),
                authorization: None,
            })
            .await
            .unwrap();
        assert!(media.is_finished());
        assert_eq!(
            persistence.read_bytes(&media.path, None, 0).await.unwrap(),
            Bytes::from_static(b"\x00\x01")
        );
        assert!(service.get_resumable_upload(&media.id).await.unwrap_err().is_not_found());
        assert!(service.uploads.read().await.is_empty());
    }

    #[tokio::test]
    async fn replayed_finalize_waits_for_first_outcome() {
        let (_dir, _persistence, service) = service().await;
        let upload = service.start_resumable_upload(start_request()).await.unwrap();
        service.finalize_resumable_upload(&upload.id).await.unwrap();

        let replay = tokio::spawn({
            let service = service.clone();
            let upload_id = upload.id.clone();
            async move { service.finalize_resumable_upload(&upload_id).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!replay.is_finished());

        service.set_response_code(&upload.id, 200).await;
        let err = replay.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            StorageError::UploadPreviouslyFinalized { status: Some(200), .. }
        ));
    }

    #[test]
    fn upload_urls_carry_session_id() {
        let url = resumable_upload_url("http://127.0.0.1:9199", "demo", "dir/a b.txt", "u1").unwrap();
        assert_eq!(url.path(), "/upload/storage/v1/b/demo/o");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("name".to_string(), "dir/a b.txt".to_string()),
                ("uploadType".to_string(), "resumable".to_string()),
                ("upload_id".to_string(), "u1".to_string()),
            ]
        );

        let url = firebase_resumable_upload_url("http://localhost:9199", "demo", "a", "u2").unwrap();
        assert_eq!(url.path(), "/v0/b/demo/o");
        assert!(url.query().unwrap().contains("upload_protocol=resumable"));
        assert!(resumable_upload_url("not a url", "b", "o", "u").is_err());
    }
}
