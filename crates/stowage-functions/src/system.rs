use std::sync::Arc;

use async_trait::async_trait;
use futures::future;
use serde::Serialize;
use stowage_common::{Result, StorageError};
use stowage_metadata::ObjectMetadata;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::types::{CloudEvent, LegacyEvent, StorageAction};

pub const MULTICAST_CONTENT_TYPE_JSON: &str = "application/json";
pub const MULTICAST_CONTENT_TYPE_CLOUD_EVENT: &str = "application/cloudevents+json; charset=UTF-8";

/// The Functions emulator's multicast trigger endpoint.
#[async_trait]
pub trait MulticastTarget: Send + Sync {
    /// POSTs `body` to `path` and returns the response status code.
    async fn post(&self, path: &str, body: serde_json::Value, content_type: &str) -> Result<u16>;
}

#[derive(Clone)]
pub struct StorageCloudFunctions {
    target: Option<Arc<dyn MulticastTarget>>,
    project_id: String,
    base_url: String,
}

impl StorageCloudFunctions {
    pub fn new(
        target: Option<Arc<dyn MulticastTarget>>,
        project_id: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            target,
            project_id: project_id.into(),
            base_url: base_url.into(),
        }
    }

    pub fn disabled(project_id: impl Into<String>) -> Self {
        Self::new(None, project_id, "")
    }

    pub fn is_enabled(&self) -> bool {
        self.target.is_some()
    }

    fn multicast_path(&self) -> String {
        format!("/functions/projects/{}/trigger_multicast", self.project_id)
    }

    /// Notifies the Functions emulator about `action` on `object` in the
    /// background. Failures are logged, never returned; the handle only lets
    /// callers wait for delivery.
    pub fn dispatch(&self, action: StorageAction, object: &ObjectMetadata) -> Option<JoinHandle<()>> {
        let target = self.target.clone()?;

        let legacy = LegacyEvent::new(action, object, &self.project_id, &self.base_url);
        let cloud_event = CloudEvent::new(action, object, &self.base_url);
        let path = self.multicast_path();
        let bucket = object.bucket.clone();
        let name = object.name.clone();

        Some(tokio::spawn(async move {
            let (legacy, cloud_event) = future::join(
                deliver(target.as_ref(), &path, &legacy, MULTICAST_CONTENT_TYPE_JSON),
                deliver(target.as_ref(), &path, &cloud_event, MULTICAST_CONTENT_TYPE_CLOUD_EVENT),
            )
            .await;
            let errors: Vec<StorageError> = [legacy, cloud_event]
                .into_iter()
                .filter_map(|result| result.err())
                .collect();

            if errors.is_empty() {
                debug!(%action, bucket = %bucket, object = %name, "dispatched storage function triggers");
                return;
            }

            let errors = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            warn!(%action, bucket = %bucket, object = %name, errors = %errors, "failed to trigger storage function");
        }))
    }
}

async fn deliver(
    target: &dyn MulticastTarget,
    path: &str,
    event: &impl Serialize,
    content_type: &str,
) -> Result<()> {
    let body = serde_json::to_value(event).map_err(|err| StorageError::Dispatch(err.to_string()))?;
    let status = target.post(path, body, content_type).await?;
    if status != 200 {
        return Err(StorageError::Dispatch(format!(
            "multicast trigger returned status {status}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use stowage_metadata::ObjectMetadataPatch;

    use super::*;

    #[derive(Default)]
    struct RecordingTarget {
        status: u16,
        calls: Mutex<Vec<(String, serde_json::Value, String)>>,
    }

    #[async_trait]
    impl MulticastTarget for RecordingTarget {
        async fn post(&self, path: &str, body: serde_json::Value, content_type: &str) -> Result<u16> {
            self.calls
                .lock()
                .unwrap()
                .push((path.to_string(), body, content_type.to_string()));
            Ok(self.status)
        }
    }

    fn object() -> ObjectMetadata {
        ObjectMetadata::new("demo", "a.txt", b"x", &ObjectMetadataPatch::default())
    }

    #[tokio::test]
    async fn dispatch_without_target_is_noop() {
        let functions = StorageCloudFunctions::disabled("p");
        assert!(!functions.is_enabled());
        assert!(functions.dispatch(StorageAction::Finalize, &object()).is_none());
    }

    #[tokio::test]
    async fn dispatch_sends_legacy_and_cloud_event() {
        let target = Arc::new(RecordingTarget {
            status: 200,
            ..Default::default()
        });
        let functions = StorageCloudFunctions::new(Some(target.clone()), "p", "http://h");
        functions
            .dispatch(StorageAction::Delete, &object())
            .unwrap()
            .await
            .unwrap();

        let calls = target.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|(path, _, _)| path == "/functions/projects/p/trigger_multicast"));
        assert_eq!(calls[0].1["eventType"], "google.storage.object.delete");
        assert_eq!(calls[1].1["type"], "google.cloud.storage.object.v1.deleted");
        assert_eq!(calls[1].2, MULTICAST_CONTENT_TYPE_CLOUD_EVENT);
    }

    #[tokio::test]
    async fn failed_delivery_is_swallowed() {
        let target = Arc::new(RecordingTarget {
            status: 500,
            ..Default::default()
        });
        let functions = StorageCloudFunctions::new(Some(target.clone()), "p", "http://h");
        let handle = functions.dispatch(StorageAction::Finalize, &object()).unwrap();
        assert!(handle.await.is_ok());
        assert_eq!(target.calls.lock().unwrap().len(), 2);
    }
}
