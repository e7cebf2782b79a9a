use async_trait::async_trait;

use crate::errors::{Result, RulesError};

pub use crate::message::FirestoreDocument as Document;

/// Document lookups the evaluator asks for mid-evaluation.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    /// Fetches `projects/{project}/databases/...`; `None` when it does not
    /// exist.
    async fn get_document(&self, path: &str) -> Result<Option<Document>>;
}

/// Firestore emulator REST client, authenticated as the project owner.
pub struct FirestoreEmulatorClient {
    base_url: String,
    client: reqwest::Client,
}

impl FirestoreEmulatorClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Builds a client from a `host:port` pair, as found in
    /// `FIRESTORE_EMULATOR_HOST`.
    pub fn from_host(host: &str) -> Self {
        if host.starts_with("http://") || host.starts_with("https://") {
            return Self::new(host);
        }
        Self::new(format!("http://{host}"))
    }

    fn document_url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl DocumentFetcher for FirestoreEmulatorClient {
    async fn get_document(&self, path: &str) -> Result<Option<Document>> {
        let url = self.document_url(path);
        let response = self
            .client
            .get(&url)
            .bearer_auth("owner")
            .send()
            .await
            .map_err(|err| RulesError::DocumentFetch(format!("{url}: {err}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(RulesError::DocumentFetch(format!(
                "{url} returned status {}",
                response.status()
            )));
        }

        let document = response
            .json::<Document>()
            .await
            .map_err(|err| RulesError::DocumentFetch(format!("{url}: {err}")))?;
        Ok(Some(document))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_url_joins_api_version_and_path() {
        let client = FirestoreEmulatorClient::from_host("127.0.0.1:8080");
        assert_eq!(
            client.document_url("projects/p/databases/(default)/documents/users/u1"),
            "http://127.0.0.1:8080/v1/projects/p/databases/(default)/documents/users/u1"
        );
    }
}
