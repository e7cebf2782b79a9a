use async_trait::async_trait;
use stowage_common::{Result, StorageError};

use crate::system::MulticastTarget;

/// Client for a running Functions emulator, addressed as `http://host:port`.
pub struct FunctionsEmulatorClient {
    base_url: String,
    client: reqwest::Client,
}

impl FunctionsEmulatorClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Builds a client from a `host:port` pair, as found in
    /// `FUNCTIONS_EMULATOR_HOST`.
    pub fn from_host(host: &str) -> Self {
        if host.starts_with("http://") || host.starts_with("https://") {
            return Self::new(host);
        }
        Self::new(format!("http://{host}"))
    }
}

#[async_trait]
impl MulticastTarget for FunctionsEmulatorClient {
    async fn post(&self, path: &str, body: serde_json::Value, content_type: &str) -> Result<u16> {
        let url = format!("{}{path}", self.base_url);
        let body = serde_json::to_vec(&body).map_err(|err| StorageError::Dispatch(err.to_string()))?;
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
            .map_err(|err| {
                StorageError::Dispatch(format!("failed to reach functions emulator at {url}: {err}"))
            })?;
        Ok(response.status().as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_gets_http_scheme() {
        assert_eq!(FunctionsEmulatorClient::from_host("127.0.0.1:5001").base_url, "http://127.0.0.1:5001");
        assert_eq!(FunctionsEmulatorClient::from_host("http://h:1/").base_url, "http://h:1");
    }
}
