use async_trait::async_trait;

/// Source of the project's Admin SDK config, used to name the default bucket.
#[async_trait]
pub trait AdminSdkConfigProvider: Send + Sync {
    async fn default_bucket(&self, project_id: &str) -> Option<String>;
}

pub fn default_storage_bucket(project_id: &str) -> String {
    format!("{project_id}.appspot.com")
}

/// Config known up front, e.g. from the command line.
#[derive(Debug, Clone, Default)]
pub struct StaticAdminSdkConfig {
    pub storage_bucket: Option<String>,
}

impl StaticAdminSdkConfig {
    pub fn new(storage_bucket: Option<String>) -> Self {
        Self { storage_bucket }
    }
}

#[async_trait]
impl AdminSdkConfigProvider for StaticAdminSdkConfig {
    async fn default_bucket(&self, _project_id: &str) -> Option<String> {
        self.storage_bucket.clone()
    }
}
