use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use stowage_common::Result;

/// Byte-level file operations keyed by logical storage keys.
#[async_trait]
pub trait Persistence: Send + Sync {
    fn dir_path(&self) -> &Path;

    fn disk_file_name(&self, key: &str) -> String;

    fn disk_path(&self, key: &str) -> PathBuf {
        self.dir_path().join(self.disk_file_name(key))
    }

    /// Reads `length` bytes starting at `offset`, or everything after
    /// `offset` when `length` is `None`.
    async fn read_bytes(&self, key: &str, length: Option<u64>, offset: u64) -> Result<Bytes>;

    async fn append_bytes(&self, key: &str, bytes: &[u8]) -> Result<()>;

    async fn delete_file(&self, key: &str, fail_silently: bool) -> Result<()>;

    async fn rename_file(&self, from: &str, to: &str) -> Result<()>;

    async fn copy_from_external_path(&self, external_path: &Path, key: &str) -> Result<()>;

    /// Drops every stored file.
    async fn delete_all(&self) -> Result<()>;
}
