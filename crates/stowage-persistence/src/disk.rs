use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha2::{Digest, Sha256};
use stowage_common::{Result, StorageError};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

use crate::traits::Persistence;

const MAX_FILE_NAME_LEN: usize = 200;
const TRUNCATED_PREFIX_LEN: usize = 100;

const FILE_NAME_SAFE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

/// Disk-safe file name for a storage key. Long names keep a readable prefix
/// followed by the SHA-256 of the full encoded name.
pub fn disk_file_name(key: &str) -> String {
    let encoded = utf8_percent_encode(key, FILE_NAME_SAFE).to_string();
    if encoded.len() <= MAX_FILE_NAME_LEN {
        return encoded;
    }
    let digest = hex::encode(Sha256::digest(encoded.as_bytes()));
    format!("{}-{digest}", &encoded[..TRUNCATED_PREFIX_LEN])
}

#[derive(Debug, Clone)]
pub struct DiskPersistence {
    dir: PathBuf,
}

impl DiskPersistence {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }
}

#[async_trait]
impl Persistence for DiskPersistence {
    fn dir_path(&self) -> &Path {
        &self.dir
    }

    fn disk_file_name(&self, key: &str) -> String {
        disk_file_name(key)
    }

    async fn read_bytes(&self, key: &str, length: Option<u64>, offset: u64) -> Result<Bytes> {
        let path = self.disk_path(key);
        let mut file = fs::File::open(&path)
            .await
            .map_err(|err| map_key_io_error(key, err))?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).await?;
        }

        let mut buf = Vec::new();
        match length {
            Some(length) => {
                file.take(length).read_to_end(&mut buf).await?;
            }
            None => {
                file.read_to_end(&mut buf).await?;
            }
        }
        Ok(Bytes::from(buf))
    }

    async fn append_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.disk_path(key))
            .await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(())
    }

    async fn delete_file(&self, key: &str, fail_silently: bool) -> Result<()> {
        match fs::remove_file(self.disk_path(key)).await {
            Ok(()) => Ok(()),
            Err(err) if fail_silently => {
                debug!(key, error = %err, "ignoring failed file delete");
                Ok(())
            }
            Err(err) => Err(map_key_io_error(key, err)),
        }
    }

    async fn rename_file(&self, from: &str, to: &str) -> Result<()> {
        fs::rename(self.disk_path(from), self.disk_path(to))
            .await
            .map_err(|err| map_key_io_error(from, err))
    }

    async fn copy_from_external_path(&self, external_path: &Path, key: &str) -> Result<()> {
        fs::copy(external_path, self.disk_path(key))
            .await
            .map_err(|err| map_key_io_error(&external_path.display().to_string(), err))?;
        Ok(())
    }

    async fn delete_all(&self) -> Result<()> {
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(StorageError::Io(err)),
        }
        fs::create_dir_all(&self.dir).await?;
        Ok(())
    }
}

fn map_key_io_error(key: &str, err: std::io::Error) -> StorageError {
    if err.kind() == std::io::ErrorKind::NotFound {
        return StorageError::NotFound(key.to_string());
    }
    StorageError::Io(err)
}
