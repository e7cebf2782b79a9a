//! On-disk export format:
//!
//! ```text
//! buckets.json            {"buckets":[{"id":"..."}]}
//! blobs/<file name>       object bytes
//! metadata/<file name>.json
//! ```
//!
//! File names come from `Persistence::disk_file_name` of `bucket/object`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stowage_common::{Result, StorageError};
use stowage_metadata::{BucketMetadata, ObjectMetadata};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::key::ObjectKey;
use crate::layer::StorageLayer;

const BUCKETS_FILE: &str = "buckets.json";
const BLOBS_DIR: &str = "blobs";
const METADATA_DIR: &str = "metadata";
const METADATA_EXTENSION: &str = ".json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct BucketsList {
    buckets: Vec<BucketEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BucketEntry {
    id: String,
}

struct ImportedObject {
    key: ObjectKey,
    metadata: ObjectMetadata,
    blob: PathBuf,
}

fn json_error(path: &Path, err: serde_json::Error) -> StorageError {
    StorageError::InternalError(format!("{}: {err}", path.display()))
}

impl StorageLayer {
    /// Writes every bucket, blob and metadata record under `dir`. The index
    /// is only locked while it is snapshotted; objects deleted before their
    /// blob is copied are left out.
    pub async fn export(&self, dir: &Path) -> Result<()> {
        let buckets = self.list_buckets().await;
        let files: Vec<(ObjectKey, ObjectMetadata)> = {
            let index = self.index.read().await;
            index
                .files
                .iter()
                .map(|(key, metadata)| (key.clone(), metadata.clone()))
                .collect()
        };

        let blobs_dir = dir.join(BLOBS_DIR);
        let metadata_dir = dir.join(METADATA_DIR);
        fs::create_dir_all(&blobs_dir).await?;
        fs::create_dir_all(&metadata_dir).await?;

        let buckets_list = BucketsList {
            buckets: buckets
                .into_iter()
                .map(|bucket| BucketEntry { id: bucket.name })
                .collect(),
        };
        let buckets_path = dir.join(BUCKETS_FILE);
        let body = serde_json::to_vec_pretty(&buckets_list)
            .map_err(|err| json_error(&buckets_path, err))?;
        fs::write(&buckets_path, body).await?;

        let mut exported = 0;
        for (key, metadata) in &files {
            let persistence_key = key.persistence_key();
            let file_name = self.persistence.disk_file_name(&persistence_key);

            match fs::copy(
                self.persistence.disk_path(&persistence_key),
                blobs_dir.join(&file_name),
            )
            .await
            {
                Ok(_) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    warn!(object = %key, "object removed during export, skipping");
                    continue;
                }
                Err(err) => return Err(err.into()),
            }

            let metadata_path = metadata_dir.join(format!("{file_name}{METADATA_EXTENSION}"));
            let body = metadata
                .to_json_pretty()
                .map_err(|err| json_error(&metadata_path, err))?;
            fs::write(&metadata_path, body).await?;
            exported += 1;
        }

        info!(dir = %dir.display(), objects = exported, "storage exported");
        Ok(())
    }

    /// Loads an export produced by [`StorageLayer::export`].
    ///
    /// Must not run concurrently with request handling. The index is built
    /// from the manifest and metadata files first, then registered and
    /// populated with blobs in one pass.
    pub async fn import(&self, dir: &Path) -> Result<()> {
        let buckets_path = dir.join(BUCKETS_FILE);
        let buckets: BucketsList = serde_json::from_slice(&fs::read(&buckets_path).await?)
            .map_err(|err| json_error(&buckets_path, err))?;

        let objects = read_exported_objects(dir).await?;

        let mut index = self.index.write().await;
        for bucket in &buckets.buckets {
            index
                .buckets
                .insert(bucket.id.clone(), BucketMetadata::new(&bucket.id));
        }
        for object in &objects {
            index.ensure_bucket(object.key.bucket());
            self.persistence
                .copy_from_external_path(&object.blob, &object.key.persistence_key())
                .await?;
            index
                .files
                .insert(object.key.clone(), object.metadata.clone());
        }

        info!(dir = %dir.display(), objects = objects.len(), buckets = index.buckets.len(), "storage imported");
        Ok(())
    }
}

async fn read_exported_objects(dir: &Path) -> Result<Vec<ImportedObject>> {
    let metadata_dir = dir.join(METADATA_DIR);
    let blobs_dir = dir.join(BLOBS_DIR);

    let mut objects = Vec::new();
    let mut entries = match fs::read_dir(&metadata_dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(objects),
        Err(err) => return Err(err.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let file_name = entry.file_name().to_string_lossy().to_string();
        let Some(blob_name) = file_name.strip_suffix(METADATA_EXTENSION) else {
            debug!(file = %path.display(), "skipping unexpected storage metadata file");
            continue;
        };

        let metadata = ObjectMetadata::from_json(&fs::read(&path).await?)
            .map_err(|err| json_error(&path, err))?;
        let blob = blobs_dir.join(blob_name);
        if !fs::try_exists(&blob).await? {
            warn!(file = %blob_name, "could not find file in storage export");
            continue;
        }

        objects.push(ImportedObject {
            key: ObjectKey::new(&metadata.bucket, &metadata.name),
            metadata,
            blob,
        });
    }
    Ok(objects)
}
