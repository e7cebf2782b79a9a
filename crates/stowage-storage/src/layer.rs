use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use stowage_common::{Result, StorageError};
use stowage_functions::{StorageAction, StorageCloudFunctions};
use stowage_metadata::{BucketMetadata, ObjectMetadata, ObjectMetadataPatch, RulesResourceMetadata};
use stowage_persistence::Persistence;
use stowage_rules::{
    AdminValidator, AllowAllAdmin, AllowAllRules, RulesValidationRequest, RulesValidator,
    RulesetOperationMethod,
};
use stowage_upload::{Upload, UploadService};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::admin_config::{AdminSdkConfigProvider, StaticAdminSdkConfig, default_storage_bucket};
use crate::key::ObjectKey;
use crate::list::{ListObjectsResponse, list_page};
use crate::requests::{
    CopyObjectRequest, CreateDownloadTokenRequest, DeleteDownloadTokenRequest,
    DeleteObjectRequest, GetObjectRequest, ListObjectsRequest, UpdateObjectMetadataRequest,
};

#[derive(Debug, Default)]
pub(crate) struct StorageIndex {
    pub files: HashMap<ObjectKey, ObjectMetadata>,
    pub buckets: BTreeMap<String, BucketMetadata>,
}

impl StorageIndex {
    pub fn ensure_bucket(&mut self, bucket: &str) {
        if !self.buckets.contains_key(bucket) {
            self.buckets
                .insert(bucket.to_string(), BucketMetadata::new(bucket));
        }
    }
}

/// Object and bucket store.
///
/// Clones share the index, so one layer can sit behind security rules while
/// another serves admin traffic over the same objects. No lock is held while
/// rules are evaluated: operations snapshot what they need, evaluate, then
/// take the write lock to mutate.
#[derive(Clone)]
pub struct StorageLayer {
    project_id: String,
    pub(crate) index: Arc<RwLock<StorageIndex>>,
    pub(crate) persistence: Arc<dyn Persistence>,
    functions: StorageCloudFunctions,
    rules: Arc<dyn RulesValidator>,
    admin: Arc<dyn AdminValidator>,
    admin_config: Arc<dyn AdminSdkConfigProvider>,
    acl_warned: Arc<AtomicBool>,
}

impl StorageLayer {
    /// A layer that lets every request through. Use the `with_*` builders to
    /// put it behind rules and credential checks.
    pub fn new(
        project_id: impl Into<String>,
        persistence: Arc<dyn Persistence>,
        functions: StorageCloudFunctions,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            index: Arc::new(RwLock::new(StorageIndex::default())),
            persistence,
            functions,
            rules: Arc::new(AllowAllRules),
            admin: Arc::new(AllowAllAdmin),
            admin_config: Arc::new(StaticAdminSdkConfig::default()),
            acl_warned: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_rules_validator(mut self, rules: Arc<dyn RulesValidator>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_admin_validator(mut self, admin: Arc<dyn AdminValidator>) -> Self {
        self.admin = admin;
        self
    }

    pub fn with_admin_config(mut self, admin_config: Arc<dyn AdminSdkConfigProvider>) -> Self {
        self.admin_config = admin_config;
        self
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.persistence
    }

    /// Drops every object and bucket from the index.
    pub async fn reset(&self) {
        let mut index = self.index.write().await;
        index.files.clear();
        index.buckets.clear();
    }

    pub async fn create_bucket(&self, bucket: &str) {
        self.index.write().await.ensure_bucket(bucket);
    }

    /// Known buckets. An empty store gets the project's default bucket.
    pub async fn list_buckets(&self) -> Vec<BucketMetadata> {
        if self.index.read().await.buckets.is_empty() {
            let bucket = self
                .admin_config
                .default_bucket(&self.project_id)
                .await
                .unwrap_or_else(|| default_storage_bucket(&self.project_id));
            self.create_bucket(&bucket).await;
        }
        self.index.read().await.buckets.values().cloned().collect()
    }

    pub async fn get_metadata(&self, bucket: &str, object: &str) -> Option<ObjectMetadata> {
        let key = ObjectKey::new(bucket, object);
        self.index.read().await.files.get(&key).cloned()
    }

    /// Reads an object. A live download token skips the rules check. An
    /// unauthorized read of a missing object is `Forbidden`, not `NotFound`.
    pub async fn get_object(&self, request: GetObjectRequest) -> Result<(ObjectMetadata, Bytes)> {
        let key = ObjectKey::new(&request.bucket, &request.object);
        let metadata = self.index.read().await.files.get(&key).cloned();

        let has_valid_token = match (&metadata, &request.download_token) {
            (Some(metadata), Some(token)) => metadata.has_download_token(token),
            _ => false,
        };
        if !has_valid_token {
            let before = metadata.as_ref().map(RulesResourceMetadata::from);
            self.authorize(&key, RulesetOperationMethod::Get, before, None, request.authorization)
                .await?;
        }

        let metadata = metadata.ok_or_else(|| StorageError::not_found(key.to_string()))?;
        let bytes = self
            .persistence
            .read_bytes(&key.persistence_key(), Some(metadata.size), 0)
            .await?;
        Ok((metadata, bytes))
    }

    pub async fn delete_object(&self, request: DeleteObjectRequest) -> Result<()> {
        let key = ObjectKey::new(&request.bucket, &request.object);
        let before = self
            .index
            .read()
            .await
            .files
            .get(&key)
            .map(RulesResourceMetadata::from);
        let exists = before.is_some();
        self.authorize(&key, RulesetOperationMethod::Delete, before, None, request.authorization)
            .await?;
        if !exists {
            return Err(StorageError::not_found(key.to_string()));
        }

        let removed = {
            let mut index = self.index.write().await;
            let removed = index
                .files
                .remove(&key)
                .ok_or_else(|| StorageError::not_found(key.to_string()))?;
            self.persistence
                .delete_file(&key.persistence_key(), true)
                .await?;
            removed
        };
        debug!(bucket = %key.bucket(), object = %key.object(), "object deleted");
        self.functions.dispatch(StorageAction::Delete, &removed);
        Ok(())
    }

    /// Applies a metadata patch; the rules see the record before and after.
    pub async fn update_object_metadata(
        &self,
        request: UpdateObjectMetadataRequest,
    ) -> Result<ObjectMetadata> {
        let key = ObjectKey::new(&request.bucket, &request.object);
        let current = self.index.read().await.files.get(&key).cloned();
        let before = current.as_ref().map(RulesResourceMetadata::from);
        let after = current
            .as_ref()
            .map(|metadata| metadata.as_rules_resource(Some(&request.metadata)));
        self.authorize(&key, RulesetOperationMethod::Update, before, after, request.authorization)
            .await?;

        let updated = {
            let mut index = self.index.write().await;
            let metadata = index
                .files
                .get_mut(&key)
                .ok_or_else(|| StorageError::not_found(key.to_string()))?;
            metadata.update(&request.metadata);
            metadata.clone()
        };
        self.functions
            .dispatch(StorageAction::MetadataUpdate, &updated);
        Ok(updated)
    }

    /// Turns the staged bytes of a finished upload into the object,
    /// replacing any previous generation.
    ///
    /// # Panics
    ///
    /// When `upload` is not finished.
    pub async fn upload_object(&self, upload: Upload) -> Result<ObjectMetadata> {
        assert!(
            upload.is_finished(),
            "upload {} handed to the storage layer with status {}",
            upload.id,
            upload.status
        );

        let key = ObjectKey::new(&upload.bucket, &upload.object);
        let bytes = self
            .persistence
            .read_bytes(&upload.path, Some(upload.size), 0)
            .await?;
        let mut metadata = ObjectMetadata::new(key.bucket(), key.object(), &bytes, &upload.metadata);

        let after = Some(RulesResourceMetadata::from(&metadata));
        if let Err(err) = self
            .authorize(&key, RulesetOperationMethod::Create, None, after, upload.authorization.clone())
            .await
        {
            self.persistence.delete_file(&upload.path, true).await?;
            return Err(err);
        }

        metadata.ensure_initial_download_token();
        {
            let mut index = self.index.write().await;
            index.ensure_bucket(key.bucket());
            let persistence_key = key.persistence_key();
            self.persistence.delete_file(&persistence_key, true).await?;
            self.persistence
                .rename_file(&upload.path, &persistence_key)
                .await?;
            index.files.insert(key.clone(), metadata.clone());
        }
        debug!(bucket = %key.bucket(), object = %key.object(), size = metadata.size, "object stored");
        self.functions.dispatch(StorageAction::Finalize, &metadata);
        Ok(metadata)
    }

    /// Finalizes a resumable upload and stores it, recording the outcome so
    /// a repeated finalize replays the same status.
    pub async fn finalize_upload(&self, uploads: &UploadService, upload_id: &str) -> Result<ObjectMetadata> {
        let upload = match uploads.finalize_resumable_upload(upload_id).await {
            Ok(upload) => upload,
            Err(err @ StorageError::UploadPreviouslyFinalized { .. }) => return Err(err),
            Err(err) => {
                uploads.set_response_code(upload_id, err.http_status()).await;
                return Err(err);
            }
        };

        let result = self.upload_object(upload).await;
        let code = match &result {
            Ok(_) => 200,
            Err(err) => err.http_status(),
        };
        uploads.set_response_code(upload_id, code).await;
        result
    }

    /// Server-side copy. Requires elevated credentials; security rules are
    /// not consulted.
    pub async fn copy_object(&self, request: CopyObjectRequest) -> Result<ObjectMetadata> {
        if !self.admin.validate(request.authorization.as_deref()) {
            return Err(StorageError::forbidden("copy requires admin credentials"));
        }

        let source_key = ObjectKey::new(&request.source_bucket, &request.source_object);
        let destination_key = ObjectKey::new(&request.destination_bucket, &request.destination_object);

        let copy = {
            let mut index = self.index.write().await;
            let source = index
                .files
                .get(&source_key)
                .ok_or_else(|| StorageError::not_found(source_key.to_string()))?;
            let copy = source.copied_to(
                destination_key.bucket(),
                destination_key.object(),
                &request.metadata,
            );

            let bytes = self
                .persistence
                .read_bytes(&source_key.persistence_key(), Some(source.size), 0)
                .await?;
            let destination = destination_key.persistence_key();
            self.persistence.delete_file(&destination, true).await?;
            self.persistence.append_bytes(&destination, &bytes).await?;

            index.ensure_bucket(destination_key.bucket());
            index.files.insert(destination_key.clone(), copy.clone());
            copy
        };
        self.functions.dispatch(StorageAction::Finalize, &copy);
        Ok(copy)
    }

    /// Lists one page of objects and prefixes. A single `list` rules check
    /// covers the whole prefix.
    pub async fn list_objects(&self, request: ListObjectsRequest) -> Result<ListObjectsResponse> {
        let key = ObjectKey::new(&request.bucket, request.prefix.trim_end_matches('/'));
        let delimiter = (!request.delimiter.is_empty()).then(|| request.delimiter.clone());
        self.authorize_with(
            &key,
            RulesetOperationMethod::List,
            None,
            None,
            request.authorization,
            delimiter,
        )
        .await?;

        let index = self.index.read().await;
        let names = index
            .files
            .keys()
            .filter(|key| key.bucket() == request.bucket)
            .map(ObjectKey::object);
        let page = list_page(
            names,
            &request.prefix,
            &request.delimiter,
            request.page_token.as_deref(),
            request.max_results,
        );

        let items = page
            .names
            .iter()
            .filter_map(|name| index.files.get(&ObjectKey::new(&request.bucket, name.as_str())))
            .cloned()
            .collect();
        Ok(ListObjectsResponse {
            prefixes: page.prefixes,
            items,
            next_page_token: page.next_page_token,
        })
    }

    pub async fn create_download_token(&self, request: CreateDownloadTokenRequest) -> Result<ObjectMetadata> {
        if !self.admin.validate(request.authorization.as_deref()) {
            return Err(StorageError::forbidden("token management requires admin credentials"));
        }
        let key = ObjectKey::new(&request.bucket, &request.object);
        let mut index = self.index.write().await;
        let metadata = index
            .files
            .get_mut(&key)
            .ok_or_else(|| StorageError::not_found(key.to_string()))?;
        metadata.add_download_token();
        Ok(metadata.clone())
    }

    /// Removes a token; removing the last one mints a replacement.
    pub async fn delete_download_token(&self, request: DeleteDownloadTokenRequest) -> Result<ObjectMetadata> {
        if !self.admin.validate(request.authorization.as_deref()) {
            return Err(StorageError::forbidden("token management requires admin credentials"));
        }
        let key = ObjectKey::new(&request.bucket, &request.object);
        let mut index = self.index.write().await;
        let metadata = index
            .files
            .get_mut(&key)
            .ok_or_else(|| StorageError::not_found(key.to_string()))?;
        metadata.delete_download_token(&request.token);
        Ok(metadata.clone())
    }

    /// Gives a token to an object that has none, e.g. one imported from a
    /// plain Cloud Storage export.
    pub async fn ensure_download_token(&self, bucket: &str, object: &str) -> Result<ObjectMetadata> {
        let key = ObjectKey::new(bucket, object);
        let mut index = self.index.write().await;
        let metadata = index
            .files
            .get_mut(&key)
            .ok_or_else(|| StorageError::not_found(key.to_string()))?;
        metadata.ensure_initial_download_token();
        Ok(metadata.clone())
    }

    /// ACL changes are accepted but not stored; the object only gets a new
    /// metageneration.
    pub async fn touch_object_acl(&self, bucket: &str, object: &str) -> Result<ObjectMetadata> {
        if !self.acl_warned.swap(true, Ordering::Relaxed) {
            warn!("object ACLs are not supported, ACL changes are ignored");
        }
        let key = ObjectKey::new(bucket, object);
        let mut index = self.index.write().await;
        let metadata = index
            .files
            .get_mut(&key)
            .ok_or_else(|| StorageError::not_found(key.to_string()))?;
        metadata.update(&ObjectMetadataPatch::default());
        Ok(metadata.clone())
    }

    async fn authorize(
        &self,
        key: &ObjectKey,
        method: RulesetOperationMethod,
        before: Option<RulesResourceMetadata>,
        after: Option<RulesResourceMetadata>,
        authorization: Option<String>,
    ) -> Result<()> {
        self.authorize_with(key, method, before, after, authorization, None)
            .await
    }

    async fn authorize_with(
        &self,
        key: &ObjectKey,
        method: RulesetOperationMethod,
        before: Option<RulesResourceMetadata>,
        after: Option<RulesResourceMetadata>,
        authorization: Option<String>,
        delimiter: Option<String>,
    ) -> Result<()> {
        let request = RulesValidationRequest {
            bucket: key.bucket().to_string(),
            path: key.rules_path(),
            method,
            before,
            after,
            authorization,
            delimiter,
        };
        if self.rules.validate(request).await? {
            return Ok(());
        }
        debug!(bucket = %key.bucket(), object = %key.object(), %method, "request denied by storage rules");
        Err(StorageError::forbidden(format!("{method} {key}")))
    }
}
