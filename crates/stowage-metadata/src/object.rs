use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stowage_common::{hash, time};
use uuid::Uuid;

use crate::patch::{ObjectMetadataPatch, Patch};
use crate::rules_resource::RulesResourceMetadata;

/// Custom metadata key under which clients smuggle download tokens.
pub const DOWNLOAD_TOKENS_METADATA_KEY: &str = "firebaseStorageDownloadTokens";

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
pub const DEFAULT_CONTENT_ENCODING: &str = "identity";
pub const DEFAULT_STORAGE_CLASS: &str = "STANDARD";

fn default_content_type() -> String {
    DEFAULT_CONTENT_TYPE.to_string()
}

fn default_content_encoding() -> String {
    DEFAULT_CONTENT_ENCODING.to_string()
}

fn default_storage_class() -> String {
    DEFAULT_STORAGE_CLASS.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    pub name: String,
    pub bucket: String,
    pub generation: i64,
    pub metageneration: i64,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    pub time_created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default = "default_storage_class")]
    pub storage_class: String,
    pub size: u64,
    pub md5_hash: String,
    pub crc32c: u32,
    pub etag: String,
    #[serde(default)]
    pub download_tokens: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_disposition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_language: Option<String>,
    #[serde(default = "default_content_encoding")]
    pub content_encoding: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_time: Option<String>,
    #[serde(default)]
    pub custom_metadata: BTreeMap<String, String>,
}

impl ObjectMetadata {
    /// Builds a fresh record for `bytes`. Digests always come from the bytes,
    /// never from the incoming metadata.
    pub fn new(
        bucket: impl Into<String>,
        name: impl Into<String>,
        bytes: &[u8],
        incoming: &ObjectMetadataPatch,
    ) -> Self {
        let now = time::now();
        let generation = now.timestamp_millis();
        let mut metadata = Self {
            name: name.into(),
            bucket: bucket.into(),
            generation,
            metageneration: 1,
            content_type: default_content_type(),
            time_created: now,
            updated: now,
            storage_class: default_storage_class(),
            size: bytes.len() as u64,
            md5_hash: hash::md5_base64(bytes),
            crc32c: hash::crc32c(bytes),
            etag: hash::etag(generation, 1),
            download_tokens: Vec::new(),
            content_disposition: None,
            cache_control: None,
            content_language: None,
            content_encoding: default_content_encoding(),
            custom_time: None,
            custom_metadata: BTreeMap::new(),
        };
        metadata.apply_patch(incoming);
        metadata
    }

    /// Reconstructs a record from its exported JSON. The stored etag and
    /// digests are kept as-is.
    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        let mut metadata: Self = serde_json::from_slice(bytes)?;
        metadata.absorb_reserved_tokens();
        Ok(metadata)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    /// Copy of this object stored at `bucket/name` as a brand new generation.
    ///
    /// Content fields from `overrides` win over the source's. Custom metadata
    /// is all-or-nothing: when `overrides` carries a map it replaces the
    /// source's entirely and the copy gets its own download token; otherwise
    /// the source's map and tokens carry over.
    pub fn copied_to(
        &self,
        bucket: impl Into<String>,
        name: impl Into<String>,
        overrides: &ObjectMetadataPatch,
    ) -> Self {
        let now = time::now();
        let generation = now.timestamp_millis();
        let mut copy = Self {
            name: name.into(),
            bucket: bucket.into(),
            generation,
            metageneration: 1,
            time_created: now,
            updated: now,
            etag: hash::etag(generation, 1),
            ..self.clone()
        };
        if overrides.has_custom_metadata() {
            copy.custom_metadata.clear();
            copy.download_tokens.clear();
        }
        copy.apply_patch(overrides);
        copy.ensure_initial_download_token();
        copy
    }

    /// Applies `patch` as a metadata mutation: bumps metageneration, the
    /// update time and the etag.
    pub fn update(&mut self, patch: &ObjectMetadataPatch) {
        self.apply_patch(patch);
        self.metageneration += 1;
        self.updated = time::now();
        self.etag = hash::etag(self.generation, self.metageneration);
    }

    pub fn add_download_token(&mut self) -> String {
        let token = Uuid::new_v4().to_string();
        self.download_tokens.push(token.clone());
        self.update(&ObjectMetadataPatch::default());
        token
    }

    /// Removes `token`. An object never ends up without a token once it has
    /// had one: removing the last one mints a replacement.
    pub fn delete_download_token(&mut self, token: &str) {
        self.download_tokens.retain(|existing| existing != token);
        if self.download_tokens.is_empty() {
            self.download_tokens.push(Uuid::new_v4().to_string());
        }
        self.update(&ObjectMetadataPatch::default());
    }

    pub fn has_download_token(&self, token: &str) -> bool {
        self.download_tokens.iter().any(|existing| existing == token)
    }

    /// Mints a token for a record that has none, without counting it as a
    /// metadata mutation. Returns whether a token was added.
    pub fn ensure_initial_download_token(&mut self) -> bool {
        if !self.download_tokens.is_empty() {
            return false;
        }
        self.download_tokens.push(Uuid::new_v4().to_string());
        true
    }

    /// The resource the rules evaluator sees, after `proposed` changes (if
    /// any) have been applied to a copy of this record.
    pub fn as_rules_resource(&self, proposed: Option<&ObjectMetadataPatch>) -> RulesResourceMetadata {
        let mut resource = self.clone();
        if let Some(proposed) = proposed {
            resource.update(proposed);
        }
        RulesResourceMetadata::from(&resource)
    }

    fn apply_patch(&mut self, patch: &ObjectMetadataPatch) {
        match &patch.content_type {
            Patch::Absent => {}
            Patch::Clear => self.content_type = default_content_type(),
            Patch::Set(value) => self.content_type = value.clone(),
        }
        match &patch.content_encoding {
            Patch::Absent => {}
            Patch::Clear => self.content_encoding = default_content_encoding(),
            Patch::Set(value) => self.content_encoding = value.clone(),
        }
        patch.content_language.apply_to(&mut self.content_language);
        patch.content_disposition.apply_to(&mut self.content_disposition);
        patch.cache_control.apply_to(&mut self.cache_control);
        patch.custom_time.apply_to(&mut self.custom_time);

        match &patch.custom_metadata {
            Patch::Absent => {}
            Patch::Clear => self.custom_metadata.clear(),
            Patch::Set(entries) => {
                for (key, value) in entries {
                    match value {
                        Some(value) => {
                            self.custom_metadata
                                .insert(key.clone(), value.as_str().to_string());
                        }
                        None => {
                            self.custom_metadata.remove(key);
                        }
                    }
                }
            }
        }
        self.absorb_reserved_tokens();
    }

    fn absorb_reserved_tokens(&mut self) {
        let Some(raw) = self.custom_metadata.remove(DOWNLOAD_TOKENS_METADATA_KEY) else {
            return;
        };
        for token in raw.split(',').map(str::trim).filter(|token| !token.is_empty()) {
            if !self.has_download_token(token) {
                self.download_tokens.push(token.to_string());
            }
        }
    }
}
