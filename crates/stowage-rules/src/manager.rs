use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{info, warn};

use crate::errors::{Result, RulesError};
use crate::message::RulesSource;
use crate::ruleset::{StorageRulesIssues, StorageRulesetInstance};
use crate::runtime::StorageRulesRuntime;

type RulesetMap = HashMap<Option<String>, StorageRulesetInstance>;

/// Loaded rulesets: one default plus optional per-bucket overrides.
#[derive(Clone)]
pub struct RulesManager {
    runtime: StorageRulesRuntime,
    rulesets: Arc<RwLock<RulesetMap>>,
}

impl RulesManager {
    pub fn new(runtime: StorageRulesRuntime) -> Self {
        Self {
            runtime,
            rulesets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn runtime(&self) -> &StorageRulesRuntime {
        &self.runtime
    }

    /// Compiles `source` for `bucket` (or as the default when `None`).
    /// A failed compile removes the previous ruleset so checks fail closed.
    pub async fn set_source(
        &self,
        source: RulesSource,
        bucket: Option<&str>,
    ) -> Result<StorageRulesIssues> {
        let key = bucket.map(str::to_string);
        let outcome = self.runtime.load_ruleset(source).await?;

        for warning in &outcome.issues.warnings {
            warn!(bucket = ?key, warning = %warning, "storage rules warning");
        }

        match outcome.ruleset {
            Some(ruleset) => {
                info!(bucket = ?key, ruleset = ruleset.name(), version = ruleset.rules_version(), "storage rules loaded");
                self.write()?.insert(key, ruleset);
                Ok(outcome.issues)
            }
            None => {
                self.write()?.remove(&key);
                for error in &outcome.issues.errors {
                    warn!(bucket = ?key, error = %error, "storage rules failed to compile");
                }
                Err(RulesError::Compile(outcome.issues.errors))
            }
        }
    }

    pub async fn load_from_file(&self, path: &Path, bucket: Option<&str>) -> Result<StorageRulesIssues> {
        let content = tokio::fs::read_to_string(path).await?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "storage.rules".to_string());
        self.set_source(RulesSource::single(name, content), bucket).await
    }

    /// The ruleset governing `bucket`: its override if any, else the default.
    pub fn ruleset(&self, bucket: &str) -> Result<Option<StorageRulesetInstance>> {
        let rulesets = self.read()?;
        Ok(rulesets
            .get(&Some(bucket.to_string()))
            .or_else(|| rulesets.get(&None))
            .cloned())
    }

    pub fn reset(&self) -> Result<()> {
        self.write()?.clear();
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, RulesetMap>> {
        self.rulesets
            .read()
            .map_err(|_| RulesError::LockPoisoned("rulesets"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, RulesetMap>> {
        self.rulesets
            .write()
            .map_err(|_| RulesError::LockPoisoned("rulesets"))
    }
}
