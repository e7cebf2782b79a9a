use std::collections::BTreeMap;

use async_trait::async_trait;
use stowage_metadata::RulesResourceMetadata;
use tracing::{debug, warn};

use crate::manager::RulesManager;
use crate::ruleset::{RulesetOperationMethod, RulesetVerificationOpts};

const OWNER_CREDENTIALS: [&str; 2] = ["Bearer owner", "Firebase owner"];

/// Everything a rules check needs to know about one storage operation.
#[derive(Debug, Clone)]
pub struct RulesValidationRequest {
    pub bucket: String,
    /// Rules path, `b/{bucket}/o/{object}`.
    pub path: String,
    pub method: RulesetOperationMethod,
    pub before: Option<RulesResourceMetadata>,
    pub after: Option<RulesResourceMetadata>,
    /// Raw `Authorization` header value.
    pub authorization: Option<String>,
    pub delimiter: Option<String>,
}

#[async_trait]
pub trait RulesValidator: Send + Sync {
    async fn validate(&self, request: RulesValidationRequest) -> stowage_common::Result<bool>;
}

/// Checks elevated operations (copy, token management).
pub trait AdminValidator: Send + Sync {
    fn validate(&self, authorization: Option<&str>) -> bool;
}

pub fn is_owner_credential(authorization: Option<&str>) -> bool {
    authorization.is_some_and(|value| OWNER_CREDENTIALS.contains(&value.trim()))
}

/// Strips the `Bearer`/`Firebase` scheme, leaving the raw token.
fn bearer_token(authorization: &str) -> &str {
    let value = authorization.trim();
    for scheme in ["Bearer ", "Firebase "] {
        if let Some(token) = value.strip_prefix(scheme) {
            return token.trim();
        }
    }
    value
}

/// Evaluates requests against the loaded security rules.
#[derive(Clone)]
pub struct FirebaseRulesValidator {
    manager: RulesManager,
    project_id: String,
}

impl FirebaseRulesValidator {
    pub fn new(manager: RulesManager, project_id: impl Into<String>) -> Self {
        Self {
            manager,
            project_id: project_id.into(),
        }
    }
}

#[async_trait]
impl RulesValidator for FirebaseRulesValidator {
    async fn validate(&self, request: RulesValidationRequest) -> stowage_common::Result<bool> {
        let Some(ruleset) = self.manager.ruleset(&request.bucket)? else {
            warn!(
                bucket = %request.bucket,
                "no storage rules loaded for bucket, denying request"
            );
            return Ok(false);
        };

        if is_owner_credential(request.authorization.as_deref()) {
            return Ok(true);
        }

        let opts = RulesetVerificationOpts {
            before: request.before,
            after: request.after,
            token: request
                .authorization
                .as_deref()
                .map(bearer_token)
                .filter(|token| !token.is_empty())
                .map(str::to_string),
            method: request.method,
            path: request.path,
            delimiter: request.delimiter,
            project_id: self.project_id.clone(),
        };

        let path = opts.path.clone();
        let method = opts.method;
        let outcome = ruleset.verify(opts, BTreeMap::new()).await?;
        for issue in outcome.issues.all() {
            warn!(path = %path, method = %method, issue = %issue, "storage rules issue");
        }
        debug!(path = %path, method = %method, permitted = ?outcome.permitted, "storage rules verdict");
        Ok(outcome.is_permitted())
    }
}

/// Rules validator for the admin surface, which bypasses security rules.
pub struct AllowAllRules;

#[async_trait]
impl RulesValidator for AllowAllRules {
    async fn validate(&self, _request: RulesValidationRequest) -> stowage_common::Result<bool> {
        Ok(true)
    }
}

/// Only the owner credential may perform elevated operations.
pub struct AdminCredentialValidator;

impl AdminValidator for AdminCredentialValidator {
    fn validate(&self, authorization: Option<&str>) -> bool {
        is_owner_credential(authorization)
    }
}

pub struct AllowAllAdmin;

impl AdminValidator for AllowAllAdmin {
    fn validate(&self, _authorization: Option<&str>) -> bool {
        true
    }
}


#[cfg(all(test, unix))]
mod evaluator_tests {
    use super::*;
    use crate::message::RulesSource;
    use crate::runtime::StorageRulesRuntime;
    use crate::testing::{SCRIPTED_EVALUATOR, fake_evaluator};

    fn request(path: &str, authorization: Option<&str>) -> RulesValidationRequest {
        RulesValidationRequest {
            bucket: "demo".to_string(),
            path: path.to_string(),
            method: RulesetOperationMethod::Get,
            before: None,
            after: None,
            authorization: authorization.map(str::to_string),
            delimiter: None,
        }
    }

    #[tokio::test]
    async fn validates_against_loaded_rules() {
        let fake = fake_evaluator(SCRIPTED_EVALUATOR, 2);
        let runtime = StorageRulesRuntime::new(fake.config.clone(), None);
        runtime.start().await.unwrap();
        let manager = RulesManager::new(runtime.clone());
        let validator = FirebaseRulesValidator::new(manager.clone(), "demo-project");

        assert!(!validator.validate(request("b/demo/o/a.txt", None)).await.unwrap());

        manager
            .set_source(RulesSource::single("storage.rules", "rules"), None)
            .await
            .unwrap();

        assert!(validator.validate(request("b/demo/o/a.txt", None)).await.unwrap());
        assert!(!validator.validate(request("b/demo/o/private/a.txt", None)).await.unwrap());
        assert!(
            validator
                .validate(request("b/demo/o/private/a.txt", Some("Bearer owner")))
                .await
                .unwrap()
        );
        runtime.stop().await;
    }
}
