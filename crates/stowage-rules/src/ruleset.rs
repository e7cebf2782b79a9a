use std::collections::BTreeMap;

use serde::Serialize;
use stowage_metadata::RulesResourceMetadata;

use crate::errors::Result;
use crate::expression::ExpressionValue;
use crate::message::RuntimeActionResponse;
use crate::runtime::StorageRulesRuntime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RulesetOperationMethod {
    Get,
    List,
    Create,
    Update,
    Delete,
}

impl RulesetOperationMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::List => "list",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for RulesetOperationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct RulesetVerificationOpts {
    pub before: Option<RulesResourceMetadata>,
    pub after: Option<RulesResourceMetadata>,
    pub token: Option<String>,
    pub method: RulesetOperationMethod,
    pub path: String,
    pub delimiter: Option<String>,
    pub project_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageRulesIssues {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl StorageRulesIssues {
    pub fn from_response(response: &RuntimeActionResponse) -> Self {
        Self {
            errors: response.errors.clone(),
            warnings: response.warnings.clone(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            errors: Vec::new(),
            warnings: vec![message.into()],
        }
    }

    pub fn all(&self) -> impl Iterator<Item = &String> {
        self.errors.iter().chain(self.warnings.iter())
    }

    pub fn exist(&self) -> bool {
        !self.errors.is_empty() || !self.warnings.is_empty()
    }

    pub fn extend(&mut self, other: StorageRulesIssues) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

#[derive(Debug, Clone, Default)]
pub struct VerifyOutcome {
    /// `None` when evaluation produced errors instead of a verdict.
    pub permitted: Option<bool>,
    pub issues: StorageRulesIssues,
}

impl VerifyOutcome {
    pub fn is_permitted(&self) -> bool {
        self.permitted == Some(true)
    }
}

pub struct LoadRulesetOutcome {
    pub ruleset: Option<StorageRulesetInstance>,
    pub issues: StorageRulesIssues,
}

pub const LIST_REQUIRES_V2: &str =
    "Permission denied. List operations are only allowed for rules_version='2'.";

/// A compiled ruleset living inside the evaluator process.
#[derive(Clone)]
pub struct StorageRulesetInstance {
    runtime: StorageRulesRuntime,
    rules_version: i64,
    ruleset_name: String,
}

impl StorageRulesetInstance {
    pub(crate) fn new(runtime: StorageRulesRuntime, rules_version: i64, ruleset_name: String) -> Self {
        Self {
            runtime,
            rules_version,
            ruleset_name,
        }
    }

    pub fn rules_version(&self) -> i64 {
        self.rules_version
    }

    pub fn name(&self) -> &str {
        &self.ruleset_name
    }

    pub async fn verify(
        &self,
        opts: RulesetVerificationOpts,
        overrides: BTreeMap<String, ExpressionValue>,
    ) -> Result<VerifyOutcome> {
        if opts.method == RulesetOperationMethod::List && self.rules_version < 2 {
            return Ok(VerifyOutcome {
                permitted: Some(false),
                issues: StorageRulesIssues::warning(LIST_REQUIRES_V2),
            });
        }

        self.runtime
            .verify_with_ruleset(&self.ruleset_name, opts, overrides)
            .await
    }
}
