pub mod auth;
pub mod config;
pub mod download;
pub mod errors;
pub mod expression;
pub mod firestore;
pub mod manager;
pub mod message;
pub mod ruleset;
pub mod runtime;
#[cfg(all(test, unix))]
pub(crate) mod testing;
pub mod validator;

pub use config::RuntimeConfig;
pub use errors::{Result, RulesError};
pub use expression::ExpressionValue;
pub use firestore::{Document, DocumentFetcher, FirestoreEmulatorClient};
pub use manager::RulesManager;
pub use message::{RulesSource, SourceFile};
pub use ruleset::{
    LoadRulesetOutcome, RulesetOperationMethod, RulesetVerificationOpts, StorageRulesIssues,
    StorageRulesetInstance, VerifyOutcome,
};
pub use runtime::{RuntimeState, StorageRulesRuntime};
pub use validator::{
    AdminCredentialValidator, AdminValidator, AllowAllAdmin, AllowAllRules,
    FirebaseRulesValidator, RulesValidationRequest, RulesValidator, is_owner_credential,
};
