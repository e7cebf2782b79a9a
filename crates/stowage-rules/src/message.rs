use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::Result;
use crate::expression::ExpressionValue;
use crate::ruleset::RulesetOperationMethod;

/// Id the evaluator uses for its unsolicited ready message.
pub const READY_REQUEST_ID: i64 = -1;

pub const STORAGE_SERVICE: &str = "firebase.storage";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesSource {
    pub files: Vec<SourceFile>,
}

impl RulesSource {
    pub fn single(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            files: vec![SourceFile {
                name: name.into(),
                content: content.into(),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadRulesetContext {
    pub ruleset_name: String,
    pub source: RulesSource,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyContext {
    pub ruleset_name: String,
    pub service: &'static str,
    pub path: String,
    pub method: RulesetOperationMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
    pub variables: BTreeMap<String, ExpressionValue>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RuntimeAction {
    LoadRuleset { context: LoadRulesetContext },
    Verify { context: VerifyContext },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataLoadStatus {
    Ok,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirestoreDocument {
    pub name: String,
    #[serde(default)]
    pub fields: serde_json::Value,
}

/// Answer to a continuation, sent back under the evaluator's request id.
#[derive(Debug, Clone, Serialize)]
pub struct FirestoreDataResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<FirestoreDocument>,
    pub status: DataLoadStatus,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl FirestoreDataResponse {
    pub fn found(document: FirestoreDocument) -> Self {
        Self {
            result: Some(document),
            status: DataLoadStatus::Ok,
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn not_found() -> Self {
        Self {
            result: None,
            status: DataLoadStatus::NotFound,
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum RuntimeActionBundle {
    Action(RuntimeAction),
    DataResponse(FirestoreDataResponse),
}

/// Serializes `bundle` as one protocol line (without the newline) carrying
/// correlation id `id`.
pub fn encode_request(bundle: &RuntimeActionBundle, id: i64) -> Result<String> {
    let mut value = serde_json::to_value(bundle)?;
    if let serde_json::Value::Object(fields) = &mut value {
        fields.insert("id".to_string(), serde_json::Value::from(id));
    }
    Ok(serde_json::to_string(&value)?)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseResult {
    #[serde(default, rename = "rulesVersion")]
    pub rules_version: Option<i64>,
    #[serde(default)]
    pub permit: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataRequestContext {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeActionResponse {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub server_request_id: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub result: Option<ResponseResult>,
    #[serde(default)]
    pub context: Option<DataRequestContext>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub errors: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub warnings: Vec<String>,
}

/// The evaluator sends `null` for empty issue lists.
fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl RuntimeActionResponse {
    pub fn correlation_id(&self) -> Option<i64> {
        self.id.or(self.server_request_id)
    }

    pub fn is_ok(&self) -> bool {
        self.status.as_deref() == Some("ok")
    }

    /// Whether the evaluator is asking for a document before it can answer.
    pub fn is_continuation(&self) -> bool {
        self.context.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_ruleset_request_shape() {
        let bundle = RuntimeActionBundle::Action(RuntimeAction::LoadRuleset {
            context: LoadRulesetContext {
                ruleset_name: "0".to_string(),
                source: RulesSource::single("storage.rules", "rules_version = '2';"),
            },
        });
        let line = encode_request(&bundle, 7).unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["action"], "load_ruleset");
        assert_eq!(value["id"], 7);
        assert_eq!(value["context"]["rulesetName"], "0");
        assert_eq!(value["context"]["source"]["files"][0]["name"], "storage.rules");
    }

    #[test]
    fn data_response_has_no_action() {
        let bundle = RuntimeActionBundle::DataResponse(FirestoreDataResponse::not_found());
        let value: serde_json::Value =
            serde_json::from_str(&encode_request(&bundle, 3).unwrap()).unwrap();
        assert!(value.get("action").is_none());
        assert!(value.get("result").is_none());
        assert_eq!(value["status"], "not_found");
        assert_eq!(value["id"], 3);
    }

    #[test]
    fn continuation_uses_server_request_id() {
        let response: RuntimeActionResponse = serde_json::from_str(
            r#"{"server_request_id":4,"action":"fetch_firestore_document","status":"ok",
                "context":{"path":"/databases/(default)/documents/users/u1"}}"#,
        )
        .unwrap();
        assert!(response.is_continuation());
        assert_eq!(response.correlation_id(), Some(4));
        assert!(response.errors.is_empty());
    }

    #[test]
    fn null_issue_lists_read_as_empty() {
        let response: RuntimeActionResponse = serde_json::from_str(
            r#"{"id":5,"status":"ok","result":{"permit":true},"errors":null,"warnings":null}"#,
        )
        .unwrap();
        assert!(response.errors.is_empty());
        assert!(response.warnings.is_empty());
        assert_eq!(response.result.and_then(|result| result.permit), Some(true));
    }
}
