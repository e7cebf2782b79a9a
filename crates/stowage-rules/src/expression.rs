use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use stowage_common::time;
use stowage_metadata::RulesResourceMetadata;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathSegment {
    pub simple: String,
}

/// Typed value the rules evaluator accepts for runtime variables.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpressionValue {
    NullValue(()),
    BoolValue(bool),
    IntValue(i64),
    FloatValue(f64),
    StringValue(String),
    TimestampValue(String),
    ListValue { values: Vec<ExpressionValue> },
    SetValue { values: Vec<ExpressionValue> },
    MapValue { fields: BTreeMap<String, ExpressionValue> },
    PathValue { segments: Vec<PathSegment> },
}

impl ExpressionValue {
    pub fn null() -> Self {
        Self::NullValue(())
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::StringValue(value.into())
    }

    pub fn timestamp(value: &DateTime<Utc>) -> Self {
        Self::TimestampValue(time::to_serialized_date(value))
    }

    pub fn map(fields: impl IntoIterator<Item = (String, ExpressionValue)>) -> Self {
        Self::MapValue {
            fields: fields.into_iter().collect(),
        }
    }

    /// Path value with one segment per non-empty `/`-separated component.
    pub fn path(path: &str) -> Self {
        Self::PathValue {
            segments: path
                .split('/')
                .filter(|segment| !segment.is_empty())
                .map(|segment| PathSegment {
                    simple: segment.to_string(),
                })
                .collect(),
        }
    }

    fn optional_string(value: Option<&String>) -> Self {
        value.map_or_else(Self::null, |value| Self::string(value.clone()))
    }

    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::null(),
            serde_json::Value::Bool(value) => Self::BoolValue(*value),
            serde_json::Value::Number(number) => match number.as_i64() {
                Some(value) => Self::IntValue(value),
                None => Self::FloatValue(number.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(value) => Self::string(value.clone()),
            serde_json::Value::Array(values) => Self::ListValue {
                values: values.iter().map(Self::from_json).collect(),
            },
            serde_json::Value::Object(fields) => Self::map(
                fields
                    .iter()
                    .map(|(key, value)| (key.clone(), Self::from_json(value))),
            ),
        }
    }
}

impl From<&RulesResourceMetadata> for ExpressionValue {
    fn from(resource: &RulesResourceMetadata) -> Self {
        let metadata = ExpressionValue::map(
            resource
                .metadata
                .iter()
                .map(|(key, value)| (key.clone(), ExpressionValue::string(value.clone()))),
        );

        ExpressionValue::map([
            ("name".to_string(), ExpressionValue::string(resource.name.clone())),
            ("bucket".to_string(), ExpressionValue::string(resource.bucket.clone())),
            ("generation".to_string(), ExpressionValue::IntValue(resource.generation)),
            (
                "metageneration".to_string(),
                ExpressionValue::IntValue(resource.metageneration),
            ),
            ("size".to_string(), ExpressionValue::IntValue(resource.size as i64)),
            (
                "timeCreated".to_string(),
                ExpressionValue::timestamp(&resource.time_created),
            ),
            ("updated".to_string(), ExpressionValue::timestamp(&resource.updated)),
            ("md5Hash".to_string(), ExpressionValue::string(resource.md5_hash.clone())),
            ("crc32c".to_string(), ExpressionValue::string(resource.crc32c.to_string())),
            ("etag".to_string(), ExpressionValue::string(resource.etag.clone())),
            (
                "contentType".to_string(),
                ExpressionValue::string(resource.content_type.clone()),
            ),
            (
                "contentEncoding".to_string(),
                ExpressionValue::string(resource.content_encoding.clone()),
            ),
            (
                "contentDisposition".to_string(),
                ExpressionValue::optional_string(resource.content_disposition.as_ref()),
            ),
            (
                "contentLanguage".to_string(),
                ExpressionValue::optional_string(resource.content_language.as_ref()),
            ),
            (
                "cacheControl".to_string(),
                ExpressionValue::optional_string(resource.cache_control.as_ref()),
            ),
            ("metadata".to_string(), metadata),
        ])
    }
}

impl From<Option<&RulesResourceMetadata>> for ExpressionValue {
    fn from(resource: Option<&RulesResourceMetadata>) -> Self {
        resource.map_or_else(ExpressionValue::null, ExpressionValue::from)
    }
}
