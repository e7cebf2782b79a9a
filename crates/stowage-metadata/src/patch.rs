use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, de::Error as _};

/// One field of an incoming metadata change.
///
/// A key missing from the request body leaves the field untouched, an
/// explicit JSON `null` clears it and any other value replaces it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Patch<T> {
    #[default]
    Absent,
    Clear,
    Set(T),
}

impl<T> Patch<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    pub fn as_set(&self) -> Option<&T> {
        match self {
            Self::Set(value) => Some(value),
            _ => None,
        }
    }

    /// Resolves the patch against the current value of an optional field.
    pub fn apply_to(&self, current: &mut Option<T>)
    where
        T: Clone,
    {
        match self {
            Self::Absent => {}
            Self::Clear => *current = None,
            Self::Set(value) => *current = Some(value.clone()),
        }
    }
}

impl<T> From<Option<T>> for Patch<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Self::Set(value),
            None => Self::Clear,
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Patch<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<T>::deserialize(deserializer).map(Patch::from)
    }
}

/// Custom metadata value; clients send strings but numbers and booleans are
/// accepted and stored in their string form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataValue(pub String);

impl MetadataValue {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for MetadataValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::String(value) => Ok(Self(value)),
            serde_json::Value::Number(value) => Ok(Self(value.to_string())),
            serde_json::Value::Bool(value) => Ok(Self(value.to_string())),
            other => Err(D::Error::custom(format!(
                "unsupported custom metadata value: {other}"
            ))),
        }
    }
}

pub type CustomMetadataPatch = BTreeMap<String, Option<MetadataValue>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadataPatch {
    #[serde(default)]
    pub content_type: Patch<String>,
    #[serde(default)]
    pub content_encoding: Patch<String>,
    #[serde(default)]
    pub content_language: Patch<String>,
    #[serde(default)]
    pub content_disposition: Patch<String>,
    #[serde(default)]
    pub cache_control: Patch<String>,
    #[serde(default)]
    pub custom_time: Patch<String>,
    #[serde(default, rename = "metadata")]
    pub custom_metadata: Patch<CustomMetadataPatch>,
}

impl ObjectMetadataPatch {
    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(bytes)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Whether the request carries its own, non-empty, custom metadata map.
    pub fn has_custom_metadata(&self) -> bool {
        matches!(&self.custom_metadata, Patch::Set(map) if !map.is_empty())
    }

    pub fn with_custom_metadata<'a>(
        mut self,
        entries: impl IntoIterator<Item = (&'a str, Option<&'a str>)>,
    ) -> Self {
        let map = entries
            .into_iter()
            .map(|(key, value)| (key.to_string(), value.map(MetadataValue::from)))
            .collect();
        self.custom_metadata = Patch::Set(map);
        self
    }
}
