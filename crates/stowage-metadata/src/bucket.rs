use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stowage_common::{hash, time};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketMetadata {
    pub name: String,
    pub time_created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub storage_class: String,
    pub location: String,
    pub location_type: String,
    pub project_number: String,
    pub metageneration: i64,
    pub etag: String,
}

impl BucketMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        let now = time::now();
        Self {
            name: name.into(),
            time_created: now,
            updated: now,
            storage_class: "STANDARD".to_string(),
            location: "US".to_string(),
            location_type: "multi-region".to_string(),
            project_number: "000000000000".to_string(),
            metageneration: 1,
            etag: hash::etag(now.timestamp_millis(), 1),
        }
    }
}
