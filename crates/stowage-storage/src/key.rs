use std::fmt;

const FOLDER_MARKER: &str = "%2F";

/// Index key of an object.
///
/// Object names ending in an encoded slash (`%2F`, any case) are folder
/// placeholders and resolve to the same key as the name ending in `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    bucket: String,
    object: String,
}

impl ObjectKey {
    pub fn new(bucket: impl Into<String>, object: impl Into<String>) -> Self {
        let mut object = object.into();
        let marker_start = object.len().saturating_sub(FOLDER_MARKER.len());
        if object
            .get(marker_start..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(FOLDER_MARKER))
        {
            object.truncate(marker_start);
            object.push('/');
        }
        Self {
            bucket: bucket.into(),
            object,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn object(&self) -> &str {
        &self.object
    }

    /// Key under which the object's bytes are persisted.
    pub fn persistence_key(&self) -> String {
        format!("{}/{}", self.bucket, self.object)
    }

    /// Resource path handed to the rules evaluator.
    pub fn rules_path(&self) -> String {
        format!("b/{}/o/{}", self.bucket, self.object)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.object)
    }
}
