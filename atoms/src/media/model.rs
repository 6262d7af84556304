
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata written alongside an object: content type plus free-form string pairs.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ObjectMetadata {
    pub content_type: Option<String>,
    pub custom: BTreeMap<String, String>,
}

impl ObjectMetadata {
    pub fn with_content_type(content_type: &str) -> Self {
        Self {
            content_type: Some(content_type.to_string()),
            custom: BTreeMap::new(),
        }
    }

    pub fn insert(mut self, key: &str, value: impl Into<String>) -> Self {
        self.custom.insert(key.to_string(), value.into());
        self
    }
}

/// Result of a metadata lookup on a single object.
#[derive(Debug, Serialize, Clone)]
pub struct ObjectInfo {
    pub path: String,
    pub name: String,
    pub content_type: Option<String>,
    pub custom: BTreeMap<String, String>,
    pub last_modified: DateTime<Utc>,
}

impl ObjectInfo {
    /// S3 lowercases user metadata keys, so lookups ignore case.
    pub fn custom_value(&self, key: &str) -> Option<&str> {
        custom_value(&self.custom, key)
    }

    pub fn metadata(&self) -> ObjectMetadata {
        ObjectMetadata {
            content_type: self.content_type.clone(),
            custom: self.custom.clone(),
        }
    }
}

pub fn custom_value<'a>(custom: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    custom
        .get(key)
        .or_else(|| {
            custom
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        })
        .map(|s| s.as_str())
}

/// One object entry in a listing.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ObjectSummary {
    pub path: String,
    pub name: String,
    pub last_modified: Option<DateTime<Utc>>,
}

/// One "folder" entry in a listing.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct PrefixEntry {
    pub name: String,
    pub path: String,
}

/// Immediate children of a prefix: objects directly under it and sub-prefixes.
#[derive(Debug, Serialize, Clone, Default)]
pub struct Listing {
    pub objects: Vec<ObjectSummary>,
    pub prefixes: Vec<PrefixEntry>,
}

/// Last path segment, e.g. `multipleFiles/cats/a.jpg` -> `a.jpg`.
pub fn file_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}
