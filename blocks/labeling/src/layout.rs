use crate::error::{LabelingError, LabelingResult};

pub const DEFAULT_DATASET_ROOT: &str = "multipleFiles";
pub const DEFAULT_LABELED_ROOT: &str = "labeled_images";
pub const PLACEHOLDER: &str = ".placeholder";

/// Where things live in the object store.
///
/// ```text
/// {dataset_root}/{dataset}/.placeholder
/// {dataset_root}/{dataset}/{uuid}_{original}
/// {labeled_root}/{dataset}/{uuid}_{label}.jpg
/// {labeled_root}/{dataset}/{dataset}.csv
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct StoreLayout {
    pub dataset_root: String,
    pub labeled_root: String,
}

impl Default for StoreLayout {
    fn default() -> Self {
        Self {
            dataset_root: DEFAULT_DATASET_ROOT.to_string(),
            labeled_root: DEFAULT_LABELED_ROOT.to_string(),
        }
    }
}

impl StoreLayout {
    pub fn new(dataset_root: impl Into<String>, labeled_root: impl Into<String>) -> Self {
        Self {
            dataset_root: dataset_root.into(),
            labeled_root: labeled_root.into(),
        }
    }

    pub fn raw_prefix(&self, dataset: &str) -> String {
        format!("{}/{}", self.dataset_root, dataset)
    }

    pub fn raw_path(&self, dataset: &str, name: &str) -> String {
        format!("{}/{}/{}", self.dataset_root, dataset, name)
    }

    pub fn placeholder_path(&self, dataset: &str) -> String {
        self.raw_path(dataset, PLACEHOLDER)
    }

    pub fn labeled_prefix(&self, dataset: &str) -> String {
        format!("{}/{}", self.labeled_root, dataset)
    }

    pub fn labeled_path(&self, dataset: &str, name: &str) -> String {
        format!("{}/{}/{}", self.labeled_root, dataset, name)
    }

    /// Pre-existing tabular export some flows read back.
    pub fn snapshot_path(&self, dataset: &str) -> String {
        self.labeled_path(dataset, &format!("{}.csv", dataset))
    }
}

/// `{id}_{original}`
pub fn unique_name(id: &str, original: &str) -> String {
    format!("{}_{}", id, original)
}

/// Object name for a cropped label: `{id}_{label}.jpg`, with path separators replaced.
pub fn crop_name(id: &str, label: &str) -> String {
    let safe: String = label
        .trim()
        .chars()
        .map(|c| if c == '/' || c == '\\' { '-' } else { c })
        .collect();
    unique_name(id, &format!("{}.jpg", safe))
}

/// Part of a name after the first `_`; the whole name when there is none.
pub fn name_suffix(name: &str) -> &str {
    name.split_once('_').map(|(_, rest)| rest).unwrap_or(name)
}

/// Part of a name before the first `_`, if any.
pub fn name_prefix(name: &str) -> Option<&str> {
    name.split_once('_')
        .map(|(prefix, _)| prefix)
        .filter(|p| !p.is_empty())
}

/// Placeholder markers and tabular exports are not images.
pub fn is_bookkeeping(name: &str) -> bool {
    name.contains(PLACEHOLDER) || name.to_ascii_lowercase().ends_with(".csv")
}

/// Decodes `%XX` escapes; malformed escapes are kept as they are.
pub fn percent_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(value) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Returns the trimmed name, or a validation error.
pub fn validate_dataset_name(name: &str) -> LabelingResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(LabelingError::validation("Please enter a dataset name!"));
    }
    if trimmed == "undefined" {
        return Err(LabelingError::validation("\"undefined\" is not a valid dataset name"));
    }
    if trimmed.contains('/') {
        return Err(LabelingError::validation("Dataset names cannot contain '/'"));
    }
    Ok(trimmed.to_string())
}
