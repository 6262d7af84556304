use chrono::{DateTime, SecondsFormat, Utc};
use labelme_atoms::labels::{CropRegion, LabelRecord, LabelStatus};
use labelme_atoms::media::ObjectInfo;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::layout::name_prefix;

/// ISO-8601 with millisecond precision, e.g. `2024-05-01T10:00:00.000Z`.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// ========== DATASET ==========
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Dataset {
    pub name: String,
    pub path: String,
}

// ========== RAW IMAGE ==========
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawImage {
    pub name: String,
    pub path: String,
    /// Immutable identity assigned at upload, carried into label records.
    pub source_id: String,
    pub last_modified: DateTime<Utc>,
}

impl RawImage {
    pub fn from_info(info: &ObjectInfo) -> Self {
        let source_id = info
            .custom_value(labelme_atoms::labels::model::META_IMAGE_ID)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .or_else(|| name_prefix(&info.name).map(|s| s.to_string()))
            .unwrap_or_else(|| info.name.clone());

        Self {
            name: info.name.clone(),
            path: info.path.clone(),
            source_id,
            last_modified: info.last_modified,
        }
    }

    /// File name the user uploaded, without the uniqueness prefix.
    pub fn original_name(&self) -> &str {
        crate::layout::name_suffix(&self.name)
    }
}

// ========== LABELED IMAGE ==========
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabeledImage {
    pub name: String,
    pub path: String,
    pub url: String,
    pub label: String,
    pub labeled_by: String,
    pub timestamp: String,
    pub coordinates: Option<CropRegion>,
    pub dataset: String,
    pub status: LabelStatus,
    #[serde(default)]
    pub version: u64,
}

impl LabeledImage {
    pub fn from_record(record: &LabelRecord) -> Self {
        Self {
            name: record.name.clone(),
            path: record.image_path.clone(),
            url: record.url.clone(),
            label: record.label.clone(),
            labeled_by: record.labeled_by.clone(),
            timestamp: record.timestamp.clone(),
            coordinates: record.coordinates,
            dataset: record.dataset.clone(),
            status: record.status,
            version: record.version,
        }
    }

    pub fn to_record(&self, source_id: Option<String>) -> LabelRecord {
        LabelRecord {
            name: self.name.clone(),
            url: self.url.clone(),
            label: self.label.clone(),
            coordinates: self.coordinates,
            dataset: self.dataset.clone(),
            status: self.status,
            timestamp: self.timestamp.clone(),
            labeled_by: self.labeled_by.clone(),
            image_path: self.path.clone(),
            source_id,
            version: self.version,
        }
    }
}

/// Newest first; unparseable timestamps last, ties by name.
pub fn newest_first(a: &LabeledImage, b: &LabeledImage) -> Ordering {
    let a_ts = parse_timestamp(&a.timestamp);
    let b_ts = parse_timestamp(&b.timestamp);
    b_ts.cmp(&a_ts).then_with(|| a.name.cmp(&b.name))
}

// ========== CURRENT IMAGE (queue view) ==========
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CurrentImage {
    pub image: RawImage,
    pub url: String,
    pub index: usize,
    pub total: usize,
    pub status: LabelStatus,
    pub label: Option<String>,
    pub labeled_by: Option<String>,
}

// ========== UPLOAD ==========
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

// ========== REQUEST PAYLOADS ==========
#[derive(Debug, Deserialize)]
pub struct CreateDatasetPayload {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct SelectDatasetPayload {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFilePayload {
    pub name: String,
    pub content_type: Option<String>,
    /// Base64-encoded file bytes
    pub data: String,
}

#[derive(Debug, Deserialize)]
pub struct UploadImagesPayload {
    pub files: Vec<UploadFilePayload>,
}

/// Selection rectangle as drawn, in source pixels (may be fractional).
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct RegionPayload {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl From<RegionPayload> for CropRegion {
    fn from(r: RegionPayload) -> Self {
        CropRegion::rounded(r.x, r.y, r.width, r.height)
    }
}

#[derive(Debug, Deserialize)]
pub struct SaveLabelPayload {
    pub label: String,
    pub coordinates: Option<RegionPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CropPayload {
    #[serde(default)]
    pub label: String,
    pub region: Option<RegionPayload>,
    /// Name of a blob an earlier batch already stored for this pair.
    pub stored_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CropBatchPayload {
    pub crops: Vec<CropPayload>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateLabelPayload {
    pub label: String,
    /// Version the client last saw; stale versions are rejected.
    pub version: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn info(name: &str, custom: BTreeMap<String, String>) -> ObjectInfo {
        ObjectInfo {
            path: format!("multipleFiles/cats/{}", name),
            name: name.to_string(),
            content_type: None,
            custom,
            last_modified: Utc::now(),
        }
    }

    #[test]
    fn source_id_prefers_metadata_then_prefix() {
        let mut custom = BTreeMap::new();
        custom.insert("imageid".to_string(), "meta-id".to_string());
        assert_eq!(RawImage::from_info(&info("p_a.jpg", custom)).source_id, "meta-id");
        assert_eq!(RawImage::from_info(&info("p_a.jpg", BTreeMap::new())).source_id, "p");
        assert_eq!(RawImage::from_info(&info("a.jpg", BTreeMap::new())).source_id, "a.jpg");
        assert_eq!(RawImage::from_info(&info("p_a_b.jpg", BTreeMap::new())).original_name(), "a_b.jpg");
    }

    #[test]
    fn newest_first_orders_by_timestamp() {
        let row = |name: &str, ts: &str| LabeledImage {
            name: name.to_string(),
            path: String::new(),
            url: String::new(),
            label: "x".to_string(),
            labeled_by: String::new(),
            timestamp: ts.to_string(),
            coordinates: None,
            dataset: "cats".to_string(),
            status: LabelStatus::Labeled,
            version: 0,
        };
        let mut rows = vec![
            row("old", "2024-01-01T00:00:00.000Z"),
            row("junk", "not a date"),
            row("new", "2024-06-01T00:00:00.000Z"),
        ];
        rows.sort_by(newest_first);
        let names: Vec<_> = rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["new", "old", "junk"]);
    }
}
