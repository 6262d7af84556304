
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::media::model::{custom_value, ObjectMetadata};

// ========== OBJECT METADATA KEYS ==========
pub const META_LABEL: &str = "label";
pub const META_COORDINATES: &str = "coordinates";
pub const META_STATUS: &str = "status";
pub const META_DATASET: &str = "dataset";
pub const META_TIMESTAMP: &str = "timestamp";
pub const META_LABELED_BY: &str = "labeledBy";
pub const META_IMAGE_ID: &str = "imageId";

// ========== CROP REGION ==========
/// Rectangle in source-image pixel coordinates.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Deserialize)]
struct LooseRegion {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

impl CropRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Rounds selection coordinates to whole pixels; negative values clamp to zero.
    pub fn rounded(x: f64, y: f64, width: f64, height: f64) -> Self {
        let px = |v: f64| if v.is_finite() && v > 0.0 { v.round() as u32 } else { 0 };
        Self {
            x: px(x),
            y: px(y),
            width: px(width),
            height: px(height),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn top_left(&self) -> (u32, u32) {
        (self.x, self.y)
    }

    pub fn bottom_right(&self) -> (u32, u32) {
        (
            self.x.saturating_add(self.width),
            self.y.saturating_add(self.height),
        )
    }

    /// JSON form stored under the `coordinates` metadata key; empty string when absent.
    pub fn to_metadata(region: Option<&CropRegion>) -> String {
        region
            .and_then(|r| serde_json::to_string(r).ok())
            .unwrap_or_default()
    }

    /// Accepts integer or fractional JSON; empty, `null` or malformed input yields `None`.
    pub fn from_metadata(raw: &str) -> Option<CropRegion> {
        let raw = raw.trim();
        if raw.is_empty() || raw == "null" {
            return None;
        }
        serde_json::from_str::<LooseRegion>(raw)
            .ok()
            .map(|r| CropRegion::rounded(r.x, r.y, r.width, r.height))
    }
}

// ========== LABEL STATUS ==========
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LabelStatus {
    #[default]
    Unlabeled,
    Labeled,
}

impl LabelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LabelStatus::Unlabeled => "unlabeled",
            LabelStatus::Labeled => "labeled",
        }
    }

    pub fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("labeled") {
            LabelStatus::Labeled
        } else {
            LabelStatus::Unlabeled
        }
    }
}

// ========== LABEL RECORD (document store) ==========
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabelRecord {
    pub name: String,
    pub url: String,
    pub label: String,
    pub coordinates: Option<CropRegion>,
    pub dataset: String,
    pub status: LabelStatus,
    pub timestamp: String,
    pub labeled_by: String,
    pub image_path: String,

    /// Identifier of the raw upload this record was produced from.
    #[serde(default)]
    pub source_id: Option<String>,

    /// Bumped on every write; used for optimistic concurrency.
    #[serde(default)]
    pub version: u64,
}

// ========== LABEL METADATA (object store) ==========
/// Typed view over the string metadata attached to a labeled object.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMetadata {
    pub label: String,
    pub coordinates: Option<CropRegion>,
    pub status: LabelStatus,
    pub dataset: String,
    pub timestamp: String,
    pub labeled_by: String,
    pub source_id: Option<String>,
}

impl LabelMetadata {
    pub fn from_custom(custom: &BTreeMap<String, String>) -> Self {
        let get = |key: &str| custom_value(custom, key).unwrap_or_default().to_string();
        Self {
            label: get(META_LABEL),
            coordinates: custom_value(custom, META_COORDINATES).and_then(CropRegion::from_metadata),
            status: LabelStatus::parse(&get(META_STATUS)),
            dataset: get(META_DATASET),
            timestamp: get(META_TIMESTAMP),
            labeled_by: get(META_LABELED_BY),
            source_id: custom_value(custom, META_IMAGE_ID)
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string()),
        }
    }

    /// Writes these fields over `existing`, keeping any other keys it carries.
    pub fn merge_into(&self, existing: ObjectMetadata) -> ObjectMetadata {
        let mut merged = existing;
        // Drop case variants S3 may have returned so keys are not duplicated.
        let ours = [
            META_LABEL,
            META_COORDINATES,
            META_STATUS,
            META_DATASET,
            META_TIMESTAMP,
            META_LABELED_BY,
            META_IMAGE_ID,
        ];
        merged
            .custom
            .retain(|k, _| !ours.iter().any(|o| o.eq_ignore_ascii_case(k)));

        merged = merged
            .insert(META_LABEL, self.label.clone())
            .insert(META_COORDINATES, CropRegion::to_metadata(self.coordinates.as_ref()))
            .insert(META_STATUS, self.status.as_str())
            .insert(META_DATASET, self.dataset.clone())
            .insert(META_TIMESTAMP, self.timestamp.clone())
            .insert(META_LABELED_BY, self.labeled_by.clone());

        if let Some(source_id) = &self.source_id {
            merged = merged.insert(META_IMAGE_ID, source_id.clone());
        }
        merged
    }

    pub fn into_object_metadata(self, content_type: Option<&str>) -> ObjectMetadata {
        let base = ObjectMetadata {
            content_type: content_type.map(|s| s.to_string()),
            custom: BTreeMap::new(),
        };
        self.merge_into(base)
    }
}
