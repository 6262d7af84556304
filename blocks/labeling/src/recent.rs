use futures::future::join_all;
use labelme_atoms::labels::{LabelMetadata, LabelStatus};
use labelme_atoms::media::ObjectSummary;
use std::collections::HashMap;

use crate::context::LabelingContext;
use crate::error::{LabelingError, LabelingResult};
use crate::layout::is_bookkeeping;
use crate::types::{newest_first, now_iso, LabeledImage};

pub const PAGE_SIZE: usize = 6;

const UNKNOWN: &str = "Unknown";

/// Lists every labeled object of a dataset with its label metadata, newest first.
/// Objects whose URL or metadata cannot be read are skipped.
pub async fn list_labeled(ctx: &LabelingContext<'_>, dataset: &str) -> LabelingResult<Vec<LabeledImage>> {
    let listing = ctx.objects.list(&ctx.layout.labeled_prefix(dataset)).await?;
    let versions: HashMap<String, u64> = ctx
        .records
        .list(dataset)
        .await?
        .into_iter()
        .map(|r| (r.name, r.version))
        .collect();

    let rows = listing
        .objects
        .iter()
        .filter(|o| !is_bookkeeping(&o.name))
        .map(|object| labeled_row(ctx, dataset, object, &versions));

    let mut all: Vec<LabeledImage> = join_all(rows).await.into_iter().flatten().collect();
    all.sort_by(newest_first);
    Ok(all)
}

async fn labeled_row(
    ctx: &LabelingContext<'_>,
    dataset: &str,
    object: &ObjectSummary,
    versions: &HashMap<String, u64>,
) -> Option<LabeledImage> {
    let (url, info) = match tokio::try_join!(ctx.objects.url(&object.path), ctx.objects.metadata(&object.path)) {
        Ok(found) => found,
        Err(e) => {
            tracing::warn!("⚠️ Skipping labeled image {}: {}", object.path, e);
            return None;
        }
    };

    let meta = LabelMetadata::from_custom(&info.custom);
    let or_unknown = |s: String| if s.trim().is_empty() { UNKNOWN.to_string() } else { s };
    let timestamp = if meta.timestamp.trim().is_empty() {
        info.last_modified.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    } else {
        meta.timestamp
    };

    Some(LabeledImage {
        name: object.name.clone(),
        path: object.path.clone(),
        url,
        label: or_unknown(meta.label),
        labeled_by: or_unknown(meta.labeled_by),
        timestamp,
        coordinates: meta.coordinates,
        dataset: if meta.dataset.is_empty() { dataset.to_string() } else { meta.dataset },
        status: LabelStatus::Labeled,
        version: versions.get(&object.name).copied().unwrap_or(0),
    })
}

/// Page-sized window over a dataset's labeled images.
#[derive(Debug, Clone)]
pub struct RecentPanel {
    dataset: String,
    all: Vec<LabeledImage>,
    page: Vec<LabeledImage>,
    page_index: usize,
}

impl RecentPanel {
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            all: Vec::new(),
            page: Vec::new(),
            page_index: 0,
        }
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn all(&self) -> &[LabeledImage] {
        &self.all
    }

    pub fn page(&self) -> &[LabeledImage] {
        &self.page
    }

    pub fn page_index(&self) -> usize {
        self.page_index
    }

    pub fn page_count(&self) -> usize {
        self.all.len().div_ceil(PAGE_SIZE)
    }

    pub fn has_next(&self) -> bool {
        (self.page_index + 1) * PAGE_SIZE < self.all.len()
    }

    /// Reloads the full set from the store and shows page `n`.
    pub async fn load_page(&mut self, ctx: &LabelingContext<'_>, n: usize) -> LabelingResult<&[LabeledImage]> {
        self.all = list_labeled(ctx, &self.dataset).await?;
        self.select_page(n);
        tracing::info!(
            "📄 Page {} of {} shows {} of {} labeled images",
            self.page_index,
            self.dataset,
            self.page.len(),
            self.all.len()
        );
        Ok(&self.page)
    }

    pub async fn next_page(&mut self, ctx: &LabelingContext<'_>) -> LabelingResult<bool> {
        if !self.has_next() {
            return Ok(false);
        }
        self.load_page(ctx, self.page_index + 1).await?;
        Ok(true)
    }

    pub async fn prev_page(&mut self, ctx: &LabelingContext<'_>) -> LabelingResult<bool> {
        if self.page_index == 0 {
            return Ok(false);
        }
        self.load_page(ctx, self.page_index - 1).await?;
        Ok(true)
    }

    /// Changes the label of a page row in memory only.
    pub fn edit_label(&mut self, index: usize, text: &str) -> LabelingResult<()> {
        let row = self.row_mut(index)?;
        row.label = text.to_string();
        Ok(())
    }

    /// Persists the edited label of a page row: the document first, under its version
    /// token, then the object metadata.
    pub async fn save(
        &mut self,
        ctx: &LabelingContext<'_>,
        index: usize,
        labeled_by: &str,
    ) -> LabelingResult<LabeledImage> {
        let mut row = self.row_mut(index)?.clone();
        let label = row.label.trim().to_string();
        if label.is_empty() {
            return Err(LabelingError::validation("Label cannot be empty!"));
        }

        let info = ctx.objects.metadata(&row.path).await?;
        let mut meta = LabelMetadata::from_custom(&info.custom);
        meta.label = label.clone();
        meta.labeled_by = labeled_by.to_string();
        meta.timestamp = now_iso();
        meta.status = LabelStatus::Labeled;
        if meta.dataset.is_empty() {
            meta.dataset = self.dataset.clone();
        }

        row.label = label;
        row.labeled_by = meta.labeled_by.clone();
        row.timestamp = meta.timestamp.clone();
        row.status = LabelStatus::Labeled;
        row.coordinates = meta.coordinates;

        let record = row.to_record(meta.source_id.clone());
        let version = ctx
            .write_record(&self.dataset, &record, Some(row.version))
            .await
            .map_err(|e| {
                tracing::error!("❌ Could not save label for {}: {}", row.name, e);
                LabelingError::from(e)
            })?;
        ctx.objects
            .update_metadata(&row.path, meta.merge_into(info.metadata()))
            .await?;
        row.version = version;

        self.page[index] = row.clone();
        if let Some(existing) = self.all.iter_mut().find(|r| r.name == row.name) {
            *existing = row.clone();
        }

        tracing::info!("✅ Updated label of {} to {}", row.name, row.label);
        Ok(row)
    }

    /// Deletes a labeled image and its document, then recomputes the current page.
    pub async fn delete_row(&mut self, ctx: &LabelingContext<'_>, name: &str) -> LabelingResult<()> {
        let row = self
            .all
            .iter()
            .find(|r| r.name == name)
            .cloned()
            .ok_or_else(|| LabelingError::NotFound(format!("labeled image {}", name)))?;

        ctx.objects.delete(&row.path).await?;
        ctx.records.delete(&self.dataset, &row.name).await?;

        self.all.retain(|r| r.name != name);
        self.page.retain(|r| r.name != name);

        let page = if self.page_index > 0 && self.page_index * PAGE_SIZE >= self.all.len() {
            self.page_index - 1
        } else {
            self.page_index
        };
        self.select_page(page);

        tracing::info!("🗑️ Deleted labeled image {} from {}", name, self.dataset);
        Ok(())
    }

    fn select_page(&mut self, n: usize) {
        let last = self.page_count().saturating_sub(1);
        self.page_index = n.min(last);
        let start = self.page_index * PAGE_SIZE;
        self.page = self.all.iter().skip(start).take(PAGE_SIZE).cloned().collect();
    }

    fn row_mut(&mut self, index: usize) -> LabelingResult<&mut LabeledImage> {
        self.page
            .get_mut(index)
            .ok_or_else(|| LabelingError::NotFound(format!("no row {} on page {}", index, self.page_index)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RetryPolicy;
    use crate::layout::StoreLayout;
    use chrono::{Duration, TimeZone, Utc};
    use labelme_atoms::labels::{LabelRecord, RecordStore};
    use labelme_atoms::media::{ObjectMetadata, ObjectStore};
    use labelme_atoms::memory::{FailOp, MemoryObjectStore, MemoryRecordStore};
    use pretty_assertions::assert_eq;

    async fn seed_labeled(objects: &MemoryObjectStore, records: &MemoryRecordStore, count: usize) {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        for i in 0..count {
            let name = format!("id{:02}_cat.jpg", i);
            let path = format!("labeled_images/cats/{}", name);
            let timestamp = (base + Duration::minutes(i as i64))
                .to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
            let meta = LabelMetadata {
                label: format!("cat{}", i),
                coordinates: None,
                status: LabelStatus::Labeled,
                dataset: "cats".to_string(),
                timestamp: timestamp.clone(),
                labeled_by: "ann@example.com".to_string(),
                source_id: None,
            };
            objects
                .put(&path, vec![0], meta.into_object_metadata(Some("image/jpeg")))
                .await
                .unwrap();
            records
                .put(
                    "cats",
                    &LabelRecord {
                        name: name.clone(),
                        url: String::new(),
                        label: format!("cat{}", i),
                        coordinates: None,
                        dataset: "cats".to_string(),
                        status: LabelStatus::Labeled,
                        timestamp,
                        labeled_by: "ann@example.com".to_string(),
                        image_path: path,
                        source_id: None,
                        version: 0,
                    },
                    None,
                )
                .await
                .unwrap();
        }
    }

    fn labels(rows: &[LabeledImage]) -> Vec<String> {
        rows.iter().map(|r| r.label.clone()).collect()
    }

    #[tokio::test]
    async fn pages_are_windows_of_six_newest_first() {
        let objects = MemoryObjectStore::new();
        let records = MemoryRecordStore::new();
        let layout = StoreLayout::default();
        let ctx = LabelingContext::new(&objects, &records, &layout, RetryPolicy::default());
        seed_labeled(&objects, &records, 8).await;

        let mut panel = RecentPanel::new("cats");
        let first = panel.load_page(&ctx, 0).await.unwrap().to_vec();
        assert_eq!(labels(&first), vec!["cat7", "cat6", "cat5", "cat4", "cat3", "cat2"]);
        assert_eq!(first[0].version, 1);

        assert!(panel.next_page(&ctx).await.unwrap());
        assert_eq!(labels(panel.page()), vec!["cat1", "cat0"]);
        assert!(!panel.next_page(&ctx).await.unwrap());
        assert_eq!(panel.page_index(), 1);

        assert!(panel.prev_page(&ctx).await.unwrap());
        assert!(!panel.prev_page(&ctx).await.unwrap());
        assert_eq!(panel.page_index(), 0);
    }

    #[tokio::test]
    async fn missing_metadata_defaults_and_failures_skip() {
        let objects = MemoryObjectStore::new();
        let records = MemoryRecordStore::new();
        let layout = StoreLayout::default();
        let ctx = LabelingContext::new(&objects, &records, &layout, RetryPolicy::default());
        objects
            .put("labeled_images/cats/bare.jpg", vec![0], ObjectMetadata::default())
            .await
            .unwrap();
        objects
            .put("labeled_images/cats/broken.jpg", vec![0], ObjectMetadata::default())
            .await
            .unwrap();
        objects
            .put("labeled_images/cats/cats.csv", vec![0], ObjectMetadata::default())
            .await
            .unwrap();
        objects.fail_when(FailOp::Metadata, "broken").await;

        let rows = list_labeled(&ctx, "cats").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].label, "Unknown");
        assert_eq!(rows[0].labeled_by, "Unknown");
        assert!(!rows[0].timestamp.is_empty());
    }

    #[tokio::test]
    async fn save_updates_store_and_both_sets() {
        let objects = MemoryObjectStore::new();
        let records = MemoryRecordStore::new();
        let layout = StoreLayout::default();
        let ctx = LabelingContext::new(&objects, &records, &layout, RetryPolicy::default());
        seed_labeled(&objects, &records, 2).await;

        let mut panel = RecentPanel::new("cats");
        panel.load_page(&ctx, 0).await.unwrap();
        panel.edit_label(0, "  siamese ").unwrap();
        let saved = panel.save(&ctx, 0, "bob@example.com").await.unwrap();

        assert_eq!(saved.label, "siamese");
        assert_eq!(saved.version, 2);
        assert_eq!(panel.all().iter().find(|r| r.name == saved.name).unwrap().label, "siamese");

        let info = objects.metadata(&saved.path).await.unwrap();
        assert_eq!(info.custom_value("label"), Some("siamese"));
        assert_eq!(info.custom_value("labeledBy"), Some("bob@example.com"));
        let record = records.get("cats", &saved.name).await.unwrap().unwrap();
        assert_eq!(record.label, "siamese");

        panel.edit_label(1, " ").unwrap();
        assert!(matches!(panel.save(&ctx, 1, "bob").await, Err(LabelingError::Validation(_))));
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict() {
        let objects = MemoryObjectStore::new();
        let records = MemoryRecordStore::new();
        let layout = StoreLayout::default();
        let ctx = LabelingContext::new(&objects, &records, &layout, RetryPolicy::default());
        seed_labeled(&objects, &records, 1).await;

        let mut mine = RecentPanel::new("cats");
        let mut theirs = RecentPanel::new("cats");
        mine.load_page(&ctx, 0).await.unwrap();
        theirs.load_page(&ctx, 0).await.unwrap();

        theirs.edit_label(0, "first").unwrap();
        theirs.save(&ctx, 0, "bob").await.unwrap();

        mine.edit_label(0, "second").unwrap();
        let err = mine.save(&ctx, 0, "ann").await.unwrap_err();
        assert!(err.is_conflict());
        let info = objects.metadata("labeled_images/cats/id00_cat.jpg").await.unwrap();
        assert_eq!(info.custom_value("label"), Some("first"));
    }

    #[tokio::test]
    async fn deleting_last_row_of_a_page_steps_back() {
        let objects = MemoryObjectStore::new();
        let records = MemoryRecordStore::new();
        let layout = StoreLayout::default();
        let ctx = LabelingContext::new(&objects, &records, &layout, RetryPolicy::default());
        seed_labeled(&objects, &records, 7).await;

        let mut panel = RecentPanel::new("cats");
        panel.load_page(&ctx, 1).await.unwrap();
        assert_eq!(labels(panel.page()), vec!["cat0"]);

        panel.delete_row(&ctx, "id00_cat.jpg").await.unwrap();
        assert_eq!(panel.page_index(), 0);
        assert_eq!(panel.page().len(), 6);
        assert_eq!(panel.all().len(), 6);
        assert!(!objects.contains("labeled_images/cats/id00_cat.jpg").await);
        assert!(records.get("cats", "id00_cat.jpg").await.unwrap().is_none());
    }
}
