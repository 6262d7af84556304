use futures::future::try_join_all;
use labelme_atoms::labels::{LabelRecord, LabelStatus};

use crate::context::LabelingContext;
use crate::error::{LabelingError, LabelingResult};
use crate::index::LabelIndex;
use crate::layout::is_bookkeeping;
use crate::types::{CurrentImage, RawImage};
use crate::workflow::{BatchReport, WorkflowPhase};

/// Raw images of one dataset waiting for a label, newest first.
#[derive(Debug, Clone)]
pub struct UnlabeledQueue {
    dataset: String,
    images: Vec<RawImage>,
    current: Option<usize>,
    index: LabelIndex,
}

impl UnlabeledQueue {
    /// Lists the dataset folder, resolves metadata for every image and selects the first one.
    pub async fn load(ctx: &LabelingContext<'_>, dataset: &str) -> LabelingResult<Self> {
        let listing = ctx.objects.list(&ctx.layout.raw_prefix(dataset)).await?;

        let lookups = listing
            .objects
            .iter()
            .filter(|o| !is_bookkeeping(&o.name))
            .map(|o| ctx.objects.metadata(&o.path));
        let infos = try_join_all(lookups).await?;

        let mut images: Vec<RawImage> = infos.iter().map(RawImage::from_info).collect();
        images.sort_by(|a, b| {
            b.last_modified
                .cmp(&a.last_modified)
                .then_with(|| a.name.cmp(&b.name))
        });

        let records = ctx.records.list(dataset).await?;
        let index = LabelIndex::from_records(records);

        tracing::info!(
            "🖼️ Loaded {} images for {} ({} label records indexed)",
            images.len(),
            dataset,
            index.len()
        );

        let current = if images.is_empty() { None } else { Some(0) };
        Ok(Self {
            dataset: dataset.to_string(),
            images,
            current,
            index,
        })
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn images(&self) -> &[RawImage] {
        &self.images
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current(&self) -> Option<&RawImage> {
        self.current.and_then(|i| self.images.get(i))
    }

    pub fn find(&self, name: &str) -> Option<&RawImage> {
        self.images.iter().find(|i| i.name == name)
    }

    pub fn prev(&mut self) -> bool {
        match self.current {
            Some(i) if i > 0 => {
                self.current = Some(i - 1);
                true
            }
            _ => false,
        }
    }

    pub fn next(&mut self) -> bool {
        match self.current {
            Some(i) if i + 1 < self.images.len() => {
                self.current = Some(i + 1);
                true
            }
            _ => false,
        }
    }

    /// Jumps to `index`, clamped to the queue bounds. Returns whether the selection moved.
    pub fn seek(&mut self, index: usize) -> bool {
        if self.images.is_empty() {
            return false;
        }
        let target = index.min(self.images.len() - 1);
        let moved = self.current != Some(target);
        self.current = Some(target);
        moved
    }

    /// Access URL and label status of the selected image.
    pub async fn load_current(&self, ctx: &LabelingContext<'_>) -> LabelingResult<Option<CurrentImage>> {
        let (Some(position), Some(image)) = (self.current, self.current()) else {
            return Ok(None);
        };

        let url = ctx.objects.url(&image.path).await?;
        let record = self.index.lookup(image);

        Ok(Some(CurrentImage {
            image: image.clone(),
            url,
            index: position,
            total: self.images.len(),
            status: record.map(|r| r.status).unwrap_or(LabelStatus::Unlabeled),
            label: record.map(|r| r.label.clone()),
            labeled_by: record.map(|r| r.labeled_by.clone()),
        }))
    }

    /// Removes `name` from the queue, keeping the selection on the same position.
    /// A freshly written record is added to the label index.
    pub fn complete(&mut self, name: &str, record: Option<LabelRecord>) -> bool {
        if let Some(record) = record {
            self.index.insert(record);
        }

        let Some(removed) = self.images.iter().position(|i| i.name == name) else {
            return false;
        };
        self.images.remove(removed);

        self.current = match self.current {
            _ if self.images.is_empty() => None,
            Some(i) if removed < i => Some(i - 1),
            Some(i) => Some(i.min(self.images.len() - 1)),
            None => Some(0),
        };
        true
    }

    /// Drops the source of a committed crop batch and indexes what it published.
    pub fn apply_batch(&mut self, report: &BatchReport) -> bool {
        if report.phase != WorkflowPhase::Committed {
            return false;
        }
        for record in report.records() {
            self.index.insert(record);
        }
        self.complete(&report.source.name, None)
    }

    /// Deletes a raw image and any label record correlated with it.
    pub async fn discard(&mut self, ctx: &LabelingContext<'_>, name: &str) -> LabelingResult<()> {
        let image = self
            .find(name)
            .cloned()
            .ok_or_else(|| LabelingError::NotFound(format!("image {} is not in the queue", name)))?;

        ctx.objects.delete(&image.path).await?;

        if let Some(record) = self.index.lookup(&image).cloned() {
            ctx.records.delete(&self.dataset, &record.name).await?;
            self.index.remove(&record.name);
            tracing::info!("🗑️ Removed label record {} for {}", record.name, image.name);
        }

        self.complete(name, None);
        tracing::info!("🗑️ Discarded {} from {}", name, self.dataset);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RetryPolicy;
    use crate::layout::StoreLayout;
    use chrono::{Duration, Utc};
    use labelme_atoms::labels::RecordStore;
    use labelme_atoms::media::{ObjectMetadata, ObjectStore};
    use labelme_atoms::memory::{MemoryObjectStore, MemoryRecordStore};
    use pretty_assertions::assert_eq;

    async fn seed(objects: &MemoryObjectStore, names: &[&str]) {
        let base = Utc::now();
        objects
            .put("multipleFiles/cats/.placeholder", Vec::new(), ObjectMetadata::default())
            .await
            .unwrap();
        for (i, name) in names.iter().enumerate() {
            let path = format!("multipleFiles/cats/{}", name);
            let id = name.split('_').next().unwrap_or_default();
            objects
                .put(&path, vec![0], ObjectMetadata::with_content_type("image/jpeg").insert("imageId", id))
                .await
                .unwrap();
            objects.touch(&path, base + Duration::seconds(i as i64)).await.unwrap();
        }
    }

    fn names(queue: &UnlabeledQueue) -> Vec<String> {
        queue.images().iter().map(|i| i.name.clone()).collect()
    }

    #[tokio::test]
    async fn load_sorts_newest_first_and_skips_bookkeeping() {
        let objects = MemoryObjectStore::new();
        let records = MemoryRecordStore::new();
        let layout = StoreLayout::default();
        let ctx = LabelingContext::new(&objects, &records, &layout, RetryPolicy::default());
        seed(&objects, &["1_a.jpg", "2_b.jpg", "3_c.jpg"]).await;
        objects
            .put("multipleFiles/cats/cats.csv", vec![], ObjectMetadata::default())
            .await
            .unwrap();

        let queue = UnlabeledQueue::load(&ctx, "cats").await.unwrap();
        assert_eq!(names(&queue), vec!["3_c.jpg", "2_b.jpg", "1_a.jpg"]);
        assert_eq!(queue.current_index(), Some(0));
    }

    #[tokio::test]
    async fn navigation_clamps_without_wrapping() {
        let objects = MemoryObjectStore::new();
        let records = MemoryRecordStore::new();
        let layout = StoreLayout::default();
        let ctx = LabelingContext::new(&objects, &records, &layout, RetryPolicy::default());
        seed(&objects, &["1_a.jpg", "2_b.jpg"]).await;

        let mut queue = UnlabeledQueue::load(&ctx, "cats").await.unwrap();
        assert!(!queue.prev());
        assert!(queue.next());
        assert!(!queue.next());
        assert_eq!(queue.current_index(), Some(1));
        assert!(queue.seek(0));
        assert!(queue.seek(99));
        assert_eq!(queue.current_index(), Some(1));
    }

    #[tokio::test]
    async fn complete_keeps_position() {
        let objects = MemoryObjectStore::new();
        let records = MemoryRecordStore::new();
        let layout = StoreLayout::default();
        let ctx = LabelingContext::new(&objects, &records, &layout, RetryPolicy::default());
        seed(&objects, &["1_a.jpg", "2_b.jpg", "3_c.jpg"]).await;

        let mut queue = UnlabeledQueue::load(&ctx, "cats").await.unwrap();
        queue.seek(2);
        assert!(queue.complete("1_a.jpg", None));
        assert_eq!(queue.current().unwrap().name, "2_b.jpg");

        queue.seek(0);
        queue.complete("3_c.jpg", None);
        assert_eq!(queue.current().unwrap().name, "2_b.jpg");
        queue.complete("2_b.jpg", None);
        assert_eq!(queue.current_index(), None);
        assert!(!queue.complete("missing.jpg", None));
    }

    #[tokio::test]
    async fn load_current_reports_label_status() {
        let objects = MemoryObjectStore::new();
        let records = MemoryRecordStore::new();
        let layout = StoreLayout::default();
        let ctx = LabelingContext::new(&objects, &records, &layout, RetryPolicy::default());
        seed(&objects, &["1_a.jpg", "2_b.jpg"]).await;
        records
            .put(
                "cats",
                &LabelRecord {
                    name: "9_tabby.jpg".to_string(),
                    url: String::new(),
                    label: "tabby".to_string(),
                    coordinates: None,
                    dataset: "cats".to_string(),
                    status: LabelStatus::Labeled,
                    timestamp: String::new(),
                    labeled_by: "ann@example.com".to_string(),
                    image_path: String::new(),
                    source_id: Some("1".to_string()),
                    version: 0,
                },
                None,
            )
            .await
            .unwrap();

        let mut queue = UnlabeledQueue::load(&ctx, "cats").await.unwrap();
        let first = queue.load_current(&ctx).await.unwrap().unwrap();
        assert_eq!(first.image.name, "2_b.jpg");
        assert_eq!(first.status, LabelStatus::Unlabeled);
        assert_eq!(first.url, "memory://multipleFiles/cats/2_b.jpg");

        queue.next();
        let second = queue.load_current(&ctx).await.unwrap().unwrap();
        assert_eq!(second.status, LabelStatus::Labeled);
        assert_eq!(second.label.as_deref(), Some("tabby"));
        assert_eq!(second.total, 2);
    }

    #[tokio::test]
    async fn discard_removes_object_and_correlated_record() {
        let objects = MemoryObjectStore::new();
        let records = MemoryRecordStore::new();
        let layout = StoreLayout::default();
        let ctx = LabelingContext::new(&objects, &records, &layout, RetryPolicy::default());
        seed(&objects, &["1_a.jpg"]).await;
        records
            .put(
                "cats",
                &LabelRecord {
                    name: "9_tabby.jpg".to_string(),
                    url: String::new(),
                    label: "tabby".to_string(),
                    coordinates: None,
                    dataset: "cats".to_string(),
                    status: LabelStatus::Labeled,
                    timestamp: String::new(),
                    labeled_by: String::new(),
                    image_path: String::new(),
                    source_id: Some("1".to_string()),
                    version: 0,
                },
                None,
            )
            .await
            .unwrap();

        let mut queue = UnlabeledQueue::load(&ctx, "cats").await.unwrap();
        queue.discard(&ctx, "1_a.jpg").await.unwrap();

        assert!(queue.is_empty());
        assert!(!objects.contains("multipleFiles/cats/1_a.jpg").await);
        assert!(records.is_empty().await);
        assert!(matches!(
            queue.discard(&ctx, "1_a.jpg").await,
            Err(LabelingError::NotFound(_))
        ));
    }
}
