//! Turning a raw image into labeled images.
//!
//! A [`CropSession`] accumulates `(region, label)` pairs for one raw image and
//! publishes them as a batch. Every pair is published on its own: the JPEG blob
//! is written first and the label document second, so a document never points
//! at a missing blob. Pairs that fail stay pending and are the only ones sent
//! again on the next [`CropSession::upload_all`]. The raw image is removed only
//! once every pair has been published.

use futures::future::join_all;
use image::GenericImageView;
use labelme_atoms::labels::{CropRegion, LabelMetadata, LabelRecord, LabelStatus};
use labelme_atoms::media::file_name;
use labelme_atoms::StoreError;
use serde::Serialize;

use crate::context::LabelingContext;
use crate::crop::{clamp_region, decode, render_crop, JPEG_CONTENT_TYPE};
use crate::error::{LabelingError, LabelingResult};
use crate::layout::crop_name;
use crate::types::{now_iso, LabeledImage, RawImage};

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowPhase {
    Idle,
    Cropping,
    Uploading,
    Committed,
    Failed,
}

/// Blob already written for a pair whose document write failed.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct StoredBlob {
    pub name: String,
    pub path: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingCrop {
    pub region: CropRegion,
    pub label: String,
    stored: Option<StoredBlob>,
}

impl PendingCrop {
    fn new(region: CropRegion, label: String) -> Self {
        Self {
            region,
            label,
            stored: None,
        }
    }

    /// True when only the label document is left to write.
    pub fn blob_stored(&self) -> bool {
        self.stored.is_some()
    }
}

/// A pair that did not publish. `stored` is set when its blob was written and
/// only the label document is missing; resending the pair with that blob's name
/// finishes it without a second upload.
#[derive(Debug, Serialize, Clone)]
pub struct FailedCrop {
    pub label: String,
    pub region: CropRegion,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored: Option<StoredBlob>,
}

/// Outcome of one `upload_all` call, one entry per pair.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub phase: WorkflowPhase,
    pub source: RawImage,
    pub published: Vec<LabeledImage>,
    pub failed: Vec<FailedCrop>,
    pub source_removed: bool,
}

impl BatchReport {
    /// Label records for what this batch published, for updating a label index.
    pub fn records(&self) -> Vec<LabelRecord> {
        self.published
            .iter()
            .map(|p| p.to_record(Some(self.source.source_id.clone())))
            .collect()
    }
}

/// Crop/label workflow for a single raw image.
#[derive(Debug, Clone)]
pub struct CropSession {
    dataset: String,
    labeled_by: String,
    phase: WorkflowPhase,
    source: Option<RawImage>,
    pending: Vec<PendingCrop>,
}

impl CropSession {
    pub fn new(dataset: impl Into<String>, labeled_by: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            labeled_by: labeled_by.into(),
            phase: WorkflowPhase::Idle,
            source: None,
            pending: Vec::new(),
        }
    }

    pub fn phase(&self) -> WorkflowPhase {
        self.phase
    }

    pub fn source(&self) -> Option<&RawImage> {
        self.source.as_ref()
    }

    pub fn pending(&self) -> &[PendingCrop] {
        &self.pending
    }

    pub fn open(&mut self, source: RawImage) -> LabelingResult<()> {
        match self.phase {
            WorkflowPhase::Cropping | WorkflowPhase::Uploading => Err(LabelingError::InvalidState(
                format!("a crop session for {} is still open", self.source_name()),
            )),
            _ => {
                tracing::info!("✂️ Cropping {}", source.name);
                self.source = Some(source);
                self.pending.clear();
                self.phase = WorkflowPhase::Cropping;
                Ok(())
            }
        }
    }

    /// Adds a pair. Blank labels and empty regions are rejected and leave the batch unchanged.
    pub fn record(&mut self, region: CropRegion, label: &str) -> LabelingResult<()> {
        self.ensure_editable()?;
        let label = label.trim();
        if label.is_empty() {
            return Err(LabelingError::validation("Please enter a label for the cropped image!"));
        }
        if region.is_empty() {
            return Err(LabelingError::validation("Please select a region to crop!"));
        }
        self.pending.push(PendingCrop::new(region, label.to_string()));
        self.phase = WorkflowPhase::Cropping;
        Ok(())
    }

    /// Adds a pair whose blob is already stored, see [`stored_crop`].
    pub fn resume(&mut self, pair: PendingCrop) -> LabelingResult<()> {
        self.ensure_editable()?;
        if pair.stored.is_none() {
            return Err(LabelingError::validation("Only stored crops can be resumed"));
        }
        self.pending.push(pair);
        self.phase = WorkflowPhase::Cropping;
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> LabelingResult<PendingCrop> {
        self.ensure_editable()?;
        if index >= self.pending.len() {
            return Err(LabelingError::validation(format!("No cropped image at position {}", index)));
        }
        Ok(self.pending.remove(index))
    }

    pub fn cancel(&mut self) {
        self.pending.clear();
        self.source = None;
        self.phase = WorkflowPhase::Idle;
    }

    /// Publishes every pending pair concurrently.
    pub async fn upload_all(&mut self, ctx: &LabelingContext<'_>) -> LabelingResult<BatchReport> {
        self.ensure_editable()?;
        let source = self
            .source
            .clone()
            .ok_or_else(|| LabelingError::InvalidState("no image is open".to_string()))?;
        if self.pending.is_empty() {
            return Err(LabelingError::validation("Please crop at least one region before uploading!"));
        }

        self.phase = WorkflowPhase::Uploading;
        tracing::info!("📤 Uploading {} crops of {}", self.pending.len(), source.name);

        let pending = std::mem::take(&mut self.pending);
        let rendered = match self.render_all(ctx, &source, &pending).await {
            Ok(rendered) => rendered,
            Err(e) => {
                tracing::error!("❌ Could not read source image {}: {}", source.name, e);
                self.pending = pending;
                self.phase = WorkflowPhase::Failed;
                return Err(e);
            }
        };

        let timestamp = now_iso();
        let units = pending.into_iter().zip(rendered).map(|(pair, bytes)| {
            let meta = LabelMetadata {
                label: pair.label.clone(),
                coordinates: Some(pair.region),
                status: LabelStatus::Labeled,
                dataset: self.dataset.clone(),
                timestamp: timestamp.clone(),
                labeled_by: self.labeled_by.clone(),
                source_id: Some(source.source_id.clone()),
            };
            publish_pair(ctx, &self.dataset, pair, bytes, meta)
        });
        let outcomes = join_all(units).await;

        let mut published = Vec::new();
        let mut failed = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(image) => published.push(image),
                Err((pair, e)) => {
                    failed.push(FailedCrop {
                        label: pair.label.clone(),
                        region: pair.region,
                        error: e.to_string(),
                        stored: pair.stored.clone(),
                    });
                    self.pending.push(pair);
                }
            }
        }

        let mut source_removed = false;
        if failed.is_empty() {
            match ctx.objects.delete(&source.path).await {
                Ok(()) => source_removed = true,
                Err(e) => tracing::warn!("⚠️ Labeled crops saved but {} was not removed: {}", source.path, e),
            }
            self.phase = WorkflowPhase::Committed;
            tracing::info!("✅ Published {} crops of {}", published.len(), source.name);
        } else {
            self.phase = WorkflowPhase::Failed;
            tracing::error!(
                "❌ {} of {} crops of {} failed, kept for retry",
                failed.len(),
                failed.len() + published.len(),
                source.name
            );
        }

        Ok(BatchReport {
            phase: self.phase,
            source,
            published,
            failed,
            source_removed,
        })
    }

    /// Renders a JPEG for every pair that still needs a blob. The source is only
    /// fetched when at least one does.
    async fn render_all(
        &self,
        ctx: &LabelingContext<'_>,
        source: &RawImage,
        pending: &[PendingCrop],
    ) -> LabelingResult<Vec<Option<Rendered>>> {
        if pending.iter().all(|p| p.blob_stored()) {
            return Ok(vec![None; pending.len()]);
        }

        let bytes = ctx.objects.get(&source.path).await?;
        let image = decode(&bytes)?;
        let (width, height) = image.dimensions();

        pending
            .iter()
            .map(|pair| {
                if pair.blob_stored() {
                    return Ok(None);
                }
                let Some(region) = clamp_region(&pair.region, width, height) else {
                    return Ok(Some(Rendered::OutOfBounds));
                };
                let jpeg = render_crop(&image, &region)?;
                Ok(Some(Rendered::Jpeg { region, bytes: jpeg }))
            })
            .collect()
    }

    fn ensure_editable(&self) -> LabelingResult<()> {
        match self.phase {
            WorkflowPhase::Cropping | WorkflowPhase::Failed => Ok(()),
            phase => Err(LabelingError::InvalidState(format!(
                "cannot change crops while {:?}",
                phase
            ))),
        }
    }

    fn source_name(&self) -> &str {
        self.source.as_ref().map(|s| s.name.as_str()).unwrap_or("")
    }
}

#[derive(Debug, Clone)]
enum Rendered {
    Jpeg { region: CropRegion, bytes: Vec<u8> },
    OutOfBounds,
}

/// Publishes one pair: blob (unless already stored), then document.
/// On failure the pair comes back with whatever progress it made.
async fn publish_pair(
    ctx: &LabelingContext<'_>,
    dataset: &str,
    mut pair: PendingCrop,
    rendered: Option<Rendered>,
    mut meta: LabelMetadata,
) -> Result<LabeledImage, (PendingCrop, LabelingError)> {
    let blob = match (pair.stored.clone(), rendered) {
        (Some(blob), _) => blob,
        (None, Some(Rendered::Jpeg { region, bytes })) => {
            meta.coordinates = Some(region);
            let name = crop_name(&uuid::Uuid::new_v4().to_string(), &pair.label);
            match store_blob(ctx, dataset, &name, bytes, JPEG_CONTENT_TYPE, &meta).await {
                Ok(blob) => {
                    pair.region = region;
                    pair.stored = Some(blob.clone());
                    blob
                }
                Err(e) => return Err((pair, e)),
            }
        }
        (None, _) => {
            let e = LabelingError::validation(format!(
                "Region {:?} lies outside the image",
                pair.region
            ));
            return Err((pair, e));
        }
    };

    match write_document(ctx, dataset, &blob, &meta).await {
        Ok(image) => Ok(image),
        Err(e) => Err((pair, e)),
    }
}

/// Looks up a crop blob written by an earlier batch of `source` so it can be
/// resent without uploading it again. Label and region come from the blob.
pub async fn stored_crop(
    ctx: &LabelingContext<'_>,
    dataset: &str,
    source: &RawImage,
    name: &str,
) -> LabelingResult<PendingCrop> {
    if name.trim().is_empty() || name.contains('/') {
        return Err(LabelingError::validation(format!("Invalid stored crop name: {}", name)));
    }
    let path = ctx.layout.labeled_path(dataset, name);
    let info = match ctx.objects.metadata(&path).await {
        Ok(info) => info,
        Err(StoreError::NotFound(_)) => {
            return Err(LabelingError::validation(format!("Stored crop {} no longer exists", name)))
        }
        Err(e) => return Err(e.into()),
    };

    let meta = LabelMetadata::from_custom(&info.custom);
    if meta.source_id.as_deref() != Some(source.source_id.as_str()) {
        return Err(LabelingError::validation(format!(
            "Stored crop {} was not cut from {}",
            name, source.name
        )));
    }
    let Some(region) = meta.coordinates else {
        return Err(LabelingError::validation(format!("Stored crop {} has no region", name)));
    };

    let url = ctx.objects.url(&path).await?;
    Ok(PendingCrop {
        region,
        label: meta.label,
        stored: Some(StoredBlob {
            name: name.to_string(),
            path,
            url,
        }),
    })
}

/// Writes a labeled blob with its label metadata and resolves its access URL.
pub(crate) async fn store_blob(
    ctx: &LabelingContext<'_>,
    dataset: &str,
    name: &str,
    bytes: Vec<u8>,
    content_type: &str,
    meta: &LabelMetadata,
) -> LabelingResult<StoredBlob> {
    let path = ctx.layout.labeled_path(dataset, name);
    ctx.objects
        .put(&path, bytes, meta.clone().into_object_metadata(Some(content_type)))
        .await?;
    let url = ctx.objects.url(&path).await?;
    Ok(StoredBlob {
        name: name.to_string(),
        path,
        url,
    })
}

/// Writes the label document for a stored blob, retrying per the context policy.
pub(crate) async fn write_document(
    ctx: &LabelingContext<'_>,
    dataset: &str,
    blob: &StoredBlob,
    meta: &LabelMetadata,
) -> LabelingResult<LabeledImage> {
    let mut record = LabelRecord {
        name: blob.name.clone(),
        url: blob.url.clone(),
        label: meta.label.clone(),
        coordinates: meta.coordinates,
        dataset: dataset.to_string(),
        status: meta.status,
        timestamp: meta.timestamp.clone(),
        labeled_by: meta.labeled_by.clone(),
        image_path: blob.path.clone(),
        source_id: meta.source_id.clone(),
        version: 0,
    };

    match ctx.write_record(dataset, &record, None).await {
        Ok(version) => {
            record.version = version;
            Ok(LabeledImage::from_record(&record))
        }
        Err(e) => {
            tracing::error!("❌ Blob {} stored but its label document failed: {}", blob.path, e);
            Err(e.into())
        }
    }
}

/// Labels a whole raw image: copies it under the labeled root with label metadata,
/// writes its document and then removes the original.
pub async fn save_label(
    ctx: &LabelingContext<'_>,
    dataset: &str,
    image: &RawImage,
    label: &str,
    region: Option<CropRegion>,
    labeled_by: &str,
) -> LabelingResult<LabeledImage> {
    let label = label.trim();
    if label.is_empty() {
        return Err(LabelingError::validation("Please enter a label!"));
    }
    if region.is_some_and(|r| r.is_empty()) {
        return Err(LabelingError::validation("Please select a region to crop!"));
    }

    let info = ctx.objects.metadata(&image.path).await?;
    let bytes = ctx.objects.get(&image.path).await?;
    let content_type = info
        .content_type
        .clone()
        .unwrap_or_else(|| mime_guess::from_path(&image.name).first_or_octet_stream().to_string());

    let meta = LabelMetadata {
        label: label.to_string(),
        coordinates: region,
        status: LabelStatus::Labeled,
        dataset: dataset.to_string(),
        timestamp: now_iso(),
        labeled_by: labeled_by.to_string(),
        source_id: Some(image.source_id.clone()),
    };

    let name = file_name(&image.path);
    let blob = store_blob(ctx, dataset, name, bytes, &content_type, &meta).await?;
    let labeled = write_document(ctx, dataset, &blob, &meta).await?;

    if let Err(e) = ctx.objects.delete(&image.path).await {
        tracing::warn!("⚠️ Label saved but {} was not removed: {}", image.path, e);
    }

    tracing::info!("✅ Labeled {} as {}", image.name, label);
    Ok(labeled)
}
