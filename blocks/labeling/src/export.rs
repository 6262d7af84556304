use futures::future::join_all;
use labelme_atoms::labels::{CropRegion, LabelMetadata};
use labelme_atoms::media::{file_name, ObjectSummary};
use labelme_atoms::StoreError;
use serde::Serialize;

use crate::context::LabelingContext;
use crate::error::{LabelingError, LabelingResult};
use crate::layout::{is_bookkeeping, percent_decode};
use crate::types::parse_timestamp;

pub const EXPORT_HEADER: [&str; 5] = ["Image URL", "Label", "Label By", "Top Left", "Bottom Right"];

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExportFile {
    pub file_name: String,
    pub content: String,
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExportOutcome {
    Ready(ExportFile),
    NothingToExport { message: String },
}

/// Builds the CSV export of every labeled image in a dataset.
pub async fn export_csv(ctx: &LabelingContext<'_>, dataset: &str) -> LabelingResult<ExportOutcome> {
    let listing = ctx.objects.list(&ctx.layout.labeled_prefix(dataset)).await?;
    let objects: Vec<&ObjectSummary> = listing
        .objects
        .iter()
        .filter(|o| !is_bookkeeping(&o.name))
        .collect();

    if objects.is_empty() {
        tracing::info!("📭 Nothing to export for {}", dataset);
        return Ok(ExportOutcome::NothingToExport {
            message: format!("No labeled images in dataset {}", dataset),
        });
    }

    let rows = join_all(objects.iter().map(|o| export_row(ctx, o))).await;

    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(EXPORT_HEADER)?;

    let mut written = 0;
    for row in rows.into_iter().flatten() {
        writer.write_record(&row)?;
        written += 1;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| LabelingError::Csv(csv::Error::from(e.into_error())))?;
    let mut content = String::from_utf8_lossy(&bytes).into_owned();
    if written > 0 && content.ends_with('\n') {
        content.pop();
    }

    tracing::info!("📦 Exported {} labeled images of {}", written, dataset);
    Ok(ExportOutcome::Ready(ExportFile {
        file_name: format!("{}_labeled_images.csv", dataset),
        content,
        rows: written,
    }))
}

async fn export_row(ctx: &LabelingContext<'_>, object: &ObjectSummary) -> Option<[String; 5]> {
    let (url, info) = match tokio::try_join!(ctx.objects.url(&object.path), ctx.objects.metadata(&object.path)) {
        Ok(found) => found,
        Err(e) => {
            tracing::warn!("⚠️ Leaving {} out of the export: {}", object.path, e);
            return None;
        }
    };

    let meta = LabelMetadata::from_custom(&info.custom);
    let (top_left, bottom_right) = match meta.coordinates {
        Some(region) => {
            let (x1, y1) = region.top_left();
            let (x2, y2) = region.bottom_right();
            (format!("{}:{}", x1, y1), format!("{}:{}", x2, y2))
        }
        None => (String::new(), String::new()),
    };

    Some([url, meta.label, meta.labeled_by, top_left, bottom_right])
}

/// One row of a previously written dataset snapshot.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRow {
    pub url: String,
    pub name: String,
    pub label: String,
    pub labeled_by: String,
    pub timestamp: String,
    pub coordinates: Option<CropRegion>,
}

/// Reads `{labeled_root}/{dataset}/{dataset}.csv`, keeping rows whose image still exists.
/// A missing snapshot or one without an `Image URL` column reads as empty.
pub async fn read_snapshot(ctx: &LabelingContext<'_>, dataset: &str) -> LabelingResult<Vec<SnapshotRow>> {
    let path = ctx.layout.snapshot_path(dataset);
    let bytes = match ctx.objects.get(&path).await {
        Ok(bytes) => bytes,
        Err(StoreError::NotFound(_)) => {
            tracing::info!("📭 No snapshot at {}", path);
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes.as_slice());

    let headers = reader.headers()?.clone();
    let Some(url_col) = headers.iter().position(|h| h == "Image URL") else {
        tracing::error!("❌ Snapshot {} has no Image URL column", path);
        return Ok(Vec::new());
    };
    let column = |name: &str, fallback: usize| headers.iter().position(|h| h == name).unwrap_or(fallback);
    let (label_col, by_col, ts_col, coord_col) = (
        column("Label", url_col + 1),
        column("Label By", url_col + 2),
        column("Timestamp", url_col + 3),
        column("Coordinates", url_col + 4),
    );

    let mut candidates = Vec::new();
    for record in reader.records() {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("⚠️ Skipping unreadable snapshot line: {}", e);
                continue;
            }
        };
        let field = |i: usize| record.get(i).unwrap_or_default().to_string();
        let url = field(url_col);
        let label = field(label_col);
        if url.is_empty() || label.is_empty() {
            continue;
        }
        let name = image_name_from_url(&url);
        candidates.push(SnapshotRow {
            name,
            url,
            label,
            labeled_by: field(by_col),
            timestamp: field(ts_col),
            coordinates: CropRegion::from_metadata(field(coord_col).trim_matches('"')),
        });
    }

    let checks = candidates.into_iter().map(|row| async move {
        let path = ctx.layout.labeled_path(dataset, &row.name);
        match ctx.objects.metadata(&path).await {
            Ok(_) => Some(row),
            Err(_) => {
                tracing::info!("Image {} not found in storage, skipping", row.name);
                None
            }
        }
    });
    let mut rows: Vec<SnapshotRow> = join_all(checks).await.into_iter().flatten().collect();
    rows.sort_by(|a, b| parse_timestamp(&b.timestamp).cmp(&parse_timestamp(&a.timestamp)));
    Ok(rows)
}

/// Object name from a download URL: last path segment, query dropped, percent-decoded.
fn image_name_from_url(url: &str) -> String {
    let last = url.rsplit('/').next().unwrap_or(url);
    let without_query = last.split('?').next().unwrap_or(last);
    let decoded = percent_decode(without_query);
    file_name(&decoded).to_string()
}
