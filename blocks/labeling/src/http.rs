use base64::{engine::general_purpose::STANDARD, Engine as _};
use labelme_atoms::users::{ClientStateStore, User};
use labelme_atoms::StoreError;
use lambda_http::{http::StatusCode, Body, Error as LambdaError, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::context::LabelingContext;
use crate::datasets::{create_dataset, list_datasets, select_dataset};
use crate::error::{LabelingError, LabelingResult};
use crate::export::{export_csv, read_snapshot, ExportOutcome};
use crate::queue::UnlabeledQueue;
use crate::recent::{RecentPanel, PAGE_SIZE};
use crate::types::{
    CreateDatasetPayload, CropBatchPayload, CurrentImage, LabeledImage, SaveLabelPayload,
    SelectDatasetPayload, UpdateLabelPayload, UploadFile, UploadImagesPayload,
};
use crate::upload::upload_images;
use crate::workflow::{save_label, stored_crop, BatchReport, CropSession, WorkflowPhase};

// ========== RESPONSE HELPERS ==========

pub fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Result<Response<Body>, LambdaError> {
    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(serde_json::to_string(value)?.into())
        .map_err(Box::new)?)
}

pub fn error_body(status: StatusCode, message: &str) -> Result<Response<Body>, LambdaError> {
    json_response(status, &serde_json::json!({ "error": message }))
}

pub fn status_for(error: &LabelingError) -> StatusCode {
    match error {
        LabelingError::Validation(_) => StatusCode::BAD_REQUEST,
        LabelingError::NotFound(_) | LabelingError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
        LabelingError::Store(StoreError::Conflict { .. }) | LabelingError::InvalidState(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn error_response(error: &LabelingError) -> Result<Response<Body>, LambdaError> {
    let status = status_for(error);
    if status.is_server_error() {
        tracing::error!("❌ {}", error);
    } else {
        tracing::warn!("⚠️ {}", error);
    }
    error_body(status, &error.to_string())
}

fn respond<T: Serialize>(status: StatusCode, result: LabelingResult<T>) -> Result<Response<Body>, LambdaError> {
    match result {
        Ok(value) => json_response(status, &value),
        Err(e) => error_response(&e),
    }
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> LabelingResult<T> {
    serde_json::from_slice(body).map_err(|e| LabelingError::validation(format!("Invalid request body: {}", e)))
}

// ========== VIEWS ==========

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueView {
    pub dataset: String,
    pub total: usize,
    pub current: Option<CurrentImage>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedLabelView {
    pub labeled: LabeledImage,
    pub next: Option<CurrentImage>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CropBatchView {
    #[serde(flatten)]
    pub report: BatchReport,
    pub next: Option<CurrentImage>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelView {
    pub dataset: String,
    pub page: usize,
    pub page_size: usize,
    pub page_count: usize,
    pub total: usize,
    pub has_next: bool,
    pub rows: Vec<LabeledImage>,
}

impl PanelView {
    fn from_panel(panel: &RecentPanel) -> Self {
        Self {
            dataset: panel.dataset().to_string(),
            page: panel.page_index(),
            page_size: PAGE_SIZE,
            page_count: panel.page_count(),
            total: panel.all().len(),
            has_next: panel.has_next(),
            rows: panel.page().to_vec(),
        }
    }
}

// ========== DATASETS ==========

/// HTTP Handler: GET /datasets
pub async fn list_datasets_handler(ctx: &LabelingContext<'_>) -> Result<Response<Body>, LambdaError> {
    respond(StatusCode::OK, list_datasets(ctx).await)
}

/// HTTP Handler: POST /datasets
pub async fn create_dataset_handler(ctx: &LabelingContext<'_>, body: &[u8]) -> Result<Response<Body>, LambdaError> {
    let result = async {
        let payload: CreateDatasetPayload = parse(body)?;
        create_dataset(ctx, &payload.name).await
    }
    .await;
    respond(StatusCode::CREATED, result)
}

/// HTTP Handler: PUT /session/dataset
pub async fn select_dataset_handler(
    ctx: &LabelingContext<'_>,
    states: &dyn ClientStateStore,
    user: &User,
    body: &[u8],
) -> Result<Response<Body>, LambdaError> {
    let result = async {
        let payload: SelectDatasetPayload = parse(body)?;
        let selected = select_dataset(ctx, states, user, &payload.name).await?;
        Ok::<_, LabelingError>(serde_json::json!({ "selectedDataset": selected }))
    }
    .await;
    respond(StatusCode::OK, result)
}

/// HTTP Handler: POST /datasets/{ds}/images
pub async fn upload_images_handler(
    ctx: &LabelingContext<'_>,
    dataset: &str,
    body: &[u8],
) -> Result<Response<Body>, LambdaError> {
    let result = async {
        let payload: UploadImagesPayload = parse(body)?;
        let files = payload
            .files
            .into_iter()
            .map(|f| -> LabelingResult<UploadFile> {
                let bytes = STANDARD
                    .decode(f.data.as_bytes())
                    .map_err(|e| LabelingError::validation(format!("File {} is not valid base64: {}", f.name, e)))?;
                Ok(UploadFile {
                    name: f.name,
                    content_type: f.content_type,
                    bytes,
                })
            })
            .collect::<LabelingResult<Vec<_>>>()?;
        upload_images(ctx, dataset, files).await
    }
    .await;
    respond(StatusCode::CREATED, result)
}

// ========== QUEUE ==========

/// HTTP Handler: GET /datasets/{ds}/queue?index=n
pub async fn get_queue_handler(
    ctx: &LabelingContext<'_>,
    dataset: &str,
    index: Option<usize>,
) -> Result<Response<Body>, LambdaError> {
    let result = async {
        let mut queue = UnlabeledQueue::load(ctx, dataset).await?;
        queue.seek(index.unwrap_or(0));
        Ok::<_, LabelingError>(QueueView {
            dataset: dataset.to_string(),
            total: queue.len(),
            current: queue.load_current(ctx).await?,
        })
    }
    .await;
    respond(StatusCode::OK, result)
}

async fn load_queue_at(
    ctx: &LabelingContext<'_>,
    dataset: &str,
    name: &str,
) -> LabelingResult<UnlabeledQueue> {
    let mut queue = UnlabeledQueue::load(ctx, dataset).await?;
    let position = queue
        .images()
        .iter()
        .position(|i| i.name == name)
        .ok_or_else(|| LabelingError::NotFound(format!("image {} is not in dataset {}", name, dataset)))?;
    queue.seek(position);
    Ok(queue)
}

/// HTTP Handler: POST /datasets/{ds}/queue/{name}/label
pub async fn save_label_handler(
    ctx: &LabelingContext<'_>,
    dataset: &str,
    name: &str,
    labeled_by: &str,
    body: &[u8],
) -> Result<Response<Body>, LambdaError> {
    let result = async {
        let payload: SaveLabelPayload = parse(body)?;
        let mut queue = load_queue_at(ctx, dataset, name).await?;
        let image = queue
            .current()
            .cloned()
            .ok_or_else(|| LabelingError::NotFound(name.to_string()))?;

        let labeled = save_label(
            ctx,
            dataset,
            &image,
            &payload.label,
            payload.coordinates.map(Into::into),
            labeled_by,
        )
        .await?;

        queue.complete(name, Some(labeled.to_record(Some(image.source_id.clone()))));
        Ok::<_, LabelingError>(SavedLabelView {
            labeled,
            next: queue.load_current(ctx).await?,
        })
    }
    .await;
    respond(StatusCode::CREATED, result)
}

/// HTTP Handler: POST /datasets/{ds}/queue/{name}/crops
///
/// Every crop is validated before anything is written. Returns 201 when all
/// crops were published and 207 when some of them failed.
pub async fn upload_crops_handler(
    ctx: &LabelingContext<'_>,
    dataset: &str,
    name: &str,
    labeled_by: &str,
    body: &[u8],
) -> Result<Response<Body>, LambdaError> {
    let result = async {
        let payload: CropBatchPayload = parse(body)?;
        let mut queue = load_queue_at(ctx, dataset, name).await?;
        let image = queue
            .current()
            .cloned()
            .ok_or_else(|| LabelingError::NotFound(name.to_string()))?;

        let mut session = CropSession::new(dataset, labeled_by);
        session.open(image.clone())?;
        for crop in &payload.crops {
            match (&crop.stored_name, crop.region) {
                (Some(stored), _) => session.resume(stored_crop(ctx, dataset, &image, stored).await?)?,
                (None, Some(region)) => session.record(region.into(), &crop.label)?,
                (None, None) => return Err(LabelingError::validation("Please select a region to crop!")),
            }
        }

        let report = session.upload_all(ctx).await?;
        queue.apply_batch(&report);
        Ok::<_, LabelingError>(CropBatchView {
            next: queue.load_current(ctx).await?,
            report,
        })
    }
    .await;

    match result {
        Ok(view) if view.report.phase == WorkflowPhase::Committed => json_response(StatusCode::CREATED, &view),
        Ok(view) => json_response(StatusCode::MULTI_STATUS, &view),
        Err(e) => error_response(&e),
    }
}

/// HTTP Handler: DELETE /datasets/{ds}/queue/{name}
pub async fn discard_image_handler(
    ctx: &LabelingContext<'_>,
    dataset: &str,
    name: &str,
) -> Result<Response<Body>, LambdaError> {
    let result = async {
        let mut queue = load_queue_at(ctx, dataset, name).await?;
        queue.discard(ctx, name).await
    }
    .await;

    match result {
        Ok(()) => Ok(Response::builder()
            .status(StatusCode::NO_CONTENT)
            .header("Access-Control-Allow-Origin", "*")
            .body(Body::Empty)
            .map_err(Box::new)?),
        Err(e) => error_response(&e),
    }
}

// ========== RECENT LABELS ==========

/// HTTP Handler: GET /datasets/{ds}/labels?page=n
pub async fn list_labels_handler(
    ctx: &LabelingContext<'_>,
    dataset: &str,
    page: usize,
) -> Result<Response<Body>, LambdaError> {
    let result = async {
        let mut panel = RecentPanel::new(dataset);
        panel.load_page(ctx, page).await?;
        Ok::<_, LabelingError>(PanelView::from_panel(&panel))
    }
    .await;
    respond(StatusCode::OK, result)
}

/// HTTP Handler: PATCH /datasets/{ds}/labels/{name}?page=n
pub async fn update_label_handler(
    ctx: &LabelingContext<'_>,
    dataset: &str,
    name: &str,
    page: usize,
    labeled_by: &str,
    body: &[u8],
) -> Result<Response<Body>, LambdaError> {
    let result = async {
        let payload: UpdateLabelPayload = parse(body)?;
        let mut panel = RecentPanel::new(dataset);
        panel.load_page(ctx, page).await?;

        if !panel.page().iter().any(|r| r.name == name) {
            let position = panel
                .all()
                .iter()
                .position(|r| r.name == name)
                .ok_or_else(|| LabelingError::NotFound(format!("labeled image {}", name)))?;
            panel.load_page(ctx, position / PAGE_SIZE).await?;
        }
        let index = panel
            .page()
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| LabelingError::NotFound(format!("labeled image {}", name)))?;

        if let Some(expected) = payload.version {
            let found = panel.page()[index].version;
            if found != expected {
                return Err(StoreError::Conflict {
                    id: name.to_string(),
                    expected,
                    found,
                }
                .into());
            }
        }

        panel.edit_label(index, &payload.label)?;
        let saved = panel.save(ctx, index, labeled_by).await?;
        Ok::<_, LabelingError>(serde_json::json!({
            "saved": saved,
            "panel": PanelView::from_panel(&panel),
        }))
    }
    .await;
    respond(StatusCode::OK, result)
}

/// HTTP Handler: DELETE /datasets/{ds}/labels/{name}?page=n
pub async fn delete_label_handler(
    ctx: &LabelingContext<'_>,
    dataset: &str,
    name: &str,
    page: usize,
) -> Result<Response<Body>, LambdaError> {
    let result = async {
        let mut panel = RecentPanel::new(dataset);
        panel.load_page(ctx, page).await?;
        panel.delete_row(ctx, name).await?;
        Ok::<_, LabelingError>(PanelView::from_panel(&panel))
    }
    .await;
    respond(StatusCode::OK, result)
}

// ========== EXPORT ==========

/// HTTP Handler: GET /datasets/{ds}/export
pub async fn export_handler(ctx: &LabelingContext<'_>, dataset: &str) -> Result<Response<Body>, LambdaError> {
    match export_csv(ctx, dataset).await {
        Ok(ExportOutcome::Ready(file)) => Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "text/csv;charset=utf-8")
            .header(
                "Content-Disposition",
                format!("attachment; filename=\"{}\"", file.file_name),
            )
            .header("Access-Control-Allow-Origin", "*")
            .body(file.content.into())
            .map_err(Box::new)?),
        Ok(ExportOutcome::NothingToExport { message }) => {
            json_response(StatusCode::NOT_FOUND, &serde_json::json!({ "message": message }))
        }
        Err(e) => error_response(&e),
    }
}

/// HTTP Handler: GET /datasets/{ds}/snapshot
pub async fn snapshot_handler(ctx: &LabelingContext<'_>, dataset: &str) -> Result<Response<Body>, LambdaError> {
    respond(StatusCode::OK, read_snapshot(ctx, dataset).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RetryPolicy;
    use crate::layout::StoreLayout;
    use labelme_atoms::memory::{MemoryObjectStore, MemoryRecordStore};

    fn body_json(resp: &Response<Body>) -> serde_json::Value {
        serde_json::from_slice(resp.body()).unwrap()
    }

    #[test]
    fn errors_map_to_statuses() {
        assert_eq!(status_for(&LabelingError::validation("x")), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&LabelingError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(&StoreError::Conflict { id: "a".into(), expected: 1, found: 2 }.into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&StoreError::Backend("boom".into()).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let objects = MemoryObjectStore::new();
        let records = MemoryRecordStore::new();
        let layout = StoreLayout::default();
        let ctx = LabelingContext::new(&objects, &records, &layout, RetryPolicy::default());

        let resp = create_dataset_handler(&ctx, b"{not json").await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(&resp)["error"].as_str().unwrap().starts_with("Invalid request body"));
    }

    #[tokio::test]
    async fn empty_export_is_not_found_message() {
        let objects = MemoryObjectStore::new();
        let records = MemoryRecordStore::new();
        let layout = StoreLayout::default();
        let ctx = LabelingContext::new(&objects, &records, &layout, RetryPolicy::default());

        let resp = export_handler(&ctx, "cats").await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(body_json(&resp)["message"].as_str().is_some());
    }

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let mut out = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(width, height, image::Rgb([90, 60, 30])))
            .write_to(&mut out, image::ImageOutputFormat::Jpeg(90))
            .unwrap();
        out.into_inner()
    }

    #[tokio::test]
    async fn resent_crop_reuses_its_stored_blob() {
        let objects = MemoryObjectStore::new();
        let records = MemoryRecordStore::new();
        let layout = StoreLayout::default();
        let retry = RetryPolicy {
            document_attempts: 1,
            backoff: std::time::Duration::from_millis(1),
        };
        let ctx = LabelingContext::new(&objects, &records, &layout, retry);
        upload_images(
            &ctx,
            "cats",
            vec![UploadFile {
                name: "a.jpg".into(),
                content_type: Some("image/jpeg".into()),
                bytes: jpeg(64, 64),
            }],
        )
        .await
        .unwrap();
        let name = UnlabeledQueue::load(&ctx, "cats").await.unwrap().images()[0].name.clone();
        records.fail_next_puts(1).await;

        let body = br#"{"crops":[{"label":"tabby","region":{"x":0,"y":0,"width":50,"height":50}}]}"#;
        let first = upload_crops_handler(&ctx, "cats", &name, "ann", body).await.unwrap();
        assert_eq!(first.status(), StatusCode::MULTI_STATUS);
        let stored = body_json(&first)["failed"][0]["stored"]["name"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(stored.ends_with("_tabby.jpg"));

        let resend = serde_json::json!({ "crops": [{ "storedName": stored }] }).to_string();
        let second = upload_crops_handler(&ctx, "cats", &name, "ann", resend.as_bytes())
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CREATED);

        let blobs: Vec<String> = objects
            .paths()
            .await
            .into_iter()
            .filter(|p| p.starts_with("labeled_images/cats/"))
            .collect();
        assert_eq!(blobs, vec![format!("labeled_images/cats/{}", stored)]);
        assert_eq!(records.len().await, 1);
        let labeled = crate::recent::list_labeled(&ctx, "cats").await.unwrap();
        assert_eq!(labeled.len(), 1);
        assert_eq!(labeled[0].label, "tabby");
        assert_eq!(labeled[0].coordinates, Some(labelme_atoms::labels::CropRegion::new(0, 0, 50, 50)));
    }

    #[tokio::test]
    async fn unknown_stored_crop_is_rejected() {
        let objects = MemoryObjectStore::new();
        let records = MemoryRecordStore::new();
        let layout = StoreLayout::default();
        let ctx = LabelingContext::new(&objects, &records, &layout, RetryPolicy::default());
        upload_images(
            &ctx,
            "cats",
            vec![UploadFile {
                name: "a.jpg".into(),
                content_type: Some("image/jpeg".into()),
                bytes: jpeg(16, 16),
            }],
        )
        .await
        .unwrap();
        let name = UnlabeledQueue::load(&ctx, "cats").await.unwrap().images()[0].name.clone();

        let body = br#"{"crops":[{"storedName":"nope_tabby.jpg"}]}"#;
        let resp = upload_crops_handler(&ctx, "cats", &name, "ann", body).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(records.is_empty().await);
    }

    #[tokio::test]
    async fn invalid_crop_is_rejected_before_writes() {
        let objects = MemoryObjectStore::new();
        let records = MemoryRecordStore::new();
        let layout = StoreLayout::default();
        let ctx = LabelingContext::new(&objects, &records, &layout, RetryPolicy::default());
        upload_images(
            &ctx,
            "cats",
            vec![UploadFile {
                name: "a.jpg".into(),
                content_type: Some("image/jpeg".into()),
                bytes: vec![1],
            }],
        )
        .await
        .unwrap();
        let name = UnlabeledQueue::load(&ctx, "cats").await.unwrap().images()[0].name.clone();
        let before = objects.paths().await;

        let body = br#"{"crops":[{"label":"tabby","region":{"x":0,"y":0,"width":5,"height":5}},{"label":" ","region":{"x":0,"y":0,"width":5,"height":5}}]}"#;
        let resp = upload_crops_handler(&ctx, "cats", &name, "ann", body).await.unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(objects.paths().await, before);
        assert!(records.is_empty().await);
    }
}
