use futures::future::try_join_all;
use labelme_atoms::labels::model::META_IMAGE_ID;
use labelme_atoms::media::ObjectMetadata;

use crate::context::LabelingContext;
use crate::datasets::{create_dataset, list_datasets};
use crate::error::{LabelingError, LabelingResult};
use crate::layout::{unique_name, validate_dataset_name};
use crate::types::{RawImage, UploadFile};

/// Stores raw uploads under `{dataset_root}/{dataset}/{uuid}_{name}`, creating the dataset first
/// when it is not listed yet. Each object carries its uuid as `imageId` metadata.
pub async fn upload_images(
    ctx: &LabelingContext<'_>,
    dataset: &str,
    files: Vec<UploadFile>,
) -> LabelingResult<Vec<RawImage>> {
    let dataset = validate_dataset_name(dataset)?;
    if files.is_empty() {
        return Err(LabelingError::validation("Please select at least one image to upload"));
    }
    if let Some(bad) = files.iter().find(|f| f.name.trim().is_empty() || f.name.contains('/')) {
        return Err(LabelingError::validation(format!("Invalid file name: {:?}", bad.name)));
    }

    let exists = list_datasets(ctx).await?.iter().any(|d| d.name == dataset);
    if !exists {
        tracing::info!("📁 Dataset {} not found, creating it before upload", dataset);
        create_dataset(ctx, &dataset).await?;
    }

    tracing::info!("📤 Uploading {} images to {}", files.len(), dataset);

    let uploads = files.into_iter().map(|file| {
        let dataset = dataset.clone();
        async move {
            let id = uuid::Uuid::new_v4().to_string();
            let name = unique_name(&id, file.name.trim());
            let path = ctx.layout.raw_path(&dataset, &name);
            let content_type = file.content_type.filter(|c| !c.is_empty()).unwrap_or_else(|| {
                mime_guess::from_path(&file.name)
                    .first_or_octet_stream()
                    .to_string()
            });

            let metadata = ObjectMetadata::with_content_type(&content_type).insert(META_IMAGE_ID, id.clone());
            ctx.objects.put(&path, file.bytes, metadata).await?;
            let info = ctx.objects.metadata(&path).await?;

            Ok::<_, LabelingError>(RawImage {
                name,
                path,
                source_id: id,
                last_modified: info.last_modified,
            })
        }
    });

    let uploaded = try_join_all(uploads).await.map_err(|e| {
        tracing::error!("❌ Upload to {} failed: {}", dataset, e);
        e
    })?;

    tracing::info!("✅ Uploaded {} images to {}", uploaded.len(), dataset);
    Ok(uploaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RetryPolicy;
    use crate::layout::StoreLayout;
    use labelme_atoms::media::ObjectStore;
    use labelme_atoms::memory::{MemoryObjectStore, MemoryRecordStore};

    fn file(name: &str) -> UploadFile {
        UploadFile {
            name: name.to_string(),
            content_type: None,
            bytes: vec![1, 2, 3],
        }
    }

    #[tokio::test]
    async fn upload_creates_dataset_and_tags_ids() {
        let objects = MemoryObjectStore::new();
        let records = MemoryRecordStore::new();
        let layout = StoreLayout::default();
        let ctx = LabelingContext::new(&objects, &records, &layout, RetryPolicy::default());

        let uploaded = upload_images(&ctx, "cats", vec![file("a.jpg"), file("b.png")])
            .await
            .unwrap();

        assert_eq!(uploaded.len(), 2);
        assert!(objects.contains("multipleFiles/cats/.placeholder").await);
        for image in &uploaded {
            assert!(image.name.starts_with(&format!("{}_", image.source_id)));
            let info = objects.metadata(&image.path).await.unwrap();
            assert_eq!(info.custom_value("imageId"), Some(image.source_id.as_str()));
        }
        let png = uploaded.iter().find(|i| i.original_name() == "b.png").unwrap();
        let info = objects.metadata(&png.path).await.unwrap();
        assert_eq!(info.content_type.as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn empty_upload_is_rejected() {
        let objects = MemoryObjectStore::new();
        let records = MemoryRecordStore::new();
        let layout = StoreLayout::default();
        let ctx = LabelingContext::new(&objects, &records, &layout, RetryPolicy::default());

        let err = upload_images(&ctx, "cats", Vec::new()).await.unwrap_err();
        assert!(matches!(err, LabelingError::Validation(_)));
        assert!(objects.paths().await.is_empty());
    }
}
