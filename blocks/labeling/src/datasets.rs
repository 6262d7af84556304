use labelme_atoms::media::ObjectMetadata;
use labelme_atoms::users::{ClientState, ClientStateStore, User};

use crate::context::LabelingContext;
use crate::error::LabelingResult;
use crate::layout::validate_dataset_name;
use crate::types::Dataset;

/// Lists dataset folders under the dataset root, in store order.
pub async fn list_datasets(ctx: &LabelingContext<'_>) -> LabelingResult<Vec<Dataset>> {
    let listing = ctx.objects.list(&ctx.layout.dataset_root).await?;

    let datasets: Vec<Dataset> = listing
        .prefixes
        .into_iter()
        .filter(|p| !p.name.is_empty() && p.name != "undefined")
        .map(|p| Dataset {
            name: p.name,
            path: p.path,
        })
        .collect();

    tracing::info!("📁 Found {} datasets", datasets.len());
    Ok(datasets)
}

/// Creates a dataset by writing an empty placeholder object into its folder.
pub async fn create_dataset(ctx: &LabelingContext<'_>, name: &str) -> LabelingResult<Dataset> {
    let name = validate_dataset_name(name)?;
    let path = ctx.layout.placeholder_path(&name);

    ctx.objects
        .put(&path, Vec::new(), ObjectMetadata::with_content_type("text/plain"))
        .await?;

    tracing::info!("✅ Created dataset {}", name);
    Ok(Dataset {
        path: ctx.layout.raw_prefix(&name),
        name,
    })
}

/// Persists `name` as the user's selection when it is a listed dataset.
/// Unknown names clear the stored selection and yield `None`.
pub async fn select_dataset(
    ctx: &LabelingContext<'_>,
    states: &dyn ClientStateStore,
    user: &User,
    name: &str,
) -> LabelingResult<Option<String>> {
    let datasets = list_datasets(ctx).await?;
    let wanted = name.trim();
    let selected = datasets
        .iter()
        .find(|d| d.name == wanted)
        .map(|d| d.name.clone());

    let mut state = states
        .load(&user.email)
        .await?
        .unwrap_or_else(|| ClientState::new(user.clone()));
    state.user = user.clone();
    state.selected_dataset = selected.clone();
    states.save(&state).await?;

    match &selected {
        Some(ds) => tracing::info!("📌 {} selected dataset {}", user.email, ds),
        None => tracing::warn!("⚠️ Dataset {} is not listed, selection cleared for {}", wanted, user.email),
    }
    Ok(selected)
}

/// Returns the stored selection if that dataset still exists, clearing it otherwise.
pub async fn restore_selection(
    ctx: &LabelingContext<'_>,
    states: &dyn ClientStateStore,
    email: &str,
) -> LabelingResult<Option<String>> {
    let Some(mut state) = states.load(email).await? else {
        return Ok(None);
    };
    let Some(selected) = state.selected_dataset.clone() else {
        return Ok(None);
    };

    let datasets = list_datasets(ctx).await?;
    if datasets.iter().any(|d| d.name == selected) {
        return Ok(Some(selected));
    }

    tracing::warn!("⚠️ Stored dataset {} no longer exists, clearing", selected);
    state.selected_dataset = None;
    states.save(&state).await?;
    Ok(None)
}
