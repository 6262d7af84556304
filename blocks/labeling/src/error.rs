use labelme_atoms::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LabelingError {
    /// Bad user input; nothing was written.
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("image processing failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("not found: {0}")]
    NotFound(String),

    /// Operation not allowed in the current workflow phase.
    #[error("invalid workflow state: {0}")]
    InvalidState(String),
}

impl LabelingError {
    pub fn validation(message: impl Into<String>) -> Self {
        LabelingError::Validation(message.into())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, LabelingError::Store(StoreError::Conflict { .. }))
    }
}

pub type LabelingResult<T> = Result<T, LabelingError>;
