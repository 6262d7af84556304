// Re-export model types and the record store seam
pub mod model;
pub mod service;

pub use model::{CropRegion, LabelMetadata, LabelRecord, LabelStatus};
pub use service::*;
