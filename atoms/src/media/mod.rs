// Re-export model types and the object store seam
pub mod model;
pub mod service;

pub use model::{file_name, Listing, ObjectInfo, ObjectMetadata, ObjectSummary, PrefixEntry};
pub use service::*;
