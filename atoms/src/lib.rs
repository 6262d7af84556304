//! Store seams for the labeling service: object storage for image blobs,
//! label records, and per-user client state.

pub mod error;
pub mod labels;
pub mod media;
pub mod memory;
pub mod users;

pub use error::{StoreError, StoreResult};
