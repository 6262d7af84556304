pub mod context;
pub mod crop;
pub mod datasets;
pub mod error;
pub mod export;
pub mod http;
pub mod index;
pub mod layout;
pub mod queue;
pub mod recent;
pub mod types;
pub mod upload;
pub mod workflow;

pub use context::{LabelingContext, RetryPolicy};
pub use error::{LabelingError, LabelingResult};
pub use layout::StoreLayout;
