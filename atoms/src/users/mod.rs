pub mod model;
pub mod service;

pub use model::{ClientState, User};
pub use service::*;
