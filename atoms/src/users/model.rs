use serde::{Deserialize, Serialize};

/// Logged-in identity. The login flow is a local stub, so this is not verified.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct User {
    pub name: String,
    pub email: String,
}

/// Per-user state that survives reloads.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientState {
    pub user: User,
    pub selected_dataset: Option<String>,
}

impl ClientState {
    pub fn new(user: User) -> Self {
        Self {
            user,
            selected_dataset: None,
        }
    }
}
