//! Local login stub. Credentials are only checked for shape; the resulting
//! identity is stored per user together with the selected dataset.

use labeling_block::datasets::restore_selection;
use labeling_block::http::{error_body, error_response, json_response};
use labeling_block::LabelingContext;
use labelme_atoms::users::{ClientState, ClientStateStore, User};
use labelme_atoms::StoreError;
use lambda_http::{http::StatusCode, Body, Error, Response};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

pub const STUB_USER_NAME: &str = "User Test";
pub const MIN_PASSWORD_LEN: usize = 6;

const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(EMAIL_PATTERN).expect("EMAIL_PATTERN is a valid regex literal"));

#[derive(Debug, ThisError)]
pub enum AuthError {
    #[error("Invalid email address")]
    InvalidEmail,

    #[error("Password must be at least 6 characters")]
    PasswordTooShort,

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Deserialize)]
pub struct LoginPayload {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub user: User,
    pub selected_dataset: Option<String>,
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Checks the credentials' shape and records the stub identity for `email`.
pub async fn login(states: &dyn ClientStateStore, email: &str, password: &str) -> Result<ClientState, AuthError> {
    let email = email.trim();
    if !is_valid_email(email) {
        return Err(AuthError::InvalidEmail);
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::PasswordTooShort);
    }

    let user = User {
        name: STUB_USER_NAME.to_string(),
        email: email.to_string(),
    };
    let mut state = states
        .load(email)
        .await?
        .unwrap_or_else(|| ClientState::new(user.clone()));
    state.user = user;
    states.save(&state).await?;

    tracing::info!("🔑 {} logged in", email);
    Ok(state)
}

pub async fn logout(states: &dyn ClientStateStore, email: &str) -> Result<(), AuthError> {
    states.clear(email).await?;
    tracing::info!("👋 {} logged out", email);
    Ok(())
}

fn auth_error_response(error: &AuthError) -> Result<Response<Body>, Error> {
    match error {
        AuthError::InvalidEmail | AuthError::PasswordTooShort => {
            tracing::warn!("⚠️ Login rejected: {}", error);
            error_body(StatusCode::BAD_REQUEST, &error.to_string())
        }
        AuthError::Store(e) => {
            tracing::error!("❌ Client state store failed: {}", e);
            error_body(StatusCode::INTERNAL_SERVER_ERROR, &error.to_string())
        }
    }
}

/// HTTP Handler: POST /login
pub async fn login_handler(states: &dyn ClientStateStore, body: &[u8]) -> Result<Response<Body>, Error> {
    let payload: LoginPayload = match serde_json::from_slice(body) {
        Ok(p) => p,
        Err(e) => return error_body(StatusCode::BAD_REQUEST, &format!("Invalid request body: {}", e)),
    };

    match login(states, &payload.email, &payload.password).await {
        Ok(state) => json_response(
            StatusCode::OK,
            &SessionView {
                user: state.user,
                selected_dataset: state.selected_dataset,
            },
        ),
        Err(e) => auth_error_response(&e),
    }
}

/// HTTP Handler: POST /logout
pub async fn logout_handler(states: &dyn ClientStateStore, email: &str) -> Result<Response<Body>, Error> {
    match logout(states, email).await {
        Ok(()) => json_response(StatusCode::OK, &serde_json::json!({ "message": "Logged out" })),
        Err(e) => auth_error_response(&e),
    }
}

/// HTTP Handler: GET /session
pub async fn session_handler(
    ctx: &LabelingContext<'_>,
    states: &dyn ClientStateStore,
    email: &str,
) -> Result<Response<Body>, Error> {
    let state = match states.load(email).await {
        Ok(Some(state)) => state,
        Ok(None) => return error_body(StatusCode::UNAUTHORIZED, "Not logged in"),
        Err(e) => return auth_error_response(&e.into()),
    };

    match restore_selection(ctx, states, email).await {
        Ok(selected_dataset) => json_response(
            StatusCode::OK,
            &SessionView {
                user: state.user,
                selected_dataset,
            },
        ),
        Err(e) => error_response(&e),
    }
}
