use labeling_block::http::{
    create_dataset_handler, delete_label_handler, discard_image_handler, export_handler,
    get_queue_handler, list_datasets_handler, list_labels_handler, save_label_handler,
    select_dataset_handler, snapshot_handler, update_label_handler, upload_crops_handler,
    upload_images_handler,
};
use labeling_block::http::{error_body, error_response};
use labeling_block::layout::{percent_decode, validate_dataset_name};
use labeling_block::LabelingError;
use labelme_atoms::users::{ClientStateStore, User};
use labelme_shared::{auth, AppState};
use lambda_http::http::header::{HeaderValue, VARY};
use lambda_http::{
    http::{Method, StatusCode},
    Body, Error, Request, RequestExt, Response,
};
use std::sync::Arc;

const USER_HEADER: &str = "X-User-Email";
const ANONYMOUS: &str = "unknown";

fn with_cors_headers(mut resp: Response<Body>, request_origin: Option<&str>) -> Response<Body> {
    let headers = resp.headers_mut();
    headers.insert(
        "Access-Control-Allow-Origin",
        request_origin
            .and_then(|o| HeaderValue::from_str(o).ok())
            .unwrap_or_else(|| HeaderValue::from_static("*")),
    );
    headers.insert(
        "Access-Control-Allow-Methods",
        HeaderValue::from_static("GET,POST,PUT,PATCH,DELETE,OPTIONS"),
    );
    headers.insert(
        "Access-Control-Allow-Headers",
        HeaderValue::from_static("Content-Type,Authorization,X-User-Email"),
    );
    headers.append(VARY, HeaderValue::from_static("Origin"));

    resp
}

fn finalize_response(
    resp: Result<Response<Body>, Error>,
    request_origin: Option<&str>,
) -> Result<Response<Body>, Error> {
    resp.map(|r| with_cors_headers(r, request_origin))
}

/// Query parameter from the Lambda event, falling back to the raw URI query.
fn query_param(event: &Request, key: &str) -> Option<String> {
    if let Some(value) = event
        .query_string_parameters_ref()
        .and_then(|q| q.first(key))
    {
        return Some(value.to_string());
    }
    event.uri().query().and_then(|query| {
        query.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (k == key).then(|| percent_decode(v))
        })
    })
}

fn number_param(event: &Request, key: &str) -> Option<usize> {
    query_param(event, key).and_then(|v| v.parse().ok())
}

/// Main Lambda handler - routes requests to session, dataset, queue and label endpoints
pub(crate) async fn function_handler(
    event: Request,
    state: Arc<AppState>,
) -> Result<Response<Body>, Error> {
    let method = event.method();
    let path = event.uri().path();
    let body = event.body();
    let request_origin = event.headers().get("Origin").and_then(|v| v.to_str().ok());
    tracing::info!("🚀 Labeling API invoked - Method: {} Path: {}", method, path);

    // Handle CORS preflight
    if method == "OPTIONS" {
        let resp = Response::builder()
            .status(StatusCode::OK)
            .body(Body::Empty)
            .map_err(Box::new)?;
        return Ok(with_cors_headers(resp, request_origin));
    }

    let email = event
        .headers()
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| ANONYMOUS.to_string());

    let ctx = state.context();
    let states = state.client_state.as_ref();

    let decoded: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(percent_decode)
        .collect();
    let parts: Vec<&str> = decoded.iter().map(String::as_str).collect();
    let page = number_param(&event, "page").unwrap_or(0);

    if let ["datasets", dataset, _, ..] = parts.as_slice() {
        if let Err(e) = check_dataset_segment(dataset) {
            return finalize_response(error_response(&e), request_origin);
        }
    }

    let resp = match (method, parts.as_slice()) {
        // --- SESSION ---
        (&Method::POST, ["login"]) => auth::login_handler(states, body).await,
        (&Method::POST, ["logout"]) => auth::logout_handler(states, &email).await,
        (&Method::GET, ["session"]) => auth::session_handler(&ctx, states, &email).await,
        (&Method::PUT, ["session", "dataset"]) => {
            let user = match states.load(&email).await {
                Ok(Some(saved)) => saved.user,
                Ok(None) => User {
                    name: auth::STUB_USER_NAME.to_string(),
                    email: email.clone(),
                },
                Err(e) => {
                    tracing::error!("Failed to load client state for {}: {}", email, e);
                    return finalize_response(
                        error_body(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
                        request_origin,
                    );
                }
            };
            select_dataset_handler(&ctx, states, &user, body).await
        }

        // --- DATASETS ---
        (&Method::GET, ["datasets"]) => list_datasets_handler(&ctx).await,
        (&Method::POST, ["datasets"]) => create_dataset_handler(&ctx, body).await,
        (&Method::POST, ["datasets", dataset, "images"]) => upload_images_handler(&ctx, dataset, body).await,

        // --- UNLABELED QUEUE ---
        (&Method::GET, ["datasets", dataset, "queue"]) => {
            get_queue_handler(&ctx, dataset, number_param(&event, "index")).await
        }
        (&Method::POST, ["datasets", dataset, "queue", name, "label"]) => {
            save_label_handler(&ctx, dataset, name, &email, body).await
        }
        (&Method::POST, ["datasets", dataset, "queue", name, "crops"]) => {
            upload_crops_handler(&ctx, dataset, name, &email, body).await
        }
        (&Method::DELETE, ["datasets", dataset, "queue", name]) => discard_image_handler(&ctx, dataset, name).await,

        // --- RECENT LABELS ---
        (&Method::GET, ["datasets", dataset, "labels"]) => list_labels_handler(&ctx, dataset, page).await,
        (&Method::PATCH, ["datasets", dataset, "labels", name]) => {
            update_label_handler(&ctx, dataset, name, page, &email, body).await
        }
        (&Method::DELETE, ["datasets", dataset, "labels", name]) => {
            delete_label_handler(&ctx, dataset, name, page).await
        }

        // --- EXPORT ---
        (&Method::GET, ["datasets", dataset, "export"]) => export_handler(&ctx, dataset).await,
        (&Method::GET, ["datasets", dataset, "snapshot"]) => snapshot_handler(&ctx, dataset).await,

        _ => not_found(),
    };

    finalize_response(resp, request_origin)
}

/// Dataset names in paths follow the same rules as created ones, untrimmed.
fn check_dataset_segment(dataset: &str) -> Result<(), LabelingError> {
    let name = validate_dataset_name(dataset)?;
    if name != dataset {
        return Err(LabelingError::validation("Dataset names cannot start or end with spaces"));
    }
    Ok(())
}

fn not_found() -> Result<Response<Body>, Error> {
    error_body(StatusCode::NOT_FOUND, "Not found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use labelme_shared::Config;
    use pretty_assertions::assert_eq;

    fn state() -> Arc<AppState> {
        let config = Config::from_lookup(|key| (key == "BUCKET_NAME").then(|| "test-bucket".to_string()));
        Arc::new(AppState::in_memory(config.unwrap()))
    }

    fn request(method: &str, uri: &str, body: &str) -> Request {
        lambda_http::http::Request::builder()
            .method(method)
            .uri(uri)
            .header(USER_HEADER, "ann@example.com")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn json(resp: &Response<Body>) -> serde_json::Value {
        serde_json::from_slice(resp.body()).unwrap()
    }

    #[tokio::test]
    async fn dataset_lifecycle_through_routes() {
        let state = state();

        let created = function_handler(request("POST", "/datasets", r#"{"name":"cats"}"#), state.clone())
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);

        let listed = function_handler(request("GET", "/datasets", ""), state.clone()).await.unwrap();
        assert_eq!(listed.status(), StatusCode::OK);
        assert_eq!(json(&listed)[0]["name"], "cats");

        let labels = function_handler(request("GET", "/datasets/cats/labels?page=0", ""), state.clone())
            .await
            .unwrap();
        assert_eq!(json(&labels)["total"], 0);

        let export = function_handler(request("GET", "/datasets/cats/export", ""), state.clone())
            .await
            .unwrap();
        assert_eq!(export.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn login_and_select_dataset() {
        let state = state();
        function_handler(request("POST", "/datasets", r#"{"name":"dogs"}"#), state.clone())
            .await
            .unwrap();

        let login = function_handler(
            request("POST", "/login", r#"{"email":"ann@example.com","password":"secret1"}"#),
            state.clone(),
        )
        .await
        .unwrap();
        assert_eq!(login.status(), StatusCode::OK);
        assert_eq!(json(&login)["user"]["name"], "User Test");

        let selected = function_handler(request("PUT", "/session/dataset", r#"{"name":"dogs"}"#), state.clone())
            .await
            .unwrap();
        assert_eq!(json(&selected)["selectedDataset"], "dogs");

        let session = function_handler(request("GET", "/session", ""), state.clone()).await.unwrap();
        assert_eq!(json(&session)["selectedDataset"], "dogs");
    }

    #[tokio::test]
    async fn unknown_routes_and_preflight() {
        let state = state();
        let missing = function_handler(request("GET", "/nowhere", ""), state.clone()).await.unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let preflight = function_handler(request("OPTIONS", "/datasets", ""), state).await.unwrap();
        assert_eq!(preflight.status(), StatusCode::OK);
        assert!(preflight.headers().contains_key("Access-Control-Allow-Methods"));
    }

    #[tokio::test]
    async fn dataset_segment_is_validated_before_dispatch() {
        let state = state();
        for uri in [
            "/datasets/cats%2Fsub/export",
            "/datasets/undefined/labels",
            "/datasets/%20cats/queue",
        ] {
            let resp = function_handler(request("GET", uri, ""), state.clone()).await.unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{}", uri);
            assert!(json(&resp)["error"].is_string());
        }

        let ok = function_handler(request("GET", "/datasets/cats/labels", ""), state).await.unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
    }

    #[test]
    fn query_falls_back_to_uri() {
        let event = request("GET", "/datasets/cats/queue?index=3&x=a%20b", "");
        assert_eq!(number_param(&event, "index"), Some(3));
        assert_eq!(query_param(&event, "x").as_deref(), Some("a b"));
        assert_eq!(query_param(&event, "missing"), None);
    }
}
