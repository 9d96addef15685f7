//! axum routes for the linking callback.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{Method, StatusCode, header};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::{AllowHeaders, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{Error, ErrorKind};
use crate::linking::{LinkService, SIGN_MESSAGE_PATH, VERIFY_SIGNATURE_PATH};
use crate::web::types::{ApiResponse, VerifySignatureRequest};

const SIGN_PAGE: &str = include_str!("static/sign.html");

pub struct WebState {
    pub links: Arc<LinkService>,
    /// In dev mode the signing page is served by its own dev server.
    pub dev_mode: bool,
}

type ApiResult = (StatusCode, Json<ApiResponse>);

pub fn router(state: Arc<WebState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(AllowHeaders::list([header::CONTENT_TYPE]));

    let mut app = Router::new()
        .route(VERIFY_SIGNATURE_PATH, post(verify_signature_handler))
        .route("/health", get(health_handler));
    if !state.dev_mode {
        app = app.route(SIGN_MESSAGE_PATH, get(sign_message_handler));
    }

    app.fallback(not_found_handler)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve in the background. Returns the bound address.
pub async fn start_server(addr: SocketAddr, state: Arc<WebState>) -> Result<SocketAddr, Error> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Server(format!("Failed to bind to {}: {}", addr, e)))?;
    let bound_addr = listener
        .local_addr()
        .map_err(|e| Error::Server(format!("Failed to get local addr: {}", e)))?;

    let app = router(state);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Web server error: {}", e);
        }
    });

    tracing::info!(addr = %bound_addr, "Web server listening");
    Ok(bound_addr)
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::UpstreamUnavailable | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::NotFound
        | ErrorKind::Conflict
        | ErrorKind::VerificationFailed
        | ErrorKind::PermissionDenied
        | ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
    }
}

async fn verify_signature_handler(
    State(state): State<Arc<WebState>>,
    body: Result<Json<VerifySignatureRequest>, JsonRejection>,
) -> ApiResult {
    let req = match body {
        Ok(Json(req)) => req,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::fail(rejection.body_text())),
            );
        }
    };
    if let Some(field) = req.missing_field() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::fail(format!(
                "\"{field}\" property missing in post request"
            ))),
        );
    }
    let (Some(hash), Some(signature), Some(key)) = (req.hash, req.signature, req.key) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::fail("malformed request")),
        );
    };

    match state.links.complete_link(&hash, &signature, &key).await {
        Ok(_) => (
            StatusCode::OK,
            Json(ApiResponse::ok("successfully verified signatures")),
        ),
        Err(e) => {
            let kind = e.kind();
            let message = if kind == ErrorKind::Internal {
                tracing::error!(error = %e, "Link verification failed internally");
                "Something went wrong".to_string()
            } else {
                e.to_string()
            };
            (status_for(kind), Json(ApiResponse::fail(message)))
        }
    }
}

async fn sign_message_handler() -> Html<&'static str> {
    Html(SIGN_PAGE)
}

async fn health_handler() -> Json<bool> {
    Json(true)
}

async fn not_found_handler() -> impl IntoResponse {
    (StatusCode::BAD_REQUEST, "Not Found")
}
