use crate::infra::AppState;
use axum::extract::Path;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json, Router};
use listing_hub::workflows::listings::{
    item_router, Authorizer, ItemApiState, ItemLifecycleService, ItemRepository, MediaStoreError,
};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::error;

/// Item API plus the operational endpoints and the public media route.
pub(crate) fn with_item_routes<R, A>(lifecycle: Arc<ItemLifecycleService<R, A>>) -> Router
where
    R: ItemRepository + 'static,
    A: Authorizer + 'static,
{
    item_router(ItemApiState::new(lifecycle))
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .route("/media/:name", get(media_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

pub(crate) async fn media_endpoint(
    Extension(state): Extension<AppState>,
    Path(name): Path<String>,
) -> Response {
    let store = state.media.clone();
    let lookup = name.clone();
    let read = tokio::task::spawn_blocking(move || store.read(&lookup)).await;

    match read {
        Ok(Ok(bytes)) => {
            let mime = mime_guess::from_path(&name).first_or_octet_stream();
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, mime.essence_str().to_string())],
                bytes,
            )
                .into_response()
        }
        Ok(Err(MediaStoreError::InvalidName(_) | MediaStoreError::NotFound(_))) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("media '{name}' not found") })),
        )
            .into_response(),
        Ok(Err(err)) => {
            error!(%name, error = %err, "media read failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response()
        }
        Err(err) => {
            error!(%name, error = %err, "media read task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "media read interrupted" })),
            )
                .into_response()
        }
    }
}
