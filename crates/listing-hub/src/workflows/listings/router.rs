use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::error;

use super::domain::{
    CallerIdentity, CallerRole, ItemField, ItemId, ItemPayload, ItemStatus, PromotionTag, UserId,
};
use super::duplicates::DraftCandidate;
use super::lifecycle::{ItemLifecycleService, ItemServiceError};
use super::media::RawUpload;
use super::moderation::ModerationGateway;
use super::repository::{Authorizer, ItemFilter, ItemRepository, RepositoryError};

const USER_ID_HEADER: &str = "x-user-id";
const USER_ROLE_HEADER: &str = "x-user-role";
const UPLOAD_BODY_LIMIT: usize = 25 * 1024 * 1024;

/// Shared handler state.
pub struct ItemApiState<R, A> {
    pub lifecycle: Arc<ItemLifecycleService<R, A>>,
    pub moderation: Arc<ModerationGateway<R, A>>,
}

impl<R, A> ItemApiState<R, A>
where
    R: ItemRepository + 'static,
    A: Authorizer + 'static,
{
    pub fn new(lifecycle: Arc<ItemLifecycleService<R, A>>) -> Self {
        let moderation = Arc::new(ModerationGateway::new(lifecycle.clone()));
        Self {
            lifecycle,
            moderation,
        }
    }
}

impl<R, A> Clone for ItemApiState<R, A> {
    fn clone(&self) -> Self {
        Self {
            lifecycle: self.lifecycle.clone(),
            moderation: self.moderation.clone(),
        }
    }
}

/// Router builder exposing the item lifecycle, moderation, and upload endpoints.
pub fn item_router<R, A>(state: ItemApiState<R, A>) -> Router
where
    R: ItemRepository + 'static,
    A: Authorizer + 'static,
{
    Router::new()
        .route(
            "/api/v1/items",
            get(list_handler::<R, A>).post(create_handler::<R, A>),
        )
        .route("/api/v1/items/drafts", post(save_draft_handler::<R, A>))
        .route(
            "/api/v1/items/check-duplicate-draft",
            post(check_duplicate_handler::<R, A>),
        )
        .route(
            "/api/v1/items/validate-field",
            post(validate_field_handler::<R, A>),
        )
        .route(
            "/api/v1/items/status/:status",
            get(owned_in_status_handler::<R, A>),
        )
        .route(
            "/api/v1/items/:item_id",
            get(get_handler::<R, A>)
                .patch(update_handler::<R, A>)
                .delete(delete_handler::<R, A>),
        )
        .route("/api/v1/items/:item_id/submit", post(submit_handler::<R, A>))
        .route("/api/v1/items/:item_id/archive", post(archive_handler::<R, A>))
        .route("/api/v1/items/:item_id/approve", post(approve_handler::<R, A>))
        .route("/api/v1/items/:item_id/reject", post(reject_handler::<R, A>))
        .route("/api/v1/uploads", post(upload_handler::<R, A>))
        .route("/api/v1/uploads/single", post(upload_single_handler::<R, A>))
        .route("/api/v1/uploads/stage", post(stage_handler::<R, A>))
        .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT))
        .with_state(state)
}

/// Caller identity attached by the upstream authenticator.
pub fn caller_from_headers(headers: &HeaderMap) -> Result<CallerIdentity, ItemServiceError> {
    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| UserId::parse(raw).ok())
        .ok_or(ItemServiceError::Unauthorized)?;

    let role = match headers
        .get(USER_ROLE_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        None => CallerRole::Publisher,
        Some(raw) => CallerRole::parse(raw).ok_or(ItemServiceError::Unauthorized)?,
    };

    Ok(CallerIdentity { user_id, role })
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ListQuery {
    tag: Option<String>,
    status: Option<String>,
}

pub(crate) async fn list_handler<R, A>(
    State(state): State<ItemApiState<R, A>>,
    Query(query): Query<ListQuery>,
) -> Response
where
    R: ItemRepository + 'static,
    A: Authorizer + 'static,
{
    let status = match query.status.as_deref() {
        None => None,
        Some(raw) => match ItemStatus::parse(raw) {
            Some(status) => Some(status),
            None => return bad_request("invalid_status", format!("unknown status '{raw}'")),
        },
    };
    let tag = match query.tag.as_deref().map(PromotionTag::parse) {
        None => None,
        Some(Ok(tag)) => tag,
        Some(Err(error)) => return bad_request("invalid_tag", error.to_string()),
    };

    let filter = ItemFilter {
        status,
        tag,
        owner: None,
    };
    match state.lifecycle.list(&filter) {
        Ok(items) => (StatusCode::OK, Json(items)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn get_handler<R, A>(
    State(state): State<ItemApiState<R, A>>,
    Path(item_id): Path<String>,
) -> Response
where
    R: ItemRepository + 'static,
    A: Authorizer + 'static,
{
    match state.lifecycle.get(&ItemId(item_id)) {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn create_handler<R, A>(
    State(state): State<ItemApiState<R, A>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response
where
    R: ItemRepository + 'static,
    A: Authorizer + 'static,
{
    let caller = match caller_from_headers(&headers) {
        Ok(caller) => caller,
        Err(error) => return error_response(error),
    };
    let mut body = match body {
        Value::Object(map) => map,
        _ => return bad_request("invalid_body", "item payload must be a JSON object"),
    };

    let status = match body.remove("status") {
        None | Some(Value::Null) => None,
        Some(Value::String(raw)) => match ItemStatus::parse(&raw) {
            Some(status) => Some(status),
            None => return bad_request("invalid_status", format!("unknown status '{raw}'")),
        },
        Some(other) => return bad_request("invalid_status", format!("unknown status {other}")),
    };

    let lifecycle = state.lifecycle.clone();
    let created = off_worker(move || lifecycle.create(&caller, ItemPayload(body), status)).await;
    match created {
        Ok(Ok(record)) => (StatusCode::CREATED, Json(record)).into_response(),
        Ok(Err(error)) => error_response(error),
        Err(response) => response,
    }
}

pub(crate) async fn save_draft_handler<R, A>(
    State(state): State<ItemApiState<R, A>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response
where
    R: ItemRepository + 'static,
    A: Authorizer + 'static,
{
    let caller = match caller_from_headers(&headers) {
        Ok(caller) => caller,
        Err(error) => return error_response(error),
    };
    let mut body = match body {
        Value::Object(map) => map,
        _ => return bad_request("invalid_body", "item payload must be a JSON object"),
    };

    let existing = match body.remove("itemId") {
        Some(Value::String(id)) if !id.trim().is_empty() => Some(ItemId(id)),
        _ => None,
    };
    let created = existing.is_none();

    match state
        .lifecycle
        .save_as_draft(&caller, ItemPayload(body), existing.as_ref())
    {
        Ok(record) if created => (StatusCode::CREATED, Json(record)).into_response(),
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn update_handler<R, A>(
    State(state): State<ItemApiState<R, A>>,
    headers: HeaderMap,
    Path(item_id): Path<String>,
    Json(patch): Json<ItemPayload>,
) -> Response
where
    R: ItemRepository + 'static,
    A: Authorizer + 'static,
{
    let caller = match caller_from_headers(&headers) {
        Ok(caller) => caller,
        Err(error) => return error_response(error),
    };

    let lifecycle = state.lifecycle.clone();
    let updated = off_worker(move || lifecycle.update(&caller, &ItemId(item_id), patch)).await;
    match updated {
        Ok(Ok(record)) => (StatusCode::OK, Json(record)).into_response(),
        Ok(Err(error)) => error_response(error),
        Err(response) => response,
    }
}

pub(crate) async fn delete_handler<R, A>(
    State(state): State<ItemApiState<R, A>>,
    headers: HeaderMap,
    Path(item_id): Path<String>,
) -> Response
where
    R: ItemRepository + 'static,
    A: Authorizer + 'static,
{
    let caller = match caller_from_headers(&headers) {
        Ok(caller) => caller,
        Err(error) => return error_response(error),
    };

    match state.lifecycle.delete(&caller, &ItemId(item_id)) {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(error) => error_response(error),
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct OwnerQuery {
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

pub(crate) async fn owned_in_status_handler<R, A>(
    State(state): State<ItemApiState<R, A>>,
    Path(status): Path<String>,
    Query(query): Query<OwnerQuery>,
) -> Response
where
    R: ItemRepository + 'static,
    A: Authorizer + 'static,
{
    let owner = match query.user_id.as_deref().map(UserId::parse) {
        Some(Ok(owner)) => owner,
        Some(Err(error)) => return bad_request("invalid_user_id", error.to_string()),
        None => return bad_request("invalid_user_id", "userId query parameter is required"),
    };
    let Some(status) = ItemStatus::parse(&status) else {
        return bad_request("invalid_status", format!("unknown status '{status}'"));
    };

    match state.lifecycle.list_owned_in_status(&owner, status) {
        Ok(items) => (StatusCode::OK, Json(items)).into_response(),
        Err(error) => error_response(error),
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SubmitQuery {
    #[serde(default)]
    trusted: bool,
}

pub(crate) async fn submit_handler<R, A>(
    State(state): State<ItemApiState<R, A>>,
    headers: HeaderMap,
    Path(item_id): Path<String>,
    Query(query): Query<SubmitQuery>,
) -> Response
where
    R: ItemRepository + 'static,
    A: Authorizer + 'static,
{
    let caller = match caller_from_headers(&headers) {
        Ok(caller) => caller,
        Err(error) => return error_response(error),
    };

    let lifecycle = state.lifecycle.clone();
    let submitted = off_worker(move || {
        lifecycle.submit_for_review(&caller, &ItemId(item_id), query.trusted)
    })
    .await;
    match submitted {
        Ok(Ok(record)) => (StatusCode::OK, Json(record)).into_response(),
        Ok(Err(error)) => error_response(error),
        Err(response) => response,
    }
}

pub(crate) async fn archive_handler<R, A>(
    State(state): State<ItemApiState<R, A>>,
    headers: HeaderMap,
    Path(item_id): Path<String>,
) -> Response
where
    R: ItemRepository + 'static,
    A: Authorizer + 'static,
{
    let caller = match caller_from_headers(&headers) {
        Ok(caller) => caller,
        Err(error) => return error_response(error),
    };

    match state.lifecycle.archive(&caller, &ItemId(item_id)) {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn approve_handler<R, A>(
    State(state): State<ItemApiState<R, A>>,
    headers: HeaderMap,
    Path(item_id): Path<String>,
) -> Response
where
    R: ItemRepository + 'static,
    A: Authorizer + 'static,
{
    let caller = match caller_from_headers(&headers) {
        Ok(caller) => caller,
        Err(error) => return error_response(error),
    };

    match state.moderation.approve(&caller, &ItemId(item_id)) {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(error) => error_response(error),
    }
}

#[derive(Debug, Default, Deserialize)]
struct RejectRequest {
    reason: Option<String>,
}

pub(crate) async fn reject_handler<R, A>(
    State(state): State<ItemApiState<R, A>>,
    headers: HeaderMap,
    Path(item_id): Path<String>,
    body: Bytes,
) -> Response
where
    R: ItemRepository + 'static,
    A: Authorizer + 'static,
{
    let caller = match caller_from_headers(&headers) {
        Ok(caller) => caller,
        Err(error) => return error_response(error),
    };
    let request = if body.is_empty() {
        RejectRequest::default()
    } else {
        match serde_json::from_slice::<RejectRequest>(&body) {
            Ok(request) => request,
            Err(error) => return bad_request("invalid_body", error.to_string()),
        }
    };

    match state
        .moderation
        .reject(&caller, &ItemId(item_id), request.reason)
    {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(error) => error_response(error),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DuplicateCheckRequest {
    title: Option<String>,
    slug: Option<String>,
    address: Option<String>,
    created_by: String,
    item_id: Option<String>,
}

pub(crate) async fn check_duplicate_handler<R, A>(
    State(state): State<ItemApiState<R, A>>,
    Json(request): Json<DuplicateCheckRequest>,
) -> Response
where
    R: ItemRepository + 'static,
    A: Authorizer + 'static,
{
    let owner = match UserId::parse(&request.created_by) {
        Ok(owner) => owner,
        Err(error) => return bad_request("invalid_user_id", error.to_string()),
    };
    let candidate = DraftCandidate {
        title: request.title,
        slug: request.slug,
        address: request.address,
    };
    let exclude = request.item_id.map(ItemId);

    match state
        .lifecycle
        .has_duplicate_draft(&owner, &candidate, exclude.as_ref())
    {
        Ok(exists) => (StatusCode::OK, Json(json!({ "exists": exists }))).into_response(),
        Err(error) => error_response(error),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct FieldCheckRequest {
    field: String,
    #[serde(default)]
    value: Value,
}

pub(crate) async fn validate_field_handler<R, A>(
    State(state): State<ItemApiState<R, A>>,
    Json(request): Json<FieldCheckRequest>,
) -> Response
where
    R: ItemRepository + 'static,
    A: Authorizer + 'static,
{
    let Some(field) = ItemField::from_key(&request.field) else {
        return bad_request("invalid_field", format!("unknown field '{}'", request.field));
    };

    let check = state.lifecycle.validator().validate(field, &request.value);
    (StatusCode::OK, Json(check)).into_response()
}

pub(crate) async fn upload_handler<R, A>(
    State(state): State<ItemApiState<R, A>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response
where
    R: ItemRepository + 'static,
    A: Authorizer + 'static,
{
    if let Err(error) = caller_from_headers(&headers) {
        return error_response(error);
    }
    let staged = match stage_files(&state, multipart).await {
        Ok(staged) => staged,
        Err(response) => return response,
    };

    let media = state.lifecycle.media().clone();
    let ingested = off_worker(move || {
        let result = media.ingest_batch(&staged);
        if result.is_err() {
            media.discard(&staged);
        }
        result
    })
    .await;

    match ingested {
        Ok(Ok(stored)) => {
            let urls: Vec<String> = stored.into_iter().map(|reference| reference.url).collect();
            (StatusCode::OK, Json(json!({ "urls": urls }))).into_response()
        }
        Ok(Err(error)) => error_response(ItemServiceError::IngestionFailed(error)),
        Err(response) => response,
    }
}

pub(crate) async fn upload_single_handler<R, A>(
    State(state): State<ItemApiState<R, A>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response
where
    R: ItemRepository + 'static,
    A: Authorizer + 'static,
{
    if let Err(error) = caller_from_headers(&headers) {
        return error_response(error);
    }
    let staged = match stage_files(&state, multipart).await {
        Ok(staged) => staged,
        Err(response) => return response,
    };
    let media = state.lifecycle.media().clone();
    if staged.len() != 1 {
        media.discard(&staged);
        return bad_request("invalid_upload", "exactly one file is required");
    }

    let ingested = off_worker(move || {
        let result = media.ingest(&staged[0]);
        if result.is_err() {
            media.discard(&staged);
        }
        result
    })
    .await;

    match ingested {
        Ok(Ok(stored)) => (StatusCode::OK, Json(json!({ "url": stored.url }))).into_response(),
        Ok(Err(error)) => error_response(ItemServiceError::IngestionFailed(error)),
        Err(response) => response,
    }
}

pub(crate) async fn stage_handler<R, A>(
    State(state): State<ItemApiState<R, A>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response
where
    R: ItemRepository + 'static,
    A: Authorizer + 'static,
{
    if let Err(error) = caller_from_headers(&headers) {
        return error_response(error);
    }

    match stage_files(&state, multipart).await {
        Ok(staged) => {
            let staged: Vec<Value> = staged
                .iter()
                .map(|raw| json!({ "staged": raw.staged_name, "originalName": raw.original_name }))
                .collect();
            (StatusCode::OK, Json(json!({ "staged": staged }))).into_response()
        }
        Err(response) => response,
    }
}

/// Stage every file part of a multipart body. Parts without a filename are skipped.
/// Files staged before a malformed part are removed again.
async fn stage_files<R, A>(
    state: &ItemApiState<R, A>,
    mut multipart: Multipart,
) -> Result<Vec<RawUpload>, Response>
where
    R: ItemRepository + 'static,
    A: Authorizer + 'static,
{
    let media = state.lifecycle.media();
    let mut staged = Vec::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(error) => {
                media.discard(&staged);
                return Err(bad_request("invalid_upload", error.body_text()));
            }
        };
        let Some(original_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(error) => {
                media.discard(&staged);
                return Err(bad_request("invalid_upload", error.body_text()));
            }
        };

        match media.stage(&original_name, &bytes) {
            Ok(raw) => staged.push(raw),
            Err(error) => {
                media.discard(&staged);
                return Err(error_response(ItemServiceError::IngestionFailed(error)));
            }
        }
    }

    if staged.is_empty() {
        return Err(bad_request("invalid_upload", "no files were uploaded"));
    }
    Ok(staged)
}

/// Run filesystem and image work on the blocking pool.
async fn off_worker<T, F>(task: F) -> Result<T, Response>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task).await.map_err(|error| {
        error!(%error, "blocking item task failed");
        let payload = json!({ "error": error.to_string() });
        (StatusCode::INTERNAL_SERVER_ERROR, Json(payload)).into_response()
    })
}

fn bad_request(kind: &str, message: impl Into<String>) -> Response {
    let message = message.into();
    let payload = json!({
        "message": message,
        "error": message,
        "kind": kind,
    });
    (StatusCode::BAD_REQUEST, Json(payload)).into_response()
}

pub(crate) fn error_response(error: ItemServiceError) -> Response {
    let kind = error.kind();
    match &error {
        ItemServiceError::ValidationFailed { errors } => {
            let errors: BTreeMap<&str, &String> = errors
                .iter()
                .map(|(field, message)| (field.key(), message))
                .collect();
            let payload = json!({
                "message": "Validation failed",
                "error": error.to_string(),
                "kind": kind,
                "errors": errors,
            });
            (StatusCode::BAD_REQUEST, Json(payload)).into_response()
        }
        ItemServiceError::DuplicateDraft { existing, key } => {
            let payload = json!({
                "message": "A draft with the same details already exists",
                "error": error.to_string(),
                "kind": kind,
                "existingId": existing,
                "key": key,
            });
            (StatusCode::CONFLICT, Json(payload)).into_response()
        }
        ItemServiceError::InvalidTransition { .. } => {
            (StatusCode::CONFLICT, Json(described(&error))).into_response()
        }
        ItemServiceError::NotFound => {
            (StatusCode::NOT_FOUND, Json(described(&error))).into_response()
        }
        ItemServiceError::Unauthorized => {
            (StatusCode::UNAUTHORIZED, Json(described(&error))).into_response()
        }
        ItemServiceError::Forbidden => {
            (StatusCode::FORBIDDEN, Json(described(&error))).into_response()
        }
        ItemServiceError::PersistenceFailed(RepositoryError::SlugTaken(slug)) => {
            let mut payload = described(&error);
            payload.insert("slug".to_string(), Value::String(slug.clone()));
            (StatusCode::CONFLICT, Json(payload)).into_response()
        }
        ItemServiceError::IngestionFailed(_) | ItemServiceError::PersistenceFailed(_) => {
            error!(kind, %error, "item request failed");
            let payload = json!({ "error": error.to_string() });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(payload)).into_response()
        }
    }
}

fn described(error: &ItemServiceError) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("message".to_string(), Value::String(error.to_string()));
    payload.insert("error".to_string(), Value::String(error.to_string()));
    payload.insert("kind".to_string(), Value::String(error.kind().to_string()));
    payload
}
