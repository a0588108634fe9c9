use crate::config::ApiConfig;
use crate::content_store::ContentStore;
use crate::error::{Field, StoreError, StoreResult};
use crate::model::{PartialSource, Source, Summary, TagSet};
use crate::search::{Filter, Order, Pagination, SortKey, DEFAULT_PAGE_SIZE};
use anyhow::{Context, Result};
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, Path, Query, State,
    },
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Room left in a request body for the form fields around the file.
const FORM_OVERHEAD: u64 = 1024 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ContentStore>,
    /// Shared secret for mutating requests, empty when unprotected
    pub token: Arc<str>,
}

impl AppState {
    pub fn new(store: Arc<ContentStore>, token: &str) -> Self {
        Self {
            store,
            token: Arc::from(token),
        }
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: &'static str,
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        if self.is_server_error() {
            error!(error = %self, "Request failed");
        }

        let status = StatusCode::from_u16(self.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse {
            code: self.code(),
            message: self.message(),
        };
        (status, Json(body)).into_response()
    }
}

/// Store limits and usage
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Details {
    pub file_limit: u64,
    pub protected: bool,
    pub store_length: u64,
    pub store_limit: u64,
    pub store_size: u64,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    let body_limit = state.store.quota().file_limit().saturating_add(FORM_OVERHEAD);
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/details", get(details))
        .route("/query/:uuid", get(query))
        .route("/file/:uuid", get(file))
        .route("/preview/:uuid", get(preview))
        .route("/download/:uuid", get(download))
        .route("/list", get(list))
        .route("/search", get(search))
        .route("/add", post(add))
        .route("/update", post(update))
        .route("/remove", post(remove))
        .fallback(missing_resource)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "content-store"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match sqlx::query("SELECT 1")
        .fetch_one(state.store.catalog().pool())
        .await
    {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

async fn missing_resource() -> StoreError {
    StoreError::MissingResource
}

async fn details(State(state): State<AppState>) -> StoreResult<Json<Details>> {
    let status = state.store.info().await?;
    let quota = state.store.quota();

    Ok(Json(Details {
        file_limit: quota.file_limit(),
        protected: !state.token.is_empty(),
        store_length: status.length,
        store_limit: quota.store_limit(),
        store_size: status.size,
    }))
}

fn path_uuid(raw: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| StoreError::InvalidField(Field::Uuid))
}

#[instrument(skip(state))]
async fn query(State(state): State<AppState>, Path(uuid): Path<String>) -> StoreResult<Json<Summary>> {
    let content = state.store.query(path_uuid(&uuid)?).await?;
    Ok(Json(state.store.summarize(&content)))
}

#[instrument(skip(state))]
async fn file(State(state): State<AppState>, Path(uuid): Path<String>) -> StoreResult<Response> {
    let content = state.store.query(path_uuid(&uuid)?).await?;
    Ok(([(header::CONTENT_TYPE, content.mime)], content.bytes).into_response())
}

#[instrument(skip(state))]
async fn preview(State(state): State<AppState>, Path(uuid): Path<String>) -> StoreResult<Response> {
    let bytes = state.store.preview(path_uuid(&uuid)?).await?;
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response())
}

#[instrument(skip(state))]
async fn download(State(state): State<AppState>, Path(uuid): Path<String>) -> StoreResult<Response> {
    let content = state.store.query(path_uuid(&uuid)?).await?;

    let filename = format!("{}.{}", content.name, content.extension).replace('"', "");
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    Ok((
        [
            (header::CONTENT_DISPOSITION, disposition),
            (header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream")),
        ],
        content.bytes,
    )
        .into_response())
}

/// Non-negative number from a query parameter; anything else is absent.
fn number(params: &HashMap<String, String>, key: &str) -> Option<u64> {
    let value = params.get(key)?.trim().parse::<f64>().ok()?;
    (value.is_finite() && value >= 0.0).then(|| value.trunc() as u64)
}

fn instant(params: &HashMap<String, String>, key: &str) -> Option<DateTime<Utc>> {
    let millis = params.get(key)?.trim().parse::<f64>().ok()?;
    if !millis.is_finite() {
        return None;
    }
    DateTime::<Utc>::from_timestamp_millis(millis.trunc() as i64)
}

fn pagination(params: &HashMap<String, String>) -> Pagination {
    Pagination::new(
        number(params, "count").unwrap_or(DEFAULT_PAGE_SIZE),
        number(params, "page").unwrap_or(0),
    )
}

fn flag(params: &HashMap<String, String>, key: &str) -> bool {
    params.get(key).is_some_and(|v| v == "true")
}

fn filter(params: &HashMap<String, String>) -> StoreResult<Filter> {
    let tags = match params.get("tags") {
        Some(raw) => {
            let tags = TagSet::new(raw.split(',').filter(|t| !t.is_empty()))?;
            (!tags.is_empty()).then_some(tags)
        }
        None => None,
    };
    let uuid = params.get("uuid").map(|raw| path_uuid(raw)).transpose()?;

    Ok(Filter {
        begin: instant(params, "begin"),
        end: instant(params, "end"),
        minimum: number(params, "minimum"),
        maximum: number(params, "maximum"),
        name: params.get("name").cloned(),
        extension: params.get("extension").cloned(),
        mime: params.get("mime").cloned(),
        tags,
        uuid,
        loose: flag(params, "loose"),
        sort: params.get("sort").and_then(|s| SortKey::parse(s)).unwrap_or_default(),
        order: params.get("order").and_then(|o| Order::parse(o)).unwrap_or_default(),
    })
}

/// Bare ids with `query=true`, summaries otherwise.
async fn respond_ids(state: &AppState, ids: Vec<Uuid>, bare: bool) -> StoreResult<Response> {
    if bare {
        return Ok(Json(ids).into_response());
    }

    let mut summaries = Vec::with_capacity(ids.len());
    for id in ids {
        summaries.push(state.store.summary(id).await?);
    }
    Ok(Json(summaries).into_response())
}

#[instrument(skip(state))]
async fn list(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> StoreResult<Response> {
    let ids = state.store.list(pagination(&params)).await?;
    respond_ids(&state, ids, flag(&params, "query")).await
}

#[instrument(skip(state))]
async fn search(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> StoreResult<Response> {
    let filter = filter(&params)?;
    let ids = state.store.search(&filter, pagination(&params)).await?;
    respond_ids(&state, ids, flag(&params, "query")).await
}

/// Fields of a mutating request.
#[derive(Debug, Default)]
struct Form {
    json: Option<String>,
    file: Option<Vec<u8>>,
}

fn form_error(field: Field) -> impl Fn(MultipartError) -> StoreError {
    move |e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            StoreError::LargeSource
        } else {
            StoreError::InvalidField(field)
        }
    }
}

async fn read_form(multipart: Result<Multipart, MultipartRejection>) -> StoreResult<Form> {
    let mut multipart = multipart.map_err(|_| StoreError::InvalidField(Field::Json))?;
    let mut form = Form::default();

    while let Some(field) = multipart.next_field().await.map_err(form_error(Field::Json))? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("json") => form.json = Some(field.text().await.map_err(form_error(Field::Json))?),
            Some("file") => {
                form.file = Some(field.bytes().await.map_err(form_error(Field::File))?.to_vec())
            }
            _ => {}
        }
    }

    Ok(form)
}

/// Parse the `json` field into an object and check the shared secret.
fn authorize(form: &Form, token: &str) -> StoreResult<Map<String, Value>> {
    let value = match &form.json {
        Some(text) => serde_json::from_str(text).map_err(|_| StoreError::InvalidField(Field::Json))?,
        None => Value::Object(Map::new()),
    };
    let Value::Object(object) = value else {
        return Err(StoreError::InvalidField(Field::Json));
    };

    if !token.is_empty() {
        match object.get("token").and_then(Value::as_str) {
            None => return Err(StoreError::InvalidField(Field::Token)),
            Some(given) if given != token => return Err(StoreError::Unauthorized),
            Some(_) => {}
        }
    }

    Ok(object)
}

fn data_field(value: &Value) -> StoreResult<Value> {
    match value {
        Value::Object(_) | Value::Array(_) => Ok(value.clone()),
        _ => Err(StoreError::InvalidField(Field::Data)),
    }
}

fn name_field(value: &Value) -> StoreResult<String> {
    value
        .as_str()
        .map(str::to_owned)
        .ok_or(StoreError::InvalidField(Field::Name))
}

fn tags_field(value: &Value) -> StoreResult<TagSet> {
    let tags = value
        .as_array()
        .ok_or(StoreError::InvalidField(Field::Tags))?
        .iter()
        .map(|tag| tag.as_str().ok_or(StoreError::InvalidField(Field::Tags)))
        .collect::<StoreResult<Vec<_>>>()?;
    TagSet::new(tags)
}

fn time_field(value: &Value) -> StoreResult<DateTime<Utc>> {
    value
        .as_f64()
        .filter(|millis| millis.is_finite())
        .and_then(|millis| DateTime::<Utc>::from_timestamp_millis(millis.trunc() as i64))
        .ok_or(StoreError::InvalidField(Field::Time))
}

fn uuid_field(object: &Map<String, Value>) -> StoreResult<Uuid> {
    object
        .get("uuid")
        .and_then(Value::as_str)
        .ok_or(StoreError::InvalidField(Field::Uuid))
        .and_then(path_uuid)
}

fn required<'a>(object: &'a Map<String, Value>, key: &str, field: Field) -> StoreResult<&'a Value> {
    object.get(key).ok_or(StoreError::InvalidField(field))
}

#[instrument(skip_all)]
async fn add(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> StoreResult<Json<Summary>> {
    let form = read_form(multipart).await?;
    let object = authorize(&form, &state.token)?;

    let data = data_field(required(&object, "data", Field::Data)?)?;
    let name = name_field(required(&object, "name", Field::Name)?)?;
    let tags = tags_field(required(&object, "tags", Field::Tags)?)?;
    let time = time_field(required(&object, "time", Field::Time)?)?;
    let bytes = form.file.ok_or(StoreError::InvalidField(Field::File))?;

    let content = state
        .store
        .add(Source {
            bytes,
            data,
            name,
            tags,
            time,
        })
        .await?;

    Ok(Json(state.store.summarize(&content)))
}

#[instrument(skip_all)]
async fn update(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> StoreResult<Json<Summary>> {
    let form = read_form(multipart).await?;
    let object = authorize(&form, &state.token)?;

    let partial = PartialSource {
        data: object.get("data").map(data_field).transpose()?,
        name: object.get("name").map(name_field).transpose()?,
        tags: object.get("tags").map(tags_field).transpose()?,
        time: object.get("time").map(time_field).transpose()?,
        bytes: form.file,
    };
    let uuid = uuid_field(&object)?;
    if partial.is_empty() {
        return Err(StoreError::InvalidField(Field::Json));
    }

    let content = state.store.update(uuid, partial).await?;
    Ok(Json(state.store.summarize(&content)))
}

#[instrument(skip_all)]
async fn remove(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> StoreResult<Json<Summary>> {
    let form = read_form(multipart).await?;
    let object = authorize(&form, &state.token)?;
    let uuid = uuid_field(&object)?;

    let content = state.store.remove(uuid).await?;
    Ok(Json(state.store.summarize(&content)))
}

/// Start the content API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting content API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}
