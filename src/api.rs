use crate::activity::{ActivityLog, ActivityLogEntry};
use crate::catalog::{CatalogId, CatalogStore, MemoryCatalog, StorefrontView};
use crate::config::AppConfig;
use crate::http::build_client;
use crate::idempotency::{IDEMPOTENCY_HEADER, IdempotencyCache, Lookup};
use crate::ingest::{
    IngestError, IngestErrorKind, IngestionEngine, MediaAcquirer,
    validate::{validate, validate_patch},
};
use crate::metrics;
use crate::models::{
    ApiError, BulkRequest, BulkResult, CreateProductResponse, ImageSource, VerifyResponse,
};
use crate::security::{AuthContext, AuthMethod, Gateway, require_gateway_auth};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Extension, FromRequest, Multipart, Path, Request, State},
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    pub engine: IngestionEngine,
    pub gateway: Gateway,
    pub idempotency: IdempotencyCache,
    pub openapi: Arc<Value>,
    pub prometheus: Option<PrometheusHandle>,
    pub openapi_key: Option<String>,
    pub metrics_key: Option<String>,
    pub body_limit: usize,
}

impl AppState {
    /// Wires the in-process catalog, media acquirer, activity log and gateway
    /// from one configuration snapshot.
    pub fn from_config(config: &AppConfig, prometheus: Option<PrometheusHandle>) -> Self {
        let store: Arc<dyn CatalogStore> =
            Arc::new(MemoryCatalog::new(config.storefront_url.clone()));
        let media = MediaAcquirer::new(
            store.clone(),
            build_client(&config.http),
            config.media.clone(),
        );
        let engine = IngestionEngine::new(store, media, ActivityLog::new(&config.activity));
        let openapi: Value = serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
            .unwrap_or_else(|_| json!({"openapi": "3.0.3"}));
        Self {
            engine,
            gateway: Gateway::new(config.gateway.clone(), config.body_limit),
            idempotency: IdempotencyCache::from_url(
                config.redis_url.as_deref(),
                config.idempotency_ttl_secs,
            ),
            openapi: Arc::new(openapi),
            prometheus,
            openapi_key: config.openapi_key.clone(),
            metrics_key: config.metrics_key.clone(),
            body_limit: config.body_limit,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);
    let body_limit = state.body_limit;

    let protected = Router::new()
        .route("/product", post(create_product))
        .route("/product/{id}", get(get_product).put(update_product))
        .route("/products/bulk", post(bulk_create))
        .route("/verify", get(verify))
        .route("/activity", get(list_activity).delete(clear_activity))
        .route("/activity/export", get(export_activity))
        .route_layer(middleware::from_fn_with_state(
            state.gateway.clone(),
            require_gateway_auth,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .merge(protected)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

#[derive(Debug)]
pub enum AppError {
    Ingest(IngestError),
    BadRequest { code: &'static str, detail: String },
    Forbidden(&'static str),
    NotFound(String),
    KeyReused(String),
    Internal(String),
}

impl AppError {
    fn bad_request(code: &'static str, detail: impl Into<String>) -> Self {
        Self::BadRequest {
            code,
            detail: detail.into(),
        }
    }
}

impl From<IngestError> for AppError {
    fn from(value: IngestError) -> Self {
        Self::Ingest(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, detail) = match self {
            AppError::Ingest(err) => {
                let (status, code) = match err.kind() {
                    IngestErrorKind::MissingField => (StatusCode::BAD_REQUEST, "missing_field"),
                    IngestErrorKind::InvalidField => (StatusCode::BAD_REQUEST, "invalid_field"),
                    IngestErrorKind::NotFound => (StatusCode::NOT_FOUND, "not_found"),
                    IngestErrorKind::PlatformWrite => {
                        error!(target = "catalog.api", stage = err.stage(), error = %err, "platform_write_failed");
                        (StatusCode::INTERNAL_SERVER_ERROR, "platform_write")
                    }
                };
                (status, code, err.detail().to_string())
            }
            AppError::BadRequest { code, detail } => (StatusCode::BAD_REQUEST, code, detail),
            AppError::Forbidden(detail) => (StatusCode::FORBIDDEN, "forbidden", detail.to_string()),
            AppError::NotFound(detail) => (StatusCode::NOT_FOUND, "not_found", detail),
            AppError::KeyReused(detail) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "idempotency_key_reused", detail)
            }
            AppError::Internal(detail) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", detail),
        };
        let payload = ApiError {
            error: code.to_string(),
            detail: Some(detail),
        };
        (status, Json(payload)).into_response()
    }
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "catalog-ingest",
    }))
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    if let Some(key) = &state.openapi_key {
        let presented = headers
            .get("X-Docs-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != key {
            return Err(AppError::Forbidden("docs key required"));
        }
    }
    Ok(Json((*state.openapi).clone()))
}

async fn swagger_ui() -> Response {
    let html = r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Catalog Ingest API</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#;
    ([(CONTENT_TYPE, "text/html; charset=utf-8")], html).into_response()
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(secret) = &state.metrics_key {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    let body = state
        .prometheus
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default();
    ([(CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response()
}

/// Create one product.
///
/// - Method: `POST`
/// - Path: `/product`
/// - Auth: `X-Ingest-Token`, `Authorization: Bearer <token>`, or an
///   allow-listed `user_email`
/// - Body: JSON record, or `multipart/form-data` with an optional `image` file
/// - Response: `CreateProductResponse`
async fn create_product(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    request: Request,
) -> Result<Json<CreateProductResponse>, AppError> {
    metrics::inc_requests("/product");
    let replay_key = idempotency_key(request.headers())
        .map(|key| IdempotencyCache::scoped_key("product", &auth.actor, &key));
    let (raw, upload) = read_product(request, &state).await?;
    let replay = replay_key.map(|key| (key, product_fingerprint(&raw, upload.as_ref())));
    if let Some(existing) =
        replayed::<CreateProductResponse>(&state.idempotency, replay.as_ref()).await?
    {
        info!(target = "catalog.api", product_id = %existing.product_id, "idempotent_replay");
        return Ok(Json(existing));
    }

    let mut record = validate(&raw).into_result()?;
    if upload.is_some() {
        record.details.image = upload;
    }
    let created = state
        .engine
        .create_single(record, &auth.ingest_context())
        .await?;
    let response = CreateProductResponse {
        success: true,
        product_id: created.id,
        permalink: created.permalink,
        message: "Product created successfully".to_string(),
    };
    if let Some((key, fingerprint)) = &replay {
        state.idempotency.put(key, fingerprint, &response).await;
    }
    Ok(Json(response))
}

async fn update_product(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<u64>,
    Json(raw): Json<Value>,
) -> Result<Json<CreateProductResponse>, AppError> {
    metrics::inc_requests("/product/{id}");
    let patch = validate_patch(&raw)?;
    let updated = state
        .engine
        .update_product(CatalogId(id), patch, &auth.ingest_context())
        .await?;
    Ok(Json(CreateProductResponse {
        success: true,
        product_id: updated.id,
        permalink: updated.permalink,
        message: "Product updated successfully".to_string(),
    }))
}

async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<StorefrontView>, AppError> {
    let view = state
        .engine
        .store()
        .storefront_view(CatalogId(id))
        .await
        .map_err(|err| AppError::Internal(err.to_string()))?;
    view.map(Json)
        .ok_or_else(|| AppError::NotFound(format!("product {id} not found")))
}

/// Create many products in one request.
///
/// Items run sequentially and independently; the response reports each
/// failure with its zero-based index and the record as submitted.
async fn bulk_create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    request: Request,
) -> Result<Json<BulkResult>, AppError> {
    metrics::inc_requests("/products/bulk");
    let replay_key = idempotency_key(request.headers())
        .map(|key| IdempotencyCache::scoped_key("bulk", &auth.actor, &key));
    let Json(payload) = Json::<BulkRequest>::from_request(request, &state)
        .await
        .map_err(|err| AppError::bad_request("invalid_json", err.body_text()))?;
    let records = match payload.products {
        Some(Value::Array(items)) if !items.is_empty() => items,
        _ => {
            return Err(AppError::bad_request(
                "missing_products",
                "products must be a non-empty array",
            ));
        }
    };

    let replay = replay_key.map(|key| {
        let body = json!({"products": &records, "user_email": &payload.user_email});
        let fingerprint =
            IdempotencyCache::fingerprint(&[&serde_json::to_vec(&body).unwrap_or_default()]);
        (key, fingerprint)
    });
    if let Some(existing) = replayed::<BulkResult>(&state.idempotency, replay.as_ref()).await? {
        info!(target = "catalog.api", total = existing.total, "idempotent_replay");
        return Ok(Json(existing));
    }

    let default_email = payload
        .user_email
        .as_deref()
        .map(str::trim)
        .filter(|email| !email.is_empty());
    let result = state
        .engine
        .bulk_create(records, default_email, &auth.ingest_context())
        .await;
    if let Some((key, fingerprint)) = &replay {
        state.idempotency.put(key, fingerprint, &result).await;
    }
    Ok(Json(result))
}

async fn verify(Extension(auth): Extension<AuthContext>) -> Json<VerifyResponse> {
    metrics::inc_requests("/verify");
    info!(target = "catalog.api", actor = %auth.actor, method = ?auth.method, "credentials_verified");
    Json(VerifyResponse {
        success: true,
        message: Some("Connection verified".to_string()),
    })
}

async fn list_activity(State(state): State<AppState>) -> Json<Vec<ActivityLogEntry>> {
    Json(state.engine.activity().list().await)
}

async fn clear_activity(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Value>, AppError> {
    if auth.method != AuthMethod::Token {
        return Err(AppError::Forbidden("clearing the activity log requires the API token"));
    }
    let cleared = state.engine.activity().clear().await;
    info!(target = "catalog.api", cleared, actor = %auth.actor, "activity_cleared");
    Ok(Json(json!({ "success": true, "cleared": cleared })))
}

async fn export_activity(State(state): State<AppState>) -> Result<Response, AppError> {
    let entries = state.engine.activity().list().await;
    let body = render_activity_csv(&entries).map_err(|err| AppError::Internal(err.to_string()))?;
    Ok((
        [
            (CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                axum::http::header::CONTENT_DISPOSITION,
                "attachment; filename=\"activity.csv\"",
            ),
        ],
        body,
    )
        .into_response())
}

pub fn render_activity_csv(entries: &[ActivityLogEntry]) -> Result<String, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["timestamp", "actor", "action", "product_id", "ip"])?;
    for entry in entries {
        writer.write_record([
            entry.timestamp.to_rfc3339().as_str(),
            entry.actor.as_str(),
            entry.action.as_str(),
            entry.subject_id.to_string().as_str(),
            entry.source_address.as_str(),
        ])?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| csv::Error::from(err.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Returns the raw record and, for multipart bodies, the uploaded image file.
async fn read_product(
    request: Request,
    state: &AppState,
) -> Result<(Value, Option<ImageSource>), AppError> {
    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));

    if is_multipart {
        let multipart = Multipart::from_request(request, state)
            .await
            .map_err(|err| AppError::bad_request("invalid_multipart", err.body_text()))?;
        read_multipart(multipart).await
    } else {
        let Json(raw) = Json::<Value>::from_request(request, state)
            .await
            .map_err(|err| AppError::bad_request("invalid_json", err.body_text()))?;
        Ok((raw, None))
    }
}

/// Object keys serialize sorted, so field order and multipart boundaries do
/// not change the fingerprint.
fn product_fingerprint(raw: &Value, upload: Option<&ImageSource>) -> String {
    let fields = serde_json::to_vec(raw).unwrap_or_default();
    match upload {
        Some(ImageSource::Upload { bytes, filename }) => {
            IdempotencyCache::fingerprint(&[&fields, filename.as_bytes(), bytes])
        }
        _ => IdempotencyCache::fingerprint(&[&fields]),
    }
}

async fn replayed<T: DeserializeOwned>(
    cache: &IdempotencyCache,
    replay: Option<&(String, String)>,
) -> Result<Option<T>, AppError> {
    let Some((key, fingerprint)) = replay else {
        return Ok(None);
    };
    match cache.lookup(key, fingerprint).await {
        Lookup::Miss => Ok(None),
        Lookup::Replay(existing) => Ok(Some(existing)),
        Lookup::Conflict => Err(AppError::KeyReused(format!(
            "{IDEMPOTENCY_HEADER} was already used for a different request"
        ))),
    }
}

/// Flattens form fields into a JSON object; repeated names become arrays.
async fn read_multipart(
    mut multipart: Multipart,
) -> Result<(Value, Option<ImageSource>), AppError> {
    let invalid = |err: axum::extract::multipart::MultipartError| {
        AppError::bad_request("invalid_multipart", err.body_text())
    };
    let mut fields = Map::new();
    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(invalid)? {
        let Some(name) = field.name().map(|n| n.trim_end_matches("[]").to_string()) else {
            continue;
        };
        if name == "image"
            && let Some(filename) = field.file_name().map(str::to_string)
        {
            let bytes = field.bytes().await.map_err(invalid)?;
            if !bytes.is_empty() {
                upload = Some(ImageSource::Upload {
                    bytes: bytes.to_vec(),
                    filename,
                });
            }
            continue;
        }
        let text = Value::String(field.text().await.map_err(invalid)?);
        match fields.get_mut(&name) {
            Some(Value::Array(items)) => items.push(text),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, text]);
            }
            None => {
                fields.insert(name, text);
            }
        }
    }
    Ok((Value::Object(fields), upload))
}
