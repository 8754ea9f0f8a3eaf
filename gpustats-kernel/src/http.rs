/**
 * API HTTP GPU STATS - Serveur central du relais
 *
 * RÔLE :
 * Point d'agrégation : les agents poussent leur dernier snapshot GPU,
 * les dashboards lisent le dernier état connu ou suivent le flux SSE live.
 *
 * ROUTES :
 * - GET  /              : liveness (texte statique)
 * - POST /api/push      : ingress authentifié {deviceId, stats} -> store
 * - GET  /api/stats     : lecture ?device=<id> depuis le store
 * - GET  /gpu/stream    : flux SSE (`: connected` puis une frame par diffusion)
 * - POST /push-sse      : push ouvert sans auth, rediffusé tel quel (opt-in)
 *
 * SÉCURITÉ :
 * - Header x-api-key obligatoire sur /api/ *, vérifié par middleware
 * - L'auth passe avant toute validation du body (401 quel que soit le contenu)
 * - strict_device_binding : une clé n'accède qu'à son propre device
 */

use crate::auth::{ApiKeyTable, AuthenticatedDevice};
use crate::config::KernelConfig;
use crate::error::ApiError;
use axum::body::Bytes;
use axum::extract::{Query, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use gpustats_core::{event_stream, DeviceEntry, Frame, LatestStore, SubscriberRegistry};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

pub const ROOT_BANNER: &str = "GPU Info Backend (API + SSE) is running.";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<LatestStore<Value>>,
    pub subscribers: Arc<SubscriberRegistry>,
    pub keys: Arc<ApiKeyTable>,
    pub allow_open_push: bool,
    pub strict_device_binding: bool,
}

impl AppState {
    pub fn new(cfg: &KernelConfig) -> Self {
        Self {
            store: Arc::new(LatestStore::new()),
            subscribers: Arc::new(SubscriberRegistry::new()),
            keys: Arc::new(ApiKeyTable::from_device_keys(&cfg.api_keys)),
            allow_open_push: cfg.allow_open_push,
            strict_device_binding: cfg.strict_device_binding,
        }
    }

    fn check_binding(&self, auth: &AuthenticatedDevice, device_id: &str) -> Result<(), ApiError> {
        if self.strict_device_binding && auth.0 != device_id {
            warn!(authenticated_as = %auth.0, device_id, "cross-device access refused");
            return Err(ApiError::Forbidden(device_id.to_string()));
        }
        Ok(())
    }
}

async fn require_api_key(
    State(app): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = req.headers().get("x-api-key").and_then(|v| v.to_str().ok());
    let Some(device) = app.keys.authenticate(presented) else {
        warn!(path = %req.uri().path(), "rejected request with invalid API key");
        return Err(ApiError::Unauthorized);
    };
    req.extensions_mut().insert(device);
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    let api = Router::new()
        .route("/api/push", post(push_stats))
        .route("/api/stats", get(get_stats))
        .route_layer(middleware::from_fn_with_state(app_state.clone(), require_api_key));

    let mut app = Router::new()
        .route("/", get(|| async { ROOT_BANNER }))
        .route("/gpu/stream", get(gpu_stream))
        .merge(api);

    if app_state.allow_open_push {
        warn!("open push enabled: POST /push-sse accepts unauthenticated payloads");
        app = app.route("/push-sse", post(push_sse));
    }

    app.with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushBody {
    device_id: Option<String>,
    stats: Option<Value>,
}

// POST /api/push
async fn push_stats(
    State(app): State<AppState>,
    Extension(auth): Extension<AuthenticatedDevice>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    const MISSING: ApiError = ApiError::BadRequest("Missing deviceId or stats");

    let parsed: PushBody = serde_json::from_slice(&body).map_err(|_| MISSING)?;
    let (device_id, stats) = match (parsed.device_id, parsed.stats) {
        (Some(id), Some(stats)) if !id.is_empty() && !stats.is_null() => (id, stats),
        _ => return Err(MISSING),
    };

    app.check_binding(&auth, &device_id)?;
    app.store.set(device_id.as_str(), stats);
    info!(device_id = %device_id, authenticated_as = %auth.0, "stats pushed");
    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
struct StatsParams {
    device: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsView {
    device_id: String,
    stats: DeviceEntry<Value>,
}

// GET /api/stats?device=<id>
async fn get_stats(
    State(app): State<AppState>,
    Extension(auth): Extension<AuthenticatedDevice>,
    Query(params): Query<StatsParams>,
) -> Result<Json<StatsView>, ApiError> {
    let device_id = params
        .device
        .filter(|d| !d.is_empty())
        .ok_or(ApiError::BadRequest("Missing device parameter"))?;

    app.check_binding(&auth, &device_id)?;
    let Some(entry) = app.store.get(&device_id) else {
        return Err(ApiError::NotFound);
    };
    Ok(Json(StatsView { device_id, stats: entry }))
}

// GET /gpu/stream
async fn gpu_stream(State(app): State<AppState>) -> Response {
    let subscription = app.subscribers.register();
    info!(subscribers = app.subscribers.len(), "stream client connected");
    event_stream(subscription)
}

// POST /push-sse (opt-in, sans auth)
async fn push_sse(State(app): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let stats: Value = serde_json::from_slice(&body).map_err(|_| ApiError::BadRequest("Missing stats"))?;
    if stats.is_null() {
        return Err(ApiError::BadRequest("Missing stats"));
    }
    let delivered = app.subscribers.broadcast(&Frame::Data(stats.to_string()));
    debug!(delivered, "open push rebroadcast");
    Ok(Json(serde_json::json!({ "success": true })))
}
