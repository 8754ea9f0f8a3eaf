//! Local GPU stats server
//!
//! - `GET /gpu`: one fresh snapshot (404 when no NVIDIA GPU, 500 on sampling failure)
//! - `GET /gpu/stream`: live SSE feed driven by the stream publisher

use axum::extract::State;
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use gpustats_core::{event_stream, SnapshotSource, SubscriberRegistry};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct LocalState {
    pub source: Arc<dyn SnapshotSource>,
    pub subscribers: Arc<SubscriberRegistry>,
}

pub fn build_router(state: LocalState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/gpu", get(get_gpu))
        .route("/gpu/stream", get(gpu_stream))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

async fn get_gpu(State(state): State<LocalState>) -> Response {
    match state.source.sample().await {
        Ok(Some(snapshot)) => Json(snapshot).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "No NVIDIA GPU found" })),
        )
            .into_response(),
        Err(e) => {
            warn!("GPU sampling failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn gpu_stream(State(state): State<LocalState>) -> Response {
    let subscription = state.subscribers.register();
    debug!("SSE client connected (id {})", subscription.id());
    event_stream(subscription)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use futures::future::BoxFuture;
    use futures::StreamExt;
    use gpustats_core::{GpuSnapshot, SampleError};
    use serde_json::Value;
    use tower::ServiceExt;

    enum Script {
        Snapshot,
        NoDevice,
        Fail,
    }

    struct ScriptedSource(Script);

    impl SnapshotSource for ScriptedSource {
        fn sample(&self) -> BoxFuture<'_, Result<Option<GpuSnapshot>, SampleError>> {
            let result = match self.0 {
                Script::Snapshot => Ok(Some(GpuSnapshot {
                    name: Some("RTX 3080".into()),
                    utilization_gpu: Some(42.0),
                    ..Default::default()
                })),
                Script::NoDevice => Ok(None),
                Script::Fail => Err(SampleError::Parse("bad line".into())),
            };
            Box::pin(async move { result })
        }
    }

    fn app(script: Script) -> (Router, Arc<SubscriberRegistry>) {
        let subscribers = Arc::new(SubscriberRegistry::new());
        let state = LocalState {
            source: Arc::new(ScriptedSource(script)),
            subscribers: subscribers.clone(),
        };
        (build_router(state), subscribers)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_gpu_returns_snapshot() {
        let (app, _) = app(Script::Snapshot);
        let (status, body) = get_json(app, "/gpu").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"name": "RTX 3080", "utilizationGpu": 42.0}));
    }

    #[tokio::test]
    async fn test_gpu_without_device_is_404() {
        let (app, _) = app(Script::NoDevice);
        let (status, body) = get_json(app, "/gpu").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"error": "No NVIDIA GPU found"}));
    }

    #[tokio::test]
    async fn test_gpu_sampling_failure_is_500() {
        let (app, _) = app(Script::Fail);
        let (status, body) = get_json(app, "/gpu").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("bad line"));
    }

    #[tokio::test]
    async fn test_cors_allows_any_origin() {
        let (app, _) = app(Script::Snapshot);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/gpu")
                    .header(header::ORIGIN, "http://dashboard.local")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "*"
        );
    }

    #[tokio::test]
    async fn test_stream_registers_and_releases_subscriber() {
        let (app, subscribers) = app(Script::Snapshot);
        let response = app
            .oneshot(Request::builder().uri("/gpu/stream").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );
        assert_eq!(subscribers.len(), 1);

        let mut body = response.into_body().into_data_stream();
        let first = body.next().await.unwrap().unwrap();
        assert_eq!(&first[..], b": connected\n\n");

        drop(body);
        assert_eq!(subscribers.len(), 0);
    }
}
