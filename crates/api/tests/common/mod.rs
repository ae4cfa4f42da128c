#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use fitline_core::quality_gate::GateFlags;
use fitline_events::EventBus;
use fitline_inference::types::{DetectionResult, GenerationCandidate, SegmentationResult};
use fitline_inference::{
    DetectionWorker, GenerationEngine, InferenceError, MemoryImageStore, PromptWriter,
    QualityEvaluator, SegmentationWorker,
};
use fitline_pipeline::{
    ChannelDispatcher, Collaborators, MemoryJobStore, Orchestrator, PipelineConfig, WorkItem,
};
use http_body_util::BodyExt;
use tokio::sync::mpsc;
use tower::ServiceExt;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use fitline_api::config::ServerConfig;
use fitline_api::routes;
use fitline_api::state::AppState;

/// Every collaborator call fails, as if the inference services were down.
pub struct Offline;

fn offline() -> InferenceError {
    InferenceError::Api {
        status: 503,
        body: "offline".to_string(),
    }
}

#[async_trait]
impl DetectionWorker for Offline {
    async fn detect(&self, _image_ref: &str) -> Result<DetectionResult, InferenceError> {
        Err(offline())
    }
}

#[async_trait]
impl SegmentationWorker for Offline {
    async fn segment(&self, _image_ref: &str) -> Result<SegmentationResult, InferenceError> {
        Err(offline())
    }
}

#[async_trait]
impl PromptWriter for Offline {
    async fn write_prompt(&self, _context: &serde_json::Value) -> Result<String, InferenceError> {
        Err(offline())
    }
}

#[async_trait]
impl GenerationEngine for Offline {
    async fn generate(
        &self,
        _context: &serde_json::Value,
        _count: usize,
        _tier: &str,
    ) -> Result<Vec<GenerationCandidate>, InferenceError> {
        Err(offline())
    }
}

#[async_trait]
impl QualityEvaluator for Offline {
    async fn evaluate(
        &self,
        _reference_ref: &str,
        _candidate_refs: &[String],
        _flags: GateFlags,
    ) -> Result<String, InferenceError> {
        Err(offline())
    }
}

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
    }
}

/// Router plus the in-memory state behind it.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryJobStore>,
    /// Held so dispatches succeed; tests may inspect it.
    pub work: mpsc::UnboundedReceiver<WorkItem>,
}

/// Build the full application router with all middleware layers, backed
/// by an in-memory job store and offline collaborators.
///
/// Mirrors the router construction in `main.rs`.
pub fn build_test_app() -> TestApp {
    let store = Arc::new(MemoryJobStore::new());
    let (dispatcher, work) = ChannelDispatcher::channel();
    let offline = Arc::new(Offline);
    let collaborators = Collaborators {
        detector: offline.clone(),
        segmenter: offline.clone(),
        prompt_writer: offline.clone(),
        engine: offline.clone(),
        evaluator: offline,
        images: Arc::new(MemoryImageStore::new()),
    };
    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(dispatcher),
        collaborators,
        PipelineConfig::default(),
        Arc::new(EventBus::default()),
    );

    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        config: Arc::new(test_config()),
    };

    let cors = CorsLayer::new()
        .allow_origin(["http://localhost:5173".parse().unwrap()])
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600));

    let request_id_header = HeaderName::from_static("x-request-id");

    let router = Router::new()
        .merge(routes::health::router())
        .nest("/api/v1", routes::api_routes())
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(cors)
        .with_state(state);

    TestApp {
        router,
        store,
        work,
    }
}

pub async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post(app: Router, uri: &str) -> Response {
    app.oneshot(Request::post(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response {
    let request = Request::post(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
