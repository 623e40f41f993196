pub mod extractors;
pub mod handlers;
pub mod middleware;

use crate::{
    detection::{DetectionRecorder, HistoryReader, PredictionPipeline},
    image::{ImageNormalizer, ThumbnailCodec},
    models::ModelManager,
    store::{open_store, HistoryStore},
    utils::error::DetectError,
    Config, Result,
};
use axum::{
    extract::{DefaultBodyLimit, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, timeout::TimeoutLayer};

/// 处理器共享状态
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<PredictionPipeline>,
    pub history: Arc<HistoryReader>,
    pub manager: Arc<ModelManager>,
    store_backend: &'static str,
}

impl AppState {
    pub fn new(manager: Arc<ModelManager>, store: Arc<dyn HistoryStore>) -> Self {
        let config = manager.config();

        let recorder = DetectionRecorder::new(
            Arc::clone(&store),
            ThumbnailCodec::new(config.thumbnail_config),
        );
        let pipeline = PredictionPipeline::new(
            ImageNormalizer::default(),
            manager.worker(),
            manager.postprocessor(),
        )
        .with_recorder(recorder)
        .with_max_bytes(config.server_config.max_request_size);

        Self {
            pipeline: Arc::new(pipeline),
            history: Arc::new(HistoryReader::new(Arc::clone(&store))),
            store_backend: store.backend_name(),
            manager,
        }
    }

    pub fn config(&self) -> &Config {
        self.manager.config()
    }

    pub fn dev_mode(&self) -> bool {
        self.config().dev_mode
    }
}

pub async fn serve(config: Config) -> Result<()> {
    // 加载模型（每个进程一次）
    let manager = ModelManager::init(config.clone()).await?;
    let store = open_store(&config.store_config)?;

    let app = create_app(AppState::new(manager, store));

    let addr: SocketAddr = config.bind_addr.parse().map_err(|e| {
        DetectError::Config(format!("Invalid bind address {}: {}", config.bind_addr, e))
    })?;

    tracing::info!("Server starting on http://{}", addr);
    tracing::info!("API endpoints:");
    tracing::info!("  POST /predict        - JSON base64 upload");
    tracing::info!("  POST /predict/upload - Multipart file upload");
    tracing::info!("  GET  /history        - Detection history (X-User-Id)");
    tracing::info!("  GET  /health         - Health check");
    tracing::info!("  GET  /api/info       - Service information");

    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        DetectError::Internal(format!("Failed to bind to address {}: {}", addr, e))
    })?;

    axum::serve(listener, app)
        .await
        .map_err(|e| DetectError::Internal(format!("Server failed to start: {}", e)))?;

    Ok(())
}

pub fn create_app(state: AppState) -> Router {
    let server_config = state.config().server_config.clone();

    Router::new()
        .route("/predict", post(handlers::predict_json_handler))
        .route("/predict/upload", post(handlers::predict_upload_handler))
        .route("/history", get(handlers::history_handler))
        .route("/health", get(health_handler))
        .route("/api/info", get(info_handler))
        .layer(axum::middleware::from_fn(middleware::security_headers))
        .layer(axum::middleware::from_fn(middleware::request_logging))
        // 由RequestBodyLimitLayer统一限制请求体大小
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(server_config.max_request_size))
        .layer(TimeoutLayer::new(Duration::from_secs(server_config.request_timeout)))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// 健康检查端点
async fn health_handler(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    state.manager.health_check()?;

    Ok(Json(json!({
        "status": "healthy",
        "store": state.store_backend,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    })))
}

/// 服务信息端点
async fn info_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stats = state.manager.get_stats();
    let thumbnail = state.config().thumbnail_config;

    Json(json!({
        "service": "Eye Condition Detection Service",
        "version": env!("CARGO_PKG_VERSION"),
        "description": env!("CARGO_PKG_DESCRIPTION"),
        "model": stats,
        "store": state.store_backend,
        "thumbnail": {
            "format": format!("{:?}", thumbnail.format),
            "max_side": thumbnail.max_side
        },
        "features": {
            "dual_upload_modes": true,
            "history": true,
            "progress_logging": state.dev_mode()
        }
    }))
}
