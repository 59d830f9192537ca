use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::api::{
    ApiBaseline, ApiError, ApiPost, IngestRequest, JobAccepted, ScoreBatchRequest, ViralQuery,
};
use channel_virality::jobs::IngestSummary;
use channel_virality::{ChannelId, Coordinator, EngineError, JobStatus, PostId, ViralMetrics};

const DEFAULT_VIRAL_LIMIT: usize = 50;

#[derive(Clone)]
struct AppState {
    coordinator: Coordinator,
}

pub async fn serve(args: crate::ServeArgs, coordinator: Coordinator) -> Result<(), EngineError> {
    if !args.no_scheduler {
        coordinator.spawn_scheduler();
    }
    let state = AppState { coordinator };

    let app = Router::new()
        .route("/api/health", get(health))
        .route("/api/ingest", post(ingest_handler))
        .route(
            "/api/channels/:channel_id/baseline",
            get(baseline_handler).post(compute_baseline_handler),
        )
        .route("/api/baselines/recompute", post(recompute_all_handler))
        .route("/api/posts/score", post(score_batch_handler))
        .route("/api/posts/score-all", post(score_all_handler))
        .route("/api/posts/viral", get(viral_handler))
        .route("/api/posts/:post_id/classify", post(classify_handler))
        .route("/api/jobs", get(jobs_handler))
        .route("/api/jobs/:job_id", get(job_status_handler))
        .route("/api/jobs/:job_id/cancel", post(cancel_job_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .map_err(|err| EngineError::Config(format!("invalid bind address: {}", err)))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| EngineError::Infrastructure(format!("failed to bind server: {}", err)))?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .await
        .map_err(|err| EngineError::Infrastructure(format!("server error: {}", err)))?;

    Ok(())
}

async fn health() -> impl IntoResponse {
    StatusCode::OK
}

async fn ingest_handler(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> Result<Json<IngestSummary>, ApiError> {
    let (channel, posts) = request.into_parts();
    let summary = state.coordinator.ingest_posts(channel, posts).await?;
    Ok(Json(summary))
}

async fn baseline_handler(
    State(state): State<AppState>,
    Path(channel_id): Path<ChannelId>,
) -> Result<Json<ApiBaseline>, ApiError> {
    let baseline = state
        .coordinator
        .get_channel_baseline(channel_id)
        .await
        .ok_or_else(|| EngineError::NotFound(format!("baseline for channel {}", channel_id)))?;
    let interval = state.coordinator.config().baseline.update_interval_hours;
    Ok(Json(ApiBaseline::from_baseline(&baseline, interval)))
}

async fn compute_baseline_handler(
    State(state): State<AppState>,
    Path(channel_id): Path<ChannelId>,
) -> Result<Json<ApiBaseline>, ApiError> {
    let baseline = state.coordinator.compute_baseline(channel_id).await?;
    let interval = state.coordinator.config().baseline.update_interval_hours;
    Ok(Json(ApiBaseline::from_baseline(&baseline, interval)))
}

async fn recompute_all_handler(State(state): State<AppState>) -> (StatusCode, Json<JobAccepted>) {
    let handle = state.coordinator.spawn_recompute_all_baselines().await;
    (StatusCode::ACCEPTED, Json(JobAccepted::from_handle(&handle).await))
}

async fn score_batch_handler(
    State(state): State<AppState>,
    request: Option<Json<ScoreBatchRequest>>,
) -> (StatusCode, Json<JobAccepted>) {
    let request = request.map(|Json(request)| request).unwrap_or_default();
    let limit = request
        .limit
        .unwrap_or_else(|| state.coordinator.config().calc.batch_size);
    let handle = state
        .coordinator
        .spawn_score_posts_batch(request.channel, limit)
        .await;
    (StatusCode::ACCEPTED, Json(JobAccepted::from_handle(&handle).await))
}

async fn score_all_handler(State(state): State<AppState>) -> (StatusCode, Json<JobAccepted>) {
    let handle = state.coordinator.score_all_posts().await;
    (StatusCode::ACCEPTED, Json(JobAccepted::from_handle(&handle).await))
}

async fn viral_handler(
    State(state): State<AppState>,
    Query(query): Query<ViralQuery>,
) -> Json<Vec<ApiPost>> {
    let posts = state
        .coordinator
        .list_viral_posts(
            query.min_score.unwrap_or(0.0),
            query.channel,
            query.limit.unwrap_or(DEFAULT_VIRAL_LIMIT),
        )
        .await;
    Json(posts.into_iter().map(ApiPost::from).collect())
}

async fn classify_handler(
    State(state): State<AppState>,
    Path(post_id): Path<PostId>,
) -> Result<Json<ViralMetrics>, ApiError> {
    let metrics = state.coordinator.classify_post(post_id).await?;
    Ok(Json(metrics))
}

async fn jobs_handler(State(state): State<AppState>) -> Json<Vec<JobStatus>> {
    Json(state.coordinator.jobs().list().await)
}

async fn job_status_handler(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatus>, ApiError> {
    let status = state
        .coordinator
        .job_status(job_id)
        .await
        .ok_or_else(|| EngineError::NotFound(format!("job {}", job_id)))?;
    Ok(Json(status))
}

async fn cancel_job_handler(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatus>, ApiError> {
    state.coordinator.cancel_job(job_id).await?;
    let status = state
        .coordinator
        .job_status(job_id)
        .await
        .ok_or_else(|| EngineError::NotFound(format!("job {}", job_id)))?;
    Ok(Json(status))
}
