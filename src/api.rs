use axum::{http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use channel_virality::{
    Channel, ChannelBaseline, ChannelId, EngineError, JobHandle, JobStatus, Post, PostId,
    PostMetrics,
};

#[derive(Debug, Deserialize)]
pub struct ApiPostInput {
    pub id: PostId,
    pub views: i64,
    #[serde(default)]
    pub forwards: i64,
    #[serde(default)]
    pub reactions: i64,
    #[serde(default)]
    pub replies: i64,
    pub date: DateTime<Utc>,
}

/// One channel's worth of raw posts from ingestion.
#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub channel: Channel,
    pub posts: Vec<ApiPostInput>,
}

impl IngestRequest {
    pub fn into_parts(self) -> (Channel, Vec<Post>) {
        let channel_id = self.channel.id;
        let posts = self
            .posts
            .into_iter()
            .map(|input| {
                let metrics = PostMetrics {
                    views: input.views,
                    forwards: input.forwards,
                    reactions: input.reactions,
                    replies: input.replies,
                };
                Post::new(input.id, channel_id, metrics, input.date)
            })
            .collect();
        (self.channel, posts)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ScoreBatchRequest {
    pub channel: Option<ChannelId>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ViralQuery {
    pub min_score: Option<f64>,
    pub channel: Option<ChannelId>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct JobAccepted {
    pub job_id: String,
    pub status: Option<JobStatus>,
}

impl JobAccepted {
    pub async fn from_handle(handle: &JobHandle) -> Self {
        Self {
            job_id: handle.id().to_string(),
            status: handle.status().await,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiBaseline {
    pub channel_id: ChannelId,
    pub status: String,
    pub posts_analyzed: usize,
    pub posts_rejected: usize,
    pub avg_engagement_rate: Option<f64>,
    pub median_engagement_rate: Option<f64>,
    pub p75_engagement_rate: Option<f64>,
    pub stddev_engagement_rate: Option<f64>,
    pub computed_at: DateTime<Utc>,
    pub stale: bool,
}

impl ApiBaseline {
    pub fn from_baseline(baseline: &ChannelBaseline, update_interval_hours: u32) -> Self {
        let stats = baseline.stats.as_ref();
        Self {
            channel_id: baseline.channel_id,
            status: baseline.status.label().to_string(),
            posts_analyzed: baseline.posts_analyzed,
            posts_rejected: baseline.posts_rejected,
            avg_engagement_rate: stats.map(|stats| stats.avg_engagement_rate),
            median_engagement_rate: stats.map(|stats| stats.median_engagement_rate),
            p75_engagement_rate: stats.map(|stats| stats.p75_engagement_rate),
            stddev_engagement_rate: stats.map(|stats| stats.stddev_engagement_rate),
            computed_at: baseline.computed_at,
            stale: baseline.is_stale(Utc::now(), update_interval_hours),
        }
    }
}

/// Post as shown to callers; unscored posts carry `scored: false` and no metrics.
#[derive(Debug, Serialize)]
pub struct ApiPost {
    pub id: PostId,
    pub channel_id: ChannelId,
    pub views: i64,
    pub forwards: i64,
    pub reactions: i64,
    pub replies: i64,
    pub date: DateTime<Utc>,
    pub engagement_rate: Option<f64>,
    pub scored: bool,
    pub viral_score: Option<f64>,
    pub zscore: Option<f64>,
    pub median_multiplier: Option<f64>,
    pub views_percentile: Option<f64>,
    pub is_viral: Option<bool>,
}

impl From<Post> for ApiPost {
    fn from(post: Post) -> Self {
        let viral = post.viral.as_ref();
        Self {
            id: post.id,
            channel_id: post.channel_id,
            views: post.views,
            forwards: post.forwards,
            reactions: post.reactions,
            replies: post.replies,
            date: post.date,
            engagement_rate: post.engagement_rate,
            scored: viral.is_some(),
            viral_score: viral.map(|viral| viral.viral_score),
            zscore: viral.map(|viral| viral.zscore),
            median_multiplier: viral.map(|viral| viral.median_multiplier),
            views_percentile: viral.map(|viral| viral.views_percentile),
            is_viral: viral.map(|viral| viral.is_viral),
        }
    }
}

#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            EngineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            EngineError::BaselineNotReady { .. } => StatusCode::CONFLICT,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Infrastructure(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::PartialBatch(_) | EngineError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}
