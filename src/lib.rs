pub mod config;
pub mod error;
pub mod jobs;
pub mod scoring;
pub mod store;
pub mod synthetic;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub use error::{EngineError, ItemFailure, PartialBatchError};
pub use jobs::{
    BaselineRecomputeSummary, BatchScoreSummary, ChannelProgress, Coordinator, JobHandle, JobId,
    JobKind, JobOutcome, JobProgress, JobState, JobStatus,
};
pub use store::Store;

pub type ChannelId = i64;
pub type PostId = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub username: String,
    pub title: String,
}

/// Raw counters as supplied by ingestion. Signed because upstream rows are
/// not trusted; negative values are rejected when rates are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMetrics {
    pub views: i64,
    pub forwards: i64,
    pub reactions: i64,
    pub replies: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub channel_id: ChannelId,
    pub views: i64,
    pub forwards: i64,
    pub reactions: i64,
    pub replies: i64,
    pub date: DateTime<Utc>,
    /// When ingestion last wrote the raw counters.
    #[serde(default = "Utc::now")]
    pub collected_at: DateTime<Utc>,
    /// Engine-owned. Set whenever a rate was computed, even if the post stays unscored.
    #[serde(default)]
    pub engagement_rate: Option<f64>,
    /// Engine-owned. `None` means unscored.
    #[serde(default)]
    pub viral: Option<ViralMetrics>,
}

impl Post {
    pub fn new(id: PostId, channel_id: ChannelId, metrics: PostMetrics, date: DateTime<Utc>) -> Self {
        Self {
            id,
            channel_id,
            views: metrics.views,
            forwards: metrics.forwards,
            reactions: metrics.reactions,
            replies: metrics.replies,
            date,
            collected_at: date,
            engagement_rate: None,
            viral: None,
        }
    }

    pub fn metrics(&self) -> PostMetrics {
        PostMetrics {
            views: self.views,
            forwards: self.forwards,
            reactions: self.reactions,
            replies: self.replies,
        }
    }

    pub fn is_scored(&self) -> bool {
        self.viral.is_some()
    }

    pub fn is_viral(&self) -> bool {
        self.viral.as_ref().map(|viral| viral.is_viral).unwrap_or(false)
    }

    /// A scored post is stale when it was scored against a baseline other than
    /// `current`, or when its counters were re-ingested after scoring.
    pub fn is_stale_against(&self, current: Option<&ChannelBaseline>) -> bool {
        let Some(viral) = self.viral.as_ref() else {
            return false;
        };
        if self.collected_at > viral.scored_at {
            return true;
        }
        match current {
            Some(baseline) if baseline.is_ready() => viral.baseline_computed_at != baseline.computed_at,
            _ => false,
        }
    }
}

/// Classification fields written back onto a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViralMetrics {
    pub engagement_rate: f64,
    pub viral_score: f64,
    pub zscore: f64,
    pub median_multiplier: f64,
    pub views_percentile: f64,
    pub is_viral: bool,
    pub scored_at: DateTime<Utc>,
    pub baseline_computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaselineStatus {
    Training,
    Ready,
}

impl BaselineStatus {
    pub fn label(self) -> &'static str {
        match self {
            BaselineStatus::Training => "training",
            BaselineStatus::Ready => "ready",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineStats {
    pub avg_engagement_rate: f64,
    pub median_engagement_rate: f64,
    pub p75_engagement_rate: f64,
    pub stddev_engagement_rate: f64,
    /// Posts left after outlier trimming.
    pub posts_used: usize,
}

/// One row per channel, replaced wholesale on every recompute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelBaseline {
    pub channel_id: ChannelId,
    pub status: BaselineStatus,
    /// Eligible posts in the history window, before trimming.
    pub posts_analyzed: usize,
    /// `Some` iff `status == Ready`.
    pub stats: Option<BaselineStats>,
    /// Sorted view counts of the eligible posts, for views percentiles.
    #[serde(default)]
    pub view_distribution: Vec<i64>,
    /// Window posts left out because their counters could not be rated.
    #[serde(default)]
    pub posts_rejected: usize,
    pub computed_at: DateTime<Utc>,
}

impl ChannelBaseline {
    pub fn training(channel_id: ChannelId, posts_analyzed: usize, computed_at: DateTime<Utc>) -> Self {
        Self {
            channel_id,
            status: BaselineStatus::Training,
            posts_analyzed,
            stats: None,
            view_distribution: Vec::new(),
            posts_rejected: 0,
            computed_at,
        }
    }

    pub fn ready(
        channel_id: ChannelId,
        posts_analyzed: usize,
        stats: BaselineStats,
        mut view_distribution: Vec<i64>,
        computed_at: DateTime<Utc>,
    ) -> Self {
        view_distribution.sort_unstable();
        Self {
            channel_id,
            status: BaselineStatus::Ready,
            posts_analyzed,
            stats: Some(stats),
            view_distribution,
            posts_rejected: 0,
            computed_at,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == BaselineStatus::Ready && self.stats.is_some()
    }

    pub fn with_rejected(mut self, posts_rejected: usize) -> Self {
        self.posts_rejected = posts_rejected;
        self
    }

    pub fn is_stale(&self, now: DateTime<Utc>, update_interval_hours: u32) -> bool {
        now - self.computed_at > Duration::hours(update_interval_hours as i64)
    }
}

pub fn format_number(value: f64) -> String {
    let rounded = value.round().max(0.0) as i64;
    let mut chars: Vec<char> = rounded.to_string().chars().collect();
    let mut result = String::new();
    let mut count = 0usize;

    while let Some(ch) = chars.pop() {
        if count == 3 {
            result.push(',');
            count = 0;
        }
        result.push(ch);
        count += 1;
    }

    result.chars().rev().collect()
}

pub fn format_percent(value: f64) -> String {
    format!("{:.1}%", value * 100.0)
}

pub fn format_float(value: f64, digits: usize) -> String {
    format!("{:.1$}", value, digits)
}
