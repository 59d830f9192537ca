use chrono::{DateTime, Duration, Utc};
use std::cmp::Ordering;
use tracing::warn;

use crate::config::{BaselineConfig, ViralWeights};
use crate::error::EngineError;
use crate::scoring::EngagementRateCalculator;
use crate::{BaselineStats, ChannelBaseline, ChannelId, Post};

/// Aggregates a channel's history into a [`ChannelBaseline`].
///
/// Pure: the caller fetches the posts and persists the result. Eligibility
/// (`posts_analyzed`) is counted before outlier trimming; the statistics are
/// computed on the trimmed set. Construction rejects a config with
/// `min_posts_for_baseline == 0` or an out-of-range trimming percentile.
#[derive(Debug, Clone)]
pub struct BaselineEstimator {
    calculator: EngagementRateCalculator,
    config: BaselineConfig,
    min_views: i64,
}

impl BaselineEstimator {
    pub fn new(
        weights: ViralWeights,
        config: BaselineConfig,
        min_views_for_viral: i64,
    ) -> Result<Self, EngineError> {
        validate_config(&config)?;
        Ok(Self {
            calculator: EngagementRateCalculator::new(weights)?,
            config,
            min_views: min_views_for_viral,
        })
    }

    pub fn config(&self) -> &BaselineConfig {
        &self.config
    }

    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(self.config.history_days as i64)
    }

    pub fn is_eligible(&self, post: &Post, now: DateTime<Utc>) -> bool {
        post.views >= self.min_views && post.date >= self.window_start(now) && post.date <= now
    }

    /// Posts whose counters cannot be rated are left out of the baseline and
    /// counted in `posts_rejected`; they never fail the channel as a whole.
    pub fn estimate(
        &self,
        channel_id: ChannelId,
        posts: &[Post],
        now: DateTime<Utc>,
    ) -> ChannelBaseline {
        let mut rated = Vec::new();
        let mut rejected = 0usize;
        for post in posts
            .iter()
            .filter(|post| post.channel_id == channel_id && self.is_eligible(post, now))
        {
            match self.calculator.rate(&post.metrics()) {
                Ok(rate) => rated.push((post.views, rate)),
                Err(err) => {
                    warn!(
                        channel = channel_id,
                        post = post.id,
                        error = %err,
                        "post left out of baseline"
                    );
                    rejected += 1;
                }
            }
        }
        let posts_analyzed = rated.len();

        if posts_analyzed < self.config.min_posts_for_baseline {
            return ChannelBaseline::training(channel_id, posts_analyzed, now).with_rejected(rejected);
        }

        let mut rates: Vec<f64> = rated.iter().map(|(_, rate)| *rate).collect();
        rates.sort_by(|a, b| a.total_cmp(b));

        let trimmed = trim_outliers(&rates, self.config.outlier_removal_percentile);
        let avg = mean(trimmed);
        let stats = BaselineStats {
            avg_engagement_rate: avg,
            median_engagement_rate: percentile_sorted(trimmed, 0.5),
            p75_engagement_rate: percentile_sorted(trimmed, 0.75),
            stddev_engagement_rate: sample_stddev(trimmed, avg),
            posts_used: trimmed.len(),
        };

        let views = rated.iter().map(|(views, _)| *views).collect();
        ChannelBaseline::ready(channel_id, posts_analyzed, stats, views, now).with_rejected(rejected)
    }
}

fn validate_config(config: &BaselineConfig) -> Result<(), EngineError> {
    if config.min_posts_for_baseline == 0 {
        return Err(EngineError::InvalidInput(
            "min_posts_for_baseline must be at least 1".to_string(),
        ));
    }
    let percentile = config.outlier_removal_percentile;
    if !(percentile > 0.0 && percentile <= 100.0) {
        return Err(EngineError::InvalidInput(format!(
            "outlier_removal_percentile must be in (0, 100], got {}",
            percentile
        )));
    }
    Ok(())
}

/// Keeps the sorted values at or below the `keep_percentile`-th percentile.
/// `95.0` drops the top 5%; `100.0` keeps everything.
pub fn trim_outliers(sorted: &[f64], keep_percentile: f64) -> &[f64] {
    if sorted.is_empty() || keep_percentile >= 100.0 {
        return sorted;
    }
    let cutoff = percentile_sorted(sorted, keep_percentile.max(0.0) / 100.0);
    let kept = sorted.partition_point(|value| value.total_cmp(&cutoff) != Ordering::Greater);
    &sorted[..kept.max(1)]
}

/// Linear-interpolated percentile of an ascending slice, `q` in `[0, 1]`.
pub fn percentile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (`n - 1`), zero below two values.
pub fn sample_stddev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let sum_sq: f64 = values.iter().map(|value| (value - mean).powi(2)).sum();
    (sum_sq / (values.len() - 1) as f64).sqrt()
}
