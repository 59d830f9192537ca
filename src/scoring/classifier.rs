use chrono::{DateTime, Utc};

use crate::config::{EngineConfig, ThresholdComposition, ViralScoreConfig, ViralThresholds, ViralWeights};
use crate::error::EngineError;
use crate::scoring::EngagementRateCalculator;
use crate::{BaselineStats, ChannelBaseline, Post, ViralMetrics};

/// Stands in for an infinite multiplier when the baseline median is zero
/// but the post has engagement.
pub const MEDIAN_MULTIPLIER_UNBOUNDED: f64 = f64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnscoredReason {
    MissingBaseline,
    BaselineTraining { posts_analyzed: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// No ready baseline. The post stays unscored; this is not an error.
    Unscored {
        engagement_rate: f64,
        reason: UnscoredReason,
    },
    Scored(ViralMetrics),
}

impl Classification {
    pub fn engagement_rate(&self) -> f64 {
        match self {
            Classification::Unscored { engagement_rate, .. } => *engagement_rate,
            Classification::Scored(metrics) => metrics.engagement_rate,
        }
    }

    pub fn metrics(&self) -> Option<&ViralMetrics> {
        match self {
            Classification::Scored(metrics) => Some(metrics),
            Classification::Unscored { .. } => None,
        }
    }
}

/// Scores one post against its channel baseline.
#[derive(Debug, Clone)]
pub struct ViralClassifier {
    calculator: EngagementRateCalculator,
    thresholds: ViralThresholds,
    score: ViralScoreConfig,
    min_views: i64,
}

impl ViralClassifier {
    pub fn new(
        weights: ViralWeights,
        thresholds: ViralThresholds,
        score: ViralScoreConfig,
        min_views_for_viral: i64,
    ) -> Result<Self, EngineError> {
        validate_score_weights(&score)?;
        validate_thresholds(&thresholds)?;
        Ok(Self {
            calculator: EngagementRateCalculator::new(weights)?,
            thresholds,
            score,
            min_views: min_views_for_viral,
        })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        Self::new(
            config.weights.clone(),
            config.thresholds.clone(),
            config.score.clone(),
            config.calc.min_views_for_viral,
        )
    }

    pub fn calculator(&self) -> &EngagementRateCalculator {
        &self.calculator
    }

    /// Batch mode: a missing or training baseline yields [`Classification::Unscored`].
    pub fn classify(
        &self,
        post: &Post,
        baseline: Option<&ChannelBaseline>,
        now: DateTime<Utc>,
    ) -> Result<Classification, EngineError> {
        let engagement_rate = self.calculator.rate(&post.metrics())?;

        let Some(baseline) = baseline else {
            return Ok(Classification::Unscored {
                engagement_rate,
                reason: UnscoredReason::MissingBaseline,
            });
        };
        if baseline.channel_id != post.channel_id {
            return Err(EngineError::InvalidInput(format!(
                "post {} belongs to channel {}, baseline is for channel {}",
                post.id, post.channel_id, baseline.channel_id
            )));
        }
        let Some(stats) = baseline.stats.as_ref().filter(|_| baseline.is_ready()) else {
            return Ok(Classification::Unscored {
                engagement_rate,
                reason: UnscoredReason::BaselineTraining {
                    posts_analyzed: baseline.posts_analyzed,
                },
            });
        };

        let zscore = zscore(engagement_rate, stats);
        let median_multiplier = median_multiplier(engagement_rate, stats.median_engagement_rate);
        let views_percentile = views_percentile(post.views, &baseline.view_distribution);
        let viral_score = self.viral_score(zscore, median_multiplier, views_percentile);
        let is_viral = post.views >= self.min_views
            && self.passes_thresholds(viral_score, zscore, median_multiplier, views_percentile);

        Ok(Classification::Scored(ViralMetrics {
            engagement_rate,
            viral_score,
            zscore,
            median_multiplier,
            views_percentile,
            is_viral,
            scored_at: now,
            baseline_computed_at: baseline.computed_at,
        }))
    }

    /// Hard mode: the caller needs a definitive answer, so a missing or
    /// training baseline is an error.
    pub fn classify_strict(
        &self,
        post: &Post,
        baseline: Option<&ChannelBaseline>,
        now: DateTime<Utc>,
    ) -> Result<ViralMetrics, EngineError> {
        match self.classify(post, baseline, now)? {
            Classification::Scored(metrics) => Ok(metrics),
            Classification::Unscored { reason, .. } => Err(EngineError::BaselineNotReady {
                channel: post.channel_id,
                posts_analyzed: match reason {
                    UnscoredReason::MissingBaseline => 0,
                    UnscoredReason::BaselineTraining { posts_analyzed } => posts_analyzed,
                },
            }),
        }
    }

    pub fn viral_score(&self, zscore: f64, median_multiplier: f64, views_percentile: f64) -> f64 {
        let mut score = 0.0;
        score += zscore.max(0.0) * self.score.zscore_weight;
        score += median_multiplier.max(0.0).ln_1p() * self.score.multiplier_weight;
        score += views_percentile.clamp(0.0, 1.0) * self.score.percentile_weight;
        score
    }

    pub fn passes_thresholds(
        &self,
        viral_score: f64,
        zscore: f64,
        median_multiplier: f64,
        views_percentile: f64,
    ) -> bool {
        let checks = [
            viral_score >= self.thresholds.min_viral_score,
            zscore >= self.thresholds.min_zscore,
            median_multiplier >= self.thresholds.min_median_multiplier,
            views_percentile >= self.thresholds.min_views_percentile,
        ];
        match self.thresholds.composition {
            ThresholdComposition::All => checks.iter().all(|passed| *passed),
            ThresholdComposition::Any => checks.iter().any(|passed| *passed),
        }
    }
}

/// Negative or NaN weights would break the monotonicity of `viral_score`.
fn validate_score_weights(score: &ViralScoreConfig) -> Result<(), EngineError> {
    let named = [
        ("zscore_weight", score.zscore_weight),
        ("multiplier_weight", score.multiplier_weight),
        ("percentile_weight", score.percentile_weight),
    ];
    for (name, value) in named {
        if !value.is_finite() || value < 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "{} must be a non-negative number, got {}",
                name, value
            )));
        }
    }
    Ok(())
}

fn validate_thresholds(thresholds: &ViralThresholds) -> Result<(), EngineError> {
    let named = [
        ("min_viral_score", thresholds.min_viral_score),
        ("min_zscore", thresholds.min_zscore),
        ("min_median_multiplier", thresholds.min_median_multiplier),
    ];
    for (name, value) in named {
        if !value.is_finite() {
            return Err(EngineError::InvalidInput(format!(
                "threshold {} must be finite, got {}",
                name, value
            )));
        }
    }
    if !(0.0..=1.0).contains(&thresholds.min_views_percentile) {
        return Err(EngineError::InvalidInput(format!(
            "min_views_percentile must be in [0, 1], got {}",
            thresholds.min_views_percentile
        )));
    }
    Ok(())
}

pub fn zscore(engagement_rate: f64, stats: &BaselineStats) -> f64 {
    if stats.stddev_engagement_rate > 0.0 {
        (engagement_rate - stats.avg_engagement_rate) / stats.stddev_engagement_rate
    } else {
        0.0
    }
}

pub fn median_multiplier(engagement_rate: f64, median: f64) -> f64 {
    if median > 0.0 {
        engagement_rate / median
    } else if engagement_rate > 0.0 {
        MEDIAN_MULTIPLIER_UNBOUNDED
    } else {
        0.0
    }
}

/// Share of the baseline window's posts with at most `views` views.
pub fn views_percentile(views: i64, sorted_views: &[i64]) -> f64 {
    if sorted_views.is_empty() {
        return 0.0;
    }
    let at_or_below = sorted_views.partition_point(|value| *value <= views);
    at_or_below as f64 / sorted_views.len() as f64
}
