use crate::config::ViralWeights;
use crate::error::EngineError;
use crate::PostMetrics;

/// Turns raw counters into a single weighted engagement rate:
/// `(forwards * forward_rate + reactions * reaction_rate + replies * reply_rate) / max(views, 1)`.
#[derive(Debug, Clone)]
pub struct EngagementRateCalculator {
    weights: ViralWeights,
}

impl EngagementRateCalculator {
    pub fn new(weights: ViralWeights) -> Result<Self, EngineError> {
        validate_weights(&weights)?;
        Ok(Self { weights })
    }

    pub fn weights(&self) -> &ViralWeights {
        &self.weights
    }

    pub fn rate(&self, metrics: &PostMetrics) -> Result<f64, EngineError> {
        validate_metrics(metrics)?;

        if metrics.views == 0 {
            return Ok(0.0);
        }

        let mut weighted = 0.0;
        weighted += metrics.forwards as f64 * self.weights.forward_rate;
        weighted += metrics.reactions as f64 * self.weights.reaction_rate;
        weighted += metrics.replies as f64 * self.weights.reply_rate;

        Ok(weighted / metrics.views.max(1) as f64)
    }
}

/// One-shot form of [`EngagementRateCalculator::rate`].
pub fn engagement_rate(metrics: &PostMetrics, weights: &ViralWeights) -> Result<f64, EngineError> {
    EngagementRateCalculator::new(weights.clone())?.rate(metrics)
}

fn validate_weights(weights: &ViralWeights) -> Result<(), EngineError> {
    let named = [
        ("forward_rate", weights.forward_rate),
        ("reaction_rate", weights.reaction_rate),
        ("reply_rate", weights.reply_rate),
    ];
    for (name, value) in named {
        if !value.is_finite() || value < 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "weight {} must be a non-negative number, got {}",
                name, value
            )));
        }
    }
    Ok(())
}

/// Rejects negative counters.
pub fn validate_metrics(metrics: &PostMetrics) -> Result<(), EngineError> {
    let named = [
        ("views", metrics.views),
        ("forwards", metrics.forwards),
        ("reactions", metrics.reactions),
        ("replies", metrics.replies),
    ];
    for (name, value) in named {
        if value < 0 {
            return Err(EngineError::InvalidInput(format!(
                "{} must not be negative, got {}",
                name, value
            )));
        }
    }
    Ok(())
}
