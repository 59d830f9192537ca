use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::EngineError;
use crate::scoring::{BaselineEstimator, ViralClassifier};

/// Coefficients applied to forwards, reactions and replies. Need not sum to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViralWeights {
    pub forward_rate: f64,
    pub reaction_rate: f64,
    pub reply_rate: f64,
}

impl Default for ViralWeights {
    fn default() -> Self {
        Self {
            forward_rate: 0.5,
            reaction_rate: 0.3,
            reply_rate: 0.2,
        }
    }
}

/// How the four threshold checks combine into `is_viral`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdComposition {
    #[default]
    All,
    Any,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViralThresholds {
    pub min_viral_score: f64,
    pub min_zscore: f64,
    pub min_median_multiplier: f64,
    pub min_views_percentile: f64,
    pub composition: ThresholdComposition,
}

impl Default for ViralThresholds {
    fn default() -> Self {
        Self {
            min_viral_score: 2.0,
            min_zscore: 2.0,
            min_median_multiplier: 2.0,
            min_views_percentile: 0.5,
            composition: ThresholdComposition::All,
        }
    }
}

/// Weights of the composite viral score:
/// `zscore_weight * max(0, z) + multiplier_weight * ln(1 + m) + percentile_weight * p`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViralScoreConfig {
    pub zscore_weight: f64,
    pub multiplier_weight: f64,
    pub percentile_weight: f64,
}

impl Default for ViralScoreConfig {
    fn default() -> Self {
        Self {
            zscore_weight: 1.0,
            multiplier_weight: 1.0,
            percentile_weight: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    pub history_days: u32,
    pub min_posts_for_baseline: usize,
    /// Share of the sorted rates kept for statistics; 95 drops the top 5%.
    pub outlier_removal_percentile: f64,
    pub update_interval_hours: u32,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            history_days: 30,
            min_posts_for_baseline: 10,
            outlier_removal_percentile: 95.0,
            update_interval_hours: 24,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViralCalcConfig {
    pub auto_calculate: bool,
    pub batch_size: usize,
    pub update_existing: bool,
    pub min_views_for_viral: i64,
}

impl Default for ViralCalcConfig {
    fn default() -> Self {
        Self {
            auto_calculate: true,
            batch_size: 100,
            update_existing: false,
            min_views_for_viral: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub max_concurrent_channels: usize,
    pub scheduler_interval_secs: u64,
    /// Finished jobs kept for status queries; older ones are dropped.
    pub retained_jobs: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_channels: 4,
            scheduler_interval_secs: 900,
            retained_jobs: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/store.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub weights: ViralWeights,
    pub thresholds: ViralThresholds,
    pub score: ViralScoreConfig,
    pub baseline: BaselineConfig,
    pub calc: ViralCalcConfig,
    pub coordinator: CoordinatorConfig,
    pub store: StoreConfig,
}

impl EngineConfig {
    pub fn load(path: Option<PathBuf>) -> Result<(Self, Option<PathBuf>), EngineError> {
        let config_path = path.or_else(default_config_path);
        let mut config = if let Some(path) = config_path.as_ref() {
            if path.exists() {
                let contents = std::fs::read_to_string(path)
                    .map_err(|err| EngineError::Config(format!("failed to read config: {}", err)))?;
                toml::from_str(&contents)
                    .map_err(|err| EngineError::Config(format!("failed to parse config: {}", err)))?
            } else {
                EngineConfig::default()
            }
        } else {
            EngineConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok((config, config_path))
    }

    pub fn write(&self, path: &Path) -> Result<(), EngineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| EngineError::Config(format!("failed to create config dir: {}", err)))?;
        }
        let payload = toml::to_string_pretty(self)
            .map_err(|err| EngineError::Config(format!("failed to serialize config: {}", err)))?;
        std::fs::write(path, payload)
            .map_err(|err| EngineError::Config(format!("failed to write config: {}", err)))?;
        Ok(())
    }

    /// Scorer-specific rules are checked by the scorer constructors.
    pub fn validate(&self) -> Result<(), EngineError> {
        ViralClassifier::from_config(self)?;
        BaselineEstimator::new(
            self.weights.clone(),
            self.baseline.clone(),
            self.calc.min_views_for_viral,
        )?;

        if self.calc.batch_size == 0 {
            return Err(EngineError::InvalidInput("batch_size must be positive".to_string()));
        }
        if self.coordinator.max_concurrent_channels == 0 {
            return Err(EngineError::InvalidInput(
                "max_concurrent_channels must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Some(value) = env_parse::<u32>("VIRAL_HISTORY_DAYS") {
            self.baseline.history_days = value;
        }
        if let Some(value) = env_parse::<usize>("VIRAL_MIN_POSTS") {
            self.baseline.min_posts_for_baseline = value;
        }
        if let Some(value) = env_parse::<usize>("VIRAL_BATCH_SIZE") {
            self.calc.batch_size = value;
        }
        if let Some(value) = env_parse::<i64>("VIRAL_MIN_VIEWS") {
            self.calc.min_views_for_viral = value;
        }
        if let Some(value) = env_parse::<usize>("VIRAL_WORKERS") {
            self.coordinator.max_concurrent_channels = value;
        }
        if let Ok(path) = env::var("VIRAL_STORE_PATH") {
            if !path.trim().is_empty() {
                self.store.path = PathBuf::from(path);
            }
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|value| value.trim().parse::<T>().ok())
}

fn default_config_path() -> Option<PathBuf> {
    env::var("ENGINE_CONFIG_PATH")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
        .or_else(|| Some(PathBuf::from("config/engine.toml")))
}
