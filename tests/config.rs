use channel_virality::config::{EngineConfig, ThresholdComposition};
use channel_virality::EngineError;

#[test]
fn partial_file_keeps_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.toml");
    std::fs::write(
        &path,
        "[thresholds]\ncomposition = \"any\"\n\n[baseline]\nhistory_days = 14\n",
    )
    .unwrap();

    let (config, loaded_from) = EngineConfig::load(Some(path.clone())).unwrap();

    assert_eq!(loaded_from, Some(path));
    assert_eq!(config.thresholds.composition, ThresholdComposition::Any);
    assert_eq!(config.baseline.history_days, 14);
    assert_eq!(config.baseline.min_posts_for_baseline, 10);
    assert!((config.weights.forward_rate - 0.5).abs() < 1e-6);
}

#[test]
fn missing_file_means_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let (config, _) = EngineConfig::load(Some(dir.path().join("absent.toml"))).unwrap();
    assert_eq!(config.thresholds, EngineConfig::default().thresholds);
    assert_eq!(config.score, EngineConfig::default().score);
}

#[test]
fn written_config_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("engine.toml");
    let mut config = EngineConfig::default();
    config.calc.update_existing = true;
    config.score.percentile_weight = 0.25;

    config.write(&path).unwrap();
    let (loaded, _) = EngineConfig::load(Some(path)).unwrap();

    assert!(loaded.calc.update_existing);
    assert!((loaded.score.percentile_weight - 0.25).abs() < 1e-6);
}

#[test]
fn invalid_values_are_rejected() {
    let mut config = EngineConfig::default();
    config.weights.reply_rate = -1.0;
    assert!(matches!(config.validate(), Err(EngineError::InvalidInput(_))));

    let mut config = EngineConfig::default();
    config.baseline.outlier_removal_percentile = 0.0;
    assert!(config.validate().is_err());

    let mut config = EngineConfig::default();
    config.thresholds.min_views_percentile = 1.5;
    assert!(config.validate().is_err());

    let mut config = EngineConfig::default();
    config.coordinator.max_concurrent_channels = 0;
    assert!(config.validate().is_err());
}

#[test]
fn score_weights_and_thresholds_must_be_finite() {
    let mut config = EngineConfig::default();
    config.score.zscore_weight = -1.0;
    assert!(matches!(config.validate(), Err(EngineError::InvalidInput(_))));

    let mut config = EngineConfig::default();
    config.score.percentile_weight = f64::NAN;
    assert!(config.validate().is_err());

    let mut config = EngineConfig::default();
    config.score.multiplier_weight = f64::INFINITY;
    assert!(config.validate().is_err());

    let mut config = EngineConfig::default();
    config.thresholds.min_zscore = f64::INFINITY;
    assert!(config.validate().is_err());

    let mut config = EngineConfig::default();
    config.thresholds.min_viral_score = f64::NAN;
    assert!(config.validate().is_err());

    let mut config = EngineConfig::default();
    config.thresholds.min_views_percentile = f64::NAN;
    assert!(config.validate().is_err());

    let mut config = EngineConfig::default();
    config.baseline.min_posts_for_baseline = 0;
    assert!(config.validate().is_err());
}

#[test]
fn zero_score_weights_are_allowed() {
    let mut config = EngineConfig::default();
    config.score.multiplier_weight = 0.0;
    config.thresholds.min_zscore = -2.0;
    assert!(config.validate().is_ok());
}

#[test]
fn unparsable_file_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.toml");
    std::fs::write(&path, "[baseline\nhistory_days = ").unwrap();
    assert!(matches!(
        EngineConfig::load(Some(path)),
        Err(EngineError::Config(_))
    ));
}
