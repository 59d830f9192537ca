use chrono::{Duration, Utc};

use channel_virality::config::{
    ThresholdComposition, ViralScoreConfig, ViralThresholds, ViralWeights,
};
use channel_virality::scoring::classifier::{median_multiplier, views_percentile};
use channel_virality::scoring::{
    Classification, UnscoredReason, ViralClassifier, MEDIAN_MULTIPLIER_UNBOUNDED,
};
use channel_virality::{BaselineStats, ChannelBaseline, EngineError, Post, PostMetrics};

fn classifier(composition: ThresholdComposition) -> ViralClassifier {
    let thresholds = ViralThresholds {
        composition,
        ..ViralThresholds::default()
    };
    ViralClassifier::new(
        ViralWeights::default(),
        thresholds,
        ViralScoreConfig::default(),
        100,
    )
    .unwrap()
}

fn ready_baseline(channel_id: i64) -> ChannelBaseline {
    let stats = BaselineStats {
        avg_engagement_rate: 0.02,
        median_engagement_rate: 0.018,
        p75_engagement_rate: 0.025,
        stddev_engagement_rate: 0.01,
        posts_used: 10,
    };
    let views = (5..15).map(|hundreds| hundreds * 100).collect();
    ChannelBaseline::ready(channel_id, 10, stats, views, Utc::now() - Duration::hours(1))
}

/// Only forwards count, so `rate = 0.5 * forwards / views`.
fn post_with_rate(id: i64, channel_id: i64, views: i64, forwards: i64) -> Post {
    let metrics = PostMetrics {
        views,
        forwards,
        reactions: 0,
        replies: 0,
    };
    Post::new(id, channel_id, metrics, Utc::now() - Duration::hours(2))
}

#[test]
fn zscore_and_median_multiplier_against_ready_baseline() {
    let baseline = ready_baseline(1);
    let post = post_with_rate(10, 1, 1000, 100);

    let result = classifier(ThresholdComposition::All)
        .classify(&post, Some(&baseline), Utc::now())
        .unwrap();
    let metrics = result.metrics().unwrap();

    assert!((metrics.engagement_rate - 0.05).abs() < 1e-9);
    assert!((metrics.zscore - 3.0).abs() < 1e-6);
    assert!((metrics.median_multiplier - 2.7778).abs() < 1e-3);
    assert!((metrics.views_percentile - 0.6).abs() < 1e-9);
    assert!(metrics.is_viral);
    assert_eq!(metrics.baseline_computed_at, baseline.computed_at);

    let expected = 3.0 + (1.0f64 + 0.05 / 0.018).ln() + 0.5 * 0.6;
    assert!((metrics.viral_score - expected).abs() < 1e-6);
}

#[test]
fn posts_below_min_views_are_scored_but_never_viral() {
    let baseline = ready_baseline(1);
    let post = post_with_rate(11, 1, 50, 5);

    let result = classifier(ThresholdComposition::Any)
        .classify(&post, Some(&baseline), Utc::now())
        .unwrap();
    let metrics = result.metrics().unwrap();

    assert!(metrics.zscore > 2.0);
    assert!(!metrics.is_viral);
}

#[test]
fn average_post_is_not_viral() {
    let baseline = ready_baseline(1);
    let post = post_with_rate(12, 1, 1000, 40);

    let metrics = classifier(ThresholdComposition::All)
        .classify_strict(&post, Some(&baseline), Utc::now())
        .unwrap();

    assert!(metrics.zscore.abs() < 1e-6);
    assert!(!metrics.is_viral);
}

#[test]
fn any_composition_needs_a_single_signal() {
    let mut baseline = ready_baseline(1);
    baseline.view_distribution = vec![5_000, 6_000, 7_000];
    let post = post_with_rate(13, 1, 1000, 100);

    let all = classifier(ThresholdComposition::All)
        .classify(&post, Some(&baseline), Utc::now())
        .unwrap();
    let any = classifier(ThresholdComposition::Any)
        .classify(&post, Some(&baseline), Utc::now())
        .unwrap();

    assert_eq!(all.metrics().unwrap().views_percentile, 0.0);
    assert!(!all.metrics().unwrap().is_viral);
    assert!(any.metrics().unwrap().is_viral);
}

#[test]
fn missing_or_training_baseline_leaves_post_unscored() {
    let post = post_with_rate(14, 1, 1000, 100);
    let classifier = classifier(ThresholdComposition::All);

    let missing = classifier.classify(&post, None, Utc::now()).unwrap();
    assert!(matches!(
        missing,
        Classification::Unscored {
            reason: UnscoredReason::MissingBaseline,
            ..
        }
    ));
    assert!((missing.engagement_rate() - 0.05).abs() < 1e-9);

    let training = ChannelBaseline::training(1, 4, Utc::now());
    let result = classifier.classify(&post, Some(&training), Utc::now()).unwrap();
    assert_eq!(
        result,
        Classification::Unscored {
            engagement_rate: result.engagement_rate(),
            reason: UnscoredReason::BaselineTraining { posts_analyzed: 4 },
        }
    );
}

#[test]
fn strict_mode_reports_baseline_not_ready() {
    let post = post_with_rate(15, 9, 1000, 100);
    let classifier = classifier(ThresholdComposition::All);

    let training = ChannelBaseline::training(9, 6, Utc::now());
    match classifier.classify_strict(&post, Some(&training), Utc::now()) {
        Err(EngineError::BaselineNotReady {
            channel,
            posts_analyzed,
        }) => {
            assert_eq!(channel, 9);
            assert_eq!(posts_analyzed, 6);
        }
        other => panic!("expected BaselineNotReady, got {:?}", other),
    }

    match classifier.classify_strict(&post, None, Utc::now()) {
        Err(EngineError::BaselineNotReady { posts_analyzed, .. }) => assert_eq!(posts_analyzed, 0),
        other => panic!("expected BaselineNotReady, got {:?}", other),
    }
}

#[test]
fn ready_baseline_never_reports_not_ready() {
    let baseline = ready_baseline(2);
    let classifier = classifier(ThresholdComposition::All);
    for forwards in [0, 1, 10, 50, 500] {
        let post = post_with_rate(forwards, 2, 1000, forwards);
        assert!(classifier
            .classify_strict(&post, Some(&baseline), Utc::now())
            .is_ok());
    }
}

#[test]
fn baseline_from_another_channel_is_invalid() {
    let baseline = ready_baseline(2);
    let post = post_with_rate(16, 3, 1000, 100);
    let err = classifier(ThresholdComposition::All)
        .classify(&post, Some(&baseline), Utc::now())
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
}

#[test]
fn median_multiplier_is_monotonic_and_handles_zero_median() {
    let rates = [0.0, 0.01, 0.02, 0.05, 0.2];
    let multipliers: Vec<f64> = rates.iter().map(|rate| median_multiplier(*rate, 0.018)).collect();
    assert!(multipliers.windows(2).all(|pair| pair[0] <= pair[1]));

    assert_eq!(median_multiplier(0.01, 0.0), MEDIAN_MULTIPLIER_UNBOUNDED);
    assert_eq!(median_multiplier(0.0, 0.0), 0.0);
}

#[test]
fn viral_score_grows_with_each_signal() {
    let classifier = classifier(ThresholdComposition::All);
    let base = classifier.viral_score(1.0, 1.0, 0.5);
    assert!(classifier.viral_score(2.0, 1.0, 0.5) > base);
    assert!(classifier.viral_score(1.0, 2.0, 0.5) > base);
    assert!(classifier.viral_score(1.0, 1.0, 0.9) > base);
    assert_eq!(classifier.viral_score(-4.0, 0.0, 0.0), 0.0);
}

#[test]
fn views_percentile_counts_at_or_below() {
    let sorted = [100, 200, 200, 400];
    assert!((views_percentile(200, &sorted) - 0.75).abs() < 1e-9);
    assert_eq!(views_percentile(50, &sorted), 0.0);
    assert_eq!(views_percentile(1_000, &sorted), 1.0);
    assert_eq!(views_percentile(1_000, &[]), 0.0);
}

#[test]
fn classifier_refuses_non_finite_score_weights() {
    let score = ViralScoreConfig {
        zscore_weight: f64::NAN,
        ..ViralScoreConfig::default()
    };
    let result = ViralClassifier::new(
        ViralWeights::default(),
        ViralThresholds::default(),
        score,
        100,
    );
    assert!(matches!(result, Err(EngineError::InvalidInput(_))));

    let thresholds = ViralThresholds {
        min_median_multiplier: f64::NEG_INFINITY,
        ..ViralThresholds::default()
    };
    let result = ViralClassifier::new(
        ViralWeights::default(),
        thresholds,
        ViralScoreConfig::default(),
        100,
    );
    assert!(result.is_err());
}
