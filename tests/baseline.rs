use chrono::{DateTime, Duration, Utc};

use channel_virality::config::{BaselineConfig, ViralWeights};
use channel_virality::scoring::baseline::{percentile_sorted, sample_stddev, trim_outliers};
use channel_virality::scoring::BaselineEstimator;
use channel_virality::{BaselineStatus, ChannelId, EngineError, Post, PostMetrics};

fn post(id: i64, channel_id: ChannelId, views: i64, forwards: i64, date: DateTime<Utc>) -> Post {
    let metrics = PostMetrics {
        views,
        forwards,
        reactions: 0,
        replies: 0,
    };
    Post::new(id, channel_id, metrics, date)
}

fn estimator(config: BaselineConfig) -> BaselineEstimator {
    BaselineEstimator::new(ViralWeights::default(), config, 100).unwrap()
}

#[test]
fn enough_eligible_posts_make_a_ready_baseline() {
    let now = Utc::now();
    let posts: Vec<Post> = (0..15)
        .map(|idx| post(idx, 7, 1000, 10 + idx, now - Duration::days(idx + 1)))
        .collect();

    let baseline = estimator(BaselineConfig::default())
        .estimate(7, &posts, now);

    assert_eq!(baseline.status, BaselineStatus::Ready);
    assert_eq!(baseline.posts_analyzed, 15);
    assert!(baseline.is_ready());
    assert_eq!(baseline.view_distribution.len(), 15);
}

#[test]
fn too_few_posts_stay_in_training() {
    let now = Utc::now();
    let posts: Vec<Post> = (0..9)
        .map(|idx| post(idx, 7, 1000, 10, now - Duration::days(idx + 1)))
        .collect();

    let baseline = estimator(BaselineConfig::default())
        .estimate(7, &posts, now);

    assert_eq!(baseline.status, BaselineStatus::Training);
    assert_eq!(baseline.posts_analyzed, 9);
    assert!(baseline.stats.is_none());
    assert!(!baseline.is_ready());
}

#[test]
fn old_low_view_and_foreign_posts_are_not_counted() {
    let now = Utc::now();
    let mut posts: Vec<Post> = (0..10)
        .map(|idx| post(idx, 7, 1000, 10, now - Duration::days(idx + 1)))
        .collect();
    posts.push(post(100, 7, 1000, 10, now - Duration::days(45)));
    posts.push(post(101, 7, 50, 10, now - Duration::days(2)));
    posts.push(post(102, 8, 1000, 10, now - Duration::days(2)));

    let baseline = estimator(BaselineConfig::default())
        .estimate(7, &posts, now);

    assert_eq!(baseline.posts_analyzed, 10);
    assert_eq!(baseline.status, BaselineStatus::Ready);
}

#[test]
fn statistics_follow_the_rates() {
    let now = Utc::now();
    let posts: Vec<Post> = (1..=10)
        .map(|k| post(k, 3, 1000, k, now - Duration::hours(k)))
        .collect();
    let config = BaselineConfig {
        outlier_removal_percentile: 100.0,
        ..BaselineConfig::default()
    };

    let baseline = estimator(config).estimate(3, &posts, now);
    let stats = baseline.stats.unwrap();

    assert_eq!(stats.posts_used, 10);
    assert!((stats.avg_engagement_rate - 0.00275).abs() < 1e-9);
    assert!((stats.median_engagement_rate - 0.00275).abs() < 1e-9);
    assert!((stats.p75_engagement_rate - 0.003875).abs() < 1e-9);
    assert!((stats.stddev_engagement_rate - 0.0015138).abs() < 1e-6);
}

#[test]
fn outlier_trimming_drops_the_top_tail() {
    let sorted: Vec<f64> = (1..=20).map(|value| value as f64).collect();

    let kept = trim_outliers(&sorted, 95.0);
    assert_eq!(kept.len(), 19);
    assert_eq!(kept.last().copied(), Some(19.0));

    assert_eq!(trim_outliers(&sorted, 100.0).len(), 20);
    assert_eq!(trim_outliers(&[5.0], 50.0).len(), 1);
}

#[test]
fn percentile_interpolates_linearly() {
    let sorted = [1.0, 2.0, 3.0, 4.0];
    assert!((percentile_sorted(&sorted, 0.5) - 2.5).abs() < 1e-9);
    assert!((percentile_sorted(&sorted, 0.0) - 1.0).abs() < 1e-9);
    assert!((percentile_sorted(&sorted, 1.0) - 4.0).abs() < 1e-9);
    assert_eq!(percentile_sorted(&[], 0.5), 0.0);
}

#[test]
fn sample_stddev_uses_n_minus_one() {
    let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
    let stddev = sample_stddev(&values, 5.0);
    assert!((stddev - (32.0f64 / 7.0).sqrt()).abs() < 1e-9);
    assert_eq!(sample_stddev(&[3.0], 3.0), 0.0);
}

#[test]
fn estimate_is_deterministic() {
    let now = Utc::now();
    let posts: Vec<Post> = (0..25)
        .map(|idx| post(idx, 1, 500 + idx * 37, (idx * 7) % 13, now - Duration::hours(idx * 5 + 1)))
        .collect();
    let estimator = estimator(BaselineConfig::default());

    let first = estimator.estimate(1, &posts, now);
    let mut reversed = posts.clone();
    reversed.reverse();
    let second = estimator.estimate(1, &reversed, now);

    assert_eq!(first, second);
}

#[test]
fn negative_counters_are_left_out_of_the_baseline() {
    let now = Utc::now();
    let mut posts: Vec<Post> = (0..12)
        .map(|idx| post(idx, 7, 1000, 10 + idx, now - Duration::days(idx + 1)))
        .collect();
    posts.push(post(500, 7, 1000, -4, now - Duration::days(3)));

    let baseline = estimator(BaselineConfig::default()).estimate(7, &posts, now);

    assert_eq!(baseline.status, BaselineStatus::Ready);
    assert_eq!(baseline.posts_analyzed, 12);
    assert_eq!(baseline.posts_rejected, 1);
    assert_eq!(baseline.view_distribution.len(), 12);
    assert_eq!(baseline.stats.unwrap().posts_used, 11);
}

#[test]
fn rejected_posts_do_not_count_towards_readiness() {
    let now = Utc::now();
    let mut posts: Vec<Post> = (0..9)
        .map(|idx| post(idx, 7, 1000, 10, now - Duration::days(idx + 1)))
        .collect();
    posts.push(post(500, 7, 1000, -1, now - Duration::days(2)));

    let baseline = estimator(BaselineConfig::default()).estimate(7, &posts, now);

    assert_eq!(baseline.status, BaselineStatus::Training);
    assert_eq!(baseline.posts_analyzed, 9);
    assert_eq!(baseline.posts_rejected, 1);
}

#[test]
fn estimator_rejects_unusable_settings() {
    let config = BaselineConfig {
        min_posts_for_baseline: 0,
        ..BaselineConfig::default()
    };
    assert!(matches!(
        BaselineEstimator::new(ViralWeights::default(), config, 100),
        Err(EngineError::InvalidInput(_))
    ));

    let config = BaselineConfig {
        outlier_removal_percentile: 120.0,
        ..BaselineConfig::default()
    };
    assert!(BaselineEstimator::new(ViralWeights::default(), config, 100).is_err());
}
