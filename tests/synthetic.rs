use chrono::{Duration, Utc};

use channel_virality::config::BaselineConfig;
use channel_virality::config::ViralWeights;
use channel_virality::scoring::BaselineEstimator;
use channel_virality::synthetic::generate_channel_history;

#[test]
fn history_is_deterministic_per_seed() {
    let now = Utc::now();
    let first = generate_channel_history(4, 400, 30, 42, now);
    let second = generate_channel_history(4, 400, 30, 42, now);
    let other = generate_channel_history(4, 400, 30, 43, now);

    assert_eq!(first, second);
    assert_ne!(first, other);
    assert_eq!(first.len(), 30);
    assert_eq!(first[0].id, 400);
    assert_eq!(first[29].id, 429);
}

#[test]
fn history_fits_the_default_window() {
    let now = Utc::now();
    let posts = generate_channel_history(1, 1, 60, 7, now);
    assert!(posts
        .iter()
        .all(|post| post.date < now && post.date > now - Duration::days(26)));
    assert!(posts.iter().all(|post| post.channel_id == 1 && !post.is_scored()));

    let estimator = BaselineEstimator::new(ViralWeights::default(), BaselineConfig::default(), 100).unwrap();
    let baseline = estimator.estimate(1, &posts, now);
    assert!(baseline.is_ready());
    assert_eq!(baseline.posts_analyzed, 60);
}

#[test]
fn every_fifteenth_post_overperforms() {
    let now = Utc::now();
    let posts = generate_channel_history(2, 1, 60, 11, now);
    assert!(posts.iter().all(|post| post.views > 0 && post.reactions >= 0));

    let rate = |idx: usize| posts[idx].reactions as f64 / posts[idx].views as f64;
    let mut ordinary: Vec<f64> = (0..60).filter(|idx| idx % 15 != 14).map(rate).collect();
    ordinary.sort_by(f64::total_cmp);
    let median = ordinary[ordinary.len() / 2];

    for idx in [14, 29, 44, 59] {
        assert!(rate(idx) > 2.0 * median);
    }
}
