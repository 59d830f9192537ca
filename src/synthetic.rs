use chrono::{DateTime, Duration, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{Channel, ChannelId, Post, PostId, PostMetrics};

/// Every n-th post gets an engagement burst.
const OVERPERFORMER_EVERY: usize = 15;
const HISTORY_SPAN_HOURS: i64 = 24 * 25;

pub fn synthetic_channel(channel_id: ChannelId) -> Channel {
    Channel {
        id: channel_id,
        username: format!("channel_{}", channel_id),
        title: format!("Synthetic channel {}", channel_id),
    }
}

/// Deterministic history for one channel: `count` posts with ids starting at
/// `first_post_id`, spread over the last 25 days before `now`.
pub fn generate_channel_history(
    channel_id: ChannelId,
    first_post_id: PostId,
    count: usize,
    seed: u64,
    now: DateTime<Utc>,
) -> Vec<Post> {
    let mut rng = StdRng::seed_from_u64(seed ^ channel_id as u64);
    let audience: f64 = rng.gen_range(800.0..20_000.0);
    let base_rate: f64 = rng.gen_range(0.01..0.04);
    let spacing = HISTORY_SPAN_HOURS / count.max(1) as i64;

    let mut posts = Vec::with_capacity(count);
    for idx in 0..count {
        let burst = idx % OVERPERFORMER_EVERY == OVERPERFORMER_EVERY - 1;
        let reach: f64 = if burst { 1.5 } else { 1.0 };
        let views = (audience * reach * rng.gen_range(0.6..1.4)).round() as i64;
        let boost: f64 = if burst { rng.gen_range(4.0..6.0) } else { 1.0 };
        let rate = base_rate * rng.gen_range(0.7..1.3) * boost;
        let interactions = views as f64 * rate;

        let metrics = PostMetrics {
            views,
            forwards: (interactions * 0.3).round() as i64,
            reactions: (interactions * 1.8).round() as i64,
            replies: (interactions * 0.2).round() as i64,
        };
        let age = Duration::hours(spacing * idx as i64 + 1);
        posts.push(Post::new(first_post_id + idx as i64, channel_id, metrics, now - age));
    }

    posts
}
