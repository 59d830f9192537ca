use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{io_failure, EngineError};
use crate::jobs::ChannelProgress;
use crate::{Channel, ChannelBaseline, ChannelId, Post, PostId, ViralMetrics};

/// Resume point of a whole-table scoring run, written after every sub-batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreCheckpoint {
    pub last_post_id: PostId,
    pub processed_posts: usize,
    pub total_posts: usize,
    pub channels: Vec<ChannelProgress>,
    pub updated_at: DateTime<Utc>,
}

/// Engine-owned fields to write back onto one post.
#[derive(Debug, Clone, PartialEq)]
pub struct PostUpdate {
    pub post_id: PostId,
    pub engagement_rate: f64,
    /// `None` leaves any earlier classification in place.
    pub viral: Option<ViralMetrics>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreState {
    #[serde(default)]
    channels: BTreeMap<ChannelId, Channel>,
    #[serde(default)]
    posts: BTreeMap<PostId, Post>,
    #[serde(default)]
    baselines: BTreeMap<ChannelId, Arc<ChannelBaseline>>,
    #[serde(default)]
    checkpoints: BTreeMap<String, ScoreCheckpoint>,
}

/// Channels, posts, baselines and job checkpoints.
///
/// Held in memory and persisted as one JSON document via temp file + rename.
/// Baselines are shared as `Arc`s and swapped whole under the write lock, so
/// a reader holds either the old row or the new one. A mutation whose
/// persist fails is rolled back before the error is returned.
pub struct Store {
    path: Option<PathBuf>,
    state: RwLock<StoreState>,
}

impl Store {
    pub async fn open(path: PathBuf) -> Result<Self, EngineError> {
        let state = if path.exists() {
            let data = tokio::fs::read_to_string(&path)
                .await
                .map_err(|err| io_failure("failed to read store", err))?;
            if data.trim().is_empty() {
                StoreState::default()
            } else {
                serde_json::from_str(&data).map_err(|err| io_failure("failed to parse store", err))?
            }
        } else {
            StoreState::default()
        };

        Ok(Self {
            path: Some(path),
            state: RwLock::new(state),
        })
    }

    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: RwLock::new(StoreState::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn channels(&self) -> Vec<Channel> {
        let guard = self.state.read().await;
        guard.channels.values().cloned().collect()
    }

    pub async fn channel(&self, channel_id: ChannelId) -> Option<Channel> {
        let guard = self.state.read().await;
        guard.channels.get(&channel_id).cloned()
    }

    /// Ingestion write path. Raw counters are replaced, engine-owned fields are
    /// kept, and `collected_at` moves only when the counters actually changed.
    pub async fn ingest(
        &self,
        channel: Channel,
        posts: Vec<Post>,
        now: DateTime<Utc>,
    ) -> Result<Vec<PostId>, EngineError> {
        let mut guard = self.state.write().await;
        let previous_channel = guard.channels.insert(channel.id, channel.clone());
        let mut previous_posts = Vec::with_capacity(posts.len());
        let mut ids = Vec::with_capacity(posts.len());

        for mut post in posts {
            post.channel_id = channel.id;
            let existing = guard.posts.get(&post.id).cloned();
            match existing.as_ref() {
                Some(old) => {
                    post.engagement_rate = old.engagement_rate;
                    post.viral = old.viral.clone();
                    post.collected_at = if old.metrics() == post.metrics() {
                        old.collected_at
                    } else {
                        now
                    };
                }
                None => {
                    post.engagement_rate = None;
                    post.viral = None;
                    post.collected_at = now;
                }
            }
            ids.push(post.id);
            previous_posts.push((post.id, existing));
            guard.posts.insert(post.id, post);
        }

        if let Err(err) = self.persist(&guard).await {
            match previous_channel {
                Some(old) => guard.channels.insert(channel.id, old),
                None => guard.channels.remove(&channel.id),
            };
            for (id, old) in previous_posts.into_iter().rev() {
                match old {
                    Some(old) => guard.posts.insert(id, old),
                    None => guard.posts.remove(&id),
                };
            }
            return Err(err);
        }
        Ok(ids)
    }

    pub async fn post(&self, post_id: PostId) -> Option<Post> {
        let guard = self.state.read().await;
        guard.posts.get(&post_id).cloned()
    }

    pub async fn posts_by_ids(&self, ids: &[PostId]) -> Vec<Post> {
        let guard = self.state.read().await;
        ids.iter().filter_map(|id| guard.posts.get(id).cloned()).collect()
    }

    pub async fn post_count(&self) -> usize {
        let guard = self.state.read().await;
        guard.posts.len()
    }

    /// Posts of one channel dated within `[since, until]`.
    pub async fn channel_posts_between(
        &self,
        channel_id: ChannelId,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Vec<Post> {
        let guard = self.state.read().await;
        guard
            .posts
            .values()
            .filter(|post| post.channel_id == channel_id && post.date >= since && post.date <= until)
            .cloned()
            .collect()
    }

    /// Next page of posts in id order, strictly after `after`.
    pub async fn posts_after(&self, after: Option<PostId>, limit: usize) -> Vec<Post> {
        let guard = self.state.read().await;
        let range = match after {
            Some(id) => guard.posts.range((Bound::Excluded(id), Bound::Unbounded)),
            None => guard.posts.range::<PostId, _>(..),
        };
        range.take(limit).map(|(_, post)| post.clone()).collect()
    }

    /// Up to `limit` unscored posts (plus stale-scored ones when
    /// `include_stale`), in id order. Posts whose channel has a ready baseline
    /// come first so a training channel cannot starve the others.
    pub async fn select_for_scoring(
        &self,
        channel: Option<ChannelId>,
        limit: usize,
        include_stale: bool,
    ) -> Vec<Post> {
        let guard = self.state.read().await;
        let mut ready = Vec::new();
        let mut waiting = Vec::new();

        for post in guard.posts.values() {
            if channel.is_some_and(|id| id != post.channel_id) {
                continue;
            }
            let baseline = guard.baselines.get(&post.channel_id).map(Arc::as_ref);
            let wanted = !post.is_scored() || (include_stale && post.is_stale_against(baseline));
            if !wanted {
                continue;
            }
            if baseline.is_some_and(ChannelBaseline::is_ready) {
                ready.push(post);
                if ready.len() >= limit {
                    break;
                }
            } else if waiting.len() < limit {
                waiting.push(post);
            }
        }

        ready
            .into_iter()
            .chain(waiting)
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn apply_updates(&self, updates: Vec<PostUpdate>) -> Result<(), EngineError> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut guard = self.state.write().await;
        let mut previous = Vec::with_capacity(updates.len());

        for update in updates {
            let Some(post) = guard.posts.get_mut(&update.post_id) else {
                continue;
            };
            previous.push((update.post_id, post.engagement_rate, post.viral.clone()));
            post.engagement_rate = Some(update.engagement_rate);
            if let Some(viral) = update.viral {
                post.viral = Some(viral);
            }
        }

        if let Err(err) = self.persist(&guard).await {
            for (id, rate, viral) in previous {
                if let Some(post) = guard.posts.get_mut(&id) {
                    post.engagement_rate = rate;
                    post.viral = viral;
                }
            }
            return Err(err);
        }
        Ok(())
    }

    /// Viral posts with `viral_score >= min_score`, highest score first.
    pub async fn viral_posts(
        &self,
        min_score: f64,
        channel: Option<ChannelId>,
        limit: usize,
    ) -> Vec<Post> {
        let guard = self.state.read().await;
        let mut posts: Vec<&Post> = guard
            .posts
            .values()
            .filter(|post| channel.map_or(true, |id| id == post.channel_id))
            .filter(|post| {
                post.viral
                    .as_ref()
                    .is_some_and(|viral| viral.is_viral && viral.viral_score >= min_score)
            })
            .collect();
        posts.sort_by(|a, b| {
            let a_score = a.viral.as_ref().map_or(0.0, |viral| viral.viral_score);
            let b_score = b.viral.as_ref().map_or(0.0, |viral| viral.viral_score);
            b_score.total_cmp(&a_score).then(a.id.cmp(&b.id))
        });
        posts.into_iter().take(limit).cloned().collect()
    }

    pub async fn baseline(&self, channel_id: ChannelId) -> Option<Arc<ChannelBaseline>> {
        let guard = self.state.read().await;
        guard.baselines.get(&channel_id).cloned()
    }

    pub async fn baselines(&self) -> Vec<Arc<ChannelBaseline>> {
        let guard = self.state.read().await;
        guard.baselines.values().cloned().collect()
    }

    /// Replaces the channel's baseline row as a whole.
    pub async fn put_baseline(
        &self,
        baseline: ChannelBaseline,
    ) -> Result<Arc<ChannelBaseline>, EngineError> {
        let channel_id = baseline.channel_id;
        let baseline = Arc::new(baseline);
        let mut guard = self.state.write().await;
        let previous = guard.baselines.insert(channel_id, baseline.clone());

        if let Err(err) = self.persist(&guard).await {
            match previous {
                Some(old) => guard.baselines.insert(channel_id, old),
                None => guard.baselines.remove(&channel_id),
            };
            return Err(err);
        }
        Ok(baseline)
    }

    pub async fn checkpoint(&self, key: &str) -> Option<ScoreCheckpoint> {
        let guard = self.state.read().await;
        guard.checkpoints.get(key).cloned()
    }

    pub async fn save_checkpoint(
        &self,
        key: &str,
        checkpoint: ScoreCheckpoint,
    ) -> Result<(), EngineError> {
        let mut guard = self.state.write().await;
        let previous = guard.checkpoints.insert(key.to_string(), checkpoint);

        if let Err(err) = self.persist(&guard).await {
            match previous {
                Some(old) => guard.checkpoints.insert(key.to_string(), old),
                None => guard.checkpoints.remove(key),
            };
            return Err(err);
        }
        Ok(())
    }

    pub async fn clear_checkpoint(&self, key: &str) -> Result<(), EngineError> {
        let mut guard = self.state.write().await;
        let Some(previous) = guard.checkpoints.remove(key) else {
            return Ok(());
        };

        if let Err(err) = self.persist(&guard).await {
            guard.checkpoints.insert(key.to_string(), previous);
            return Err(err);
        }
        Ok(())
    }

    async fn persist(&self, state: &StoreState) -> Result<(), EngineError> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            ensure_dir(parent).await?;
        }
        let payload = serde_json::to_string(state)
            .map_err(|err| io_failure("failed to serialize store", err))?;
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, payload)
            .await
            .map_err(|err| io_failure("failed to write store", err))?;
        tokio::fs::rename(&tmp_path, path)
            .await
            .map_err(|err| io_failure("failed to finalize store", err))?;
        debug!(path = %path.display(), "store persisted");
        Ok(())
    }
}

async fn ensure_dir(path: &Path) -> Result<(), EngineError> {
    if path.as_os_str().is_empty() || path.exists() {
        return Ok(());
    }
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|err| io_failure("failed to create store dir", err))
}
