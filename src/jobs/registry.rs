use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

use crate::error::{EngineError, ItemFailure};
use crate::{BaselineStatus, ChannelId, PostId};

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    RecomputeAllBaselines,
    ScorePostsBatch,
    ScoreAllPosts,
}

/// `Pending -> Running -> (Cancelling ->) Completed | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Cancelling,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    pub fn label(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Cancelling => "cancelling",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelProgress {
    pub channel_id: ChannelId,
    pub processed_posts: usize,
    pub viral_posts: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub processed_posts: usize,
    pub total_posts: usize,
    pub channels: Vec<ChannelProgress>,
}

impl JobProgress {
    pub fn record(&mut self, channel_id: ChannelId, viral: bool) {
        self.processed_posts += 1;
        let position = self
            .channels
            .iter()
            .position(|entry| entry.channel_id == channel_id);
        let entry = match position {
            Some(index) => &mut self.channels[index],
            None => {
                self.channels.push(ChannelProgress {
                    channel_id,
                    processed_posts: 0,
                    viral_posts: 0,
                });
                let last = self.channels.len() - 1;
                &mut self.channels[last]
            }
        };
        entry.processed_posts += 1;
        if viral {
            entry.viral_posts += 1;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatedBaseline {
    pub channel_id: ChannelId,
    pub status: BaselineStatus,
    pub posts_analyzed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaselineRecomputeSummary {
    pub updated: Vec<UpdatedBaseline>,
    pub errors: Vec<ItemFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchScoreSummary {
    /// Posts that received a classification.
    pub processed: usize,
    pub viral_found: usize,
    /// `skipped_no_baseline` plus failed posts.
    pub skipped: usize,
    pub skipped_no_baseline: usize,
    pub errors: Vec<ItemFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreAllSummary {
    pub progress: JobProgress,
    pub viral_found: usize,
    pub skipped: usize,
    pub cancelled: bool,
    pub resumed_from: Option<PostId>,
    pub errors: Vec<ItemFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobOutcome {
    Baselines(BaselineRecomputeSummary),
    Batch(BatchScoreSummary),
    ScoreAll(ScoreAllSummary),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: JobId,
    pub kind: JobKind,
    pub state: JobState,
    pub progress: JobProgress,
    pub outcome: Option<JobOutcome>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

struct JobEntry {
    status: JobStatus,
    cancel: Arc<AtomicBool>,
    state_tx: watch::Sender<JobState>,
}

const DEFAULT_RETAINED_JOBS: usize = 256;

/// Poll-based view of the jobs started in this process. Unfinished jobs are
/// always kept; only the newest `retained` finished ones are.
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, JobEntry>>,
    retained: usize,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETAINED_JOBS)
    }
}

impl JobRegistry {
    pub fn with_retention(retained: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            retained,
        }
    }

    pub async fn create(self: &Arc<Self>, kind: JobKind) -> JobHandle {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let cancel = Arc::new(AtomicBool::new(false));
        let (state_tx, state_rx) = watch::channel(JobState::Pending);
        let entry = JobEntry {
            status: JobStatus {
                id,
                kind,
                state: JobState::Pending,
                progress: JobProgress::default(),
                outcome: None,
                error: None,
                created_at: now,
                updated_at: now,
            },
            cancel: cancel.clone(),
            state_tx,
        };
        let mut guard = self.jobs.write().await;
        prune_finished(&mut guard, self.retained);
        guard.insert(id, entry);
        drop(guard);

        JobHandle {
            id,
            cancel,
            state_rx,
            registry: self.clone(),
        }
    }

    /// A job of `kind` that has not finished yet.
    pub async fn active(self: &Arc<Self>, kind: JobKind) -> Option<JobHandle> {
        let guard = self.jobs.read().await;
        guard
            .values()
            .find(|entry| entry.status.kind == kind && !entry.status.state.is_terminal())
            .map(|entry| JobHandle {
                id: entry.status.id,
                cancel: entry.cancel.clone(),
                state_rx: entry.state_tx.subscribe(),
                registry: self.clone(),
            })
    }

    pub async fn status(&self, id: JobId) -> Option<JobStatus> {
        let guard = self.jobs.read().await;
        guard.get(&id).map(|entry| entry.status.clone())
    }

    pub async fn list(&self) -> Vec<JobStatus> {
        let guard = self.jobs.read().await;
        let mut jobs: Vec<JobStatus> = guard.values().map(|entry| entry.status.clone()).collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    pub async fn mark_running(&self, id: JobId) {
        self.transition(id, |status| {
            if status.state == JobState::Pending {
                status.state = JobState::Running;
            }
        })
        .await;
    }

    pub async fn update_progress(&self, id: JobId, progress: JobProgress) {
        self.transition(id, |status| status.progress = progress).await;
    }

    pub async fn complete(&self, id: JobId, outcome: JobOutcome) {
        self.transition(id, |status| {
            if let JobOutcome::ScoreAll(summary) = &outcome {
                status.progress = summary.progress.clone();
            }
            status.outcome = Some(outcome);
            status.state = JobState::Completed;
        })
        .await;
    }

    pub async fn fail(&self, id: JobId, error: &EngineError) {
        let message = error.to_string();
        self.transition(id, |status| {
            status.error = Some(message);
            status.state = JobState::Failed;
        })
        .await;
    }

    /// Requests cooperative cancellation. Terminal jobs are left untouched.
    pub async fn cancel(&self, id: JobId) -> Result<JobState, EngineError> {
        let mut guard = self.jobs.write().await;
        let entry = guard
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("job {}", id)))?;
        if !entry.status.state.is_terminal() {
            entry.cancel.store(true, Ordering::SeqCst);
            entry.status.state = JobState::Cancelling;
            entry.status.updated_at = Utc::now();
            entry.state_tx.send_replace(JobState::Cancelling);
        }
        Ok(entry.status.state)
    }

    async fn transition(&self, id: JobId, apply: impl FnOnce(&mut JobStatus)) {
        let mut guard = self.jobs.write().await;
        if let Some(entry) = guard.get_mut(&id) {
            apply(&mut entry.status);
            entry.status.updated_at = Utc::now();
            entry.state_tx.send_replace(entry.status.state);
        }
    }
}

/// Drops the oldest finished jobs until at most `retained` remain.
fn prune_finished(jobs: &mut HashMap<JobId, JobEntry>, retained: usize) {
    let mut finished: Vec<(DateTime<Utc>, DateTime<Utc>, JobId)> = jobs
        .values()
        .filter(|entry| entry.status.state.is_terminal())
        .map(|entry| (entry.status.updated_at, entry.status.created_at, entry.status.id))
        .collect();
    if finished.len() <= retained {
        return;
    }
    finished.sort();
    let excess = finished.len() - retained;
    for (_, _, id) in finished.into_iter().take(excess) {
        jobs.remove(&id);
    }
}

/// Returned immediately by every background operation.
#[derive(Clone)]
pub struct JobHandle {
    id: JobId,
    cancel: Arc<AtomicBool>,
    state_rx: watch::Receiver<JobState>,
    registry: Arc<JobRegistry>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> Option<JobStatus> {
        self.registry.status(self.id).await
    }

    pub async fn cancel(&self) -> Result<JobState, EngineError> {
        self.registry.cancel(self.id).await
    }

    /// Waits for a terminal state and returns the final status.
    pub async fn wait(&self) -> Option<JobStatus> {
        let mut state_rx = self.state_rx.clone();
        // Err means the registry entry is gone; report whatever is left.
        let _ = state_rx.wait_for(|state| state.is_terminal()).await;
        self.status().await
    }
}
