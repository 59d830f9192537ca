use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle as TaskHandle;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, ItemFailure};
use crate::jobs::registry::{
    BaselineRecomputeSummary, BatchScoreSummary, JobHandle, JobId, JobKind, JobOutcome,
    JobProgress, JobRegistry, JobState, JobStatus, ScoreAllSummary, UpdatedBaseline,
};
use crate::jobs::single_flight::SingleFlight;
use crate::scoring::engagement::validate_metrics;
use crate::scoring::{BaselineEstimator, Classification, ViralClassifier};
use crate::store::{PostUpdate, ScoreCheckpoint, Store};
use crate::{Channel, ChannelBaseline, ChannelId, Post, PostId, ViralMetrics};

const SCORE_ALL_CHECKPOINT: &str = "score_all_posts";

type BaselineResult = Result<Arc<ChannelBaseline>, EngineError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub ingested: usize,
    /// Posts dropped before storage because their counters were invalid.
    pub rejected: Vec<ItemFailure>,
    /// Present when `auto_calculate` scored the ingested posts.
    pub scored: Option<BatchScoreSummary>,
}

/// Drives baseline refreshes and bulk scoring.
///
/// Cheap to clone; all clones share the store, the job registry and the
/// per-channel single-flight map.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<Store>,
    config: RwLock<Arc<EngineConfig>>,
    jobs: Arc<JobRegistry>,
    baseline_flights: SingleFlight<ChannelId, BaselineResult>,
    baseline_computations: AtomicUsize,
    baselines_running: AtomicUsize,
    peak_baselines_running: AtomicUsize,
    score_all_gate: Mutex<()>,
}

/// What one pass over a set of posts produced.
struct ScoredBatch {
    summary: BatchScoreSummary,
    /// `(channel, is_viral)` for every post handled, scored or skipped.
    outcomes: Vec<(ChannelId, bool)>,
}

impl Coordinator {
    pub fn new(store: Arc<Store>, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let jobs = JobRegistry::with_retention(config.coordinator.retained_jobs);
        Ok(Self {
            inner: Arc::new(Inner {
                store,
                config: RwLock::new(Arc::new(config)),
                jobs: Arc::new(jobs),
                baseline_flights: SingleFlight::new(),
                baseline_computations: AtomicUsize::new(0),
                baselines_running: AtomicUsize::new(0),
                peak_baselines_running: AtomicUsize::new(0),
                score_all_gate: Mutex::new(()),
            }),
        })
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.inner.store
    }

    pub fn jobs(&self) -> &Arc<JobRegistry> {
        &self.inner.jobs
    }

    /// Snapshot of the current configuration. Batch runs take one at start
    /// and use it throughout.
    pub fn config(&self) -> Arc<EngineConfig> {
        self.inner
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update_config(&self, config: EngineConfig) -> Result<(), EngineError> {
        config.validate()?;
        *self
            .inner
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
        info!("engine config updated");
        Ok(())
    }

    /// How many baseline computations actually ran (coalesced calls count once).
    pub fn baseline_computations(&self) -> usize {
        self.inner.baseline_computations.load(Ordering::SeqCst)
    }

    /// Highest number of baseline computations seen running at once.
    pub fn peak_concurrent_baselines(&self) -> usize {
        self.inner.peak_baselines_running.load(Ordering::SeqCst)
    }

    pub async fn ingest_posts(
        &self,
        channel: Channel,
        posts: Vec<Post>,
    ) -> Result<IngestSummary, EngineError> {
        let channel_id = channel.id;
        let mut accepted = Vec::with_capacity(posts.len());
        let mut rejected = Vec::new();
        for post in posts {
            match validate_metrics(&post.metrics()) {
                Ok(()) => accepted.push(post),
                Err(err) => {
                    warn!(channel = channel_id, post = post.id, error = %err, "post rejected at ingest");
                    rejected.push(ItemFailure::for_post(channel_id, post.id, &err));
                }
            }
        }

        let ids = self.inner.store.ingest(channel, accepted, Utc::now()).await?;
        info!(
            channel = channel_id,
            posts = ids.len(),
            rejected = rejected.len(),
            "posts ingested"
        );

        let config = self.config();
        let scored = if config.calc.auto_calculate && !ids.is_empty() {
            let classifier = ViralClassifier::from_config(&config)?;
            let posts = self.inner.store.posts_by_ids(&ids).await;
            Some(self.score_posts(&classifier, &posts, Utc::now()).await?.summary)
        } else {
            None
        };

        Ok(IngestSummary {
            ingested: ids.len(),
            rejected,
            scored,
        })
    }

    pub async fn get_channel_baseline(&self, channel_id: ChannelId) -> Option<Arc<ChannelBaseline>> {
        self.inner.store.baseline(channel_id).await
    }

    /// Recomputes one channel's baseline. Concurrent calls for the same
    /// channel share a single computation and all receive its result.
    pub async fn compute_baseline(&self, channel_id: ChannelId) -> BaselineResult {
        if self.inner.store.channel(channel_id).await.is_none() {
            return Err(EngineError::NotFound(format!("channel {}", channel_id)));
        }
        let this = self.clone();
        self.inner
            .baseline_flights
            .run(channel_id, move || async move {
                this.compute_baseline_now(channel_id).await
            })
            .await
            .unwrap_or_else(|| {
                Err(EngineError::Infrastructure(format!(
                    "baseline computation for channel {} was abandoned",
                    channel_id
                )))
            })
    }

    async fn compute_baseline_now(&self, channel_id: ChannelId) -> BaselineResult {
        self.inner.baseline_computations.fetch_add(1, Ordering::SeqCst);
        let running = self.inner.baselines_running.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner
            .peak_baselines_running
            .fetch_max(running, Ordering::SeqCst);
        let _running = RunningGuard(&self.inner.baselines_running);

        let config = self.config();
        let estimator = BaselineEstimator::new(
            config.weights.clone(),
            config.baseline.clone(),
            config.calc.min_views_for_viral,
        )?;

        let now = Utc::now();
        let posts = self
            .inner
            .store
            .channel_posts_between(channel_id, estimator.window_start(now), now)
            .await;
        let baseline = estimator.estimate(channel_id, &posts, now);
        let baseline = self.inner.store.put_baseline(baseline).await?;

        info!(
            channel = channel_id,
            status = baseline.status.label(),
            posts_analyzed = baseline.posts_analyzed,
            "baseline recomputed"
        );
        Ok(baseline)
    }

    pub async fn recompute_all_baselines(&self) -> Result<BaselineRecomputeSummary, EngineError> {
        let channels = self
            .inner
            .store
            .channels()
            .await
            .into_iter()
            .map(|channel| channel.id)
            .collect();
        self.recompute_baselines(channels).await
    }

    /// Recomputes baselines that are missing or older than `update_interval_hours`.
    pub async fn refresh_stale_baselines(&self) -> Result<BaselineRecomputeSummary, EngineError> {
        let config = self.config();
        let now = Utc::now();
        let mut stale = Vec::new();
        for channel in self.inner.store.channels().await {
            let due = match self.inner.store.baseline(channel.id).await {
                Some(baseline) => baseline.is_stale(now, config.baseline.update_interval_hours),
                None => true,
            };
            if due {
                stale.push(channel.id);
            }
        }
        debug!(channels = stale.len(), "stale baselines found");
        self.recompute_baselines(stale).await
    }

    /// Fans out over `channels` with at most `max_concurrent_channels` in
    /// flight. Per-channel failures (including unknown channels) are
    /// collected; an infrastructure failure stops new channels from starting
    /// and is returned.
    pub async fn recompute_baselines(
        &self,
        channels: Vec<ChannelId>,
    ) -> Result<BaselineRecomputeSummary, EngineError> {
        let config = self.config();
        let semaphore = Arc::new(Semaphore::new(config.coordinator.max_concurrent_channels));
        let abort = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(channels.len());

        for channel_id in channels {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|err| EngineError::Infrastructure(format!("worker pool closed: {}", err)))?;
            if abort.load(Ordering::SeqCst) {
                break;
            }
            let this = self.clone();
            let abort = abort.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                let result = this.compute_baseline(channel_id).await;
                if matches!(&result, Err(err) if err.is_infrastructure()) {
                    abort.store(true, Ordering::SeqCst);
                }
                result
            });
            handles.push((channel_id, handle));
        }

        let mut summary = BaselineRecomputeSummary::default();
        let mut fatal = None;
        for (channel_id, handle) in handles {
            match handle.await {
                Ok(Ok(baseline)) => summary.updated.push(UpdatedBaseline {
                    channel_id,
                    status: baseline.status,
                    posts_analyzed: baseline.posts_analyzed,
                }),
                Ok(Err(err)) if err.is_infrastructure() => {
                    error!(channel = channel_id, error = %err, "baseline recompute aborted");
                    fatal.get_or_insert(err);
                }
                Ok(Err(err)) => {
                    warn!(channel = channel_id, error = %err, "baseline recompute failed");
                    summary.errors.push(ItemFailure::for_channel(channel_id, &err));
                }
                Err(err) => {
                    warn!(channel = channel_id, error = %err, "baseline task failed");
                    summary.errors.push(ItemFailure {
                        channel: Some(channel_id),
                        post: None,
                        error: format!("baseline task failed: {}", err),
                    });
                }
            }
        }

        if let Some(err) = fatal {
            return Err(err);
        }
        info!(
            updated = summary.updated.len(),
            errors = summary.errors.len(),
            "baselines recomputed"
        );
        Ok(summary)
    }

    /// Scores up to `limit` unscored posts (stale ones too when
    /// `update_existing` is set), optionally for one channel only.
    pub async fn score_posts_batch(
        &self,
        channel: Option<ChannelId>,
        limit: usize,
    ) -> Result<BatchScoreSummary, EngineError> {
        let config = self.config();
        let classifier = ViralClassifier::from_config(&config)?;
        let posts = self
            .inner
            .store
            .select_for_scoring(channel, limit, config.calc.update_existing)
            .await;
        let batch = self.score_posts(&classifier, &posts, Utc::now()).await?;
        info!(
            channel = ?channel,
            processed = batch.summary.processed,
            viral = batch.summary.viral_found,
            skipped = batch.summary.skipped,
            "post batch scored"
        );
        Ok(batch.summary)
    }

    /// Hard-mode classification of a single post.
    pub async fn classify_post(&self, post_id: PostId) -> Result<ViralMetrics, EngineError> {
        let post = self
            .inner
            .store
            .post(post_id)
            .await
            .ok_or_else(|| EngineError::NotFound(format!("post {}", post_id)))?;
        let config = self.config();
        let classifier = ViralClassifier::from_config(&config)?;
        let baseline = self.inner.store.baseline(post.channel_id).await;

        let metrics = classifier.classify_strict(&post, baseline.as_deref(), Utc::now())?;
        self.inner
            .store
            .apply_updates(vec![PostUpdate {
                post_id,
                engagement_rate: metrics.engagement_rate,
                viral: Some(metrics.clone()),
            }])
            .await?;
        Ok(metrics)
    }

    pub async fn list_viral_posts(
        &self,
        min_score: f64,
        channel: Option<ChannelId>,
        limit: usize,
    ) -> Vec<Post> {
        self.inner.store.viral_posts(min_score, channel, limit).await
    }

    async fn score_posts(
        &self,
        classifier: &ViralClassifier,
        posts: &[Post],
        now: DateTime<Utc>,
    ) -> Result<ScoredBatch, EngineError> {
        let mut baselines: HashMap<ChannelId, Option<Arc<ChannelBaseline>>> = HashMap::new();
        let mut updates = Vec::with_capacity(posts.len());
        let mut summary = BatchScoreSummary::default();
        let mut outcomes = Vec::with_capacity(posts.len());

        for post in posts {
            if !baselines.contains_key(&post.channel_id) {
                let baseline = self.inner.store.baseline(post.channel_id).await;
                baselines.insert(post.channel_id, baseline);
            }
            let baseline = baselines.get(&post.channel_id).and_then(|entry| entry.as_deref());

            match classifier.classify(post, baseline, now) {
                Ok(Classification::Scored(metrics)) => {
                    summary.processed += 1;
                    if metrics.is_viral {
                        summary.viral_found += 1;
                    }
                    outcomes.push((post.channel_id, metrics.is_viral));
                    updates.push(PostUpdate {
                        post_id: post.id,
                        engagement_rate: metrics.engagement_rate,
                        viral: Some(metrics),
                    });
                }
                Ok(Classification::Unscored { engagement_rate, .. }) => {
                    summary.skipped_no_baseline += 1;
                    outcomes.push((post.channel_id, false));
                    updates.push(PostUpdate {
                        post_id: post.id,
                        engagement_rate,
                        viral: None,
                    });
                }
                Err(err) => {
                    warn!(post = post.id, channel = post.channel_id, error = %err, "post scoring failed");
                    outcomes.push((post.channel_id, false));
                    summary
                        .errors
                        .push(ItemFailure::for_post(post.channel_id, post.id, &err));
                }
            }
        }
        summary.skipped = summary.skipped_no_baseline + summary.errors.len();

        self.inner.store.apply_updates(updates).await?;
        Ok(ScoredBatch { summary, outcomes })
    }

    /// Starts (or joins) the whole-table scoring job. Progress is
    /// checkpointed after every sub-batch; a new run resumes from the last
    /// checkpoint left by a cancelled or failed one.
    pub async fn score_all_posts(&self) -> JobHandle {
        let _gate = self.inner.score_all_gate.lock().await;
        if let Some(handle) = self.inner.jobs.active(JobKind::ScoreAllPosts).await {
            debug!(job = %handle.id(), "score-all already running");
            return handle;
        }

        let handle = self.inner.jobs.create(JobKind::ScoreAllPosts).await;
        let this = self.clone();
        let job = handle.clone();
        tokio::spawn(async move {
            let registry = this.inner.jobs.clone();
            registry.mark_running(job.id()).await;
            match this.run_score_all(&job).await {
                Ok(summary) => {
                    info!(
                        job = %job.id(),
                        processed = summary.progress.processed_posts,
                        viral = summary.viral_found,
                        cancelled = summary.cancelled,
                        "score-all finished"
                    );
                    registry.complete(job.id(), JobOutcome::ScoreAll(summary)).await;
                }
                Err(err) => {
                    error!(job = %job.id(), error = %err, "score-all failed");
                    registry.fail(job.id(), &err).await;
                }
            }
        });
        handle
    }

    async fn run_score_all(&self, job: &JobHandle) -> Result<ScoreAllSummary, EngineError> {
        let config = self.config();
        let classifier = ViralClassifier::from_config(&config)?;
        let store = &self.inner.store;
        let registry = &self.inner.jobs;
        let total_posts = store.post_count().await;

        let mut summary = ScoreAllSummary::default();
        let mut cursor = None;
        if let Some(checkpoint) = store.checkpoint(SCORE_ALL_CHECKPOINT).await {
            info!(job = %job.id(), after = checkpoint.last_post_id, "resuming score-all");
            cursor = Some(checkpoint.last_post_id);
            summary.resumed_from = Some(checkpoint.last_post_id);
            summary.viral_found = checkpoint.channels.iter().map(|entry| entry.viral_posts).sum();
            summary.progress = JobProgress {
                processed_posts: checkpoint.processed_posts,
                total_posts,
                channels: checkpoint.channels,
            };
        }
        summary.progress.total_posts = total_posts;
        registry.update_progress(job.id(), summary.progress.clone()).await;

        loop {
            if job.is_cancelled() {
                info!(job = %job.id(), "score-all cancelled");
                summary.cancelled = true;
                break;
            }

            let posts = store.posts_after(cursor, config.calc.batch_size).await;
            let Some(last_post_id) = posts.last().map(|post| post.id) else {
                break;
            };

            let batch = self.score_posts(&classifier, &posts, Utc::now()).await?;
            for (channel_id, viral) in batch.outcomes {
                summary.progress.record(channel_id, viral);
            }
            summary.viral_found += batch.summary.viral_found;
            summary.skipped += batch.summary.skipped;
            summary.errors.extend(batch.summary.errors);
            cursor = Some(last_post_id);

            store
                .save_checkpoint(
                    SCORE_ALL_CHECKPOINT,
                    ScoreCheckpoint {
                        last_post_id,
                        processed_posts: summary.progress.processed_posts,
                        total_posts,
                        channels: summary.progress.channels.clone(),
                        updated_at: Utc::now(),
                    },
                )
                .await?;
            registry.update_progress(job.id(), summary.progress.clone()).await;
            debug!(job = %job.id(), after = last_post_id, "score-all checkpoint saved");
            tokio::task::yield_now().await;
        }

        if !summary.cancelled {
            store.clear_checkpoint(SCORE_ALL_CHECKPOINT).await?;
        }
        Ok(summary)
    }

    pub async fn spawn_recompute_all_baselines(&self) -> JobHandle {
        self.spawn_job(JobKind::RecomputeAllBaselines, |this| async move {
            this.recompute_all_baselines().await.map(JobOutcome::Baselines)
        })
        .await
    }

    pub async fn spawn_score_posts_batch(&self, channel: Option<ChannelId>, limit: usize) -> JobHandle {
        self.spawn_job(JobKind::ScorePostsBatch, move |this| async move {
            this.score_posts_batch(channel, limit).await.map(JobOutcome::Batch)
        })
        .await
    }

    async fn spawn_job<F, Fut>(&self, kind: JobKind, run: F) -> JobHandle
    where
        F: FnOnce(Coordinator) -> Fut + Send + 'static,
        Fut: Future<Output = Result<JobOutcome, EngineError>> + Send + 'static,
    {
        let handle = self.inner.jobs.create(kind).await;
        let registry = self.inner.jobs.clone();
        let id = handle.id();
        let this = self.clone();
        tokio::spawn(async move {
            registry.mark_running(id).await;
            match run(this).await {
                Ok(outcome) => registry.complete(id, outcome).await,
                Err(err) => {
                    error!(job = %id, kind = ?kind, error = %err, "job failed");
                    registry.fail(id, &err).await;
                }
            }
        });
        handle
    }

    pub async fn job_status(&self, id: JobId) -> Option<JobStatus> {
        self.inner.jobs.status(id).await
    }

    pub async fn cancel_job(&self, id: JobId) -> Result<JobState, EngineError> {
        let state = self.inner.jobs.cancel(id).await?;
        info!(job = %id, state = state.label(), "job cancellation requested");
        Ok(state)
    }

    /// One maintenance pass: refresh stale baselines, then score a batch of
    /// unscored posts if `auto_calculate` is on.
    pub async fn run_scheduled_pass(&self) {
        match self.refresh_stale_baselines().await {
            Ok(summary) if !summary.updated.is_empty() || !summary.errors.is_empty() => {
                info!(
                    updated = summary.updated.len(),
                    errors = summary.errors.len(),
                    "scheduled baseline refresh"
                );
            }
            Ok(_) => {}
            Err(err) => error!(error = %err, "scheduled baseline refresh failed"),
        }

        let config = self.config();
        if config.calc.auto_calculate {
            if let Err(err) = self.score_posts_batch(None, config.calc.batch_size).await {
                error!(error = %err, "scheduled scoring failed");
            }
        }
    }

    pub fn spawn_scheduler(&self) -> TaskHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let seconds = this.config().coordinator.scheduler_interval_secs.max(1);
            let mut ticker = tokio::time::interval(Duration::from_secs(seconds));
            loop {
                ticker.tick().await;
                this.run_scheduled_pass().await;
            }
        })
    }
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
