use std::sync::Arc;
use std::time::Duration;

use channel_virality::jobs::{BatchScoreSummary, JobKind, JobOutcome, JobRegistry, JobState};

#[tokio::test]
async fn finished_jobs_beyond_retention_are_dropped() {
    let registry = Arc::new(JobRegistry::with_retention(2));
    let mut finished = Vec::new();
    for _ in 0..4 {
        let handle = registry.create(JobKind::ScorePostsBatch).await;
        registry.mark_running(handle.id()).await;
        registry
            .complete(handle.id(), JobOutcome::Batch(BatchScoreSummary::default()))
            .await;
        finished.push(handle.id());
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let active = registry.create(JobKind::ScoreAllPosts).await;

    assert_eq!(registry.list().await.len(), 3);
    assert!(registry.status(finished[0]).await.is_none());
    assert!(registry.status(finished[1]).await.is_none());
    assert_eq!(
        registry.status(finished[3]).await.unwrap().state,
        JobState::Completed
    );
    assert!(registry.status(finished[2]).await.is_some());
    assert_eq!(
        registry.status(active.id()).await.unwrap().state,
        JobState::Pending
    );
}

#[tokio::test]
async fn unfinished_jobs_are_never_pruned() {
    let registry = Arc::new(JobRegistry::with_retention(0));
    let running = registry.create(JobKind::RecomputeAllBaselines).await;
    registry.mark_running(running.id()).await;
    let pending = registry.create(JobKind::ScorePostsBatch).await;
    let _third = registry.create(JobKind::ScoreAllPosts).await;

    assert_eq!(registry.list().await.len(), 3);
    assert!(registry.status(running.id()).await.is_some());
    assert!(registry.status(pending.id()).await.is_some());
}
