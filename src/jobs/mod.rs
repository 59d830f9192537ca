pub mod coordinator;
pub mod registry;
pub mod single_flight;

pub use coordinator::{Coordinator, IngestSummary};
pub use registry::{
    BaselineRecomputeSummary, BatchScoreSummary, ChannelProgress, JobHandle, JobId, JobKind,
    JobOutcome, JobProgress, JobRegistry, JobState, JobStatus, ScoreAllSummary, UpdatedBaseline,
};
pub use single_flight::SingleFlight;
