pub mod baseline;
pub mod classifier;
pub mod engagement;

pub use baseline::BaselineEstimator;
pub use classifier::{Classification, UnscoredReason, ViralClassifier, MEDIAN_MULTIPLIER_UNBOUNDED};
pub use engagement::{engagement_rate, EngagementRateCalculator};
