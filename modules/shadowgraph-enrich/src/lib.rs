pub mod coordinator;
pub mod metrics;
pub mod policy;
pub mod run_log;
pub mod stats;

pub use coordinator::{ConfirmFn, ConfirmPreview, Coordinator, ExitClass, RunReport};
pub use metrics::{classify_error, summarize, MetricsSummary};
pub use stats::EnrichStats;
