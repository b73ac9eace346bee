//! Job execution: status tracking and the submission guard

pub mod guard;
pub mod job_status;

pub use guard::{ExecutionGuard, GuardRejected, Submission};
pub use job_status::JobStatusTracker;
