//! Ordered task pipeline.
//!
//! A pipeline owns a workflow context `C` and a queue of [`Task`]s. Tasks run
//! strictly one after another. Foreground tasks always run on one
//! [`ForegroundThread`]; background tasks are moved to the blocking pool. In
//! both cases the context travels with the task and the loop waits for it. A task can insert
//! follow-up work, suspend the pipeline until someone calls
//! [`PipelineHandle::ping`], or cancel everything that is still queued.

pub mod error;
pub mod foreground;
pub mod handle;
pub mod runner;
pub mod task;

pub use error::{ErrorRoute, PipelineError, Routable};
pub use foreground::ForegroundThread;
pub use handle::PipelineHandle;
pub use runner::{Pipeline, PipelineOutcome, RunStatus, TaskRecord, TaskStatus, REPORT_TASK};
pub use task::{Affinity, StepControl, Task};
