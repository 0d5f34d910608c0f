//! Branch merge orchestration.
//!
//! [`QuickMerge::run_merge`] validates the request, lets the operator choose
//! what to merge, guards uncommitted local edits and hands the plan to the
//! [`MergeExecutor`](quickmerge_core::vcs::MergeExecutor). Every step runs on a
//! [`quickmerge_pipeline::Pipeline`]; slow repository work is kept off the
//! foreground.

pub mod config;
pub mod context;
pub mod error;
pub mod interaction;
pub mod intersection;
pub mod mock;
pub mod orchestrator;
pub mod steps;

pub use config::MergeConfig;
pub use context::{MergeContext, MergeServices};
pub use error::MergeError;
pub use interaction::{HistoryEntry, HistoryPick, Interaction, IntersectionChoice, MergeVariant};
pub use intersection::{compute_intersection, IntersectionMode, PathMapping};
pub use orchestrator::{MergeRun, MergeSummary, QuickMerge};
pub use steps::MergeTask;
