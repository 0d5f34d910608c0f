use quickmerge_core::vcs::NestedRoot;
use quickmerge_core::{ChangeSet, Intersection, MergeCheckResult, Revision, WorkingCopyRef};

use crate::error::MergeError;

/// How the operator wants to merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeVariant {
    /// Everything not yet merged, as one whole-branch merge.
    MergeAll,
    /// Analyze the branch and pick among not-merged revisions.
    Choose,
    /// Browse the latest history page by page and pick.
    ShowLatest,
    Cancel,
}

/// Operator response to one history page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryPick {
    Selected(Vec<Revision>),
    LoadMore,
    Cancel,
}

/// Operator response to local edits colliding with the merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntersectionChoice {
    /// Set the colliding edits aside, then merge.
    Shelve,
    Cancel,
    /// Merge on top of the edits.
    ContinueAnyway,
    /// Show the colliding paths and stop.
    Inspect,
}

/// A loaded history entry with its merge state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub change_set: ChangeSet,
    pub state: MergeCheckResult,
}

/// Operator-facing side of a merge. Called only from foreground steps.
pub trait Interaction: Send + Sync {
    fn choose_variant(&self, source_url: &str, target: &WorkingCopyRef) -> MergeVariant;

    /// Switched or external roots were found below the target.
    fn confirm_nested_roots(&self, roots: &[NestedRoot]) -> bool;

    /// The target is where the source branch was copied from.
    fn confirm_reintegrate(&self, source_url: &str, target_url: &str) -> bool;

    /// Pick among not-merged revisions. An empty answer cancels.
    fn select_revisions(&self, candidates: &[ChangeSet]) -> Vec<Revision>;

    /// Pick from everything loaded so far.
    fn pick_from_history(&self, loaded: &[HistoryEntry], has_more: bool) -> HistoryPick;

    fn resolve_intersection(&self, intersection: &Intersection) -> IntersectionChoice;

    fn show_intersection(&self, intersection: &Intersection);

    fn report_info(&self, message: &str);

    fn report_error(&self, error: &MergeError);
}
