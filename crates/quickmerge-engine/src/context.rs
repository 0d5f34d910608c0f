use quickmerge_branchpoint::BranchPointResolver;
use quickmerge_core::vcs::{
    ChangeSetStream, LocalChanges, MergeExecutor, MergeKind, MergeOutcome, NestedRoot, Shelver,
    VcsClient,
};
use quickmerge_core::{ChangeSet, ResolvedCopyPoint, WorkingCopyRef};
use quickmerge_mergeinfo::MergeInfoAnalyzer;
use std::iter::Peekable;
use std::sync::Arc;

use crate::config::MergeConfig;
use crate::interaction::{HistoryEntry, Interaction};

/// External collaborators of a merge.
#[derive(Clone)]
pub struct MergeServices {
    pub client: Arc<dyn VcsClient>,
    pub executor: Arc<dyn MergeExecutor>,
    pub shelver: Arc<dyn Shelver>,
    pub local_changes: Arc<dyn LocalChanges>,
    pub interaction: Arc<dyn Interaction>,
}

/// Workflow state threaded through every step of one merge run.
pub struct MergeContext {
    pub run_id: String,
    /// Merge source, rewritten to the working copy's sub-path by the
    /// source correction step.
    pub source_url: String,
    pub working_copy: WorkingCopyRef,
    pub branch_label: String,
    pub config: MergeConfig,
    pub services: MergeServices,
    pub resolver: Arc<BranchPointResolver>,

    pub nested_roots: Vec<NestedRoot>,
    /// `None` after resolution means no copy relation exists.
    pub copy_point: Option<ResolvedCopyPoint>,
    pub reintegrate: bool,
    pub analyzer: Option<MergeInfoAnalyzer>,
    /// Open history stream while picking from history.
    pub history: Option<Peekable<ChangeSetStream>>,
    pub history_exhausted: bool,
    pub loaded: Vec<HistoryEntry>,
    /// Full candidate list of the choose-revisions path.
    pub candidates: Vec<ChangeSet>,
    pub merge_kind: Option<MergeKind>,
    /// The operator was already asked about colliding local edits.
    pub prompted: bool,
    pub outcome: Option<MergeOutcome>,
    pub changelist: Option<String>,
}

impl MergeContext {
    pub fn new(
        run_id: String,
        source_url: &str,
        working_copy: WorkingCopyRef,
        branch_label: &str,
        config: MergeConfig,
        services: MergeServices,
        resolver: Arc<BranchPointResolver>,
    ) -> Self {
        Self {
            run_id,
            source_url: source_url.to_string(),
            working_copy,
            branch_label: branch_label.to_string(),
            config,
            services,
            resolver,
            nested_roots: Vec::new(),
            copy_point: None,
            reintegrate: false,
            analyzer: None,
            history: None,
            history_exhausted: false,
            loaded: Vec::new(),
            candidates: Vec::new(),
            merge_kind: None,
            prompted: false,
            outcome: None,
            changelist: None,
        }
    }

    /// Lowest revision worth scanning: the branch's divergence point.
    ///
    /// The copy source revision for a forward merge, the copy commit itself
    /// for a reintegration, 0 when the branches never diverged by copy.
    pub fn history_lower_bound(&self) -> u64 {
        match &self.copy_point {
            Some(cp) if cp.is_inverted() => cp.as_true().target_revision,
            Some(cp) => cp.as_true().source_revision,
            None => 0,
        }
    }
}

impl std::fmt::Debug for MergeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeContext")
            .field("run_id", &self.run_id)
            .field("source_url", &self.source_url)
            .field("target", &self.working_copy.url)
            .field("copy_point", &self.copy_point)
            .field("merge_kind", &self.merge_kind)
            .finish_non_exhaustive()
    }
}
