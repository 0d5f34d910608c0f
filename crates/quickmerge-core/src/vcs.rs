//! Ports to the external version-control collaborators.
//!
//! Every call is synchronous and may block on the network; the engine decides
//! which pipeline affinity a call runs on.

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::error::VcsError;
use crate::types::{ChangeSet, LocalEdit, LocalEditSet, Revision, WorkingCopyRef};

/// Newest-first stream of commits produced by [`VcsClient::log_history`].
pub type ChangeSetStream = Box<dyn Iterator<Item = Result<ChangeSet, VcsError>> + Send>;

/// Where a path was copied from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyFromInfo {
    /// URL of the copied path itself (branch root, not the queried sub-path).
    pub copied_url: String,
    pub source_url: String,
    pub source_revision: Revision,
    /// Revision of the commit that performed the copy.
    pub copy_revision: Revision,
}

/// Raw `svn:mergeinfo` value set on one subtree of a working copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeInfoProperty {
    /// Working-copy relative path, `""` for the root.
    pub path: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NestedRootKind {
    /// Subtree switched to another URL.
    Switched,
    /// Externals definition pulling in a foreign tree.
    External,
    /// Independent working copy checked out inside this one.
    Nested,
}

/// A subtree whose URL does not follow its parent's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestedRoot {
    pub local_path: PathBuf,
    pub url: String,
    pub kind: NestedRootKind,
}

/// Repository history and working-copy metadata queries.
pub trait VcsClient: Send + Sync {
    /// Commits on `url` with revision strictly greater than `from_revision`.
    fn log_history(&self, url: &str, from_revision: Revision) -> Result<ChangeSetStream, VcsError>;

    /// Copy event that created `url` or its nearest copied ancestor.
    fn copy_from_info(&self, url: &str) -> Result<Option<CopyFromInfo>, VcsError>;

    /// Every mergeinfo property recorded inside the working copy.
    fn merge_metadata(&self, working_copy: &WorkingCopyRef)
        -> Result<Vec<MergeInfoProperty>, VcsError>;

    /// Switched, external and nested roots below the working copy root.
    fn nested_roots(&self, working_copy: &WorkingCopyRef) -> Result<Vec<NestedRoot>, VcsError>;
}

/// What to merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeKind {
    /// Everything not yet merged from the source; `reintegrate` when merging a
    /// branch back into the tree it was copied from.
    WholeBranch { reintegrate: bool },
    /// Exactly these commits, applied in ascending revision order.
    Revisions(Vec<ChangeSet>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequest {
    pub source_url: String,
    pub target: WorkingCopyRef,
    pub kind: MergeKind,
}

/// Overall result of applying a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub updated_files: Vec<PathBuf>,
    pub conflicted: usize,
}

/// Applies merges to the working copy and resolves nothing by itself.
pub trait MergeExecutor: Send + Sync {
    fn merge(&self, request: &MergeRequest) -> Result<MergeOutcome, VcsError>;
}

/// Moves local edits out of the active working set.
pub trait Shelver: Send + Sync {
    fn shelve(&self, edits: &BTreeSet<LocalEdit>, label: &str) -> Result<(), VcsError>;
}

/// Local changelist bookkeeping of the host client.
pub trait LocalChanges: Send + Sync {
    /// Current uncommitted edits, grouped by changelist.
    fn snapshot(&self) -> LocalEditSet;

    /// Run `done` once pending bookkeeping has settled. May run it inline.
    fn invoke_after_update(&self, done: Box<dyn FnOnce() + Send>);

    /// Create `name` if missing and move `files` into it.
    fn ensure_changelist(&self, name: &str, files: &[PathBuf]) -> Result<(), VcsError>;
}
