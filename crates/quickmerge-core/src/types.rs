use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::repo_path;

/// Global repository revision number.
pub type Revision = u64;

/// Name of a local changelist (e.g. "Default", "Merge from feature-x").
pub type ChangelistName = String;

// ── Copy points ──

/// The commit at which `target_url` was created by copying `source_url`.
///
/// Stored in chronological orientation: the source existed first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CopyPoint {
    pub source_url: String,
    pub source_revision: Revision,
    pub target_url: String,
    pub target_revision: Revision,
}

impl CopyPoint {
    /// Same event with the two endpoints exchanged.
    pub fn swapped(&self) -> CopyPoint {
        CopyPoint {
            source_url: self.target_url.clone(),
            source_revision: self.target_revision,
            target_url: self.source_url.clone(),
            target_revision: self.source_revision,
        }
    }

    /// Whether this copy connects `url_a` and `url_b` (in either direction).
    ///
    /// Returns `Some(true)` when `url_a` lies under the copy target, i.e. the
    /// caller's "source" is chronologically the later branch.
    pub fn relates(&self, url_a: &str, url_b: &str) -> Option<bool> {
        let a_src = repo_path::is_under(url_a, &self.source_url);
        let a_tgt = repo_path::is_under(url_a, &self.target_url);
        let b_src = repo_path::is_under(url_b, &self.source_url);
        let b_tgt = repo_path::is_under(url_b, &self.target_url);
        // A branch nested under its own source (copy of /trunk to /trunk/x)
        // matches both endpoints; the deeper target wins.
        if a_tgt && b_src && !b_tgt {
            Some(true)
        } else if a_src && b_tgt && !a_tgt {
            Some(false)
        } else {
            None
        }
    }
}

/// Resolver input. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyPointQuery {
    pub repository_root: String,
    pub candidate_a: String,
    pub candidate_b: String,
}

impl CopyPointQuery {
    pub fn new(
        repository_root: impl Into<String>,
        candidate_a: impl Into<String>,
        candidate_b: impl Into<String>,
    ) -> Self {
        Self {
            repository_root: repository_root.into(),
            candidate_a: candidate_a.into(),
            candidate_b: candidate_b.into(),
        }
    }
}

/// A copy point plus the orientation of the query that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCopyPoint {
    copy_point: CopyPoint,
    inverted: bool,
}

impl ResolvedCopyPoint {
    pub fn new(copy_point: CopyPoint, inverted: bool) -> Self {
        Self {
            copy_point,
            inverted,
        }
    }

    /// True when the caller's source was chronologically the copy target.
    pub fn is_inverted(&self) -> bool {
        self.inverted
    }

    /// Chronological view: `source` existed first, `target` is the copy.
    pub fn as_true(&self) -> &CopyPoint {
        &self.copy_point
    }

    /// Endpoints exchanged relative to [`as_true`](Self::as_true).
    pub fn as_inverted(&self) -> CopyPoint {
        self.copy_point.swapped()
    }

    /// The copy point oriented the way the caller labelled the query
    /// (caller's source in `source_url`).
    pub fn as_queried(&self) -> CopyPoint {
        if self.inverted {
            self.as_inverted()
        } else {
            self.copy_point.clone()
        }
    }
}

// ── History ──

/// One repository commit, as reported by the VCS log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub revision: Revision,
    /// Repository-absolute paths (`/branches/x/src/a.rs`).
    pub changed_paths: BTreeSet<String>,
    #[serde(default)]
    pub comment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

impl ChangeSet {
    pub fn new<I, S>(revision: Revision, paths: I, comment: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            revision,
            changed_paths: paths.into_iter().map(Into::into).collect(),
            comment: comment.to_string(),
            author: None,
        }
    }
}

/// Merge state of one change set relative to a target working copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeCheckResult {
    Merged,
    NotMerged,
    NotExists,
}

// ── Working copy ──

/// On-disk working copy format. Merge tracking appeared in 1.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WorkingCopyFormat {
    V1_4,
    V1_5,
    V1_6,
    V1_7,
    V1_8,
}

impl WorkingCopyFormat {
    pub fn supports_merge_tracking(self) -> bool {
        self >= WorkingCopyFormat::V1_5
    }
}

/// Identifies one merge target. Read-only for the duration of a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingCopyRef {
    pub local_path: PathBuf,
    pub url: String,
    pub repository_root: String,
    pub format: WorkingCopyFormat,
}

impl WorkingCopyRef {
    /// Repository URL corresponding to a local file inside this working copy.
    pub fn url_of(&self, file: &Path) -> Option<String> {
        let rel = file.strip_prefix(&self.local_path).ok()?;
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        Some(repo_path::join(&self.url, &rel))
    }

    /// Repository-absolute path corresponding to a local file.
    pub fn repo_path_of(&self, file: &Path) -> Option<String> {
        let url = self.url_of(file)?;
        repo_path::repo_relative(&url, &self.repository_root)
    }
}

// ── Local edits ──

/// One side of a local edit. Absent `before` means added, absent `after` deleted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentState {
    pub path: PathBuf,
    pub revision: Option<Revision>,
}

/// An uncommitted change to one file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalEdit {
    pub file_path: PathBuf,
    pub before: Option<ContentState>,
    pub after: Option<ContentState>,
}

impl LocalEdit {
    pub fn modified(path: impl Into<PathBuf>, base: Revision) -> Self {
        let path = path.into();
        Self {
            before: Some(ContentState {
                path: path.clone(),
                revision: Some(base),
            }),
            after: Some(ContentState {
                path: path.clone(),
                revision: None,
            }),
            file_path: path,
        }
    }
}

/// Local edits grouped by changelist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangelistEdits {
    changelists: BTreeMap<ChangelistName, BTreeSet<LocalEdit>>,
}

impl ChangelistEdits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, changelist: &str, edit: LocalEdit) {
        self.changelists
            .entry(changelist.to_string())
            .or_default()
            .insert(edit);
    }

    pub fn with(mut self, changelist: &str, edit: LocalEdit) -> Self {
        self.insert(changelist, edit);
        self
    }

    pub fn get(&self, changelist: &str) -> Option<&BTreeSet<LocalEdit>> {
        self.changelists.get(changelist)
    }

    pub fn changelists(&self) -> impl Iterator<Item = (&ChangelistName, &BTreeSet<LocalEdit>)> {
        self.changelists.iter()
    }

    pub fn edits(&self) -> impl Iterator<Item = &LocalEdit> {
        self.changelists.values().flatten()
    }

    /// All edits across changelists.
    pub fn all_edits(&self) -> BTreeSet<LocalEdit> {
        self.edits().cloned().collect()
    }

    pub fn file_paths(&self) -> BTreeSet<PathBuf> {
        self.edits().map(|e| e.file_path.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.changelists.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the given edits, removing changelists that become empty.
    pub fn remove_all(&mut self, edits: &BTreeSet<LocalEdit>) {
        for set in self.changelists.values_mut() {
            set.retain(|e| !edits.contains(e));
        }
        self.changelists.retain(|_, set| !set.is_empty());
    }
}

/// Snapshot of the working copy's uncommitted edits.
pub type LocalEditSet = ChangelistEdits;

/// Local edits that collide with the files a merge will touch.
pub type Intersection = ChangelistEdits;
