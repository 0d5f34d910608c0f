use quickmerge_core::vcs::VcsClient;
use quickmerge_core::{repo_path, ChangeSet, MergeCheckResult, Revision, VcsError, WorkingCopyRef};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::parse::{parse_mergeinfo, MergeInfo};

/// Candidate change sets grouped by merge state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub merged: Vec<ChangeSet>,
    pub not_merged: Vec<ChangeSet>,
    pub not_exists: Vec<ChangeSet>,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.merged.len() + self.not_merged.len() + self.not_exists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Merged / not-merged classification of source branch commits against one
/// working copy.
///
/// All merge metadata is fetched once by [`prepare`](Self::prepare); every
/// later check is an in-memory lookup.
#[derive(Debug, Clone)]
pub struct MergeInfoAnalyzer {
    source_path: String,
    /// Working-copy relative subtree (`""` for the root) → its mergeinfo.
    subtrees: BTreeMap<String, MergeInfo>,
    outstanding: HashMap<Revision, BTreeSet<String>>,
}

impl MergeInfoAnalyzer {
    /// Fetch and index the working copy's merge metadata for `source_url`.
    pub fn prepare(
        client: &dyn VcsClient,
        working_copy: &WorkingCopyRef,
        source_url: &str,
    ) -> Result<Self, VcsError> {
        let source_path = repo_path::repo_relative(source_url, &working_copy.repository_root)
            .ok_or_else(|| {
                VcsError::history(source_url, "merge source lies outside the repository root")
            })?;
        let mut subtrees = BTreeMap::new();
        for property in client.merge_metadata(working_copy)? {
            let info = parse_mergeinfo(&property.value).map_err(|err| {
                VcsError::history(&working_copy.url, format!("{}: {err}", property.path))
            })?;
            subtrees.insert(property.path.trim_matches('/').to_string(), info);
        }
        tracing::debug!(
            source = %source_path,
            subtrees = subtrees.len(),
            "merge metadata prepared"
        );
        Ok(Self::from_subtrees(source_path, subtrees))
    }

    /// Analyzer over already-parsed metadata.
    pub fn from_subtrees(source_path: impl Into<String>, subtrees: BTreeMap<String, MergeInfo>) -> Self {
        Self {
            source_path: source_path.into(),
            subtrees,
            outstanding: HashMap::new(),
        }
    }

    /// Repository-absolute path of the tracked merge source.
    pub fn source_path(&self) -> &str {
        &self.source_path
    }

    /// Classify one commit.
    ///
    /// Paths outside the merge source are ignored. A commit with no path left
    /// is `NotExists`; one whose paths are all recorded as merged is `Merged`;
    /// anything else, including partially merged commits, is `NotMerged`.
    pub fn check_list(&mut self, change_set: &ChangeSet) -> MergeCheckResult {
        let mut relevant = 0usize;
        let mut missing = BTreeSet::new();
        for path in &change_set.changed_paths {
            let Some(relative) = repo_path::relative_to(path, &self.source_path) else {
                continue;
            };
            relevant += 1;
            if !self.is_merged(relative, change_set.revision) {
                missing.insert(path.clone());
            }
        }

        if relevant == 0 {
            MergeCheckResult::NotExists
        } else if missing.is_empty() {
            self.outstanding.remove(&change_set.revision);
            MergeCheckResult::Merged
        } else {
            self.outstanding.insert(change_set.revision, missing);
            MergeCheckResult::NotMerged
        }
    }

    /// Paths of a previously checked `NotMerged` revision that are still
    /// outstanding. Empty for anything else.
    pub fn not_merged_paths(&self, revision: Revision) -> BTreeSet<String> {
        self.outstanding.get(&revision).cloned().unwrap_or_default()
    }

    /// Classify every change set, preserving input order within each class.
    pub fn partition(&mut self, change_sets: impl IntoIterator<Item = ChangeSet>) -> Partition {
        let mut partition = Partition::default();
        for change_set in change_sets {
            match self.check_list(&change_set) {
                MergeCheckResult::Merged => partition.merged.push(change_set),
                MergeCheckResult::NotMerged => partition.not_merged.push(change_set),
                MergeCheckResult::NotExists => partition.not_exists.push(change_set),
            }
        }
        partition
    }

    /// Look the path up in the nearest subtree carrying mergeinfo. Inherited
    /// mergeinfo only counts its inheritable ranges.
    fn is_merged(&self, relative: &str, revision: Revision) -> bool {
        let mut current = Some(relative);
        while let Some(subtree) = current {
            if let Some(info) = self.subtrees.get(subtree) {
                let source = repo_path::join(&self.source_path, subtree);
                return match info.get(&source) {
                    Some(ranges) if subtree == relative => ranges.contains(revision),
                    Some(ranges) => ranges.contains_inheritable(revision),
                    None => false,
                };
            }
            current = repo_path::parent(subtree);
        }
        false
    }
}
