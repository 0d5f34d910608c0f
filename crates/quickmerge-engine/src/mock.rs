//! In-memory collaborators for tests and dry runs.
//!
//! Every mock writes what it was asked to do into a shared [`Journal`], so a
//! test can assert the order of side effects across collaborators.

use quickmerge_core::vcs::{
    ChangeSetStream, CopyFromInfo, LocalChanges, MergeExecutor, MergeInfoProperty, MergeOutcome,
    MergeRequest, NestedRoot, Shelver, VcsClient,
};
use quickmerge_core::{
    repo_path, ChangeSet, Intersection, LocalEdit, LocalEditSet, Revision, VcsError,
    WorkingCopyRef,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::error::MergeError;
use crate::interaction::{HistoryEntry, HistoryPick, Interaction, IntersectionChoice, MergeVariant};

/// Ordered record of collaborator calls.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    /// Index of the first entry starting with `prefix`.
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.entries().iter().position(|e| e.starts_with(prefix))
    }
}

// ── Repository ──

/// Scripted repository: copy events, per-URL history and mergeinfo.
pub struct MockRepository {
    journal: Journal,
    copies: Mutex<Vec<CopyFromInfo>>,
    history: Mutex<HashMap<String, Vec<ChangeSet>>>,
    metadata: Mutex<Vec<MergeInfoProperty>>,
    nested: Mutex<Vec<NestedRoot>>,
    failure: Mutex<Option<VcsError>>,
}

impl MockRepository {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            copies: Mutex::new(Vec::new()),
            history: Mutex::new(HashMap::new()),
            metadata: Mutex::new(Vec::new()),
            nested: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
        }
    }

    /// `copied` was created from `source@source_revision` in `copy_revision`.
    pub fn add_copy(&self, source: &str, source_revision: Revision, copied: &str, copy_revision: Revision) {
        self.copies.lock().unwrap().push(CopyFromInfo {
            copied_url: copied.to_string(),
            source_url: source.to_string(),
            source_revision,
            copy_revision,
        });
    }

    pub fn set_history(&self, url: &str, change_sets: Vec<ChangeSet>) {
        self.history
            .lock()
            .unwrap()
            .insert(repo_path::normalize(url).to_string(), change_sets);
    }

    /// Mergeinfo property on a working-copy relative path (`""` for the root).
    pub fn set_mergeinfo(&self, path: &str, value: &str) {
        self.metadata.lock().unwrap().push(MergeInfoProperty {
            path: path.to_string(),
            value: value.to_string(),
        });
    }

    pub fn add_nested_root(&self, root: NestedRoot) {
        self.nested.lock().unwrap().push(root);
    }

    /// Make every history query fail with `error`.
    pub fn fail_history(&self, error: VcsError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    fn check_failure(&self) -> Result<(), VcsError> {
        match self.failure.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl VcsClient for MockRepository {
    fn log_history(&self, url: &str, from_revision: Revision) -> Result<ChangeSetStream, VcsError> {
        self.journal.record(format!("log:{url}@{from_revision}"));
        self.check_failure()?;
        let mut change_sets: Vec<ChangeSet> = self
            .history
            .lock()
            .unwrap()
            .get(repo_path::normalize(url))
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|cs| cs.revision > from_revision)
            .collect();
        change_sets.sort_by(|a, b| b.revision.cmp(&a.revision));
        Ok(Box::new(change_sets.into_iter().map(Ok)))
    }

    fn copy_from_info(&self, url: &str) -> Result<Option<CopyFromInfo>, VcsError> {
        self.journal.record(format!("copy-from:{url}"));
        self.check_failure()?;
        Ok(self
            .copies
            .lock()
            .unwrap()
            .iter()
            .filter(|c| repo_path::is_under(url, &c.copied_url))
            .max_by_key(|c| c.copied_url.len())
            .cloned())
    }

    fn merge_metadata(&self, _working_copy: &WorkingCopyRef) -> Result<Vec<MergeInfoProperty>, VcsError> {
        self.journal.record("mergeinfo");
        Ok(self.metadata.lock().unwrap().clone())
    }

    fn nested_roots(&self, _working_copy: &WorkingCopyRef) -> Result<Vec<NestedRoot>, VcsError> {
        Ok(self.nested.lock().unwrap().clone())
    }
}

// ── Executor ──

/// Records merge requests and answers with a fixed outcome.
pub struct MockExecutor {
    journal: Journal,
    requests: Mutex<Vec<MergeRequest>>,
    result: Mutex<Result<MergeOutcome, VcsError>>,
}

impl MockExecutor {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            requests: Mutex::new(Vec::new()),
            result: Mutex::new(Ok(MergeOutcome::default())),
        }
    }

    pub fn set_result(&self, result: Result<MergeOutcome, VcsError>) {
        *self.result.lock().unwrap() = result;
    }

    pub fn requests(&self) -> Vec<MergeRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl MergeExecutor for MockExecutor {
    fn merge(&self, request: &MergeRequest) -> Result<MergeOutcome, VcsError> {
        self.journal.record(format!("merge:{}", request.source_url));
        self.requests.lock().unwrap().push(request.clone());
        self.result.lock().unwrap().clone()
    }
}

// ── Local changes ──

/// Local edit bookkeeping plus shelving over one in-memory edit set.
pub struct MockLocalChanges {
    journal: Journal,
    edits: Mutex<LocalEditSet>,
    shelved: Mutex<Vec<(String, BTreeSet<LocalEdit>)>>,
    changelists: Mutex<BTreeMap<String, Vec<PathBuf>>>,
}

impl MockLocalChanges {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            edits: Mutex::new(LocalEditSet::new()),
            shelved: Mutex::new(Vec::new()),
            changelists: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn add_edit(&self, changelist: &str, edit: LocalEdit) {
        self.edits.lock().unwrap().insert(changelist, edit);
    }

    pub fn edits(&self) -> LocalEditSet {
        self.edits.lock().unwrap().clone()
    }

    pub fn shelved(&self) -> Vec<(String, BTreeSet<LocalEdit>)> {
        self.shelved.lock().unwrap().clone()
    }

    pub fn changelist(&self, name: &str) -> Option<Vec<PathBuf>> {
        self.changelists.lock().unwrap().get(name).cloned()
    }
}

impl LocalChanges for MockLocalChanges {
    fn snapshot(&self) -> LocalEditSet {
        self.edits()
    }

    /// Settles immediately.
    fn invoke_after_update(&self, done: Box<dyn FnOnce() + Send>) {
        self.journal.record("settled");
        done();
    }

    fn ensure_changelist(&self, name: &str, files: &[PathBuf]) -> Result<(), VcsError> {
        self.journal.record(format!("changelist:{name}"));
        self.changelists
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .extend(files.iter().cloned());
        Ok(())
    }
}

impl Shelver for MockLocalChanges {
    fn shelve(&self, edits: &BTreeSet<LocalEdit>, label: &str) -> Result<(), VcsError> {
        self.journal.record(format!("shelve:{label}"));
        self.edits.lock().unwrap().remove_all(edits);
        self.shelved
            .lock()
            .unwrap()
            .push((label.to_string(), edits.clone()));
        Ok(())
    }
}

// ── Interaction ──

/// Scripted operator. Collects every message it is shown.
pub struct ScriptedInteraction {
    variant: Mutex<MergeVariant>,
    confirm_nested: Mutex<bool>,
    confirm_reintegrate: Mutex<bool>,
    /// `None` selects every offered revision.
    selection: Mutex<Option<Vec<Revision>>>,
    picks: Mutex<VecDeque<HistoryPick>>,
    intersection_choice: Mutex<IntersectionChoice>,
    offered: Mutex<Vec<Vec<Revision>>>,
    pages: Mutex<Vec<(usize, bool)>>,
    intersections: Mutex<Vec<Intersection>>,
    messages: Mutex<Vec<String>>,
}

impl Default for ScriptedInteraction {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedInteraction {
    pub fn new() -> Self {
        Self {
            variant: Mutex::new(MergeVariant::Choose),
            confirm_nested: Mutex::new(true),
            confirm_reintegrate: Mutex::new(true),
            selection: Mutex::new(None),
            picks: Mutex::new(VecDeque::new()),
            intersection_choice: Mutex::new(IntersectionChoice::ContinueAnyway),
            offered: Mutex::new(Vec::new()),
            pages: Mutex::new(Vec::new()),
            intersections: Mutex::new(Vec::new()),
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn set_variant(&self, variant: MergeVariant) {
        *self.variant.lock().unwrap() = variant;
    }

    pub fn set_confirm_nested(&self, confirm: bool) {
        *self.confirm_nested.lock().unwrap() = confirm;
    }

    pub fn set_confirm_reintegrate(&self, confirm: bool) {
        *self.confirm_reintegrate.lock().unwrap() = confirm;
    }

    pub fn set_selection(&self, revisions: Vec<Revision>) {
        *self.selection.lock().unwrap() = Some(revisions);
    }

    /// Answers for successive history pages; `Cancel` once exhausted.
    pub fn set_picks(&self, picks: Vec<HistoryPick>) {
        *self.picks.lock().unwrap() = picks.into();
    }

    pub fn set_intersection_choice(&self, choice: IntersectionChoice) {
        *self.intersection_choice.lock().unwrap() = choice;
    }

    /// Revisions offered by each `select_revisions` call.
    pub fn offered(&self) -> Vec<Vec<Revision>> {
        self.offered.lock().unwrap().clone()
    }

    /// `(entries loaded, has_more)` of each history page shown.
    pub fn pages(&self) -> Vec<(usize, bool)> {
        self.pages.lock().unwrap().clone()
    }

    /// Intersections the operator was asked about.
    pub fn intersections(&self) -> Vec<Intersection> {
        self.intersections.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl Interaction for ScriptedInteraction {
    fn choose_variant(&self, _source_url: &str, _target: &WorkingCopyRef) -> MergeVariant {
        *self.variant.lock().unwrap()
    }

    fn confirm_nested_roots(&self, _roots: &[NestedRoot]) -> bool {
        *self.confirm_nested.lock().unwrap()
    }

    fn confirm_reintegrate(&self, _source_url: &str, _target_url: &str) -> bool {
        *self.confirm_reintegrate.lock().unwrap()
    }

    fn select_revisions(&self, candidates: &[ChangeSet]) -> Vec<Revision> {
        let offered: Vec<Revision> = candidates.iter().map(|cs| cs.revision).collect();
        self.offered.lock().unwrap().push(offered.clone());
        self.selection.lock().unwrap().clone().unwrap_or(offered)
    }

    fn pick_from_history(&self, loaded: &[HistoryEntry], has_more: bool) -> HistoryPick {
        self.pages.lock().unwrap().push((loaded.len(), has_more));
        self.picks
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(HistoryPick::Cancel)
    }

    fn resolve_intersection(&self, intersection: &Intersection) -> IntersectionChoice {
        self.intersections.lock().unwrap().push(intersection.clone());
        *self.intersection_choice.lock().unwrap()
    }

    fn show_intersection(&self, intersection: &Intersection) {
        let paths: Vec<String> = intersection
            .file_paths()
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        self.messages
            .lock()
            .unwrap()
            .push(format!("intersection: {}", paths.join(", ")));
    }

    fn report_info(&self, message: &str) {
        self.messages.lock().unwrap().push(format!("info: {message}"));
    }

    fn report_error(&self, error: &MergeError) {
        self.messages.lock().unwrap().push(format!("error: {error}"));
    }
}
