//! The merge workflow as pipeline tasks.
//!
//! `validate → correct-source-url → check-capability`, then one of the three
//! planning paths, each ending in the local change prompt and execution.

use quickmerge_core::vcs::{MergeKind, MergeRequest, NestedRootKind};
use quickmerge_core::{repo_path, ChangeSet, CopyPointQuery, LocalEdit, Revision};
use quickmerge_mergeinfo::MergeInfoAnalyzer;
use quickmerge_pipeline::{StepControl, Task};
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::context::MergeContext;
use crate::error::MergeError;
use crate::interaction::{HistoryEntry, HistoryPick, IntersectionChoice, MergeVariant};
use crate::intersection::{compute_intersection, IntersectionMode, PathMapping};

pub type MergeTask = Task<MergeContext, MergeError>;
type Control = StepControl<MergeContext, MergeError>;
type StepResult = Result<(), MergeError>;

/// Task names, as they appear in the run trace.
pub mod names {
    pub const VALIDATE: &str = "validate";
    pub const SCAN_NESTED_ROOTS: &str = "scan-nested-roots";
    pub const CONFIRM_NESTED_ROOTS: &str = "confirm-nested-roots";
    pub const CORRECT_SOURCE_URL: &str = "correct-source-url";
    pub const CHECK_CAPABILITY: &str = "check-capability";
    pub const RESOLVE_COPY_POINT: &str = "resolve-copy-point";
    pub const PLAN_WHOLE_BRANCH: &str = "plan-whole-branch";
    pub const LOAD_HISTORY: &str = "load-history";
    pub const PREPARE_MERGE_INFO: &str = "prepare-merge-info";
    pub const SELECT_REVISIONS: &str = "select-revisions";
    pub const OPEN_HISTORY: &str = "open-history";
    pub const LOAD_HISTORY_PAGE: &str = "load-history-page";
    pub const PICK_FROM_HISTORY: &str = "pick-from-history";
    pub const LOCAL_CHANGES_PROMPT: &str = "local-changes-prompt";
    pub const SHELVE_LOCAL_CHANGES: &str = "shelve-local-changes";
    pub const AWAIT_LOCAL_CHANGES: &str = "await-local-changes";
    pub const MERGE: &str = "merge";
    pub const MOVE_TO_CHANGELIST: &str = "move-to-changelist";
    pub const REPORT_RESULT: &str = "report-result";
}

/// Steps every run starts with.
pub fn initial_steps() -> Vec<MergeTask> {
    vec![
        Task::foreground(names::VALIDATE, validate),
        Task::background(names::CORRECT_SOURCE_URL, correct_source_url),
        Task::foreground(names::CHECK_CAPABILITY, check_capability),
    ]
}

// ── Init / validate ──

fn validate(ctx: &mut MergeContext, cx: &mut Control) -> StepResult {
    let target_url = ctx.working_copy.url.clone();
    check_url(&ctx.source_url)?;
    check_url(&target_url)?;
    if !repo_path::is_under(&ctx.source_url, &ctx.working_copy.repository_root) {
        return Err(MergeError::malformed(
            &ctx.source_url,
            "not inside the repository of the working copy",
        ));
    }
    if repo_path::is_under(&ctx.source_url, &target_url)
        || repo_path::is_under(&target_url, &ctx.source_url)
    {
        return Err(MergeError::SelfMerge {
            source_url: ctx.source_url.clone(),
            target_url,
        });
    }
    if ctx.config.check_nested_working_copies {
        cx.next([
            Task::background(names::SCAN_NESTED_ROOTS, scan_nested_roots),
            Task::foreground(names::CONFIRM_NESTED_ROOTS, confirm_nested_roots),
        ]);
    }
    Ok(())
}

fn check_url(raw: &str) -> StepResult {
    let parsed = url::Url::parse(raw).map_err(|err| MergeError::malformed(raw, err.to_string()))?;
    if parsed.cannot_be_a_base() {
        return Err(MergeError::malformed(raw, "not a hierarchical URL"));
    }
    Ok(())
}

fn scan_nested_roots(ctx: &mut MergeContext, _: &mut Control) -> StepResult {
    let roots = ctx.services.client.nested_roots(&ctx.working_copy)?;
    ctx.nested_roots = roots
        .into_iter()
        .filter(|r| matches!(r.kind, NestedRootKind::Switched | NestedRootKind::External))
        .collect();
    Ok(())
}

fn confirm_nested_roots(ctx: &mut MergeContext, cx: &mut Control) -> StepResult {
    if ctx.nested_roots.is_empty() {
        return Ok(());
    }
    if !ctx.services.interaction.confirm_nested_roots(&ctx.nested_roots) {
        info!(roots = ctx.nested_roots.len(), "merge declined: nested roots");
        cx.cancel_everything();
    }
    Ok(())
}

// ── Source correction / capability ──

/// Point the source at the same sub-path the working copy tracks.
fn correct_source_url(ctx: &mut MergeContext, _: &mut Control) -> StepResult {
    let root = &ctx.working_copy.repository_root;
    let Some((_, relative)) = ctx.config.split_branch_url(&ctx.working_copy.url, root) else {
        debug!(url = %ctx.working_copy.url, "working copy outside the branch layout");
        return Ok(());
    };
    let source_root = ctx
        .config
        .split_branch_url(&ctx.source_url, root)
        .map(|(branch_root, _)| branch_root)
        .unwrap_or_else(|| ctx.source_url.clone());
    let corrected = repo_path::join(&source_root, &relative);
    if corrected != ctx.source_url {
        info!(from = %ctx.source_url, to = %corrected, "source URL corrected");
        ctx.source_url = corrected;
    }
    Ok(())
}

fn check_capability(ctx: &mut MergeContext, cx: &mut Control) -> StepResult {
    if !ctx.working_copy.format.supports_merge_tracking() {
        info!(format = ?ctx.working_copy.format, "no merge tracking, merging whole branch");
        cx.next(merge_all_steps());
        return Ok(());
    }
    match ctx
        .services
        .interaction
        .choose_variant(&ctx.source_url, &ctx.working_copy)
    {
        MergeVariant::MergeAll => cx.next(merge_all_steps()),
        MergeVariant::Choose => cx.next(choose_revisions_steps()),
        MergeVariant::ShowLatest => cx.next(show_history_steps()),
        MergeVariant::Cancel => cx.cancel_everything(),
    }
    Ok(())
}

fn resolve_copy_point(ctx: &mut MergeContext, _: &mut Control) -> StepResult {
    let query = CopyPointQuery::new(
        ctx.working_copy.repository_root.as_str(),
        ctx.source_url.as_str(),
        ctx.working_copy.url.as_str(),
    );
    let resolved = ctx.resolver.get(&query)?;
    debug!(found = resolved.is_some(), "copy point resolved");
    ctx.copy_point = resolved;
    Ok(())
}

// ── Merge all ──

fn merge_all_steps() -> Vec<MergeTask> {
    vec![
        Task::background(names::RESOLVE_COPY_POINT, resolve_copy_point),
        Task::foreground(names::PLAN_WHOLE_BRANCH, plan_whole_branch),
    ]
}

fn plan_whole_branch(ctx: &mut MergeContext, cx: &mut Control) -> StepResult {
    let reintegrate = ctx.copy_point.as_ref().is_some_and(|cp| cp.is_inverted());
    if reintegrate
        && !ctx
            .services
            .interaction
            .confirm_reintegrate(&ctx.source_url, &ctx.working_copy.url)
    {
        info!("reintegration declined");
        cx.cancel_everything();
        return Ok(());
    }
    ctx.reintegrate = reintegrate;
    ctx.merge_kind = Some(MergeKind::WholeBranch { reintegrate });
    cx.next(execute_steps());
    Ok(())
}

// ── Choose revisions ──

fn choose_revisions_steps() -> Vec<MergeTask> {
    vec![
        Task::background(names::RESOLVE_COPY_POINT, resolve_copy_point),
        Task::background(names::LOAD_HISTORY, load_history),
        Task::background(names::PREPARE_MERGE_INFO, prepare_merge_info),
        Task::foreground(names::SELECT_REVISIONS, select_revisions),
    ]
}

fn load_history(ctx: &mut MergeContext, cx: &mut Control) -> StepResult {
    let from = ctx.history_lower_bound();
    let stream = ctx.services.client.log_history(&ctx.source_url, from)?;
    let mut candidates = Vec::new();
    for change_set in stream {
        if cx.is_cancelled() {
            break;
        }
        candidates.push(change_set?);
    }
    debug!(from, count = candidates.len(), "history loaded");
    ctx.candidates = candidates;
    Ok(())
}

fn prepare_merge_info(ctx: &mut MergeContext, _: &mut Control) -> StepResult {
    let analyzer = MergeInfoAnalyzer::prepare(
        ctx.services.client.as_ref(),
        &ctx.working_copy,
        &ctx.source_url,
    )?;
    ctx.analyzer = Some(analyzer);
    Ok(())
}

fn select_revisions(ctx: &mut MergeContext, cx: &mut Control) -> StepResult {
    let analyzer = ctx
        .analyzer
        .as_mut()
        .ok_or_else(|| MergeError::Defect("merge info used before preparation".into()))?;
    let partition = analyzer.partition(ctx.candidates.iter().cloned());
    info!(
        merged = partition.merged.len(),
        not_merged = partition.not_merged.len(),
        not_exists = partition.not_exists.len(),
        "history classified"
    );
    if partition.not_merged.is_empty() {
        ctx.services.interaction.report_info(&format!(
            "{} is up to date: nothing left to merge",
            ctx.branch_label
        ));
        return Ok(());
    }

    let picked = ctx.services.interaction.select_revisions(&partition.not_merged);
    plan_revisions(ctx, cx, pick(&partition.not_merged, &picked));
    Ok(())
}

// ── Show history for picking ──

fn show_history_steps() -> Vec<MergeTask> {
    vec![
        Task::background(names::RESOLVE_COPY_POINT, resolve_copy_point),
        Task::background(names::OPEN_HISTORY, open_history),
        Task::background(names::LOAD_HISTORY_PAGE, load_history_page),
        Task::foreground(names::PICK_FROM_HISTORY, pick_from_history),
    ]
}

fn open_history(ctx: &mut MergeContext, cx: &mut Control) -> StepResult {
    let from = ctx.history_lower_bound();
    ctx.history = Some(ctx.services.client.log_history(&ctx.source_url, from)?.peekable());
    ctx.history_exhausted = false;
    prepare_merge_info(ctx, cx)
}

fn load_history_page(ctx: &mut MergeContext, cx: &mut Control) -> StepResult {
    let page_size = ctx.config.history_page_size;
    let stream = ctx
        .history
        .as_mut()
        .ok_or_else(|| MergeError::Defect("history page requested without a stream".into()))?;
    let analyzer = ctx
        .analyzer
        .as_mut()
        .ok_or_else(|| MergeError::Defect("merge info used before preparation".into()))?;

    let mut loaded = 0;
    while loaded < page_size && !cx.is_cancelled() {
        let Some(change_set) = stream.next() else {
            ctx.history_exhausted = true;
            break;
        };
        let change_set = change_set?;
        let state = analyzer.check_list(&change_set);
        ctx.loaded.push(HistoryEntry { change_set, state });
        loaded += 1;
    }
    // A full page may have taken the last revision.
    if loaded == page_size && stream.peek().is_none() {
        ctx.history_exhausted = true;
    }
    if ctx.history_exhausted {
        ctx.history = None;
    }
    debug!(loaded, total = ctx.loaded.len(), "history page loaded");
    Ok(())
}

fn pick_from_history(ctx: &mut MergeContext, cx: &mut Control) -> StepResult {
    let has_more = !ctx.history_exhausted;
    match ctx
        .services
        .interaction
        .pick_from_history(&ctx.loaded, has_more)
    {
        HistoryPick::Selected(revisions) => {
            let loaded: Vec<ChangeSet> = ctx.loaded.iter().map(|e| e.change_set.clone()).collect();
            plan_revisions(ctx, cx, pick(&loaded, &revisions));
        }
        HistoryPick::LoadMore if has_more => cx.next([
            Task::background(names::LOAD_HISTORY_PAGE, load_history_page),
            Task::foreground(names::PICK_FROM_HISTORY, pick_from_history),
        ]),
        HistoryPick::LoadMore => {
            ctx.services.interaction.report_info("No older revisions to load");
            cx.next([Task::foreground(names::PICK_FROM_HISTORY, pick_from_history)]);
        }
        HistoryPick::Cancel => cx.cancel_everything(),
    }
    Ok(())
}

/// Change sets whose revision was picked, oldest first.
fn pick(candidates: &[ChangeSet], revisions: &[Revision]) -> Vec<ChangeSet> {
    let wanted: BTreeSet<Revision> = revisions.iter().copied().collect();
    let mut picked: Vec<ChangeSet> = candidates
        .iter()
        .filter(|cs| wanted.contains(&cs.revision))
        .cloned()
        .collect();
    picked.sort_by_key(|cs| cs.revision);
    picked
}

fn plan_revisions(ctx: &mut MergeContext, cx: &mut Control, picked: Vec<ChangeSet>) {
    if picked.is_empty() {
        info!("empty selection, merge cancelled");
        cx.cancel_everything();
        return;
    }
    ctx.merge_kind = Some(MergeKind::Revisions(picked));
    cx.next(execute_steps());
}

// ── Local changes / execute ──

fn execute_steps() -> Vec<MergeTask> {
    vec![
        Task::foreground(names::LOCAL_CHANGES_PROMPT, local_changes_prompt),
        Task::foreground(names::AWAIT_LOCAL_CHANGES, await_local_changes),
        Task::background(names::MERGE, merge),
        Task::background(names::MOVE_TO_CHANGELIST, move_to_changelist),
        Task::foreground(names::REPORT_RESULT, report_result),
    ]
}

fn local_changes_prompt(ctx: &mut MergeContext, cx: &mut Control) -> StepResult {
    if ctx.prompted {
        return Ok(());
    }
    ctx.prompted = true;

    let snapshot = ctx.services.local_changes.snapshot();
    let intersection = match &ctx.merge_kind {
        Some(MergeKind::WholeBranch { .. }) => {
            compute_intersection(&[], &snapshot, IntersectionMode::MergeAll)
        }
        Some(MergeKind::Revisions(change_sets)) => {
            let source_path =
                repo_path::repo_relative(&ctx.source_url, &ctx.working_copy.repository_root)
                    .ok_or_else(|| {
                        MergeError::malformed(&ctx.source_url, "not inside the repository")
                    })?;
            let mapping = PathMapping {
                source_path: &source_path,
                working_copy: &ctx.working_copy,
            };
            compute_intersection(change_sets, &snapshot, IntersectionMode::Selected(mapping))
        }
        None => return Err(MergeError::Defect("execution reached without a plan".into())),
    };
    if intersection.is_empty() {
        return Ok(());
    }

    match ctx.services.interaction.resolve_intersection(&intersection) {
        IntersectionChoice::Shelve => {
            let edits = intersection.all_edits();
            cx.next([Task::background(names::SHELVE_LOCAL_CHANGES, move |ctx: &mut MergeContext, _: &mut Control| {
                shelve_local_changes(ctx, &edits)
            })]);
        }
        IntersectionChoice::ContinueAnyway => {
            info!(edits = intersection.len(), "merging over local edits");
        }
        IntersectionChoice::Inspect => {
            ctx.services.interaction.show_intersection(&intersection);
            cx.cancel_everything();
        }
        IntersectionChoice::Cancel => cx.cancel_everything(),
    }
    Ok(())
}

fn shelve_local_changes(ctx: &mut MergeContext, edits: &BTreeSet<LocalEdit>) -> StepResult {
    let label = ctx.config.shelve_label(&ctx.branch_label);
    ctx.services.shelver.shelve(edits, &label)?;
    info!(edits = edits.len(), %label, "local edits shelved");
    Ok(())
}

/// Suspend until the host's change bookkeeping has caught up.
fn await_local_changes(ctx: &mut MergeContext, cx: &mut Control) -> StepResult {
    let handle = cx.handle();
    cx.suspend();
    ctx.services
        .local_changes
        .invoke_after_update(Box::new(move || {
            handle.ping();
        }));
    Ok(())
}

fn merge(ctx: &mut MergeContext, _: &mut Control) -> StepResult {
    let kind = ctx
        .merge_kind
        .clone()
        .ok_or_else(|| MergeError::Defect("execution reached without a plan".into()))?;
    let request = MergeRequest {
        source_url: ctx.source_url.clone(),
        target: ctx.working_copy.clone(),
        kind,
    };
    let outcome = ctx.services.executor.merge(&request)?;
    info!(
        updated = outcome.updated_files.len(),
        conflicted = outcome.conflicted,
        "merge applied"
    );
    ctx.outcome = Some(outcome);
    Ok(())
}

fn move_to_changelist(ctx: &mut MergeContext, _: &mut Control) -> StepResult {
    let Some(outcome) = &ctx.outcome else {
        return Ok(());
    };
    if outcome.updated_files.is_empty() {
        return Ok(());
    }
    let name = ctx.config.changelist_name(&ctx.branch_label);
    ctx.services
        .local_changes
        .ensure_changelist(&name, &outcome.updated_files)?;
    ctx.changelist = Some(name);
    Ok(())
}

fn report_result(ctx: &mut MergeContext, _: &mut Control) -> StepResult {
    let Some(outcome) = &ctx.outcome else {
        return Ok(());
    };
    let mut message = format!(
        "Merged {} from {}: {} file(s) updated",
        describe(ctx.merge_kind.as_ref()),
        ctx.branch_label,
        outcome.updated_files.len()
    );
    if outcome.conflicted > 0 {
        message.push_str(&format!(", {} conflict(s)", outcome.conflicted));
    }
    if let Some(changelist) = &ctx.changelist {
        message.push_str(&format!(", changelist \"{changelist}\""));
    }
    ctx.services.interaction.report_info(&message);
    Ok(())
}

fn describe(kind: Option<&MergeKind>) -> String {
    match kind {
        Some(MergeKind::WholeBranch { reintegrate: true }) => "branch (reintegration)".into(),
        Some(MergeKind::WholeBranch { reintegrate: false }) => "branch".into(),
        Some(MergeKind::Revisions(sets)) => {
            let revisions: Vec<String> = sets.iter().map(|cs| format!("r{}", cs.revision)).collect();
            revisions.join(", ")
        }
        None => "nothing".into(),
    }
}
