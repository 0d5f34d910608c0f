use quickmerge_branchpoint::{BranchPointResolver, CopyPointCache};
use quickmerge_core::vcs::{MergeKind, MergeOutcome};
use quickmerge_core::WorkingCopyRef;
use quickmerge_pipeline::{
    ForegroundThread, Pipeline, PipelineError, PipelineHandle, RunStatus, TaskRecord, TaskStatus,
};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::Instrument;

use crate::config::MergeConfig;
use crate::context::{MergeContext, MergeServices};
use crate::error::MergeError;
use crate::steps::{initial_steps, MergeTask};

/// Entry point of the merge workflow.
pub struct QuickMerge {
    services: MergeServices,
    resolver: Arc<BranchPointResolver>,
    config: MergeConfig,
    foreground: Option<ForegroundThread>,
}

impl QuickMerge {
    pub fn new(services: MergeServices, cache: Arc<dyn CopyPointCache>, config: MergeConfig) -> Self {
        let resolver = Arc::new(BranchPointResolver::new(cache, Arc::clone(&services.client)));
        Self {
            services,
            resolver,
            config,
            foreground: None,
        }
    }

    /// Run every interactive step of every merge on `thread`.
    ///
    /// Without one, each run starts its own foreground thread.
    pub fn with_foreground(mut self, thread: ForegroundThread) -> Self {
        self.foreground = Some(thread);
        self
    }

    pub fn resolver(&self) -> &Arc<BranchPointResolver> {
        &self.resolver
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Build a run without starting it, so the caller can hold its handle.
    pub fn prepare_merge(
        &self,
        source_url: &str,
        working_copy: WorkingCopyRef,
        branch_label: &str,
        final_steps: Vec<MergeTask>,
    ) -> MergeRun {
        let run_id = ulid::Ulid::new().to_string();
        let context = MergeContext::new(
            run_id,
            source_url,
            working_copy,
            branch_label,
            self.config.clone(),
            self.services.clone(),
            Arc::clone(&self.resolver),
        );
        let mut pipeline = Pipeline::new().on_error(|ctx: &mut MergeContext, err: MergeError| {
            tracing::warn!(run_id = %ctx.run_id, "merge failed: {err}");
            ctx.services.interaction.report_error(&err);
        });
        if let Some(thread) = &self.foreground {
            pipeline = pipeline.with_foreground(thread.clone());
        }
        let mut tasks = initial_steps();
        tasks.extend(final_steps);
        MergeRun {
            pipeline,
            context,
            tasks,
        }
    }

    /// Merge `source_url` into `working_copy`, then run `final_steps`.
    ///
    /// Results and merge failures go to the interaction collaborator; the
    /// returned error only signals a workflow defect.
    pub async fn run_merge(
        &self,
        source_url: &str,
        working_copy: WorkingCopyRef,
        branch_label: &str,
        final_steps: Vec<MergeTask>,
    ) -> Result<MergeSummary, PipelineError> {
        self.prepare_merge(source_url, working_copy, branch_label, final_steps)
            .run()
            .await
    }
}

/// A merge ready to run.
pub struct MergeRun {
    pipeline: Pipeline<MergeContext, MergeError>,
    context: MergeContext,
    tasks: Vec<MergeTask>,
}

impl MergeRun {
    pub fn run_id(&self) -> &str {
        &self.context.run_id
    }

    /// Cancels or resumes the run from outside.
    pub fn handle(&self) -> PipelineHandle {
        self.pipeline.handle()
    }

    pub async fn run(self) -> Result<MergeSummary, PipelineError> {
        let span = tracing::info_span!(
            "merge",
            run_id = %self.context.run_id,
            source = %self.context.source_url,
            target = %self.context.working_copy.url,
        );
        let started_at = OffsetDateTime::now_utc();
        let outcome = self
            .pipeline
            .run(self.context, self.tasks)
            .instrument(span)
            .await?;
        let ctx = outcome.context;
        Ok(MergeSummary {
            run_id: ctx.run_id,
            started_at,
            status: outcome.status,
            trace: outcome.trace,
            source_url: ctx.source_url,
            merge_kind: ctx.merge_kind,
            outcome: ctx.outcome,
            changelist: ctx.changelist,
        })
    }
}

/// What a finished run did.
#[derive(Debug, Clone)]
pub struct MergeSummary {
    pub run_id: String,
    pub started_at: OffsetDateTime,
    pub status: RunStatus,
    pub trace: Vec<TaskRecord>,
    /// Source after correction.
    pub source_url: String,
    pub merge_kind: Option<MergeKind>,
    /// Present only when the merge was executed.
    pub outcome: Option<MergeOutcome>,
    pub changelist: Option<String>,
}

impl MergeSummary {
    /// Names of steps that ran, in order.
    pub fn executed(&self) -> Vec<&str> {
        self.trace
            .iter()
            .filter(|r| r.status != TaskStatus::Discarded)
            .map(|r| r.name.as_str())
            .collect()
    }

    pub fn ran(&self, step: &str) -> bool {
        self.executed().contains(&step)
    }
}
