use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{ErrorRoute, PipelineError, Routable};
use crate::foreground::ForegroundThread;
use crate::handle::{Phase, PipelineHandle, Shared};
use crate::task::{Affinity, StepControl, Task};

// ── Status types ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Queue drained.
    Completed,
    /// A task or the handle cancelled the remaining queue.
    Cancelled,
    /// A reported error ended the run.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Completed,
    /// Completed after a suspension that was resumed by a ping.
    Resumed,
    Failed,
    /// Ran, then cancelled the rest of the queue.
    Cancelled,
    /// Never started.
    Discarded,
}

/// One entry of the execution trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub name: String,
    pub affinity: Affinity,
    pub status: TaskStatus,
}

/// Final state of a run.
#[derive(Debug)]
pub struct PipelineOutcome<C> {
    pub context: C,
    pub status: RunStatus,
    pub trace: Vec<TaskRecord>,
}

impl<C> PipelineOutcome<C> {
    /// Names of tasks that actually ran, in order.
    pub fn executed(&self) -> Vec<&str> {
        self.trace
            .iter()
            .filter(|r| r.status != TaskStatus::Discarded)
            .map(|r| r.name.as_str())
            .collect()
    }
}

type ReportHandler<C, E> = Box<dyn FnOnce(&mut C, E) + Send>;

/// Name of the terminal step that delivers a reported error.
pub const REPORT_TASK: &str = "report-errors";

// ── Pipeline ──

/// Single-use executor for one queue of tasks.
pub struct Pipeline<C, E> {
    shared: Arc<Shared>,
    on_error: Option<ReportHandler<C, E>>,
    foreground: Option<ForegroundThread>,
}

impl<C, E> Default for Pipeline<C, E>
where
    C: Send + 'static,
    E: Routable,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<C, E> Pipeline<C, E>
where
    C: Send + 'static,
    E: Routable,
{
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::new()),
            on_error: None,
            foreground: None,
        }
    }

    /// Run foreground tasks on `thread` instead of a thread started for this run.
    pub fn with_foreground(mut self, thread: ForegroundThread) -> Self {
        self.foreground = Some(thread);
        self
    }

    /// Register the terminal handler for errors routed to
    /// [`ErrorRoute::Report`]. It runs in the foreground as the last step.
    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(&mut C, E) + Send + 'static,
    {
        self.on_error = Some(Box::new(handler));
        self
    }

    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle::new(Arc::clone(&self.shared))
    }

    /// Run `tasks` to completion, cancellation or a reported failure.
    pub async fn run(
        mut self,
        context: C,
        tasks: Vec<Task<C, E>>,
    ) -> Result<PipelineOutcome<C>, PipelineError> {
        let mut queue: VecDeque<Task<C, E>> = tasks.into();
        let mut trace = Vec::new();
        let mut context = context;
        let mut status = RunStatus::Completed;

        let foreground = match self.foreground.take() {
            Some(thread) => thread,
            None => ForegroundThread::spawn().map_err(|err| {
                self.shared.set_phase(Phase::Finished);
                PipelineError::NoForegroundThread(err)
            })?,
        };

        self.shared.set_phase(Phase::Running);
        info!(tasks = queue.len(), "pipeline started");

        while let Some(task) = queue.pop_front() {
            if self.shared.cancel.is_cancelled() {
                discard(&mut trace, std::iter::once(task).chain(queue.drain(..)));
                status = RunStatus::Cancelled;
                break;
            }

            let (name, affinity, action) = task.into_parts();
            debug!(task = %name, ?affinity, "task start");
            let control = StepControl::new(self.handle());

            let (next_context, mut control, result) = match affinity {
                Affinity::Foreground => {
                    let mut moved = context;
                    let ran = foreground
                        .run(move || {
                            let mut control = control;
                            let result = action(&mut moved, &mut control);
                            (moved, control, result)
                        })
                        .await;
                    match ran {
                        Some(parts) => parts,
                        None => {
                            self.shared.set_phase(Phase::Finished);
                            return Err(PipelineError::Panicked { task: name });
                        }
                    }
                }
                Affinity::Background => {
                    let mut moved = context;
                    let joined = tokio::task::spawn_blocking(move || {
                        let mut control = control;
                        let result = action(&mut moved, &mut control);
                        (moved, control, result)
                    })
                    .await;
                    match joined {
                        Ok(parts) => parts,
                        Err(_) => {
                            self.shared.set_phase(Phase::Finished);
                            return Err(PipelineError::Panicked { task: name });
                        }
                    }
                }
            };
            context = next_context;

            if let Err(err) = result {
                match (err.route(), self.on_error.take()) {
                    (ErrorRoute::Report, Some(handler)) => {
                        warn!(task = %name, error = %err, "task failed, reporting");
                        trace.push(record(&name, affinity, TaskStatus::Failed));
                        discard(&mut trace, control.take_inserted().into_iter().chain(queue.drain(..)));
                        let mut moved = context;
                        let ran = foreground
                            .run(move || {
                                handler(&mut moved, err);
                                moved
                            })
                            .await;
                        context = match ran {
                            Some(reported) => reported,
                            None => {
                                self.shared.set_phase(Phase::Finished);
                                return Err(PipelineError::Panicked {
                                    task: REPORT_TASK.to_string(),
                                });
                            }
                        };
                        trace.push(record(REPORT_TASK, Affinity::Foreground, TaskStatus::Completed));
                        status = RunStatus::Failed;
                        break;
                    }
                    (ErrorRoute::Report, None) => {
                        self.shared.set_phase(Phase::Finished);
                        return Err(PipelineError::Unhandled {
                            task: name,
                            source: Box::new(err),
                        });
                    }
                    (ErrorRoute::Fatal, _) => {
                        self.shared.set_phase(Phase::Finished);
                        return Err(PipelineError::Fatal {
                            task: name,
                            source: Box::new(err),
                        });
                    }
                }
            }

            if self.shared.cancel.is_cancelled() {
                debug!(task = %name, "queue cancelled");
                trace.push(record(&name, affinity, TaskStatus::Cancelled));
                discard(&mut trace, control.take_inserted().into_iter().chain(queue.drain(..)));
                status = RunStatus::Cancelled;
                break;
            }

            for inserted in control.take_inserted().into_iter().rev() {
                queue.push_front(inserted);
            }

            if control.is_suspended() {
                debug!(task = %name, "pipeline suspended");
                if !self.shared.wait_resumed().await {
                    trace.push(record(&name, affinity, TaskStatus::Cancelled));
                    discard(&mut trace, queue.drain(..));
                    status = RunStatus::Cancelled;
                    break;
                }
                debug!(task = %name, "pipeline resumed");
                trace.push(record(&name, affinity, TaskStatus::Resumed));
            } else {
                trace.push(record(&name, affinity, TaskStatus::Completed));
            }
        }

        self.shared.set_phase(Phase::Finished);
        info!(?status, "pipeline finished");
        Ok(PipelineOutcome {
            context,
            status,
            trace,
        })
    }
}

fn record(name: &str, affinity: Affinity, status: TaskStatus) -> TaskRecord {
    TaskRecord {
        name: name.to_string(),
        affinity,
        status,
    }
}

fn discard<C, E>(trace: &mut Vec<TaskRecord>, tasks: impl IntoIterator<Item = Task<C, E>>) {
    for task in tasks {
        trace.push(record(task.name(), task.affinity(), TaskStatus::Discarded));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use thiserror::Error;

    #[derive(Error, Debug)]
    enum TestError {
        #[error("boom: {0}")]
        Boom(String),
        #[error("bug")]
        Bug,
    }

    impl Routable for TestError {
        fn route(&self) -> ErrorRoute {
            match self {
                TestError::Boom(_) => ErrorRoute::Report,
                TestError::Bug => ErrorRoute::Fatal,
            }
        }
    }

    type Log = Arc<Mutex<Vec<String>>>;
    type T = Task<Log, TestError>;

    fn push(log: &Log, entry: &str) {
        log.lock().unwrap().push(entry.to_string());
    }

    fn step(name: &'static str) -> T {
        Task::foreground(name, move |log: &mut Log, _| {
            push(log, name);
            Ok(())
        })
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn runs_in_order() {
        let log = Log::default();
        let outcome = Pipeline::new()
            .run(log.clone(), vec![step("t1"), step("t2"), step("t3")])
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(entries(&log), vec!["t1", "t2", "t3"]);
        assert_eq!(outcome.executed(), vec!["t1", "t2", "t3"]);
    }

    #[tokio::test]
    async fn inserted_tasks_run_next_in_order() {
        let log = Log::default();
        let t1: T = Task::foreground("t1", |log: &mut Log, cx| {
            push(log, "t1");
            cx.next([step("a"), step("b")]);
            Ok(())
        });
        Pipeline::new()
            .run(log.clone(), vec![t1, step("t2")])
            .await
            .unwrap();
        assert_eq!(entries(&log), vec!["t1", "a", "b", "t2"]);
    }

    #[tokio::test]
    async fn background_runs_off_the_driving_thread() {
        let log = Log::default();
        let driver = std::thread::current().id();
        let bg: T = Task::background("bg", move |log: &mut Log, _| {
            let here = std::thread::current().id();
            push(log, if here == driver { "same" } else { "other" });
            Ok(())
        });
        let outcome = Pipeline::new()
            .run(log.clone(), vec![step("t1"), bg, step("t3")])
            .await
            .unwrap();
        assert_eq!(entries(&log), vec!["t1", "other", "t3"]);
        assert_eq!(outcome.trace[1].affinity, Affinity::Background);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn foreground_tasks_share_one_thread() {
        let seen: Arc<Mutex<Vec<std::thread::ThreadId>>> = Arc::default();
        let mut tasks: Vec<T> = Vec::new();
        for i in 0..40 {
            let task: T = if i % 2 == 0 {
                let seen = Arc::clone(&seen);
                Task::foreground(format!("fg{i}"), move |_, _| {
                    seen.lock().unwrap().push(std::thread::current().id());
                    Ok(())
                })
            } else {
                Task::background(format!("bg{i}"), |_, _| {
                    std::thread::sleep(std::time::Duration::from_millis(1));
                    Ok(())
                })
            };
            tasks.push(task);
        }
        let outcome = tokio::spawn(Pipeline::new().run(Log::default(), tasks))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 20);
        let distinct: std::collections::HashSet<_> = seen.iter().collect();
        assert_eq!(distinct.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn supplied_foreground_thread_runs_tasks_and_report() {
        let fg = ForegroundThread::spawn().unwrap();
        let owner = fg.thread_id();
        let log = Log::default();
        let check: T = Task::foreground("check", move |log: &mut Log, _| {
            let here = std::thread::current().id();
            push(log, if here == owner { "owner" } else { "elsewhere" });
            Ok(())
        });
        let fail: T = Task::background("fail", |_, _| Err(TestError::Boom("disk".into())));
        let outcome = Pipeline::new()
            .with_foreground(fg.clone())
            .on_error(move |log: &mut Log, _| {
                let here = std::thread::current().id();
                push(log, if here == owner { "report on owner" } else { "report elsewhere" });
            })
            .run(log.clone(), vec![check, fail])
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(entries(&log), vec!["owner", "report on owner"]);

        // the supplied thread outlives the run
        assert_eq!(fg.run(|| std::thread::current().id()).await, Some(owner));
    }

    #[tokio::test]
    async fn suspended_pipeline_waits_for_ping() {
        let log = Log::default();
        let t2: T = Task::foreground("t2", |log: &mut Log, cx| {
            push(log, "t2");
            cx.suspend();
            Ok(())
        });
        let pipeline = Pipeline::new();
        let handle = pipeline.handle();
        let run = tokio::spawn(pipeline.run(log.clone(), vec![step("t1"), t2, step("t3")]));

        while !handle.is_suspended() {
            tokio::task::yield_now().await;
        }
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(entries(&log), vec!["t1", "t2"]);

        assert!(handle.ping());
        let outcome = run.await.unwrap().unwrap();
        assert_eq!(entries(&log), vec!["t1", "t2", "t3"]);
        assert_eq!(outcome.trace[1].status, TaskStatus::Resumed);
    }

    #[tokio::test]
    async fn ping_from_inside_the_suspending_task_is_kept() {
        let log = Log::default();
        let t2: T = Task::foreground("t2", |log: &mut Log, cx| {
            push(log, "t2");
            cx.suspend();
            let handle = cx.handle();
            std::thread::spawn(move || {
                handle.ping();
            })
            .join()
            .unwrap();
            Ok(())
        });
        let outcome = Pipeline::new()
            .run(log.clone(), vec![t2, step("t3")])
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(entries(&log), vec!["t2", "t3"]);
    }

    #[tokio::test]
    async fn cancel_during_suspension_skips_rest() {
        let log = Log::default();
        let t2: T = Task::foreground("t2", |log: &mut Log, cx| {
            push(log, "t2");
            cx.suspend();
            Ok(())
        });
        let pipeline = Pipeline::new();
        let handle = pipeline.handle();
        let run = tokio::spawn(pipeline.run(log.clone(), vec![step("t1"), t2, step("t3")]));

        while !handle.is_suspended() {
            tokio::task::yield_now().await;
        }
        handle.cancel();
        let outcome = run.await.unwrap().unwrap();

        assert_eq!(outcome.status, RunStatus::Cancelled);
        assert_eq!(entries(&log), vec!["t1", "t2"]);
        assert_eq!(outcome.trace.last().unwrap().status, TaskStatus::Discarded);
        // resuming a finished pipeline does nothing
        assert!(!handle.ping());
    }

    #[tokio::test]
    async fn cancel_everything_discards_queue_and_insertions() {
        let log = Log::default();
        let t1: T = Task::foreground("t1", |log: &mut Log, cx| {
            push(log, "t1");
            cx.next([step("inserted")]);
            cx.cancel_everything();
            Ok(())
        });
        let outcome = Pipeline::new()
            .run(log.clone(), vec![t1, step("t2")])
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Cancelled);
        assert_eq!(entries(&log), vec!["t1"]);
        assert_eq!(outcome.executed(), vec!["t1"]);
    }

    #[tokio::test]
    async fn background_result_discarded_after_cancel() {
        let log = Log::default();
        let pipeline = Pipeline::new();
        let handle = pipeline.handle();
        let bg: T = Task::background("bg", move |log: &mut Log, cx| {
            handle.cancel();
            push(log, "bg");
            cx.next([step("follow-up")]);
            Ok(())
        });
        let outcome = pipeline
            .run(log.clone(), vec![bg, step("t2")])
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Cancelled);
        assert_eq!(entries(&log), vec!["bg"]);
    }

    #[tokio::test]
    async fn reported_error_runs_handler_last() {
        let log = Log::default();
        let fail: T = Task::background("fail", |_, _| Err(TestError::Boom("net".into())));
        let outcome = Pipeline::new()
            .on_error(|log: &mut Log, err: TestError| push(log, &format!("report {err}")))
            .run(log.clone(), vec![step("t1"), fail, step("t3")])
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(entries(&log), vec!["t1", "report boom: net"]);
        assert_eq!(outcome.trace.last().unwrap().name, REPORT_TASK);
    }

    #[tokio::test]
    async fn reported_error_without_handler_is_a_defect() {
        let log = Log::default();
        let fail: T = Task::foreground("fail", |_, _| Err(TestError::Boom("x".into())));
        let err = Pipeline::new()
            .run(log, vec![fail, step("t2")])
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Unhandled { ref task, .. } if task == "fail"));
    }

    #[tokio::test]
    async fn fatal_error_bypasses_handler() {
        let log = Log::default();
        let fail: T = Task::foreground("fail", |_, _| Err(TestError::Bug));
        let err = Pipeline::new()
            .on_error(|log: &mut Log, _| push(log, "report"))
            .run(log.clone(), vec![fail])
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Fatal { .. }));
        assert!(entries(&log).is_empty());
    }

    #[tokio::test]
    async fn background_panic_is_fatal() {
        let log = Log::default();
        let bad: T = Task::background("bad", |_, _| panic!("defect"));
        let err = Pipeline::new().run(log, vec![bad]).await.unwrap_err();
        assert!(matches!(err, PipelineError::Panicked { ref task } if task == "bad"));
    }

    #[tokio::test]
    async fn foreground_panic_is_fatal() {
        let log = Log::default();
        let bad: T = Task::foreground("bad", |_, _| panic!("defect"));
        let pipeline = Pipeline::new();
        let handle = pipeline.handle();
        let err = pipeline.run(log, vec![bad, step("after")]).await.unwrap_err();
        assert!(matches!(err, PipelineError::Panicked { ref task } if task == "bad"));
        assert!(handle.is_finished());
    }
}
