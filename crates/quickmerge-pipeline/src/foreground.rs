use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread::{self, ThreadId};

type Job = Box<dyn FnOnce() + Send>;

/// Name given to threads started by [`ForegroundThread::spawn`].
pub const FOREGROUND_THREAD_NAME: &str = "pipeline-foreground";

/// One OS thread that runs every foreground task handed to it, in order.
///
/// Clones share the thread. It exits once the last clone is dropped.
#[derive(Clone, Debug)]
pub struct ForegroundThread {
    jobs: mpsc::Sender<Job>,
    id: ThreadId,
}

impl ForegroundThread {
    pub fn spawn() -> std::io::Result<Self> {
        let (jobs, queue) = mpsc::channel::<Job>();
        let thread = thread::Builder::new()
            .name(FOREGROUND_THREAD_NAME.to_string())
            .spawn(move || {
                for job in queue {
                    job();
                }
            })?;
        Ok(Self {
            jobs,
            id: thread.thread().id(),
        })
    }

    pub fn thread_id(&self) -> ThreadId {
        self.id
    }

    /// Run `job` on the owner thread and wait for it without blocking the runtime.
    ///
    /// `None` when the job panicked.
    pub(crate) async fn run<T, F>(&self, job: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (done, result) = tokio::sync::oneshot::channel();
        let job: Job = Box::new(move || {
            let caught = panic::catch_unwind(AssertUnwindSafe(job));
            let _ = done.send(caught.ok());
        });
        // The receiving loop only ends when every sender is gone, and we hold one.
        self.jobs.send(job).ok()?;
        result.await.ok().flatten()
    }
}
