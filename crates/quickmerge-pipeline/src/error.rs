use thiserror::Error;

/// How the pipeline treats an error returned by a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorRoute {
    /// Domain failure: drop the queue and hand the error to the report handler.
    Report,
    /// Programming defect: terminate the run.
    Fatal,
}

/// Error types that tasks may return.
pub trait Routable: std::error::Error + Send + Sync + 'static {
    fn route(&self) -> ErrorRoute;
}

/// Run-terminating defects. Domain failures never surface here when a report
/// handler is registered.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("task \"{task}\" failed without a report handler: {source}")]
    Unhandled {
        task: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("task \"{task}\" failed fatally: {source}")]
    Fatal {
        task: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("task \"{task}\" panicked")]
    Panicked { task: String },

    #[error("cannot start the foreground thread: {0}")]
    NoForegroundThread(#[source] std::io::Error),
}
