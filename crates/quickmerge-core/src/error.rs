use thiserror::Error;

/// Failures reported by the external VCS collaborators.
///
/// All of them are transient from the engine's point of view: the run is
/// aborted and reported, nothing is retried automatically.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum VcsError {
    #[error("repository unreachable: {0}")]
    Network(String),

    #[error("history query failed for {url}: {message}")]
    History { url: String, message: String },

    #[error("merge execution failed: {0}")]
    Execution(String),

    #[error("shelving local changes failed: {0}")]
    Shelve(String),

    #[error("changelist bookkeeping failed: {0}")]
    Changelist(String),
}

impl VcsError {
    pub fn history(url: &str, message: impl Into<String>) -> Self {
        VcsError::History {
            url: url.to_string(),
            message: message.into(),
        }
    }
}
