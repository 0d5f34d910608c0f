use quickmerge_core::VcsError;
use quickmerge_pipeline::{ErrorRoute, Routable};
use thiserror::Error;

/// Failure of one merge run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    #[error("cannot merge {source_url} into {target_url}: one contains the other")]
    SelfMerge {
        source_url: String,
        target_url: String,
    },

    #[error("malformed URL {url:?}: {reason}")]
    MalformedUrl { url: String, reason: String },

    #[error(transparent)]
    Vcs(#[from] VcsError),

    /// Broken workflow invariant. Never reported to the operator as a merge
    /// problem.
    #[error("merge workflow defect: {0}")]
    Defect(String),
}

impl MergeError {
    pub fn malformed(url: &str, reason: impl Into<String>) -> Self {
        MergeError::MalformedUrl {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}

impl Routable for MergeError {
    fn route(&self) -> ErrorRoute {
        match self {
            MergeError::SelfMerge { .. } | MergeError::MalformedUrl { .. } | MergeError::Vcs(_) => {
                ErrorRoute::Report
            }
            MergeError::Defect(_) => ErrorRoute::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_defects_are_fatal() {
        assert_eq!(
            MergeError::malformed("x", "no scheme").route(),
            ErrorRoute::Report
        );
        assert_eq!(
            MergeError::from(VcsError::Network("down".into())).route(),
            ErrorRoute::Report
        );
        assert_eq!(MergeError::Defect("bug".into()).route(), ErrorRoute::Fatal);
    }
}
