pub mod error;
pub mod repo_path;
pub mod types;
pub mod vcs;

pub use error::VcsError;
pub use types::*;
