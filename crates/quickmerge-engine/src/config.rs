use anyhow::{Context, Result};
use quickmerge_core::repo_path;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Project-level merge settings, `.quickmerge/config.json`.
///
/// Missing keys take their defaults, so a partial file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Revisions loaded per "load more" step when picking from history.
    pub history_page_size: usize,
    /// Ask before merging into a working copy with switched or external roots.
    pub check_nested_working_copies: bool,
    /// Changelist receiving merged files. `{branch}` is the branch label.
    pub changelist_name_template: String,
    /// Label of shelved local edits. `{branch}` is the branch label.
    pub shelve_label_template: String,
    /// Directory names holding a mainline (`trunk`).
    pub trunk_names: Vec<String>,
    /// Directories whose children are branches (`branches`, `tags`).
    pub branch_parents: Vec<String>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            history_page_size: 50,
            check_nested_working_copies: true,
            changelist_name_template: "Merge from {branch}".to_string(),
            shelve_label_template: "Local changes before merge from {branch}".to_string(),
            trunk_names: vec!["trunk".to_string()],
            branch_parents: vec!["branches".to_string(), "tags".to_string()],
        }
    }
}

/// `<project>/.quickmerge/config.json`
pub fn config_path(project_dir: &Path) -> PathBuf {
    project_dir.join(".quickmerge").join("config.json")
}

impl MergeConfig {
    /// Load the project config; an absent file gives the defaults and an
    /// unreadable one is logged and ignored.
    pub fn load(project_dir: &Path) -> Self {
        let path = config_path(project_dir);
        match Self::read(&path) {
            Ok(Some(config)) => config,
            Ok(None) => Self::default(),
            Err(err) => {
                tracing::warn!("ignoring merge config: {err:#}");
                Self::default()
            }
        }
    }

    /// Strict variant of [`load`](Self::load).
    pub fn read(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let mut config: MergeConfig = serde_json::from_str(&content)
            .with_context(|| format!("parsing config: {}", path.display()))?;
        if config.history_page_size == 0 {
            tracing::warn!("history_page_size must be positive, using default");
            config.history_page_size = Self::default().history_page_size;
        }
        Ok(Some(config))
    }

    pub fn save(&self, project_dir: &Path) -> Result<()> {
        let path = config_path(project_dir);
        let data = serde_json::to_string_pretty(self)?;
        quickmerge_store::write_atomic(&path, data.as_bytes())
            .with_context(|| format!("saving config: {}", path.display()))?;
        Ok(())
    }

    pub fn changelist_name(&self, branch_label: &str) -> String {
        self.changelist_name_template.replace("{branch}", branch_label)
    }

    pub fn shelve_label(&self, branch_label: &str) -> String {
        self.shelve_label_template.replace("{branch}", branch_label)
    }

    /// Split a URL into its branch root URL and the path below it, using the
    /// configured layout. `svn://h/r/branches/x/src` → (`svn://h/r/branches/x`, `src`).
    pub fn split_branch_url(&self, url: &str, repository_root: &str) -> Option<(String, String)> {
        let relative = repo_path::relative_to(url, repository_root)?;
        let segments: Vec<&str> = relative.split('/').filter(|s| !s.is_empty()).collect();
        let is = |names: &[String], segment: &str| names.iter().any(|n| n == segment);

        let depth = segments.iter().enumerate().find_map(|(i, segment)| {
            if is(&self.trunk_names, segment) {
                Some(i + 1)
            } else if is(&self.branch_parents, segment) && i + 1 < segments.len() {
                Some(i + 2)
            } else {
                None
            }
        })?;
        let branch_root = repo_path::join(repository_root, &segments[..depth].join("/"));
        Some((branch_root, segments[depth..].join("/")))
    }
}
