use quickmerge_core::{repo_path, ChangeSet, Intersection, LocalEdit, LocalEditSet, WorkingCopyRef};
use std::collections::BTreeSet;

/// Which local edits count as colliding with the proposed merge.
#[derive(Debug, Clone, Copy)]
pub enum IntersectionMode<'a> {
    /// Any local edit collides: the remaining history is unknown.
    MergeAll,
    /// Only edits of files the selected change sets touch.
    Selected(PathMapping<'a>),
}

/// Maps source branch paths onto the target working copy.
#[derive(Debug, Clone, Copy)]
pub struct PathMapping<'a> {
    /// Repository-absolute path of the merge source (`/branches/feature`).
    pub source_path: &'a str,
    pub working_copy: &'a WorkingCopyRef,
}

impl PathMapping<'_> {
    /// Repository path in the target that `changed` lands on.
    fn target_path(&self, changed: &str) -> Option<String> {
        let relative = repo_path::relative_to(changed, self.source_path)?;
        let target_root =
            repo_path::repo_relative(&self.working_copy.url, &self.working_copy.repository_root)?;
        Some(repo_path::join(&target_root, relative))
    }

    fn edit_paths(&self, edit: &LocalEdit) -> Vec<String> {
        let before = edit.before.as_ref().map(|s| s.path.as_path());
        let after = edit.after.as_ref().map(|s| s.path.as_path());
        std::iter::once(edit.file_path.as_path())
            .chain(before)
            .chain(after)
            .filter_map(|p| self.working_copy.repo_path_of(p))
            .collect()
    }
}

/// Local edits that collide with `proposed`, grouped by changelist.
pub fn compute_intersection(
    proposed: &[ChangeSet],
    local_edits: &LocalEditSet,
    mode: IntersectionMode<'_>,
) -> Intersection {
    let mapping = match mode {
        IntersectionMode::MergeAll => return local_edits.clone(),
        IntersectionMode::Selected(mapping) => mapping,
    };

    let touched: BTreeSet<String> = proposed
        .iter()
        .flat_map(|cs| cs.changed_paths.iter())
        .filter_map(|p| mapping.target_path(p))
        .collect();
    if touched.is_empty() {
        return Intersection::new();
    }

    let mut intersection = Intersection::new();
    for (changelist, edits) in local_edits.changelists() {
        for edit in edits {
            // A touched directory covers every file below it.
            let collides = mapping
                .edit_paths(edit)
                .iter()
                .any(|path| repo_path::prefixes(path).any(|p| touched.contains(p)));
            if collides {
                intersection.insert(changelist, edit.clone());
            }
        }
    }
    intersection
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickmerge_core::WorkingCopyFormat;
    use std::path::PathBuf;

    fn working_copy() -> WorkingCopyRef {
        WorkingCopyRef {
            local_path: PathBuf::from("/work/trunk"),
            url: "svn://h/repo/trunk".into(),
            repository_root: "svn://h/repo".into(),
            format: WorkingCopyFormat::V1_8,
        }
    }

    fn local() -> LocalEditSet {
        LocalEditSet::new()
            .with("Default", LocalEdit::modified("/work/trunk/src/a.rs", 40))
            .with("Default", LocalEdit::modified("/work/trunk/src/b.rs", 40))
            .with("Docs", LocalEdit::modified("/work/trunk/docs/guide.md", 40))
    }

    fn selected<'a>(wc: &'a WorkingCopyRef) -> IntersectionMode<'a> {
        IntersectionMode::Selected(PathMapping {
            source_path: "/branches/feature",
            working_copy: wc,
        })
    }

    #[test]
    fn merge_all_includes_every_edit() {
        let edits = local();
        let result = compute_intersection(&[], &edits, IntersectionMode::MergeAll);
        assert_eq!(result, edits);
    }

    #[test]
    fn selected_keeps_touched_files_under_their_changelist() {
        let wc = working_copy();
        let proposed = [ChangeSet::new(42, ["/branches/feature/src/a.rs"], "fix a")];
        let result = compute_intersection(&proposed, &local(), selected(&wc));
        assert_eq!(result.len(), 1);
        let default = result.get("Default").unwrap();
        assert!(default.contains(&LocalEdit::modified("/work/trunk/src/a.rs", 40)));
        assert!(result.get("Docs").is_none());
    }

    #[test]
    fn touched_directory_covers_files_below() {
        let wc = working_copy();
        let proposed = [ChangeSet::new(43, ["/branches/feature/src"], "move src")];
        let result = compute_intersection(&proposed, &local(), selected(&wc));
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn paths_outside_the_source_are_ignored() {
        let wc = working_copy();
        let proposed = [ChangeSet::new(44, ["/branches/other/src/a.rs", "/trunk/src/a.rs"], "x")];
        assert!(compute_intersection(&proposed, &local(), selected(&wc)).is_empty());
    }

    #[test]
    fn shrinking_the_selection_never_grows_the_intersection() {
        let wc = working_copy();
        let all = [
            ChangeSet::new(42, ["/branches/feature/src/a.rs"], ""),
            ChangeSet::new(43, ["/branches/feature/docs/guide.md"], ""),
            ChangeSet::new(44, ["/branches/feature/src/b.rs", "/branches/feature/README"], ""),
        ];
        let edits = local();
        for len in (0..all.len()).rev() {
            let bigger = compute_intersection(&all[..=len], &edits, selected(&wc)).all_edits();
            let smaller = compute_intersection(&all[..len], &edits, selected(&wc)).all_edits();
            assert!(smaller.is_subset(&bigger), "selection of {len} grew the intersection");
        }
        assert_eq!(
            compute_intersection(&all, &edits, selected(&wc)).len(),
            3
        );
    }
}
