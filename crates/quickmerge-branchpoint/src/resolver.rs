use quickmerge_core::vcs::VcsClient;
use quickmerge_core::{repo_path, CopyPoint, CopyPointQuery, ResolvedCopyPoint, VcsError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::cache::CopyPointCache;

/// Finds the copy point connecting two branch URLs, cache first.
pub struct BranchPointResolver {
    cache: Arc<dyn CopyPointCache>,
    client: Arc<dyn VcsClient>,
    /// One population lock per repository root.
    populating: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl BranchPointResolver {
    pub fn new(cache: Arc<dyn CopyPointCache>, client: Arc<dyn VcsClient>) -> Self {
        Self {
            cache,
            client,
            populating: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &Arc<dyn CopyPointCache> {
        &self.cache
    }

    /// Copy point between `candidate_a` (the caller's source) and `candidate_b`.
    ///
    /// `Ok(None)` means the two URLs share no copy event: merge everything.
    /// The result is inverted when `candidate_a` is the later branch.
    pub fn get(&self, query: &CopyPointQuery) -> Result<Option<ResolvedCopyPoint>, VcsError> {
        let repository_root = query.repository_root.as_str();
        let url_a = query.candidate_a.as_str();
        let url_b = query.candidate_b.as_str();
        if let Some(hit) = self.cached(repository_root, url_a, url_b) {
            tracing::debug!(url_a, url_b, inverted = hit.is_inverted(), "branch point cache hit");
            return Ok(Some(hit));
        }

        let lock = self.population_lock(repository_root);
        let _populating = lock.lock().unwrap_or_else(|e| e.into_inner());
        // Another caller may have populated the entry while we waited.
        if let Some(hit) = self.cached(repository_root, url_a, url_b) {
            return Ok(Some(hit));
        }

        let Some(copy_point) = self.compute(url_a, url_b)? else {
            tracing::debug!(url_a, url_b, "no copy relation found");
            return Ok(None);
        };
        self.cache.store(repository_root, &copy_point);
        tracing::info!(
            source = %copy_point.source_url,
            target = %copy_point.target_url,
            revision = copy_point.target_revision,
            "branch point recorded"
        );
        Ok(copy_point
            .relates(url_a, url_b)
            .map(|inverted| ResolvedCopyPoint::new(copy_point, inverted)))
    }

    // ── Cache side ──

    fn cached(&self, root: &str, url_a: &str, url_b: &str) -> Option<ResolvedCopyPoint> {
        let candidate = |url: &str| {
            self.cache
                .lookup(root, url)
                .and_then(|cp| cp.relates(url_a, url_b).map(|inverted| (cp, inverted)))
        };
        let winner = match (candidate(url_a), candidate(url_b)) {
            (Some(hit), None) | (None, Some(hit)) => hit,
            (Some(from_a), Some(from_b)) => {
                // Later copy wins; equal revisions mean the same event.
                if from_a.0.target_revision > from_b.0.target_revision {
                    from_a
                } else {
                    from_b
                }
            }
            (None, None) => return None,
        };
        Some(ResolvedCopyPoint::new(winner.0, winner.1))
    }

    fn population_lock(&self, root: &str) -> Arc<Mutex<()>> {
        let mut locks = self.populating.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            locks
                .entry(repo_path::normalize(root).to_string())
                .or_default(),
        )
    }

    // ── History side ──

    /// Copy chain of B reaching A, else of A reaching B.
    fn compute(&self, url_a: &str, url_b: &str) -> Result<Option<CopyPoint>, VcsError> {
        for start in [url_b, url_a] {
            if let Some(copy_point) = self.walk_copies(start, url_a, url_b)? {
                return Ok(Some(copy_point));
            }
        }
        Ok(None)
    }

    /// Follows copy-from events backward from `start` while their revisions
    /// decrease.
    ///
    /// When the other URL is only reached through intermediate branches, the
    /// result targets the branch holding `start` and is dated at the copy that
    /// left the other URL, so the commits of the intermediate branches stay
    /// above the history bound.
    fn walk_copies(
        &self,
        start: &str,
        url_a: &str,
        url_b: &str,
    ) -> Result<Option<CopyPoint>, VcsError> {
        let mut current = start.to_string();
        let mut branch: Option<String> = None;
        let mut limit = u64::MAX;
        let mut hops = 0usize;

        while let Some(info) = self.client.copy_from_info(&current)? {
            if info.copy_revision > limit {
                break;
            }
            hops += 1;
            let target_url = branch.get_or_insert_with(|| info.copied_url.clone()).clone();
            let candidate = CopyPoint {
                source_url: info.source_url.clone(),
                source_revision: info.source_revision,
                target_url,
                target_revision: info.copy_revision,
            };
            if candidate.relates(url_a, url_b).is_some() {
                if hops > 1 {
                    tracing::debug!(start, hops, "branch point found through copy chain");
                }
                return Ok(Some(candidate));
            }
            let below = repo_path::relative_to(&current, &info.copied_url).unwrap_or("");
            current = repo_path::join(&info.source_url, below);
            limit = info.source_revision.min(info.copy_revision.saturating_sub(1));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCopyPointCache;
    use crate::persist::PersistentCopyPointCache;
    use quickmerge_core::vcs::{ChangeSetStream, CopyFromInfo, MergeInfoProperty, NestedRoot};
    use quickmerge_core::WorkingCopyRef;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ROOT: &str = "svn://h/repo";
    const TRUNK: &str = "svn://h/repo/trunk";
    const FEATURE: &str = "svn://h/repo/branches/feature";
    const SPIKE: &str = "svn://h/repo/branches/spike";

    /// Answers copy-from queries from a fixed table and counts them.
    #[derive(Default)]
    struct CopyTable {
        copies: Vec<CopyFromInfo>,
        calls: AtomicUsize,
    }

    impl CopyTable {
        fn with(mut self, source: &str, source_rev: u64, copied: &str, copy_rev: u64) -> Self {
            self.copies.push(CopyFromInfo {
                copied_url: copied.into(),
                source_url: source.into(),
                source_revision: source_rev,
                copy_revision: copy_rev,
            });
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl VcsClient for CopyTable {
        fn log_history(&self, url: &str, _from: u64) -> Result<ChangeSetStream, VcsError> {
            Err(VcsError::history(url, "not scripted"))
        }

        fn copy_from_info(&self, url: &str) -> Result<Option<CopyFromInfo>, VcsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .copies
                .iter()
                .filter(|c| repo_path::is_under(url, &c.copied_url))
                .max_by_key(|c| c.copied_url.len())
                .cloned())
        }

        fn merge_metadata(&self, _wc: &WorkingCopyRef) -> Result<Vec<MergeInfoProperty>, VcsError> {
            Ok(Vec::new())
        }

        fn nested_roots(&self, _wc: &WorkingCopyRef) -> Result<Vec<NestedRoot>, VcsError> {
            Ok(Vec::new())
        }
    }

    fn resolver(table: CopyTable) -> (BranchPointResolver, Arc<CopyTable>) {
        let table = Arc::new(table);
        let resolver = BranchPointResolver::new(
            Arc::new(MemoryCopyPointCache::new()),
            Arc::clone(&table) as Arc<dyn VcsClient>,
        );
        (resolver, table)
    }

    #[test]
    fn forward_and_reverse_queries_agree() {
        let (resolver, _) = resolver(CopyTable::default().with(TRUNK, 100, FEATURE, 101));

        let forward = resolver.get(&CopyPointQuery::new(ROOT, TRUNK, FEATURE)).unwrap().unwrap();
        let reverse = resolver.get(&CopyPointQuery::new(ROOT, FEATURE, TRUNK)).unwrap().unwrap();

        assert_eq!(forward.as_true(), reverse.as_true());
        assert!(!forward.is_inverted());
        assert!(reverse.is_inverted());
        assert_eq!(reverse.as_queried().source_url, FEATURE);
        assert_eq!(forward.as_true().source_revision, 100);
        assert_eq!(forward.as_true().target_revision, 101);
    }

    #[test]
    fn second_query_is_served_from_cache() {
        let (resolver, table) = resolver(CopyTable::default().with(TRUNK, 100, FEATURE, 101));

        let first = resolver.get(&CopyPointQuery::new(ROOT, FEATURE, TRUNK)).unwrap();
        let calls = table.calls();
        let second = resolver.get(&CopyPointQuery::new(ROOT, FEATURE, TRUNK)).unwrap();
        let swapped = resolver.get(&CopyPointQuery::new(ROOT, TRUNK, FEATURE)).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.unwrap().as_true(), swapped.unwrap().as_true());
        assert_eq!(table.calls(), calls);
    }

    #[test]
    fn sub_path_query_uses_branch_entry() {
        let (resolver, table) = resolver(CopyTable::default().with(TRUNK, 100, FEATURE, 101));
        resolver.get(&CopyPointQuery::new(ROOT, FEATURE, TRUNK)).unwrap();
        let calls = table.calls();

        let sub = resolver
            .get(&CopyPointQuery::new(ROOT, "svn://h/repo/branches/feature/src", "svn://h/repo/trunk/src"))
            .unwrap()
            .unwrap();
        assert!(sub.is_inverted());
        assert_eq!(sub.as_true().target_url, FEATURE);
        assert_eq!(table.calls(), calls);
    }

    #[test]
    fn sibling_branch_is_not_matched_by_prefix() {
        let (resolver, _) = resolver(
            CopyTable::default()
                .with(TRUNK, 100, FEATURE, 101)
                .with(TRUNK, 300, "svn://h/repo/branches/feature-2", 301),
        );
        resolver.get(&CopyPointQuery::new(ROOT, FEATURE, TRUNK)).unwrap();

        let other = resolver
            .get(&CopyPointQuery::new(ROOT, "svn://h/repo/branches/feature-2", TRUNK))
            .unwrap()
            .unwrap();
        assert_eq!(other.as_true().target_revision, 301);
    }

    #[test]
    fn unrelated_urls_resolve_to_none() {
        let (resolver, _) = resolver(CopyTable::default().with(TRUNK, 100, FEATURE, 101));
        assert_eq!(resolver.get(&CopyPointQuery::new(ROOT, TRUNK, "svn://h/repo/vendor/lib")).unwrap(), None);
    }

    #[test]
    fn later_copy_wins_between_two_candidates() {
        let cache = Arc::new(MemoryCopyPointCache::new());
        // Branch recreated from trunk: both records relate the same URLs.
        let old = CopyPoint {
            source_url: TRUNK.into(),
            source_revision: 10,
            target_url: FEATURE.into(),
            target_revision: 11,
        };
        let newer = CopyPoint {
            source_url: TRUNK.into(),
            source_revision: 50,
            target_url: "svn://h/repo/branches/feature/sub".into(),
            target_revision: 51,
        };
        cache.store(ROOT, &newer);
        cache.store(ROOT, &old);
        let resolver = BranchPointResolver::new(cache, Arc::new(CopyTable::default()));

        let hit = resolver
            .get(&CopyPointQuery::new(ROOT, "svn://h/repo/branches/feature/sub", TRUNK))
            .unwrap()
            .unwrap();
        assert_eq!(hit.as_true(), &newer);
        assert!(hit.is_inverted());
    }

    #[test]
    fn stale_candidate_falls_through_to_history() {
        let (resolver, table) = resolver(
            CopyTable::default()
                .with(TRUNK, 100, FEATURE, 101)
                .with(FEATURE, 150, "svn://h/repo/branches/spike", 151),
        );
        resolver.get(&CopyPointQuery::new(ROOT, FEATURE, TRUNK)).unwrap();
        let calls = table.calls();

        let spike = resolver
            .get(&CopyPointQuery::new(ROOT, "svn://h/repo/branches/spike", FEATURE))
            .unwrap()
            .unwrap();
        assert_eq!(spike.as_true().source_revision, 150);
        assert!(table.calls() > calls);
    }

    #[test]
    fn branch_of_branch_resolves_through_chain() {
        let (resolver, _) = resolver(
            CopyTable::default()
                .with(TRUNK, 100, FEATURE, 101)
                .with(FEATURE, 150, SPIKE, 151),
        );

        let reintegrate = resolver.get(&CopyPointQuery::new(ROOT, SPIKE, TRUNK)).unwrap().unwrap();
        assert!(reintegrate.is_inverted());
        let chain = reintegrate.as_true();
        assert_eq!(chain.source_url, TRUNK);
        assert_eq!(chain.source_revision, 100);
        assert_eq!(chain.target_url, SPIKE);
        assert_eq!(chain.target_revision, 101);

        let forward = resolver.get(&CopyPointQuery::new(ROOT, TRUNK, SPIKE)).unwrap().unwrap();
        assert!(!forward.is_inverted());
        assert_eq!(forward.as_true(), chain);

        let sub = resolver
            .get(&CopyPointQuery::new(ROOT, "svn://h/repo/trunk/src", "svn://h/repo/branches/spike/src"))
            .unwrap()
            .unwrap();
        assert_eq!(sub.as_true(), chain);
    }

    #[test]
    fn copy_chain_stops_when_revisions_stop_decreasing() {
        let (resolver, table) = resolver(
            CopyTable::default()
                .with("svn://h/repo/branches/b", 50, "svn://h/repo/branches/a", 60)
                .with("svn://h/repo/branches/a", 70, "svn://h/repo/branches/b", 80),
        );
        let none = resolver
            .get(&CopyPointQuery::new(ROOT, "svn://h/repo/branches/a", "svn://h/repo/vendor"))
            .unwrap();
        assert_eq!(none, None);
        // vendor: one miss; a: its own copy, then b's later copy ends the walk
        assert_eq!(table.calls(), 3);
    }

    #[test]
    fn history_errors_propagate() {
        struct Offline;
        impl VcsClient for Offline {
            fn log_history(&self, _: &str, _: u64) -> Result<ChangeSetStream, VcsError> {
                Err(VcsError::Network("offline".into()))
            }
            fn copy_from_info(&self, _: &str) -> Result<Option<CopyFromInfo>, VcsError> {
                Err(VcsError::Network("offline".into()))
            }
            fn merge_metadata(&self, _: &WorkingCopyRef) -> Result<Vec<MergeInfoProperty>, VcsError> {
                Ok(Vec::new())
            }
            fn nested_roots(&self, _: &WorkingCopyRef) -> Result<Vec<NestedRoot>, VcsError> {
                Ok(Vec::new())
            }
        }
        let resolver = BranchPointResolver::new(Arc::new(MemoryCopyPointCache::new()), Arc::new(Offline));
        let err = resolver.get(&CopyPointQuery::new(ROOT, FEATURE, TRUNK)).unwrap_err();
        assert!(matches!(err, VcsError::Network(_)));
    }

    #[test]
    fn persisted_entry_answers_without_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bp.json");
        {
            let table = Arc::new(CopyTable::default().with(TRUNK, 100, FEATURE, 101));
            let resolver = BranchPointResolver::new(
                Arc::new(PersistentCopyPointCache::open(&path)),
                table,
            );
            resolver.get(&CopyPointQuery::new(ROOT, TRUNK, FEATURE)).unwrap();
        }

        let table = Arc::new(CopyTable::default());
        let resolver = BranchPointResolver::new(
            Arc::new(PersistentCopyPointCache::open(&path)),
            Arc::clone(&table) as Arc<dyn VcsClient>,
        );
        let hit = resolver.get(&CopyPointQuery::new(ROOT, FEATURE, TRUNK)).unwrap().unwrap();
        assert_eq!(hit.as_true().target_revision, 101);
        assert_eq!(table.calls(), 0);
    }

    #[test]
    fn concurrent_misses_populate_once() {
        let (resolver, table) = resolver(CopyTable::default().with(TRUNK, 100, FEATURE, 101));
        let resolver = Arc::new(resolver);
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let resolver = Arc::clone(&resolver);
                std::thread::spawn(move || resolver.get(&CopyPointQuery::new(ROOT, FEATURE, TRUNK)).unwrap())
            })
            .collect();
        for t in threads {
            assert!(t.join().unwrap().is_some());
        }
        // Only the first caller walks history: B (trunk) then A (feature).
        assert_eq!(table.calls(), 2);
    }
}
