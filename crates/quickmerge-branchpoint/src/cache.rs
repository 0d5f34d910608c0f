use quickmerge_core::repo_path;
use quickmerge_core::CopyPoint;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

/// Cache port used by the resolver.
pub trait CopyPointCache: Send + Sync {
    /// Longest-prefix match of `url` among the cached endpoint URLs.
    fn lookup(&self, repository_root: &str, url: &str) -> Option<CopyPoint>;

    /// Record `copy_point` under both of its endpoint URLs.
    fn store(&self, repository_root: &str, copy_point: &CopyPoint);
}

// ── Sorted index ──

/// Sorted URL → copy point map of one repository root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootIndex {
    entries: BTreeMap<String, CopyPoint>,
}

impl RootIndex {
    pub fn from_entries(entries: BTreeMap<String, CopyPoint>) -> Self {
        Self { entries }
    }

    /// Entry of the longest cached URL that `url` equals or lies under.
    pub fn lookup(&self, url: &str) -> Option<&CopyPoint> {
        repo_path::prefixes(url).find_map(|prefix| self.entries.get(prefix))
    }

    /// Insert under both endpoints, overwriting previous entries for them.
    pub fn insert(&mut self, copy_point: &CopyPoint) {
        for url in [&copy_point.source_url, &copy_point.target_url] {
            self.entries
                .insert(repo_path::normalize(url).to_string(), copy_point.clone());
        }
    }

    pub fn entries(&self) -> &BTreeMap<String, CopyPoint> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── In-memory cache ──

/// Process-local cache. One `RwLock` per repository root: writers of one root
/// never block readers of another.
#[derive(Debug, Default)]
pub struct MemoryCopyPointCache {
    roots: Mutex<HashMap<String, Arc<RwLock<RootIndex>>>>,
}

impl MemoryCopyPointCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_roots(roots: BTreeMap<String, BTreeMap<String, CopyPoint>>) -> Self {
        let roots = roots
            .into_iter()
            .map(|(root, entries)| {
                (
                    root,
                    Arc::new(RwLock::new(RootIndex::from_entries(entries))),
                )
            })
            .collect();
        Self {
            roots: Mutex::new(roots),
        }
    }

    fn root(&self, repository_root: &str) -> Arc<RwLock<RootIndex>> {
        let mut roots = self.roots.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            roots
                .entry(repo_path::normalize(repository_root).to_string())
                .or_default(),
        )
    }

    fn existing(&self, repository_root: &str) -> Option<Arc<RwLock<RootIndex>>> {
        let roots = self.roots.lock().unwrap_or_else(|e| e.into_inner());
        roots.get(repo_path::normalize(repository_root)).cloned()
    }

    /// Snapshot of one root's index (empty for an unknown root).
    pub fn snapshot(&self, repository_root: &str) -> RootIndex {
        self.existing(repository_root)
            .map(|root| root.read().unwrap_or_else(|e| e.into_inner()).clone())
            .unwrap_or_default()
    }

    /// Known repository roots, sorted.
    pub fn roots(&self) -> Vec<String> {
        let roots = self.roots.lock().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = roots.keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop every entry of one root. Returns how many URL entries went away.
    pub fn evict_root(&self, repository_root: &str) -> usize {
        let mut roots = self.roots.lock().unwrap_or_else(|e| e.into_inner());
        roots
            .remove(repo_path::normalize(repository_root))
            .map(|index| index.read().unwrap_or_else(|e| e.into_inner()).len())
            .unwrap_or(0)
    }
}

impl CopyPointCache for MemoryCopyPointCache {
    fn lookup(&self, repository_root: &str, url: &str) -> Option<CopyPoint> {
        let root = self.existing(repository_root)?;
        let index = root.read().unwrap_or_else(|e| e.into_inner());
        index.lookup(url).cloned()
    }

    fn store(&self, repository_root: &str, copy_point: &CopyPoint) {
        let root = self.root(repository_root);
        let mut index = root.write().unwrap_or_else(|e| e.into_inner());
        index.insert(copy_point);
    }
}
