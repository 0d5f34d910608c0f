use anyhow::{Context, Result};
use quickmerge_core::repo_path;
use quickmerge_core::CopyPoint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::cache::{CopyPointCache, MemoryCopyPointCache, RootIndex};

const FORMAT_VERSION: u32 = 1;

/// On-disk layout: `{ "version": 1, "roots": { root: { url: copy_point } } }`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    #[serde(default)]
    roots: BTreeMap<String, BTreeMap<String, CopyPoint>>,
}

/// Branch point cache that survives restarts.
///
/// Reads are served from memory. Every store is written through to a JSON
/// file; concurrent processes merge their entries under an exclusive lock.
#[derive(Debug)]
pub struct PersistentCopyPointCache {
    path: PathBuf,
    memory: MemoryCopyPointCache,
}

impl PersistentCopyPointCache {
    /// Open (or start) the cache file at `path`. An unreadable or corrupt file
    /// is logged and treated as empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file = match load_file(&path) {
            Ok(file) => file.unwrap_or_default(),
            Err(err) => {
                tracing::warn!("branch point cache unreadable, starting empty: {err:#}");
                CacheFile::default()
            }
        };
        Self {
            memory: MemoryCopyPointCache::with_roots(file.roots),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Known repository roots, sorted.
    pub fn roots(&self) -> Vec<String> {
        self.memory.roots()
    }

    /// All URL entries of one root.
    pub fn entries(&self, repository_root: &str) -> RootIndex {
        self.memory.snapshot(repository_root)
    }

    /// Drop a repository root from memory and disk.
    pub fn evict_root(&self, repository_root: &str) -> Result<usize> {
        let removed = self.memory.evict_root(repository_root);
        let root = repo_path::normalize(repository_root).to_string();
        self.update_file(|file| {
            file.roots.remove(&root);
        })?;
        Ok(removed)
    }

    fn persist(&self, repository_root: &str, copy_point: &CopyPoint) -> Result<()> {
        let root = repo_path::normalize(repository_root).to_string();
        self.update_file(|file| {
            let mut index = RootIndex::from_entries(file.roots.remove(&root).unwrap_or_default());
            index.insert(copy_point);
            file.roots.insert(root.clone(), index.entries().clone());
        })
    }

    /// Re-read, mutate and atomically rewrite the file under the lock.
    fn update_file(&self, mutate: impl FnOnce(&mut CacheFile)) -> Result<()> {
        let _guard = quickmerge_store::lock_file(&quickmerge_store::lock_path_for(&self.path))?;
        let mut file = match load_file(&self.path) {
            Ok(file) => file.unwrap_or_default(),
            Err(err) => {
                tracing::warn!("replacing corrupt branch point cache: {err:#}");
                CacheFile::default()
            }
        };
        file.version = FORMAT_VERSION;
        mutate(&mut file);
        let data = serde_json::to_string_pretty(&file)?;
        quickmerge_store::write_atomic(&self.path, data.as_bytes())
            .with_context(|| format!("saving branch points: {}", self.path.display()))?;
        Ok(())
    }
}

impl CopyPointCache for PersistentCopyPointCache {
    fn lookup(&self, repository_root: &str, url: &str) -> Option<CopyPoint> {
        self.memory.lookup(repository_root, url)
    }

    fn store(&self, repository_root: &str, copy_point: &CopyPoint) {
        self.memory.store(repository_root, copy_point);
        if let Err(err) = self.persist(repository_root, copy_point) {
            tracing::warn!("branch point not persisted: {err:#}");
        }
    }
}

fn load_file(path: &Path) -> Result<Option<CacheFile>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading branch points: {}", path.display()))?;
    let file: CacheFile = serde_json::from_str(&content)
        .with_context(|| format!("parsing branch points: {}", path.display()))?;
    if file.version > FORMAT_VERSION {
        anyhow::bail!(
            "branch points {} has unsupported version {}",
            path.display(),
            file.version
        );
    }
    Ok(Some(file))
}
