use quickmerge_branchpoint::{CopyPointCache, PersistentCopyPointCache, RootIndex};
use quickmerge_core::CopyPoint;
use std::path::{Path, PathBuf};

/// Per-project branch point file in the store.
pub fn default_cache_path(repo_root: &Path) -> PathBuf {
    quickmerge_store::branch_points_file(&quickmerge_store::project_id(repo_root))
}

// ── Command Implementations ──

/// `quickmerge cache list`
pub fn list(cache_path: &Path) -> anyhow::Result<()> {
    let cache = PersistentCopyPointCache::open(cache_path);
    let roots = cache.roots();
    if roots.is_empty() {
        println!("(no cached branch points)");
        return Ok(());
    }
    for root in roots {
        let entries = cache.entries(&root);
        println!("{root}  ({} entries)", entries.len());
    }
    Ok(())
}

/// `quickmerge cache show <root>`
pub fn show(cache_path: &Path, root: &str, json: bool) -> anyhow::Result<()> {
    let cache = PersistentCopyPointCache::open(cache_path);
    let entries = cache.entries(root);
    if json {
        println!("{}", serde_json::to_string_pretty(entries.entries())?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("(no entries for {root})");
        return Ok(());
    }
    print!("{}", render_entries(&entries));
    Ok(())
}

/// `quickmerge cache lookup <root> <url>`
pub fn lookup(cache_path: &Path, root: &str, url: &str) -> anyhow::Result<()> {
    let cache = PersistentCopyPointCache::open(cache_path);
    match cache.lookup(root, url) {
        Some(copy_point) => println!("{}", describe(&copy_point)),
        None => println!("(not cached)"),
    }
    Ok(())
}

/// `quickmerge cache evict <root>`
pub fn evict(cache_path: &Path, root: &str) -> anyhow::Result<()> {
    let cache = PersistentCopyPointCache::open(cache_path);
    let removed = cache.evict_root(root)?;
    println!("Evicted {removed} entries for {root}");
    Ok(())
}

// ── Helpers ──

fn describe(copy_point: &CopyPoint) -> String {
    format!(
        "{}@{} -> {}@{}",
        copy_point.source_url,
        copy_point.source_revision,
        copy_point.target_url,
        copy_point.target_revision
    )
}

fn render_entries(index: &RootIndex) -> String {
    let mut out = String::new();
    for (url, copy_point) in index.entries() {
        out.push_str(&format!("{url}\n    {}\n", describe(copy_point)));
    }
    out
}
