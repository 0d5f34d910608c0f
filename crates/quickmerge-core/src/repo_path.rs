//! Segment-aware helpers for repository URLs and repository-absolute paths.
//!
//! Both kinds of strings use `/` separators. A path `a` is "under" `b` when it
//! equals `b` or continues it at a segment boundary, so `/branches/ab` is not
//! under `/branches/a`.

/// Strip trailing slashes, keeping a lone `/` intact.
pub fn normalize(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        "/"
    } else {
        trimmed
    }
}

/// True if `path` equals `ancestor` or lies below it.
pub fn is_under(path: &str, ancestor: &str) -> bool {
    relative_to(path, ancestor).is_some()
}

/// Path of `path` relative to `ancestor` (empty when equal), or `None` when
/// `path` is not under `ancestor`.
pub fn relative_to<'a>(path: &'a str, ancestor: &str) -> Option<&'a str> {
    let path = normalize(path);
    let ancestor = normalize(ancestor);
    if ancestor == "/" {
        return path.strip_prefix('/');
    }
    let rest = path.strip_prefix(ancestor)?;
    if rest.is_empty() {
        Some("")
    } else {
        rest.strip_prefix('/')
    }
}

/// Join a relative path onto a base, ignoring empty relatives.
pub fn join(base: &str, relative: &str) -> String {
    let base = normalize(base);
    let relative = relative.trim_matches('/');
    if relative.is_empty() {
        base.to_string()
    } else if base == "/" {
        format!("/{relative}")
    } else {
        format!("{base}/{relative}")
    }
}

/// Parent of a path, or `None` at the top.
pub fn parent(path: &str) -> Option<&str> {
    let path = normalize(path);
    if path.is_empty() || path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => Some(""),
    }
}

/// Repository-absolute path (`/branches/x`) of a URL inside `repository_root`.
pub fn repo_relative(url: &str, repository_root: &str) -> Option<String> {
    relative_to(url, repository_root).map(|rel| format!("/{rel}"))
}

/// Every prefix of `path` at segment boundaries, longest first.
///
/// `svn://h/r/a/b` yields `svn://h/r/a/b`, `svn://h/r/a`, `svn://h/r`, ...
pub fn prefixes(path: &str) -> impl Iterator<Item = &str> {
    let mut current = Some(normalize(path));
    std::iter::from_fn(move || {
        let this = current?;
        current = parent(this).filter(|p| is_prefix_candidate(p));
        Some(this)
    })
}

fn is_prefix_candidate(p: &str) -> bool {
    !(p.is_empty() || p == "/" || p.ends_with(':') || p.ends_with(":/") || p.ends_with("//"))
}
