use quickmerge_core::{repo_path, Revision};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MergeInfoError {
    #[error("line {line}: missing ':' between merge source and revisions")]
    MissingSeparator { line: usize },

    #[error("line {line}: merge source must be an absolute path, got {path:?}")]
    RelativePath { line: usize, path: String },

    #[error("line {line}: invalid revision range {range:?}")]
    InvalidRange { line: usize, range: String },

    #[error("line {line}: range {start}-{end} runs backwards")]
    ReversedRange {
        line: usize,
        start: Revision,
        end: Revision,
    },
}

/// Inclusive revision range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RevisionRange {
    pub start: Revision,
    pub end: Revision,
}

impl RevisionRange {
    pub fn new(start: Revision, end: Revision) -> Self {
        Self { start, end }
    }
}

/// Merged revisions of one merge source.
///
/// Inheritable and non-inheritable (`*`) ranges are kept in two sorted,
/// coalesced lists so membership is a binary search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeList {
    inheritable: Vec<RevisionRange>,
    non_inheritable: Vec<RevisionRange>,
}

impl RangeList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, range: RevisionRange, inheritable: bool) {
        let list = if inheritable {
            &mut self.inheritable
        } else {
            &mut self.non_inheritable
        };
        list.push(range);
        coalesce(list);
    }

    /// Merge every range of `other` into this list.
    pub fn extend(&mut self, other: &RangeList) {
        self.inheritable.extend_from_slice(&other.inheritable);
        self.non_inheritable.extend_from_slice(&other.non_inheritable);
        coalesce(&mut self.inheritable);
        coalesce(&mut self.non_inheritable);
    }

    /// Whether `revision` was merged into the node carrying this list.
    pub fn contains(&self, revision: Revision) -> bool {
        search(&self.inheritable, revision) || search(&self.non_inheritable, revision)
    }

    /// Whether `revision` was merged in a way children inherit.
    pub fn contains_inheritable(&self, revision: Revision) -> bool {
        search(&self.inheritable, revision)
    }

    pub fn inheritable(&self) -> &[RevisionRange] {
        &self.inheritable
    }

    pub fn non_inheritable(&self) -> &[RevisionRange] {
        &self.non_inheritable
    }

    pub fn is_empty(&self) -> bool {
        self.inheritable.is_empty() && self.non_inheritable.is_empty()
    }
}

fn coalesce(list: &mut Vec<RevisionRange>) {
    list.sort();
    let mut merged: Vec<RevisionRange> = Vec::with_capacity(list.len());
    for range in list.drain(..) {
        match merged.last_mut() {
            Some(last) if range.start <= last.end.saturating_add(1) => {
                last.end = last.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }
    *list = merged;
}

fn search(list: &[RevisionRange], revision: Revision) -> bool {
    let idx = list.partition_point(|r| r.end < revision);
    list.get(idx).is_some_and(|r| r.start <= revision)
}

impl fmt::Display for RangeList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut all: Vec<(RevisionRange, bool)> = self
            .inheritable
            .iter()
            .map(|r| (*r, true))
            .chain(self.non_inheritable.iter().map(|r| (*r, false)))
            .collect();
        all.sort();
        for (i, (range, inheritable)) in all.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            if range.start == range.end {
                write!(f, "{}", range.start)?;
            } else {
                write!(f, "{}-{}", range.start, range.end)?;
            }
            if !inheritable {
                f.write_str("*")?;
            }
        }
        Ok(())
    }
}

/// Parsed mergeinfo property: merge source path → merged revisions.
pub type MergeInfo = BTreeMap<String, RangeList>;

/// Parse a mergeinfo property value.
///
/// One merge source per line, `/path:1-5,7*,9`. Blank lines are ignored and
/// repeated sources are unioned.
pub fn parse_mergeinfo(text: &str) -> Result<MergeInfo, MergeInfoError> {
    let mut info = MergeInfo::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        // Paths may contain ':' themselves; revisions never do.
        let (path, ranges) = raw
            .rsplit_once(':')
            .ok_or(MergeInfoError::MissingSeparator { line })?;
        if !path.starts_with('/') {
            return Err(MergeInfoError::RelativePath {
                line,
                path: path.to_string(),
            });
        }
        let list = info.entry(repo_path::normalize(path).to_string()).or_default();
        for item in ranges.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (range, inheritable) = parse_range(line, item)?;
            list.insert(range, inheritable);
        }
    }
    Ok(info)
}

fn parse_range(line: usize, item: &str) -> Result<(RevisionRange, bool), MergeInfoError> {
    let invalid = || MergeInfoError::InvalidRange {
        line,
        range: item.to_string(),
    };
    let (body, inheritable) = match item.strip_suffix('*') {
        Some(body) => (body, false),
        None => (item, true),
    };
    let parse = |s: &str| s.trim().parse::<Revision>().map_err(|_| invalid());
    let range = match body.split_once('-') {
        Some((start, end)) => {
            let (start, end) = (parse(start)?, parse(end)?);
            if start > end {
                return Err(MergeInfoError::ReversedRange { line, start, end });
            }
            RevisionRange::new(start, end)
        }
        None => {
            let rev = parse(body)?;
            RevisionRange::new(rev, rev)
        }
    };
    Ok((range, inheritable))
}
