pub mod analyzer;
pub mod parse;

pub use analyzer::{MergeInfoAnalyzer, Partition};
pub use parse::{parse_mergeinfo, MergeInfo, MergeInfoError, RangeList, RevisionRange};
