use anyhow::Context;
use quickmerge_core::{repo_path, ChangeSet, MergeCheckResult};
use quickmerge_mergeinfo::{parse_mergeinfo, MergeInfo, MergeInfoAnalyzer};
use std::collections::BTreeMap;
use std::path::Path;

/// `quickmerge mergeinfo parse [<value>] [--file <path>]`
pub fn parse(value: Option<&str>, file: Option<&Path>) -> anyhow::Result<()> {
    let text = match (value, file) {
        (Some(value), _) => value.to_string(),
        (None, Some(file)) => std::fs::read_to_string(file)
            .with_context(|| format!("reading {}", file.display()))?,
        (None, None) => anyhow::bail!("pass a mergeinfo value or --file"),
    };
    let info = parse_mergeinfo(&text)?;
    if info.is_empty() {
        println!("(no merge sources)");
    } else {
        print!("{}", render(&info));
    }
    Ok(())
}

/// `quickmerge mergeinfo check <value> --source <path> --revision <n>`
pub fn check(value: &str, source: &str, revision: u64, paths: &[String]) -> anyhow::Result<()> {
    let state = classify(value, source, revision, paths)?;
    let label = match state {
        MergeCheckResult::Merged => "merged",
        MergeCheckResult::NotMerged => "not merged",
        MergeCheckResult::NotExists => "outside the source",
    };
    println!("r{revision}: {label}");
    Ok(())
}

fn classify(
    value: &str,
    source: &str,
    revision: u64,
    paths: &[String],
) -> anyhow::Result<MergeCheckResult> {
    let source = format!("/{}", source.trim_matches('/'));
    let info = parse_mergeinfo(value)?;
    let subtrees = BTreeMap::from([(String::new(), info)]);
    let mut analyzer = MergeInfoAnalyzer::from_subtrees(source.as_str(), subtrees);
    let changed: Vec<String> = if paths.is_empty() {
        vec![source.clone()]
    } else {
        paths
            .iter()
            .map(|p| {
                if p.starts_with('/') {
                    p.clone()
                } else {
                    repo_path::join(&source, p)
                }
            })
            .collect()
    };
    Ok(analyzer.check_list(&ChangeSet::new(revision, changed, "")))
}

fn render(info: &MergeInfo) -> String {
    let mut out = String::new();
    for (source, ranges) in info {
        out.push_str(&format!("{source}: {ranges}\n"));
    }
    out
}
