use anyhow::Context;
use quickmerge_engine::config::config_path;
use quickmerge_engine::MergeConfig;
use serde_json::Value;
use std::path::Path;

type Settings = serde_json::Map<String, Value>;

// ── Command Implementations ──

/// `quickmerge config set <key> <value>`
pub fn set(repo_root: &Path, key: &str, value: &str) -> anyhow::Result<()> {
    if !defaults()?.contains_key(key) {
        anyhow::bail!("unknown config key: {key}");
    }
    let path = config_path(repo_root);
    let mut overrides = read_overrides(&path)?;
    overrides.insert(key.to_string(), parse_value(value));
    // Reject values the merge engine would not load.
    serde_json::from_value::<MergeConfig>(Value::Object(overrides.clone()))
        .map_err(|err| anyhow::anyhow!("invalid value for {key}: {err}"))?;
    write_overrides(&path, &overrides)?;
    println!("{key} = {value}");
    Ok(())
}

/// `quickmerge config get <key>`
pub fn get(repo_root: &Path, key: &str) -> anyhow::Result<()> {
    let overrides = read_overrides(&config_path(repo_root))?;
    match effective_value(key, &overrides, &defaults()?) {
        Some(shown) => println!("{shown}"),
        None => println!("(not set)"),
    }
    Ok(())
}

/// `quickmerge config list`
pub fn list(repo_root: &Path) -> anyhow::Result<()> {
    let overrides = read_overrides(&config_path(repo_root))?;
    print!("{}", render_list(&overrides, &defaults()?));
    Ok(())
}

// ── Helpers ──

/// Keys present in the project's config file. A missing file sets none.
fn read_overrides(path: &Path) -> anyhow::Result<Settings> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Settings::new()),
        Err(err) => return Err(err).with_context(|| format!("reading {}", path.display())),
    };
    match serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))? {
        Value::Object(map) => Ok(map),
        _ => anyhow::bail!("{} does not hold a JSON object", path.display()),
    }
}

/// Only the keys the operator set are written; the rest keep following defaults.
fn write_overrides(path: &Path, overrides: &Settings) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(overrides)?;
    quickmerge_store::write_atomic(path, json.as_bytes())
        .with_context(|| format!("saving config: {}", path.display()))
}

/// Parse a string value into an appropriate JSON value (bool/number/string).
/// A JSON array (`["trunk","main"]`) is kept as an array.
fn parse_value(s: &str) -> Value {
    match s {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => {
            if let Ok(n) = s.parse::<i64>() {
                Value::Number(n.into())
            } else if s.starts_with('[') {
                serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.to_string()))
            } else {
                Value::String(s.to_string())
            }
        }
    }
}

/// Every known key with its default value.
fn defaults() -> anyhow::Result<Settings> {
    match serde_json::to_value(MergeConfig::default())? {
        Value::Object(map) => Ok(map),
        _ => Ok(Settings::new()),
    }
}

/// Value the merge engine uses for `key`, marked when it is the default.
fn effective_value(key: &str, overrides: &Settings, defaults: &Settings) -> Option<String> {
    match (overrides.get(key), defaults.get(key)) {
        (Some(set), _) => Some(set.to_string()),
        (None, Some(default)) => Some(format!("{default} (default)")),
        (None, None) => None,
    }
}

fn render_list(overrides: &Settings, defaults: &Settings) -> String {
    let mut out = String::new();
    for key in defaults.keys() {
        if let Some(shown) = effective_value(key, overrides, defaults) {
            out.push_str(&format!("{key} = {shown}\n"));
        }
    }
    for (key, value) in overrides {
        if !defaults.contains_key(key) {
            out.push_str(&format!("{key} = {value} (unknown, ignored)\n"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_are_typed() {
        assert_eq!(parse_value("true"), serde_json::Value::Bool(true));
        assert_eq!(parse_value("25"), serde_json::json!(25));
        assert_eq!(parse_value("[\"trunk\",\"main\"]"), serde_json::json!(["trunk", "main"]));
        assert_eq!(parse_value("Merge {branch}"), serde_json::json!("Merge {branch}"));
    }

    #[test]
    fn set_persists_and_engine_reads_it() {
        let tmp = tempfile::tempdir().unwrap();
        set(tmp.path(), "history_page_size", "10").unwrap();
        set(tmp.path(), "trunk_names", "[\"trunk\",\"main\"]").unwrap();

        let loaded = MergeConfig::load(tmp.path());
        assert_eq!(loaded.history_page_size, 10);
        assert_eq!(loaded.trunk_names, vec!["trunk", "main"]);
        assert!(loaded.check_nested_working_copies);
    }

    #[test]
    fn list_shows_defaults_next_to_overrides() {
        let tmp = tempfile::tempdir().unwrap();
        set(tmp.path(), "history_page_size", "10").unwrap();

        let overrides = read_overrides(&config_path(tmp.path())).unwrap();
        let defaults = defaults().unwrap();
        let listing = render_list(&overrides, &defaults);

        assert_eq!(listing.lines().count(), defaults.len());
        assert!(listing.contains("history_page_size = 10\n"));
        assert!(!listing.contains("history_page_size = 10 (default)"));
        assert!(listing.contains("check_nested_working_copies = true (default)\n"));
        assert!(listing.contains("trunk_names = [\"trunk\"] (default)\n"));
    }

    #[test]
    fn hand_edited_unknown_keys_are_flagged() {
        let mut overrides = Settings::new();
        overrides.insert("colour".into(), Value::String("blue".into()));
        let listing = render_list(&overrides, &defaults().unwrap());
        assert!(listing.ends_with("colour = \"blue\" (unknown, ignored)\n"));
    }

    #[test]
    fn unreadable_config_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = config_path(tmp.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(read_overrides(&path).is_err());
        assert!(list(tmp.path()).is_err());
    }

    #[test]
    fn unknown_keys_and_bad_values_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(set(tmp.path(), "no_such_key", "1").is_err());
        assert!(set(tmp.path(), "history_page_size", "lots").is_err());
        assert!(!config_path(tmp.path()).exists());
    }
}
