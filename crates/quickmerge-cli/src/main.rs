mod cmd_cache;
mod cmd_config;
mod cmd_mergeinfo;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter (`QUICKMERGE_LOG=debug`).
const LOG_ENV: &str = "QUICKMERGE_LOG";

#[derive(Parser)]
#[command(name = "quickmerge", version, about = "Branch merge planning for Subversion working copies")]
struct Cli {
    /// Branch point cache file (default: per-project file in the store)
    #[arg(long, global = true)]
    cache: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Inspect or prune the branch point cache
    Cache {
        #[command(subcommand)]
        cmd: CacheCmd,
    },
    /// Parse and query svn:mergeinfo values
    Mergeinfo {
        #[command(subcommand)]
        cmd: MergeinfoCmd,
    },
    /// Read or write merge settings (.quickmerge/config.json)
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },
}

#[derive(Subcommand)]
enum CacheCmd {
    /// List cached repository roots
    List,
    /// Show every cached entry of a repository root
    Show {
        /// Repository root URL
        root: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Look up the copy point covering a URL
    Lookup {
        /// Repository root URL
        root: String,
        /// Branch URL (or any path below it)
        url: String,
    },
    /// Drop all entries of a repository root
    Evict {
        /// Repository root URL
        root: String,
    },
}

#[derive(Subcommand)]
enum MergeinfoCmd {
    /// Print the ranges of a mergeinfo value
    Parse {
        /// Property value; read from --file when omitted
        value: Option<String>,
        /// File holding the property value
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Check whether a revision of a source path is recorded as merged
    Check {
        /// Property value on the working copy root
        value: String,
        /// Repository path of the merge source (e.g. /branches/feature)
        #[arg(long)]
        source: String,
        /// Revision to check
        #[arg(long)]
        revision: u64,
        /// Changed paths of the revision (default: the source itself)
        #[arg(long = "path")]
        paths: Vec<String>,
    },
}

#[derive(Subcommand)]
enum ConfigCmd {
    /// Set a config value
    Set {
        /// Config key (e.g. history_page_size)
        key: String,
        /// Config value (true/false/number/string)
        value: String,
    },
    /// Get a config value
    Get {
        /// Config key
        key: String,
    },
    /// List all config values
    List,
}

fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .with_env_var(LOG_ENV)
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let repo_root = std::env::current_dir()?;
    let cache_path = cli
        .cache
        .unwrap_or_else(|| cmd_cache::default_cache_path(&repo_root));
    tracing::debug!(cache = %cache_path.display(), "branch point cache");

    match cli.cmd {
        Command::Cache { cmd } => match cmd {
            CacheCmd::List => cmd_cache::list(&cache_path),
            CacheCmd::Show { root, json } => cmd_cache::show(&cache_path, &root, json),
            CacheCmd::Lookup { root, url } => cmd_cache::lookup(&cache_path, &root, &url),
            CacheCmd::Evict { root } => cmd_cache::evict(&cache_path, &root),
        },
        Command::Mergeinfo { cmd } => match cmd {
            MergeinfoCmd::Parse { value, file } => {
                cmd_mergeinfo::parse(value.as_deref(), file.as_deref())
            }
            MergeinfoCmd::Check {
                value,
                source,
                revision,
                paths,
            } => cmd_mergeinfo::check(&value, &source, revision, &paths),
        },
        Command::Config { cmd } => match cmd {
            ConfigCmd::Set { key, value } => cmd_config::set(&repo_root, &key, &value),
            ConfigCmd::Get { key } => cmd_config::get(&repo_root, &key),
            ConfigCmd::List => cmd_config::list(&repo_root),
        },
    }
}
