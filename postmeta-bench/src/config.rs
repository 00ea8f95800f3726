//! Run configuration: command-line overrides layered over an optional TOML file.
//!
//! Precedence is CLI flag, then file, then the documented default. The post
//! mode has no default and must come from one of the first two.

use crate::{BenchError, BenchResult, PostTier};
use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_POSTMETA_MIN: u32 = 0;
pub const DEFAULT_POSTMETA_MAX: u32 = 10;
pub const DEFAULT_TIME_LIMIT: Duration = Duration::from_secs(4 * 60 * 60);
pub const DEFAULT_SETTLE: Duration = Duration::from_secs(1);
pub const DEFAULT_DB_PATH: &str = "wordpress.sqlite3";
pub const DEFAULT_TABLE_PREFIX: &str = "wp_";
pub const DEFAULT_CONTENT_DIR: &str = "wp-content";
pub const DEFAULT_CONTENT_URL: &str = "http://localhost/wp-content";

/// Which post-volume tiers to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum PostMode {
    #[value(name = "all")]
    #[serde(rename = "all")]
    All,
    #[value(name = "100_posts")]
    #[serde(rename = "100_posts")]
    Hundred,
    #[value(name = "1k_posts")]
    #[serde(rename = "1k_posts")]
    Thousand,
    #[value(name = "10k_posts")]
    #[serde(rename = "10k_posts")]
    TenThousand,
    #[value(name = "100k_posts")]
    #[serde(rename = "100k_posts")]
    HundredThousand,
    #[value(name = "1M_posts")]
    #[serde(rename = "1M_posts")]
    Million,
}

impl PostMode {
    pub fn tiers(self) -> Vec<PostTier> {
        match self {
            PostMode::All => PostTier::DEFAULT_SWEEP.to_vec(),
            PostMode::Hundred => vec![PostTier::Hundred],
            PostMode::Thousand => vec![PostTier::Thousand],
            PostMode::TenThousand => vec![PostTier::TenThousand],
            PostMode::HundredThousand => vec![PostTier::HundredThousand],
            PostMode::Million => vec![PostTier::Million],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

// ────────────────────────────────────────────────────────────────────────────────
// Resolved configuration
// ────────────────────────────────────────────────────────────────────────────────

/// Parameters of one benchmark run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub meta_min: u32,
    pub meta_max: u32,
    pub tiers: Vec<PostTier>,
    /// Wall-clock budget for the whole run; checked after every tier.
    pub time_limit: Duration,
    /// Pause after emptying the tables.
    pub settle: Duration,
    pub seed: Option<u64>,
    pub show_progress: bool,
}

impl RunConfig {
    /// Defaults for everything but the tiers.
    pub fn new(tiers: Vec<PostTier>) -> Self {
        Self {
            meta_min: DEFAULT_POSTMETA_MIN,
            meta_max: DEFAULT_POSTMETA_MAX,
            tiers,
            time_limit: DEFAULT_TIME_LIMIT,
            settle: DEFAULT_SETTLE,
            seed: None,
            show_progress: true,
        }
    }

    pub fn meta_counts(&self) -> RangeInclusive<u32> {
        self.meta_min..=self.meta_max
    }

    pub fn validate(&self) -> BenchResult<()> {
        if self.tiers.is_empty() {
            return Err(BenchError::Usage(
                "Please pass --post-mode as an argument.".into(),
            ));
        }
        if self.meta_min > self.meta_max {
            return Err(BenchError::Config(format!(
                "postmeta-min ({}) must not exceed postmeta-max ({})",
                self.meta_min, self.meta_max
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub path: PathBuf,
    pub table_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: PathBuf::from(DEFAULT_DB_PATH),
            table_prefix: DEFAULT_TABLE_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReportConfig {
    /// Reports land in `<content_dir>/benchmark/`.
    pub content_dir: PathBuf,
    /// Public URL that `content_dir` is served under.
    pub content_url: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            content_dir: PathBuf::from(DEFAULT_CONTENT_DIR),
            content_url: DEFAULT_CONTENT_URL.to_string(),
        }
    }
}

/// Table prefixes end up inside SQL identifiers.
pub fn validate_table_prefix(prefix: &str) -> BenchResult<()> {
    if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(BenchError::Config(format!(
            "invalid table prefix {:?}: only [A-Za-z0-9_] allowed",
            prefix
        )));
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────────
// Command-line overrides
// ────────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Args)]
pub struct RunOverrides {
    /// Post volume to benchmark.
    #[arg(long, value_enum)]
    pub post_mode: Option<PostMode>,

    /// Smallest number of postmeta per post [default: 0].
    #[arg(long)]
    pub postmeta_min: Option<u32>,

    /// Largest number of postmeta per post [default: 10].
    #[arg(long)]
    pub postmeta_max: Option<u32>,

    /// Stop starting new tiers once the run exceeds this many seconds [default: 14400].
    #[arg(long)]
    pub time_limit_secs: Option<u64>,

    /// Pause after each reset, in milliseconds [default: 1000].
    #[arg(long)]
    pub settle_millis: Option<u64>,

    /// Seed for generated titles, keys and values [default: random].
    #[arg(long)]
    pub seed: Option<u64>,

    /// Hide the insert progress bar.
    #[arg(long)]
    pub no_progress: bool,
}

#[derive(Debug, Clone, Default, Args)]
pub struct StoreOverrides {
    /// Storage backend [default: sqlite].
    #[arg(long = "store", value_enum)]
    pub backend: Option<StoreBackend>,

    /// SQLite database file [default: wordpress.sqlite3].
    #[arg(long = "db")]
    pub path: Option<PathBuf>,

    /// Table name prefix [default: wp_].
    #[arg(long)]
    pub table_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct ReportOverrides {
    /// Content directory; reports go to its benchmark/ subdirectory [default: wp-content].
    #[arg(long)]
    pub content_dir: Option<PathBuf>,

    /// URL the content directory is served under [default: http://localhost/wp-content].
    #[arg(long)]
    pub content_url: Option<String>,
}

// ────────────────────────────────────────────────────────────────────────────────
// TOML file
// ────────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub benchmark: BenchmarkSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub report: ReportSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BenchmarkSection {
    pub post_mode: Option<PostMode>,
    pub postmeta_min: Option<u32>,
    pub postmeta_max: Option<u32>,
    pub time_limit_secs: Option<u64>,
    pub settle_millis: Option<u64>,
    pub seed: Option<u64>,
    pub progress: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreSection {
    pub backend: Option<StoreBackend>,
    pub path: Option<PathBuf>,
    pub table_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportSection {
    pub content_dir: Option<PathBuf>,
    pub content_url: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> BenchResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            BenchError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> BenchResult<Self> {
        toml::from_str(content).map_err(|e| BenchError::Config(format!("invalid TOML: {}", e)))
    }

    pub fn resolve_run(&self, cli: &RunOverrides) -> BenchResult<RunConfig> {
        let file = &self.benchmark;
        let mode = cli.post_mode.or(file.post_mode).ok_or_else(|| {
            BenchError::Usage("Please pass --post-mode as an argument.".into())
        })?;

        let config = RunConfig {
            meta_min: cli
                .postmeta_min
                .or(file.postmeta_min)
                .unwrap_or(DEFAULT_POSTMETA_MIN),
            meta_max: cli
                .postmeta_max
                .or(file.postmeta_max)
                .unwrap_or(DEFAULT_POSTMETA_MAX),
            tiers: mode.tiers(),
            time_limit: cli
                .time_limit_secs
                .or(file.time_limit_secs)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TIME_LIMIT),
            settle: cli
                .settle_millis
                .or(file.settle_millis)
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_SETTLE),
            seed: cli.seed.or(file.seed),
            show_progress: !cli.no_progress && file.progress.unwrap_or(true),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn resolve_store(&self, cli: &StoreOverrides) -> BenchResult<StoreConfig> {
        let defaults = StoreConfig::default();
        let config = StoreConfig {
            backend: cli.backend.or(self.store.backend).unwrap_or(defaults.backend),
            path: cli
                .path
                .clone()
                .or_else(|| self.store.path.clone())
                .unwrap_or(defaults.path),
            table_prefix: cli
                .table_prefix
                .clone()
                .or_else(|| self.store.table_prefix.clone())
                .unwrap_or(defaults.table_prefix),
        };
        validate_table_prefix(&config.table_prefix)?;
        Ok(config)
    }

    pub fn resolve_report(&self, cli: &ReportOverrides) -> ReportConfig {
        let defaults = ReportConfig::default();
        ReportConfig {
            content_dir: cli
                .content_dir
                .clone()
                .or_else(|| self.report.content_dir.clone())
                .unwrap_or(defaults.content_dir),
            content_url: cli
                .content_url
                .clone()
                .or_else(|| self.report.content_url.clone())
                .unwrap_or(defaults.content_url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_mode_expansion() {
        assert_eq!(
            PostMode::All.tiers(),
            vec![PostTier::Hundred, PostTier::Thousand, PostTier::TenThousand]
        );
        assert_eq!(PostMode::Million.tiers(), vec![PostTier::Million]);
        assert_eq!(PostMode::Million.tiers()[0].post_count(), 1_000_000);
    }

    #[test]
    fn test_missing_post_mode_is_usage_error() {
        let err = FileConfig::default()
            .resolve_run(&RunOverrides::default())
            .unwrap_err();
        assert!(matches!(err, BenchError::Usage(_)));
        assert_eq!(err.to_string(), "Please pass --post-mode as an argument.");
    }

    #[test]
    fn test_defaults_apply() {
        let cli = RunOverrides {
            post_mode: Some(PostMode::Hundred),
            ..Default::default()
        };
        let cfg = FileConfig::default().resolve_run(&cli).unwrap();
        assert_eq!(cfg.meta_counts(), 0..=10);
        assert_eq!(cfg.time_limit, Duration::from_secs(14_400));
        assert_eq!(cfg.settle, Duration::from_secs(1));
        assert!(cfg.show_progress);
        assert_eq!(cfg.seed, None);
    }

    #[test]
    fn test_cli_overrides_file() {
        let file = FileConfig::parse(
            r#"
[benchmark]
post_mode = "1k_posts"
postmeta_min = 2
postmeta_max = 4
seed = 9
progress = false

[store]
backend = "memory"
table_prefix = "bench_"

[report]
content_url = "https://example.test/wp-content"
"#,
        )
        .unwrap();

        let cli = RunOverrides {
            postmeta_max: Some(3),
            ..Default::default()
        };
        let run = file.resolve_run(&cli).unwrap();
        assert_eq!(run.tiers, vec![PostTier::Thousand]);
        assert_eq!(run.meta_counts(), 2..=3);
        assert_eq!(run.seed, Some(9));
        assert!(!run.show_progress);

        let store = file
            .resolve_store(&StoreOverrides {
                path: Some(PathBuf::from("other.sqlite3")),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(store.backend, StoreBackend::Memory);
        assert_eq!(store.table_prefix, "bench_");
        assert_eq!(store.path, PathBuf::from("other.sqlite3"));

        let report = file.resolve_report(&ReportOverrides::default());
        assert_eq!(report.content_dir, PathBuf::from("wp-content"));
        assert_eq!(report.content_url, "https://example.test/wp-content");
    }

    #[test]
    fn test_inverted_meta_range_rejected() {
        let cli = RunOverrides {
            post_mode: Some(PostMode::All),
            postmeta_min: Some(5),
            postmeta_max: Some(1),
            ..Default::default()
        };
        assert!(matches!(
            FileConfig::default().resolve_run(&cli),
            Err(BenchError::Config(_))
        ));
    }

    #[test]
    fn test_table_prefix_validation() {
        assert!(validate_table_prefix("wp_").is_ok());
        assert!(validate_table_prefix("site2_").is_ok());
        assert!(validate_table_prefix("").is_err());
        assert!(validate_table_prefix("wp_; DROP TABLE x").is_err());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(FileConfig::parse("[benchmark]\npostmode = \"all\"\n").is_err());
    }
}
