//! Shared types, the content store trait, data generators and latency recording
//! for postmeta-bench.

pub mod adapters;
pub mod config;
pub mod driver;
pub mod report;
pub mod reset;

use hdrhistogram::Histogram;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::{Duration, Instant};

// ────────────────────────────────────────────────────────────────────────────────
// Error type
// ────────────────────────────────────────────────────────────────────────────────

pub type BenchResult<T> = std::result::Result<T, BenchError>;

#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Config error: {0}")]
    Config(String),

    /// Missing or malformed command-line input; raised before any work starts.
    #[error("{0}")]
    Usage(String),

    #[error("DB Connection down...")]
    ConnectionDown,

    /// The store reported an error left over from a previous statement.
    #[error("Store error: {0}")]
    Store(String),

    #[error("Failed to insert post. Last query: {last_query} Last query error: {last_error}")]
    InsertFailed {
        last_query: String,
        last_error: String,
    },

    #[error("Fetched posts is not {expected} (got {actual}).")]
    UnexpectedResultCount { expected: usize, actual: usize },

    #[error("Invalid operation: {0:?}")]
    InvalidOperation(String),

    #[error("Histogram error: {0}")]
    Histogram(#[from] hdrhistogram::CreationError),

    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

// ────────────────────────────────────────────────────────────────────────────────
// ContentStore trait: every adapter implements this
// ────────────────────────────────────────────────────────────────────────────────

pub type PostId = u64;

/// Post type tag given to every record the benchmark creates.
pub const BENCHMARK_POST_TYPE: &str = "benchmark";

/// Status assigned to records created without an explicit one.
pub const DEFAULT_POST_STATUS: &str = "draft";

/// Logical tables the benchmark touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Posts,
    PostMeta,
    Options,
}

impl Table {
    /// Unprefixed table name.
    pub fn base_name(self) -> &'static str {
        match self {
            Table::Posts => "posts",
            Table::PostMeta => "postmeta",
            Table::Options => "options",
        }
    }
}

/// A record to create, together with its metadata pairs.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub title: String,
    pub post_type: String,
    pub post_status: String,
    pub meta: Vec<(String, String)>,
}

impl NewPost {
    pub fn new(title: impl Into<String>, post_type: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            post_type: post_type.into(),
            post_status: DEFAULT_POST_STATUS.to_string(),
            meta: Vec::new(),
        }
    }

    pub fn with_meta(mut self, meta: Vec<(String, String)>) -> Self {
        self.meta = meta;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Relation {
    #[default]
    And,
    Or,
}

/// Equality match on one metadata key/value pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaClause {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaQuery {
    pub relation: Relation,
    pub clauses: Vec<MetaClause>,
}

impl MetaQuery {
    pub fn any(clauses: Vec<MetaClause>) -> Self {
        Self {
            relation: Relation::Or,
            clauses,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Whether a post carrying `meta` satisfies this query. An empty query matches everything.
    pub fn matches(&self, meta: &[(&str, &str)]) -> bool {
        if self.clauses.is_empty() {
            return true;
        }
        let hit = |c: &MetaClause| meta.iter().any(|(k, v)| *k == c.key && *v == c.value);
        match self.relation {
            Relation::And => self.clauses.iter().all(hit),
            Relation::Or => self.clauses.iter().any(hit),
        }
    }
}

/// Filtered record lookup. Results come back newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostQuery {
    pub posts_per_page: usize,
    pub post_type: String,
    pub post_status: String,
    pub meta_query: MetaQuery,
    pub cache_results: bool,
    pub suppress_filters: bool,
}

impl PostQuery {
    /// Look up at most `limit` ids of benchmark drafts, bypassing the result cache.
    pub fn benchmark_ids(limit: usize, meta_query: MetaQuery) -> Self {
        Self {
            posts_per_page: limit,
            post_type: BENCHMARK_POST_TYPE.to_string(),
            post_status: DEFAULT_POST_STATUS.to_string(),
            meta_query,
            cache_results: false,
            suppress_filters: true,
        }
    }
}

/// One statement captured while the query log is enabled.
#[derive(Debug, Clone)]
pub struct QueryLogEntry {
    pub sql: String,
    pub elapsed: Duration,
}

/// Unified content store adapter trait.
///
/// Implementations track the last statement they issued and the error it
/// produced, if any, so callers can report them on failure.
pub trait ContentStore: Send {
    fn name(&self) -> &str;

    /// Create the schema if it does not exist yet.
    fn install(&mut self) -> BenchResult<()>;

    // ── diagnostics ──
    fn check_connection(&mut self) -> bool;
    fn last_error(&self) -> Option<&str>;
    fn last_query(&self) -> Option<&str>;
    fn enable_query_log(&mut self);
    fn take_query_log(&mut self) -> Vec<QueryLogEntry>;

    // ── raw table maintenance ──
    fn count_rows(&mut self, table: Table) -> BenchResult<u64>;
    fn truncate(&mut self, table: Table) -> BenchResult<()>;
    /// Delete option rows whose name starts with `prefix`, returning how many went.
    fn delete_options_like(&mut self, prefix: &str) -> BenchResult<u64>;
    fn update_option(&mut self, name: &str, value: &str) -> BenchResult<()>;

    // ── records ──
    /// Create a record and its metadata. An id of 0 means the store refused it.
    fn insert_post(&mut self, post: &NewPost) -> BenchResult<PostId>;
    fn query_posts(&mut self, query: &PostQuery) -> BenchResult<Vec<PostId>>;

    /// Drop every process-wide cached object.
    fn flush_cache(&mut self) -> BenchResult<()>;
}

// ────────────────────────────────────────────────────────────────────────────────
// Data generator (ChaCha8Rng, optionally seeded)
// ────────────────────────────────────────────────────────────────────────────────

pub struct DataGen {
    rng: ChaCha8Rng,
}

impl DataGen {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: ChaCha8Rng::from_entropy(),
        }
    }

    /// Random token in UUID v4 form.
    pub fn uuid4(&mut self) -> String {
        let bytes: [u8; 16] = self.rng.gen();
        uuid::Builder::from_random_bytes(bytes)
            .into_uuid()
            .hyphenated()
            .to_string()
    }

    /// `n` fresh tokens.
    pub fn uuid4_vec(&mut self, n: usize) -> Vec<String> {
        (0..n).map(|_| self.uuid4()).collect()
    }
}

// ────────────────────────────────────────────────────────────────────────────────
// Latency recorder (HDR histogram)
// ────────────────────────────────────────────────────────────────────────────────

pub struct LatencyRecorder {
    hist: Histogram<u64>,
    ops: u64,
}

impl LatencyRecorder {
    pub fn new() -> BenchResult<Self> {
        let hist = Histogram::<u64>::new_with_bounds(1, 3_600_000_000_000, 3)?;
        Ok(Self {
            hist,
            ops: 0,
        })
    }

    #[inline(always)]
    pub fn start(&self) -> Instant {
        Instant::now()
    }

    /// Record the elapsed time since `start`.
    #[inline(always)]
    pub fn record(&mut self, start: Instant) {
        let nanos = start.elapsed().as_nanos() as u64;
        let _ = self.hist.record(nanos.max(1));
        self.ops += 1;
    }

    pub fn percentile_us(&self, p: f64) -> f64 {
        self.hist.value_at_percentile(p) as f64 / 1_000.0
    }

    pub fn mean_us(&self) -> f64 {
        self.hist.mean() / 1_000.0
    }

    pub fn summary(&self) -> LatencySummary {
        LatencySummary {
            ops: self.ops,
            mean_us: self.mean_us(),
            p50_us: self.percentile_us(50.0),
            p99_us: self.percentile_us(99.0),
        }
    }
}

/// Per-operation latency distribution of a phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub ops: u64,
    pub mean_us: f64,
    pub p50_us: f64,
    pub p99_us: f64,
}

// ────────────────────────────────────────────────────────────────────────────────
// Measurement types
// ────────────────────────────────────────────────────────────────────────────────

/// Target volume of records inserted in one benchmark pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PostTier {
    #[serde(rename = "100_posts")]
    Hundred,
    #[serde(rename = "1k_posts")]
    Thousand,
    #[serde(rename = "10k_posts")]
    TenThousand,
    #[serde(rename = "100k_posts")]
    HundredThousand,
    #[serde(rename = "1M_posts")]
    Million,
}

impl PostTier {
    /// Tiers covered by `--post-mode=all`.
    pub const DEFAULT_SWEEP: [PostTier; 3] =
        [PostTier::Hundred, PostTier::Thousand, PostTier::TenThousand];

    pub fn post_count(self) -> usize {
        match self {
            PostTier::Hundred => 100,
            PostTier::Thousand => 1_000,
            PostTier::TenThousand => 10_000,
            PostTier::HundredThousand => 100_000,
            PostTier::Million => 1_000_000,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PostTier::Hundred => "100_posts",
            PostTier::Thousand => "1k_posts",
            PostTier::TenThousand => "10k_posts",
            PostTier::HundredThousand => "100k_posts",
            PostTier::Million => "1M_posts",
        }
    }
}

impl std::fmt::Display for PostTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Insert,
    Query,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Query => "query",
        }
    }
}

impl FromStr for Operation {
    type Err = BenchError;

    fn from_str(s: &str) -> BenchResult<Self> {
        match s {
            "insert" => Ok(Operation::Insert),
            "query" => Ok(Operation::Query),
            other => Err(BenchError::InvalidOperation(other.to_string())),
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Elapsed time of one phase for one (metadata count, tier) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementPoint {
    pub meta_count: u32,
    pub tier: PostTier,
    pub operation: Operation,
    pub elapsed_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<LatencySummary>,
}

impl MeasurementPoint {
    pub fn new(meta_count: u32, tier: PostTier, operation: Operation, elapsed_secs: f64) -> Self {
        Self {
            meta_count,
            tier,
            operation,
            elapsed_secs,
            latency: None,
        }
    }

    pub fn with_latency(mut self, latency: LatencySummary) -> Self {
        self.latency = Some(latency);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub arch: String,
    pub cpus: usize,
    pub timestamp: String,
}

impl SystemInfo {
    pub fn collect() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            cpus: std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(1),
            timestamp: epoch_now(),
        }
    }
}

fn epoch_now() -> String {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("{}s-since-epoch", secs)
}
