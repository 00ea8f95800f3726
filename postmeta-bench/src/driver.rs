//! Benchmark driver.
//!
//! For every metadata count in the configured range, every tier runs the same
//! sequence against the store: reset, timed bulk insert, timed meta query.
//! Each tier yields one insert and one query [`MeasurementPoint`].

use crate::config::{ReportConfig, RunConfig};
use crate::report::{self, ReportArtifact};
use crate::reset::reset;
use crate::{
    BenchError, BenchResult, ContentStore, DataGen, LatencyRecorder, LatencySummary,
    MeasurementPoint, MetaClause, MetaQuery, NewPost, Operation, PostQuery, PostTier,
    BENCHMARK_POST_TYPE,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Run the whole sweep against `store`.
pub fn run(store: &mut dyn ContentStore, config: &RunConfig) -> BenchResult<Vec<MeasurementPoint>> {
    Benchmark::new(store, config)?.run()
}

/// Run the sweep, print the summary, optionally export the measurements into
/// `export`, then write the HTML report. A failed run writes nothing.
pub fn run_and_render(
    store: &mut dyn ContentStore,
    config: &RunConfig,
    report_config: &ReportConfig,
    export: Option<&Path>,
) -> BenchResult<ReportArtifact> {
    let points = run(store, config)?;
    report::print_summary(&points);

    if let Some(dir) = export {
        fs::create_dir_all(dir)?;
        report::export_json(&points, &dir.join("measurements.json"))?;
        report::export_csv(&points, &dir.join("measurements.csv"))?;
    }

    report::render(&points, report_config)
}

pub struct Benchmark<'a> {
    store: &'a mut dyn ContentStore,
    config: &'a RunConfig,
    gen: DataGen,
    started: Instant,
}

impl<'a> Benchmark<'a> {
    pub fn new(store: &'a mut dyn ContentStore, config: &'a RunConfig) -> BenchResult<Self> {
        config.validate()?;
        let gen = config.seed.map(DataGen::new).unwrap_or_else(DataGen::from_entropy);
        Ok(Self {
            store,
            config,
            gen,
            started: Instant::now(),
        })
    }

    pub fn run(mut self) -> BenchResult<Vec<MeasurementPoint>> {
        self.store.enable_query_log();
        self.started = Instant::now();

        let mut measurements = Vec::new();
        for meta_count in self.config.meta_counts() {
            measurements.extend(self.run_meta_count(meta_count)?);
        }
        Ok(measurements)
    }

    /// All tiers for one metadata count. Stops early once the time limit is spent.
    fn run_meta_count(&mut self, meta_count: u32) -> BenchResult<Vec<MeasurementPoint>> {
        let config = self.config;
        info!("Starting benchmark with {} metas...", meta_count);

        let mut points = Vec::with_capacity(config.tiers.len() * 2);
        for &tier in &config.tiers {
            self.ensure_store_ready()?;
            reset(&mut *self.store, config.settle)?;

            let meta_input = self.meta_input(meta_count as usize);

            self.store.flush_cache()?;
            let progress = self.progress_bar(tier.post_count());
            let (insert_secs, latency) =
                self.insert_phase(tier, meta_input.clone(), &progress)?;
            self.store.flush_cache()?;
            let query_secs = self.query_phase(&meta_input)?;

            points.push(
                MeasurementPoint::new(meta_count, tier, Operation::Insert, insert_secs)
                    .with_latency(latency),
            );
            points.push(MeasurementPoint::new(
                meta_count,
                tier,
                Operation::Query,
                query_secs,
            ));
            self.log_query_activity(tier);

            if self.started.elapsed() > config.time_limit {
                warn!("Bailing benchmark as it is taking longer than the time limit.");
                break;
            }
        }
        Ok(points)
    }

    fn ensure_store_ready(&mut self) -> BenchResult<()> {
        if !self.store.check_connection() {
            return Err(BenchError::ConnectionDown);
        }
        if let Some(err) = self.store.last_error() {
            return Err(BenchError::Store(err.to_string()));
        }
        Ok(())
    }

    /// `n` fresh keys paired positionally with `n` fresh values.
    fn meta_input(&mut self, n: usize) -> Vec<(String, String)> {
        let keys = self.gen.uuid4_vec(n);
        let values = self.gen.uuid4_vec(n);
        keys.into_iter().zip(values).collect()
    }

    fn insert_phase(
        &mut self,
        tier: PostTier,
        meta_input: Vec<(String, String)>,
        progress: &ProgressBar,
    ) -> BenchResult<(f64, LatencySummary)> {
        let count = tier.post_count();
        let mut rec = LatencyRecorder::new()?;
        let mut post = NewPost::new(String::new(), BENCHMARK_POST_TYPE).with_meta(meta_input);

        let start = Instant::now();
        for _ in 0..count {
            post.title = self.gen.uuid4();
            let t = rec.start();
            let result = self.store.insert_post(&post);
            rec.record(t);
            match result {
                Ok(id) if id != 0 => progress.inc(1),
                Ok(_) => {
                    progress.abandon();
                    return Err(BenchError::InsertFailed {
                        last_query: self.store.last_query().unwrap_or_default().to_string(),
                        last_error: self.store.last_error().unwrap_or_default().to_string(),
                    });
                }
                Err(e) => {
                    progress.abandon();
                    return Err(e);
                }
            }
        }
        let elapsed = start.elapsed().as_secs_f64();
        progress.finish();

        Ok((elapsed, rec.summary()))
    }

    /// Look for one post whose meta matches any freshly generated value.
    /// Nothing can match, so the store has to scan every candidate.
    fn query_phase(&mut self, meta_input: &[(String, String)]) -> BenchResult<f64> {
        let values = self.gen.uuid4_vec(meta_input.len());
        let clauses: Vec<MetaClause> = meta_input
            .iter()
            .zip(values)
            .map(|((key, _), value)| MetaClause {
                key: key.clone(),
                value,
            })
            .collect();
        let meta_query = if clauses.is_empty() {
            MetaQuery::default()
        } else {
            MetaQuery::any(clauses)
        };
        let query = PostQuery::benchmark_ids(1, meta_query);

        info!(
            "Fetching 1 benchmark entry with args: {}",
            serde_json::to_string_pretty(&query)?
        );

        let start = Instant::now();
        let ids = self.store.query_posts(&query)?;
        let elapsed = start.elapsed().as_secs_f64();

        info!("Last query: {}", self.store.last_query().unwrap_or_default());
        info!("Last error: {}", self.store.last_error().unwrap_or_default());
        info!("Fetched posts: {}", ids.len());

        let expected = if query.meta_query.is_empty() { 1 } else { 0 };
        if ids.len() != expected {
            return Err(BenchError::UnexpectedResultCount {
                expected,
                actual: ids.len(),
            });
        }
        Ok(elapsed)
    }

    fn progress_bar(&self, count: usize) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(count as u64);
        let style = ProgressStyle::with_template(
            "{msg} [{bar:40.cyan/bright.black}] {pos}/{len} ({elapsed})",
        )
        .map(|s| s.progress_chars("#-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar.set_message(format!("Inserting {} benchmark entries...", count));
        bar
    }

    fn log_query_activity(&mut self, tier: PostTier) {
        let log = self.store.take_query_log();
        let db_time: Duration = log.iter().map(|e| e.elapsed).sum();
        debug!(
            %tier,
            statements = log.len(),
            db_secs = db_time.as_secs_f64(),
            "store activity for tier"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_adapter::MemoryStore;
    use crate::adapters::sqlite_adapter::SqliteStore;
    use crate::{PostId, QueryLogEntry, Relation, Table};
    use tempfile::TempDir;

    fn quick_config(tiers: Vec<PostTier>, meta_min: u32, meta_max: u32) -> RunConfig {
        RunConfig {
            meta_min,
            meta_max,
            settle: Duration::ZERO,
            seed: Some(42),
            show_progress: false,
            ..RunConfig::new(tiers)
        }
    }

    /// Memory store with switchable faults that remembers what it was asked.
    #[derive(Default)]
    struct FaultyStore {
        inner: MemoryStore,
        connection_down: bool,
        pending_error: Option<String>,
        zero_ids: bool,
        failing_inserts: bool,
        extra_result: bool,
        query_log_enabled: bool,
        resets: usize,
        inserts: usize,
        first_post: Option<NewPost>,
        titles: Vec<String>,
        queries: Vec<PostQuery>,
    }

    impl ContentStore for FaultyStore {
        fn name(&self) -> &str {
            "faulty"
        }
        fn install(&mut self) -> BenchResult<()> {
            self.inner.install()
        }
        fn check_connection(&mut self) -> bool {
            !self.connection_down
        }
        fn last_error(&self) -> Option<&str> {
            self.pending_error.as_deref()
        }
        fn last_query(&self) -> Option<&str> {
            self.inner.last_query()
        }
        fn enable_query_log(&mut self) {
            self.query_log_enabled = true;
            self.inner.enable_query_log()
        }
        fn take_query_log(&mut self) -> Vec<QueryLogEntry> {
            self.inner.take_query_log()
        }
        fn count_rows(&mut self, table: Table) -> BenchResult<u64> {
            self.inner.count_rows(table)
        }
        fn truncate(&mut self, table: Table) -> BenchResult<()> {
            if table == Table::Posts {
                self.resets += 1;
            }
            self.inner.truncate(table)
        }
        fn delete_options_like(&mut self, prefix: &str) -> BenchResult<u64> {
            self.inner.delete_options_like(prefix)
        }
        fn update_option(&mut self, name: &str, value: &str) -> BenchResult<()> {
            self.inner.update_option(name, value)
        }
        fn insert_post(&mut self, post: &NewPost) -> BenchResult<PostId> {
            self.inserts += 1;
            self.first_post.get_or_insert_with(|| post.clone());
            self.titles.push(post.title.clone());
            if self.failing_inserts {
                return Err(BenchError::Database("disk I/O error".into()));
            }
            let id = self.inner.insert_post(post)?;
            Ok(if self.zero_ids { 0 } else { id })
        }
        fn query_posts(&mut self, query: &PostQuery) -> BenchResult<Vec<PostId>> {
            self.queries.push(query.clone());
            let mut ids = self.inner.query_posts(query)?;
            if self.extra_result {
                ids.push(999);
            }
            Ok(ids)
        }
        fn flush_cache(&mut self) -> BenchResult<()> {
            self.inner.flush_cache()
        }
    }

    #[test]
    fn test_one_insert_and_one_query_point_per_pair() {
        let mut db = MemoryStore::new();
        let cfg = quick_config(vec![PostTier::Hundred, PostTier::Thousand], 0, 2);
        let points = run(&mut db, &cfg).unwrap();

        assert_eq!(points.len(), 3 * 2 * 2);
        let mut expected = Vec::new();
        for meta in 0..=2 {
            for tier in [PostTier::Hundred, PostTier::Thousand] {
                expected.push((meta, tier, Operation::Insert));
                expected.push((meta, tier, Operation::Query));
            }
        }
        let got: Vec<_> = points
            .iter()
            .map(|p| (p.meta_count, p.tier, p.operation))
            .collect();
        assert_eq!(got, expected);

        for p in &points {
            assert!(p.elapsed_secs >= 0.0);
            match p.operation {
                Operation::Insert => {
                    assert_eq!(p.latency.unwrap().ops, p.tier.post_count() as u64)
                }
                Operation::Query => assert!(p.latency.is_none()),
            }
        }

        // Last tier left in place: 1k posts with 2 meta each.
        assert_eq!(db.count_rows(Table::Posts).unwrap(), 1_000);
        assert_eq!(db.count_rows(Table::PostMeta).unwrap(), 2_000);
    }

    #[test]
    fn test_time_limit_skips_remaining_tiers_only() {
        let mut db = FaultyStore::default();
        let cfg = RunConfig {
            time_limit: Duration::ZERO,
            ..quick_config(vec![PostTier::Hundred, PostTier::Thousand], 0, 1)
        };
        let points = run(&mut db, &cfg).unwrap();

        // The outer loop keeps going; each count only gets its first tier.
        let got: Vec<_> = points.iter().map(|p| (p.meta_count, p.tier)).collect();
        assert_eq!(
            got,
            vec![
                (0, PostTier::Hundred),
                (0, PostTier::Hundred),
                (1, PostTier::Hundred),
                (1, PostTier::Hundred),
            ]
        );
        assert_eq!(db.inserts, 200);
        assert_eq!(db.resets, 2);
    }

    #[test]
    fn test_query_filter_uses_inserted_keys_with_fresh_values() {
        let mut db = FaultyStore::default();
        let cfg = quick_config(vec![PostTier::Hundred], 3, 3);
        run(&mut db, &cfg).unwrap();

        assert!(db.query_log_enabled);
        let post = db.first_post.clone().unwrap();
        assert_eq!(post.post_type, "benchmark");
        assert_eq!(post.meta.len(), 3);

        let query = &db.queries[0];
        assert_eq!(query.posts_per_page, 1);
        assert!(!query.cache_results);
        assert!(query.suppress_filters);
        assert_eq!(query.meta_query.relation, Relation::Or);
        assert_eq!(query.meta_query.clauses.len(), 3);
        for (clause, (key, value)) in query.meta_query.clauses.iter().zip(&post.meta) {
            assert_eq!(&clause.key, key);
            assert_ne!(&clause.value, value);
        }
    }

    #[test]
    fn test_zero_meta_expects_unfiltered_match() {
        let mut db = FaultyStore::default();
        let cfg = quick_config(vec![PostTier::Hundred], 0, 0);
        run(&mut db, &cfg).unwrap();

        assert!(db.queries[0].meta_query.is_empty());
        assert!(db.first_post.unwrap().meta.is_empty());
    }

    #[test]
    fn test_titles_are_unique() {
        let mut db = FaultyStore::default();
        let cfg = quick_config(vec![PostTier::Hundred], 1, 1);
        run(&mut db, &cfg).unwrap();

        assert_eq!(db.titles.len(), 100);
        let distinct: std::collections::HashSet<&String> = db.titles.iter().collect();
        assert_eq!(distinct.len(), 100);
    }

    #[test]
    fn test_connection_down_is_fatal() {
        let mut db = FaultyStore {
            connection_down: true,
            ..Default::default()
        };
        let cfg = quick_config(vec![PostTier::Hundred], 0, 0);
        assert!(matches!(run(&mut db, &cfg), Err(BenchError::ConnectionDown)));
        assert_eq!(db.inserts, 0);
    }

    #[test]
    fn test_pending_store_error_is_fatal() {
        let mut db = FaultyStore {
            pending_error: Some("MySQL server has gone away".into()),
            ..Default::default()
        };
        let cfg = quick_config(vec![PostTier::Hundred], 0, 0);
        let err = run(&mut db, &cfg).unwrap_err();
        assert!(matches!(err, BenchError::Store(ref msg) if msg.contains("gone away")));
    }

    #[test]
    fn test_zero_id_aborts_with_last_query() {
        let mut db = FaultyStore {
            zero_ids: true,
            ..Default::default()
        };
        let cfg = quick_config(vec![PostTier::Hundred], 1, 1);
        let err = run(&mut db, &cfg).unwrap_err();
        match err {
            BenchError::InsertFailed { last_query, .. } => {
                assert!(last_query.starts_with("INSERT post 1"))
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(db.inserts, 1);
    }

    #[test]
    fn test_insert_error_abandons_progress() {
        let mut db = FaultyStore {
            failing_inserts: true,
            ..Default::default()
        };
        let cfg = quick_config(vec![PostTier::Hundred], 1, 1);
        let mut bench = Benchmark::new(&mut db, &cfg).unwrap();
        let progress = ProgressBar::hidden();
        progress.set_length(100);

        let err = bench
            .insert_phase(PostTier::Hundred, Vec::new(), &progress)
            .unwrap_err();
        assert!(matches!(err, BenchError::Database(ref msg) if msg == "disk I/O error"));
        assert!(progress.is_finished());
        assert_eq!(progress.position(), 0);
        drop(bench);
        assert_eq!(db.inserts, 1);
    }

    #[test]
    fn test_zero_id_abandons_progress() {
        let mut db = FaultyStore {
            zero_ids: true,
            ..Default::default()
        };
        let cfg = quick_config(vec![PostTier::Hundred], 0, 0);
        let mut bench = Benchmark::new(&mut db, &cfg).unwrap();
        let progress = ProgressBar::hidden();

        let err = bench
            .insert_phase(PostTier::Hundred, Vec::new(), &progress)
            .unwrap_err();
        assert!(matches!(err, BenchError::InsertFailed { .. }));
        assert!(progress.is_finished());
    }

    #[test]
    fn test_failed_run_writes_no_report_or_export() {
        let tmp = TempDir::new().unwrap();
        let report_cfg = ReportConfig {
            content_dir: tmp.path().join("wp-content"),
            content_url: "http://localhost/wp-content".into(),
        };
        let export_dir = tmp.path().join("results");

        for mut db in [
            FaultyStore {
                zero_ids: true,
                ..Default::default()
            },
            FaultyStore {
                failing_inserts: true,
                ..Default::default()
            },
            FaultyStore {
                extra_result: true,
                ..Default::default()
            },
        ] {
            let cfg = quick_config(vec![PostTier::Hundred], 1, 1);
            assert!(run_and_render(&mut db, &cfg, &report_cfg, Some(&export_dir)).is_err());
            assert!(!report_cfg.content_dir.join(report::REPORT_SUBDIR).exists());
            assert!(!export_dir.exists());
        }
    }

    #[test]
    fn test_run_and_render_writes_report_and_export() {
        let tmp = TempDir::new().unwrap();
        let report_cfg = ReportConfig {
            content_dir: tmp.path().join("wp-content"),
            content_url: "http://localhost/wp-content".into(),
        };
        let export_dir = tmp.path().join("results");
        let mut db = MemoryStore::new();
        let cfg = quick_config(vec![PostTier::Hundred], 0, 1);

        let artifact = run_and_render(&mut db, &cfg, &report_cfg, Some(&export_dir)).unwrap();
        assert!(artifact.path.exists());
        assert_eq!(report::load_json(&export_dir.join("measurements.json")).unwrap().len(), 4);
        assert!(export_dir.join("measurements.csv").exists());
    }

    #[test]
    fn test_unexpected_result_count_is_fatal() {
        let mut db = FaultyStore {
            extra_result: true,
            ..Default::default()
        };
        let cfg = quick_config(vec![PostTier::Hundred], 2, 2);
        assert!(matches!(
            run(&mut db, &cfg),
            Err(BenchError::UnexpectedResultCount {
                expected: 0,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_empty_tiers_rejected_before_work() {
        let mut db = FaultyStore::default();
        let cfg = quick_config(Vec::new(), 0, 0);
        assert!(matches!(run(&mut db, &cfg), Err(BenchError::Usage(_))));
        assert_eq!(db.resets, 0);
    }

    #[test]
    fn test_end_to_end_single_tier_report() {
        let tmp = TempDir::new().unwrap();
        let mut db = SqliteStore::open(&tmp.path().join("wp.sqlite3"), "wp_").unwrap();
        db.update_option("_transient_doing_cron", "1").unwrap();

        let cfg = quick_config(vec![PostTier::Hundred], 0, 0);
        let points = run(&mut db, &cfg).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(db.count_rows(Table::Posts).unwrap(), 100);
        assert_eq!(db.count_rows(Table::PostMeta).unwrap(), 0);
        assert_eq!(db.count_rows(Table::Options).unwrap(), 0);

        let report_cfg = ReportConfig {
            content_dir: tmp.path().join("wp-content"),
            content_url: "http://localhost/wp-content/".into(),
        };
        let artifact = report::render(&points, &report_cfg).unwrap();
        assert!(artifact.path.starts_with(tmp.path().join("wp-content").join("benchmark")));
        assert!(artifact.path.exists());
        assert!(artifact
            .url
            .starts_with("http://localhost/wp-content/benchmark/"));
        assert!(artifact.url.ends_with(".html"));

        let html = std::fs::read_to_string(&artifact.path).unwrap();
        assert!(html.contains(r#"["0_metas_100_posts"]"#));
        assert!(html.contains(r#"["0_metas_1_post"]"#));
    }
}
