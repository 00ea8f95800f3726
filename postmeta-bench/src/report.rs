//! HTML bar-chart report, terminal summary, CSV and JSON export.

use crate::config::ReportConfig;
use crate::{BenchResult, LatencySummary, MeasurementPoint, Operation, PostTier, SystemInfo};
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use minijinja::{context, Environment};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Subdirectory of the content directory that receives reports.
pub const REPORT_SUBDIR: &str = "benchmark";

// ────────────────────────────────────────────────────────────────────────────────
// Chart data
// ────────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartSeries {
    pub labels: Vec<String>,
    pub values: Vec<f64>,
}

impl ChartSeries {
    fn push(&mut self, label: String, value: f64) {
        self.labels.push(label);
        self.values.push(value);
    }

    fn labels_json(&self) -> BenchResult<String> {
        Ok(serde_json::to_string(&self.labels)?)
    }

    fn values_json(&self) -> BenchResult<String> {
        Ok(serde_json::to_string(&self.values)?)
    }
}

/// Split measurements into the insert series and the single-post query series.
pub fn chart_series(points: &[MeasurementPoint]) -> (ChartSeries, ChartSeries) {
    let mut insert = ChartSeries::default();
    let mut query = ChartSeries::default();
    for p in points {
        match p.operation {
            Operation::Insert => insert.push(
                format!("{}_metas_{}", p.meta_count, p.tier.label()),
                p.elapsed_secs,
            ),
            Operation::Query => {
                query.push(format!("{}_metas_1_post", p.meta_count), p.elapsed_secs)
            }
        }
    }
    (insert, query)
}

pub fn render_html(insert: &ChartSeries, query: &ChartSeries) -> BenchResult<String> {
    let mut env = Environment::new();
    env.add_template("report", REPORT_TEMPLATE)?;
    let template = env.get_template("report")?;

    let insert_chart_labels = insert.labels_json()?;
    let insert_chart_data = insert.values_json()?;
    let get_posts_chart_labels = query.labels_json()?;
    let get_posts_chart_data = query.values_json()?;
    let html = template.render(context! {
        insert_chart_labels,
        insert_chart_data,
        get_posts_chart_labels,
        get_posts_chart_data,
    })?;
    Ok(html)
}

// ────────────────────────────────────────────────────────────────────────────────
// Report file
// ────────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ReportArtifact {
    pub path: PathBuf,
    pub url: String,
}

/// Render `points` into `<content_dir>/benchmark/<uuid>.html`.
pub fn render(points: &[MeasurementPoint], config: &ReportConfig) -> BenchResult<ReportArtifact> {
    let (insert, query) = chart_series(points);
    let html = render_html(&insert, &query)?;

    let dir = config.content_dir.join(REPORT_SUBDIR);
    fs::create_dir_all(&dir)?;

    let file = format!("{}.html", uuid::Uuid::new_v4());
    let path = dir.join(&file);
    fs::write(&path, html)?;

    let url = format!(
        "{}/{}/{}",
        config.content_url.trim_end_matches('/'),
        REPORT_SUBDIR,
        file
    );
    Ok(ReportArtifact { path, url })
}

/// Re-render a report from a `measurements.json` export.
pub fn render_from_file(input: &Path, config: &ReportConfig) -> BenchResult<ReportArtifact> {
    let points = load_json(input)?;
    render(&points, config)
}

// ────────────────────────────────────────────────────────────────────────────────
// JSON export / import
// ────────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct RunExport<'a> {
    system_info: SystemInfo,
    measurements: &'a [MeasurementPoint],
}

#[derive(Debug, Deserialize)]
struct RecordedRun {
    measurements: Vec<RecordedMeasurement>,
}

/// Operation tags stay strings until validated.
#[derive(Debug, Deserialize)]
struct RecordedMeasurement {
    meta_count: u32,
    tier: PostTier,
    operation: String,
    elapsed_secs: f64,
    #[serde(default)]
    latency: Option<LatencySummary>,
}

pub fn export_json(points: &[MeasurementPoint], path: &Path) -> BenchResult<()> {
    let export = RunExport {
        system_info: SystemInfo::collect(),
        measurements: points,
    };
    fs::write(path, serde_json::to_string_pretty(&export)?)?;
    println!("  JSON exported to {}", path.display());
    Ok(())
}

pub fn load_json(path: &Path) -> BenchResult<Vec<MeasurementPoint>> {
    parse_json(&fs::read_to_string(path)?)
}

/// Parse an export. Unknown operation tags are rejected.
pub fn parse_json(content: &str) -> BenchResult<Vec<MeasurementPoint>> {
    let run: RecordedRun = serde_json::from_str(content)?;
    run.measurements
        .into_iter()
        .map(|m| -> BenchResult<MeasurementPoint> {
            Ok(MeasurementPoint {
                meta_count: m.meta_count,
                tier: m.tier,
                operation: m.operation.parse()?,
                elapsed_secs: m.elapsed_secs,
                latency: m.latency,
            })
        })
        .collect()
}

// ────────────────────────────────────────────────────────────────────────────────
// CSV export
// ────────────────────────────────────────────────────────────────────────────────

pub fn export_csv(points: &[MeasurementPoint], path: &Path) -> BenchResult<()> {
    let mut wtr = csv::Writer::from_path(path)?;

    wtr.write_record([
        "meta_count",
        "tier",
        "operation",
        "elapsed_secs",
        "ops",
        "mean_us",
        "p50_us",
        "p99_us",
    ])?;

    for p in points {
        let (ops, mean, p50, p99) = match p.latency {
            Some(l) => (
                l.ops.to_string(),
                format!("{:.2}", l.mean_us),
                format!("{:.2}", l.p50_us),
                format!("{:.2}", l.p99_us),
            ),
            None => Default::default(),
        };
        let meta_count = p.meta_count.to_string();
        let elapsed = format!("{:.6}", p.elapsed_secs);
        wtr.write_record([
            meta_count.as_str(),
            p.tier.label(),
            p.operation.as_str(),
            elapsed.as_str(),
            ops.as_str(),
            mean.as_str(),
            p50.as_str(),
            p99.as_str(),
        ])?;
    }

    wtr.flush()?;
    println!("  CSV exported to {}", path.display());
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────────
// Terminal output
// ────────────────────────────────────────────────────────────────────────────────

/// One (metadata count, tier) pair with both phases.
struct SummaryRow {
    meta_count: u32,
    tier: PostTier,
    insert: Option<(f64, Option<LatencySummary>)>,
    query: Option<f64>,
}

fn summary_rows(points: &[MeasurementPoint]) -> Vec<SummaryRow> {
    let mut rows: Vec<SummaryRow> = Vec::new();
    for p in points {
        let idx = match rows
            .iter()
            .position(|r| r.meta_count == p.meta_count && r.tier == p.tier)
        {
            Some(i) => i,
            None => {
                rows.push(SummaryRow {
                    meta_count: p.meta_count,
                    tier: p.tier,
                    insert: None,
                    query: None,
                });
                rows.len() - 1
            }
        };
        match p.operation {
            Operation::Insert => rows[idx].insert = Some((p.elapsed_secs, p.latency)),
            Operation::Query => rows[idx].query = Some(p.elapsed_secs),
        }
    }
    rows
}

pub fn print_summary(points: &[MeasurementPoint]) {
    println!(
        "\n{}",
        "╔══════════════════════════════════════════════════════╗"
            .bold()
            .blue()
    );
    println!(
        "{}",
        "║          Postmeta Benchmark Summary                 ║"
            .bold()
            .blue()
    );
    println!(
        "{}",
        "╚══════════════════════════════════════════════════════╝"
            .bold()
            .blue()
    );

    let rows = summary_rows(points);
    if rows.is_empty() {
        println!("  {}", "No measurements recorded.".dimmed());
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS);
    table.set_header(vec![
        "Metas",
        "Tier",
        "Insert (s)",
        "Mean/post (μs)",
        "p50 (μs)",
        "p99 (μs)",
        "Query (s)",
    ]);

    let slowest_query = rows
        .iter()
        .filter_map(|r| r.query)
        .fold(0.0f64, f64::max);

    for r in &rows {
        let (insert_secs, latency) = match r.insert {
            Some((secs, latency)) => (format!("{:.3}", secs), latency),
            None => ("-".to_string(), None),
        };
        let us = |f: fn(&LatencySummary) -> f64| {
            latency
                .as_ref()
                .map(|l| format!("{:.1}", f(l)))
                .unwrap_or_else(|| "-".to_string())
        };
        let query_cell = match r.query {
            Some(q) if q > 0.0 && (q - slowest_query).abs() < f64::EPSILON => {
                Cell::new(format!("{:.4}", q)).fg(Color::Red)
            }
            Some(q) => Cell::new(format!("{:.4}", q)),
            None => Cell::new("-"),
        };

        table.add_row(vec![
            Cell::new(r.meta_count),
            Cell::new(r.tier.label()),
            Cell::new(insert_secs),
            Cell::new(us(|l| l.mean_us)),
            Cell::new(us(|l| l.p50_us)),
            Cell::new(us(|l| l.p99_us)),
            query_cell,
        ]);
    }

    println!("{table}");
}

// ────────────────────────────────────────────────────────────────────────────────
// Template
// ────────────────────────────────────────────────────────────────────────────────

const REPORT_TEMPLATE: &str = r#"<html>
<head>
<script src="https://cdn.jsdelivr.net/npm/chart.js@3.7.1/dist/chart.min.js"></script>
</head>
<body>
<canvas id="insert_chart" width="400" height="400" style="float:left;"></canvas>
<canvas id="get_posts_chart" width="400" height="400"></canvas>
<script>
const palette = {
    background: [
        'rgba(255, 99, 132, 0.2)',
        'rgba(54, 162, 235, 0.2)',
        'rgba(255, 206, 86, 0.2)',
        'rgba(75, 192, 192, 0.2)',
        'rgba(153, 102, 255, 0.2)',
        'rgba(255, 159, 64, 0.2)'
    ],
    border: [
        'rgba(255, 99, 132, 1)',
        'rgba(54, 162, 235, 1)',
        'rgba(255, 206, 86, 1)',
        'rgba(75, 192, 192, 1)',
        'rgba(153, 102, 255, 1)',
        'rgba(255, 159, 64, 1)'
    ]
};

function barChart(id, label, labels, data) {
    return new Chart(document.getElementById(id).getContext('2d'), {
        type: 'bar',
        data: {
            labels: labels,
            datasets: [{
                label: label,
                data: data,
                backgroundColor: palette.background,
                borderColor: palette.border,
                borderWidth: 1
            }]
        },
        options: {
            responsive: false,
            scales: {
                y: {
                    beginAtZero: true
                }
            }
        }
    });
}

const insert_chart = barChart(
    'insert_chart',
    'Time in seconds to insert',
    {{ insert_chart_labels }},
    {{ insert_chart_data }}
);

const get_posts_chart = barChart(
    'get_posts_chart',
    'Time in seconds to get 1 post',
    {{ get_posts_chart_labels }},
    {{ get_posts_chart_data }}
);
</script>
</body>
</html>
"#;
