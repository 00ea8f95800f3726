//! Postmeta benchmark runner
//!
//! Usage:
//!   postmeta-bench run --post-mode all                          # 0..=10 metas × 100/1k/10k posts
//!   postmeta-bench run --post-mode 100_posts --postmeta-max 0   # one quick tier
//!   postmeta-bench run --post-mode 1k_posts --export results    # also write JSON + CSV
//!   postmeta-bench render --input results/measurements.json     # rebuild the HTML report
//!   postmeta-bench reset                                        # empty the benchmark tables

use clap::{Parser, Subcommand};
use colored::Colorize;
use postmeta_bench::adapters::open_store;
use postmeta_bench::config::{
    FileConfig, ReportOverrides, RunOverrides, StoreBackend, StoreConfig, StoreOverrides,
};
use postmeta_bench::{driver, report, reset, BenchResult};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "postmeta-bench",
    version,
    about = "Benchmark post insert and meta query latency as postmeta grows"
)]
struct Cli {
    /// TOML file with [benchmark], [store] and [report] tables.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG takes precedence).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the benchmark and write an HTML report.
    Run {
        #[command(flatten)]
        run: RunOverrides,

        #[command(flatten)]
        store: StoreOverrides,

        #[command(flatten)]
        report: ReportOverrides,

        /// Also write measurements.json and measurements.csv into this directory.
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Empty posts, postmeta and transients.
    Reset {
        #[command(flatten)]
        store: StoreOverrides,
    },

    /// Render an HTML report from a measurements.json export.
    Render {
        /// Export written by `run --export`.
        #[arg(long)]
        input: PathBuf,

        #[command(flatten)]
        report: ReportOverrides,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = execute(cli) {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn execute(cli: Cli) -> BenchResult<()> {
    let file = match cli.config {
        Some(ref path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };

    match cli.command {
        Command::Run {
            run,
            store,
            report: report_overrides,
            export,
        } => {
            let run_config = file.resolve_run(&run)?;
            let store_config = file.resolve_store(&store)?;
            let report_config = file.resolve_report(&report_overrides);

            let mut db = open_configured_store(&store_config)?;
            info!(
                "Benchmarking {} store: tiers {:?}, postmeta {}..={}",
                db.name(),
                run_config.tiers.iter().map(|t| t.label()).collect::<Vec<_>>(),
                run_config.meta_min,
                run_config.meta_max
            );

            let artifact = driver::run_and_render(
                db.as_mut(),
                &run_config,
                &report_config,
                export.as_deref(),
            )?;
            print_success(&artifact.url, &artifact.path);
        }
        Command::Reset { store } => {
            let store_config = file.resolve_store(&store)?;
            let mut db = open_configured_store(&store_config)?;
            reset::reset(db.as_mut(), std::time::Duration::ZERO)?;
        }
        Command::Render {
            input,
            report: report_overrides,
        } => {
            let report_config = file.resolve_report(&report_overrides);
            let artifact = report::render_from_file(&input, &report_config)?;
            print_success(&artifact.url, &artifact.path);
        }
    }
    Ok(())
}

fn open_configured_store(
    config: &StoreConfig,
) -> BenchResult<Box<dyn postmeta_bench::ContentStore>> {
    if config.backend == StoreBackend::Sqlite {
        info!(
            "Opening SQLite store at {} (prefix {})",
            config.path.display(),
            config.table_prefix
        );
    }
    open_store(config)
}

fn print_success(url: &str, path: &Path) {
    println!(
        "{} To see the benchmark: {}",
        "Success:".green().bold(),
        url
    );
    println!("  {}", path.display().to_string().dimmed());
}
