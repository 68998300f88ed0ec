use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;

mod controller;
mod db;
mod drilldown;
mod error;
mod fact_table;
mod filter;
mod loader;
mod models;
mod query;
mod report;
mod session;

use controller::{Controller, DashboardEvent};
use fact_table::{FactTable, ScoreScale};
use filter::FilterState;
use session::SessionManager;

#[derive(Parser)]
#[command(name = "exam-crossfilter")]
#[command(about = "Cross-filtering exam performance dashboard", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SourceArgs {
    /// Directory with FactPerformance.csv and the Dim*.csv tables; reads Postgres when omitted
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Score that counts as perfect: inferred from the data, 100 or 1.0
    #[arg(long, value_enum, default_value_t = ScoreScale::Auto)]
    score_scale: ScoreScale,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Markdown,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the star schema
    InitDb,
    /// Load a demo year of exam records
    Seed,
    /// Import a directory of star-schema CSV files
    Import {
        #[arg(long)]
        dir: PathBuf,
    },
    /// Apply clicks and print the resulting dashboard
    Dashboard {
        #[command(flatten)]
        source: SourceArgs,
        /// Click to apply, in order: grade=A, level=Year 9, subject=Math, time=2023 Q1, view=Month or reset
        #[arg(long = "event")]
        events: Vec<DashboardEvent>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Markdown)]
        format: OutputFormat,
    },
    /// Replay chart payloads (one JSON object per line) and print each recomputed dashboard
    Replay {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long)]
        events: PathBuf,
    },
    /// Write a markdown report of the dashboard after the given clicks
    Report {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long = "event")]
        events: Vec<DashboardEvent>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::InitDb => {
            db::init_db(&connect().await?).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let inserted = db::seed(&connect().await?).await?;
            println!("Seed data inserted ({inserted} new exam records).");
        }
        Commands::Import { dir } => {
            let inserted = db::import_csv_dir(&connect().await?, &dir).await?;
            println!("Inserted {inserted} exam records from {}.", dir.display());
        }
        Commands::Dashboard {
            source,
            events,
            format,
        } => {
            let controller = Controller::new(load_table(&source).await?);
            let state = apply_events(&controller, events);
            let dashboard = controller.render(&state);

            match format {
                OutputFormat::Markdown => {
                    let summary = report::dataset_summary(controller.table());
                    print!("{}", report::build_report(&summary, &dashboard));
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&dashboard)?),
            }
        }
        Commands::Replay { source, events } => {
            let manager = SessionManager::new(load_table(&source).await?);
            replay(&manager, &events)?;
        }
        Commands::Report {
            source,
            events,
            out,
        } => {
            let controller = Controller::new(load_table(&source).await?);
            let state = apply_events(&controller, events);
            let summary = report::dataset_summary(controller.table());
            let report = report::build_report(&summary, &controller.render(&state));
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set, or pass --data-dir to read CSV files")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

async fn load_table(source: &SourceArgs) -> anyhow::Result<Arc<FactTable>> {
    let raw = match &source.data_dir {
        Some(dir) => loader::read_csv_dir(dir)?,
        None => db::fetch_dataset(&connect().await?).await?,
    };

    let table = FactTable::build(raw, source.score_scale).context("failed to build fact table")?;
    Ok(Arc::new(table))
}

fn apply_events(controller: &Controller, events: Vec<DashboardEvent>) -> FilterState {
    let mut state = FilterState::default();
    for event in events {
        controller.dispatch(&mut state, event);
    }
    state
}

fn replay(manager: &SessionManager, path: &Path) -> anyhow::Result<()> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut sessions = HashMap::new();
    tracing::info!(
        dataset = %report::dataset_summary(manager.controller().table()),
        "replaying events from {}",
        path.display()
    );

    for (index, line) in contents.lines().enumerate() {
        let line_number = index + 1;
        if line.trim().is_empty() {
            continue;
        }

        let payload: serde_json::Value = match serde_json::from_str(line) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(line = line_number, %err, "skipping line that is not JSON");
                continue;
            }
        };
        let Some(event) = DashboardEvent::from_payload(&payload) else {
            tracing::warn!(line = line_number, "skipping payload without a usable event");
            continue;
        };

        let name = payload
            .get("session")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("default")
            .to_string();
        let session_id = *sessions.entry(name.clone()).or_insert_with(|| manager.open());

        if let Some(dashboard) = manager.dispatch(session_id, event) {
            let record = serde_json::json!({
                "line": line_number,
                "session": name,
                "dashboard": dashboard,
            });
            println!("{}", serde_json::to_string(&record)?);
        }
    }

    if manager.is_empty() {
        println!("No events applied.");
        return Ok(());
    }

    tracing::info!(sessions = manager.len(), "replay finished");
    for (name, session_id) in sessions {
        if let Some(dashboard) = manager.snapshot(session_id) {
            tracing::info!(session = %name, status = %dashboard.status, exams = dashboard.kpis.exam_count, "final session state");
        }
        manager.close(session_id);
    }
    Ok(())
}
