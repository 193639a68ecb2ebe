//! Warehouse ETL - builds the sales star schema from raw CSV sources
//!
//! Pipelines:
//! - country: origin/destination country dimensions
//! - product: product, category and color dimensions
//! - date: calendar dimension for a month range
//! - sales: chunked fact stream resolved against the dimension snapshots
//! - all: every pipeline above, in that order
//!
//! Dimensions are rebuilt wholesale on each run (Replace). Facts are
//! appended chunk by chunk, so a failed sales run leaves its committed
//! prefix in the destination.

mod calendar;
mod config;
mod dimension;
mod error;
mod fact;
mod loader;
mod lookup;
mod pipeline;
mod schema;
mod source;
mod vocabulary;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use crate::calendar::CalendarRange;
use crate::config::Config;
use crate::loader::{CsvLoader, Loader, PgLoader};
use crate::pipeline::{Executor, PipelinePlan};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputDb {
    /// One CSV file per table under OUTPUT_DIR
    Csv,
    /// Tables in the database at DB_URL
    Postgres,
}

#[derive(Parser, Debug)]
#[command(name = "warehouse", about = "Builds the sales star schema from raw CSV sources")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Destination backend
    #[arg(long, global = true, value_enum, default_value_t = OutputDb::Csv)]
    output_db: OutputDb,

    /// Load into the destination; `--ingest false` only transforms
    #[arg(long, global = true, default_value_t = true, action = clap::ArgAction::Set)]
    ingest: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the origin and destination country dimensions
    Country,
    /// Build the product, category and color dimensions
    Product,
    /// Build the date dimension
    Date(DateArgs),
    /// Transform and load the sales facts of one year
    Sales(SalesArgs),
    /// Run every pipeline
    All {
        #[command(flatten)]
        date: DateArgs,
        #[command(flatten)]
        sales: SalesArgs,
    },
}

#[derive(clap::Args, Debug)]
struct DateArgs {
    /// First month of the calendar (YYYY-MM)
    #[arg(long, default_value = "2023-01")]
    first_month: String,

    /// Last month of the calendar, inclusive (YYYY-MM)
    #[arg(long, default_value = "2023-12")]
    last_month: String,
}

#[derive(clap::Args, Debug)]
struct SalesArgs {
    /// Reporting year; reads sales_<year>.csv
    #[arg(long, default_value = "2023")]
    year: String,
}

impl DateArgs {
    fn range(&self) -> CalendarRange {
        CalendarRange::new(self.first_month.as_str(), self.last_month.as_str())
    }
}

fn init_logging() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warehouse=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .init();
}

fn plan(command: &Command, ingest: bool) -> PipelinePlan {
    match command {
        Command::Country => PipelinePlan::country(ingest),
        Command::Product => PipelinePlan::product(ingest),
        Command::Date(date) => PipelinePlan::date(date.range(), ingest),
        Command::Sales(sales) => PipelinePlan::sales(sales.year.as_str(), ingest),
        Command::All { date, sales } => PipelinePlan::full(date.range(), sales.year.as_str(), ingest),
    }
}

/// No destination is opened for transform-only runs.
async fn destination(config: &Config, output_db: OutputDb, ingest: bool) -> Result<Option<Box<dyn Loader>>> {
    if !ingest {
        return Ok(None);
    }
    let loader: Box<dyn Loader> = match output_db {
        OutputDb::Csv => Box::new(CsvLoader::new(config.output_dir.clone())),
        OutputDb::Postgres => Box::new(
            PgLoader::connect(config.db_url()?)
                .await
                .context("Failed to connect to database")?,
        ),
    };
    Ok(Some(loader))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    let args = Args::parse();
    let config = Config::from_env()?;
    let plan = plan(&args.command, args.ingest);

    info!(
        pipeline = plan.name,
        output_db = ?args.output_db,
        ingest = args.ingest,
        source_dir = %config.source_dir.display(),
        artifact_dir = %config.artifact_dir.display(),
        chunk_size = config.chunk_size,
        "Warehouse ETL"
    );

    let destination = destination(&config, args.output_db, args.ingest).await?;
    let summary = Executor::new(&config, destination)
        .run(&plan)
        .await
        .with_context(|| format!("{} pipeline failed", plan.name))?;

    println!("=== {} pipeline complete ===", plan.name);
    println!("Stages: {}", summary.stages);
    println!("Dimensions built: {}", summary.dimensions_built);
    println!("Tables loaded: {}", summary.tables_loaded);
    if summary.fact_chunks > 0 {
        println!("Fact rows: {} in {} chunks", summary.fact_rows, summary.fact_chunks);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Stage;

    #[test]
    fn test_ingest_defaults_on() {
        let args = Args::try_parse_from(["warehouse", "country"]).unwrap();
        assert!(args.ingest);
        assert_eq!(args.output_db, OutputDb::Csv);
    }

    #[test]
    fn test_ingest_false_builds_transform_only_plan() {
        let args = Args::try_parse_from(["warehouse", "sales", "--year", "2024", "--ingest", "false"]).unwrap();
        let plan = plan(&args.command, args.ingest);
        assert_eq!(
            plan.stages,
            vec![Stage::FactLoop {
                year: "2024".to_string(),
                load: false,
            }]
        );
    }

    #[test]
    fn test_all_takes_date_and_sales_options() {
        let args = Args::try_parse_from([
            "warehouse",
            "--output-db",
            "postgres",
            "all",
            "--first-month",
            "2023-03",
            "--last-month",
            "2023-04",
            "--year",
            "2023",
        ])
        .unwrap();
        assert_eq!(args.output_db, OutputDb::Postgres);
        let plan = plan(&args.command, args.ingest);
        assert_eq!(plan.name, "all");
        assert!(plan
            .stages
            .contains(&Stage::BuildCalendar(CalendarRange::new("2023-03", "2023-04"))));
    }

    #[tokio::test]
    async fn test_transform_only_opens_no_destination() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert!(destination(&config, OutputDb::Postgres, false).await.unwrap().is_none());
        assert!(destination(&config, OutputDb::Postgres, true).await.is_err());
    }
}
