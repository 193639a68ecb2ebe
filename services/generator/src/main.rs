//! Generator Service - Writes a synthetic sales source for one year
//!
//! Reads the country and product reference lists from SOURCE_DIR and writes
//! `sales_<year>.csv` next to them, in the layout the warehouse sales
//! pipeline expects. Keys are drawn with deliberate noise (`XX`, `-`,
//! empty) so the fact transformation exercises its sentinel fallback.
//!
//! Usage:
//!   cargo run --bin generator -- --year 2023
//!   cargo run --bin generator -- --year 2023 --rows 5000 --seed 42

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Datelike, Duration, NaiveDate};
use clap::Parser;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone)]
struct Config {
    /// Holds country_list.csv and product_list.csv; sales_<year>.csv lands here
    source_dir: PathBuf,
}

impl Config {
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let source_dir = match var("SOURCE_DIR") {
            Some(raw) => Some(raw)
                .filter(|dir| !dir.trim().is_empty())
                .context("SOURCE_DIR must not be empty")?,
            None => "./source_data".to_string(),
        };
        Ok(Self {
            source_dir: PathBuf::from(source_dir),
        })
    }
}

/// Extra origin/destination values that never match a country.
const NOISE_COUNTRIES: &[&str] = &["XX", "-", ""];

#[derive(Parser, Debug)]
#[command(name = "generator", about = "Generates a synthetic sales source")]
struct Args {
    /// Year to generate; every date falls inside it
    #[arg(long)]
    year: i32,

    /// Number of sales rows
    #[arg(long, default_value_t = 1_000_000)]
    rows: usize,

    /// Seed for reproducible output
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct CountryRow {
    iso2_code: String,
}

#[derive(Debug, Deserialize)]
struct ProductRow {
    product_name: String,
}

/// One generated source row, in source column order.
#[derive(Debug, Clone, PartialEq, Serialize)]
struct SalesRow {
    date: String,
    origin_country: String,
    destination_country: String,
    product: String,
    duration: f64,
    units: i64,
    amount: f64,
}

/// Candidate values for the key columns.
#[derive(Debug, Clone)]
struct Vocabulary {
    countries: Vec<String>,
    products: Vec<String>,
}

impl Vocabulary {
    fn read(source_dir: &Path) -> Result<Self> {
        let countries_path = source_dir.join("country_list.csv");
        let mut countries: Vec<String> = read_rows::<CountryRow>(&countries_path)?
            .into_iter()
            .map(|r| r.iso2_code)
            .collect();
        countries.extend(NOISE_COUNTRIES.iter().map(|s| s.to_string()));

        let products_path = source_dir.join("product_list.csv");
        let mut products: Vec<String> = read_rows::<ProductRow>(&products_path)?
            .into_iter()
            .map(|r| r.product_name)
            .collect();
        products.push(String::new());

        Ok(Self { countries, products })
    }
}

fn read_rows<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path).with_context(|| format!("Failed to open {}", path.display()))?;
    reader
        .deserialize()
        .collect::<std::result::Result<Vec<T>, _>>()
        .with_context(|| format!("Failed to read {}", path.display()))
}

fn days_of_year(year: i32) -> Result<Vec<NaiveDate>> {
    let first = NaiveDate::from_ymd_opt(year, 1, 1).with_context(|| format!("Invalid year {}", year))?;
    Ok(first
        .iter_days()
        .take_while(|d| d.year() == year)
        .collect())
}

fn pick<R: Rng>(rng: &mut R, values: &[String]) -> String {
    values.choose(rng).cloned().unwrap_or_default()
}

/// Rows sorted by date; ties keep generation order.
fn generate<R: Rng>(rng: &mut R, vocabulary: &Vocabulary, year: i32, rows: usize) -> Result<Vec<SalesRow>> {
    let days = days_of_year(year)?;
    let first = days.first().copied().with_context(|| format!("Year {} has no days", year))?;

    let mut generated: Vec<(i64, SalesRow)> = (0..rows)
        .map(|_| {
            let offset = rng.gen_range(0..days.len() as i64);
            let units: i64 = rng.gen_range(1..100);
            let price: i64 = rng.gen_range(5..16);
            let duration = (rng.gen::<f64>() * 10_000.0).round() / 100.0;
            let date = first + Duration::days(offset);
            (
                offset,
                SalesRow {
                    date: date.format("%Y-%m-%d").to_string(),
                    origin_country: pick(rng, &vocabulary.countries),
                    destination_country: pick(rng, &vocabulary.countries),
                    product: pick(rng, &vocabulary.products),
                    duration,
                    units,
                    amount: (units * price) as f64,
                },
            )
        })
        .collect();

    generated.sort_by_key(|(offset, _)| *offset);
    Ok(generated.into_iter().map(|(_, row)| row).collect())
}

fn write_rows(path: &Path, rows: &[SalesRow]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::NonNumeric)
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("generator=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .init();
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();
    let args = Args::parse();

    let config = Config::from_env()?;
    let source_dir = config.source_dir;
    let vocabulary = Vocabulary::read(&source_dir)?;

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let rows = generate(&mut rng, &vocabulary, args.year, args.rows)?;

    let output = source_dir.join(format!("sales_{}.csv", args.year));
    write_rows(&output, &rows)?;

    info!(
        year = args.year,
        rows = rows.len(),
        countries = vocabulary.countries.len(),
        products = vocabulary.products.len(),
        output = %output.display(),
        "Wrote sales source"
    );
    Ok(())
}
