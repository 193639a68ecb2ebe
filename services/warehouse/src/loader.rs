//! Destination writers.
//!
//! `Replace` drops and recreates the table from the given rows, so reruns
//! are idempotent. `Append` adds rows with no uniqueness check; rerunning a
//! fact load after a mid-stream failure duplicates the chunks that had
//! already landed.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};

use crate::error::{Result, WarehouseError};
use crate::schema::{TableSchema, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistencePolicy {
    Replace,
    Append,
}

#[async_trait]
pub trait Loader: Send {
    /// Write `rows` (in `table` column order) and return how many landed.
    async fn load(
        &mut self,
        table: &TableSchema,
        rows: &[Vec<Value>],
        policy: ExistencePolicy,
    ) -> Result<u64>;
}

// =============================================================================
// CSV directory backend
// =============================================================================

/// One `<table>.csv` per table inside a directory. Non-numeric fields are
/// quoted.
#[derive(Debug, Clone)]
pub struct CsvLoader {
    dir: PathBuf,
}

impl CsvLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn table_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", table))
    }

    fn write(&self, table: &TableSchema, rows: &[Vec<Value>], policy: ExistencePolicy) -> Result<u64> {
        let path = self.table_path(&table.name);
        let io_err = |e: &dyn std::fmt::Display| {
            WarehouseError::load(&table.name, format!("{}: {}", path.display(), e))
        };

        fs::create_dir_all(&self.dir).map_err(|e| io_err(&e))?;

        let file = match policy {
            ExistencePolicy::Replace => fs::File::create(&path),
            ExistencePolicy::Append => OpenOptions::new().create(true).append(true).open(&path),
        }
        .map_err(|e| io_err(&e))?;
        let needs_header = file.metadata().map_err(|e| io_err(&e))?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .quote_style(csv::QuoteStyle::NonNumeric)
            .from_writer(file);

        if needs_header {
            writer.write_record(table.column_names()).map_err(|e| io_err(&e))?;
        }
        for row in rows {
            writer
                .write_record(row.iter().map(|v| v.to_string()))
                .map_err(|e| io_err(&e))?;
        }
        writer.flush().map_err(|e| io_err(&e))?;

        Ok(rows.len() as u64)
    }

    /// Read a table written by this backend back into typed rows.
    pub fn read(&self, table: &TableSchema) -> Result<Vec<Vec<Value>>> {
        let path = self.table_path(&table.name);
        let mut reader = csv::ReaderBuilder::new()
            .from_path(&path)
            .map_err(|e| WarehouseError::source_read(&path, e))?;

        let headers = reader
            .headers()
            .map_err(|e| WarehouseError::source_read(&path, e))?
            .clone();
        if !headers.iter().eq(table.column_names()) {
            return Err(WarehouseError::source_read(
                &path,
                format!("unexpected header {:?}", headers.iter().collect::<Vec<_>>()),
            ));
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| WarehouseError::source_read(&path, e))?;
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            let row = record
                .iter()
                .zip(&table.columns)
                .map(|(raw, column)| {
                    Value::parse(raw, column.column_type).ok_or_else(|| {
                        WarehouseError::source_read(
                            &path,
                            format!("line {}: '{}' is not a valid {}", line, raw, column.name),
                        )
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            rows.push(row);
        }
        Ok(rows)
    }
}

#[async_trait]
impl Loader for CsvLoader {
    async fn load(
        &mut self,
        table: &TableSchema,
        rows: &[Vec<Value>],
        policy: ExistencePolicy,
    ) -> Result<u64> {
        let written = self.write(table, rows, policy)?;
        debug!(table = %table.name, rows = written, ?policy, dir = %self.dir.display(), "Wrote CSV table");
        Ok(written)
    }
}

// =============================================================================
// Postgres backend
// =============================================================================

/// Postgres caps bind parameters per statement at 65535.
const MAX_BIND_PARAMS: usize = 65_535;

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn create_table_sql(table: &TableSchema, if_not_exists: bool) -> String {
    let columns = table
        .columns
        .iter()
        .map(|c| format!("{} {} NOT NULL", quote_ident(&c.name), c.column_type.sql_type()))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE TABLE {}{} ({})",
        if if_not_exists { "IF NOT EXISTS " } else { "" },
        quote_ident(&table.name),
        columns
    )
}

/// The declared primary key becomes a plain (non-unique) index: the fact
/// table's `date_id` repeats on every row of the same day.
fn primary_key_index_sql(table: &TableSchema) -> Option<String> {
    if table.primary_key.is_empty() {
        return None;
    }
    let columns = table
        .primary_key
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    Some(format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
        quote_ident(&format!("{}_pk_idx", table.name)),
        quote_ident(&table.name),
        columns
    ))
}

pub struct PgLoader {
    pool: PgPool,
}

impl PgLoader {
    pub async fn connect(db_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
            .map_err(|e| WarehouseError::load("<connection>", e))?;
        Ok(Self { pool })
    }

    async fn execute(&self, table: &str, sql: &str) -> Result<()> {
        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .map_err(|e| WarehouseError::load(table, e))?;
        Ok(())
    }

    async fn insert(&self, table: &TableSchema, rows: &[Vec<Value>]) -> Result<u64> {
        let width = table.columns.len().max(1);
        let batch_rows = (MAX_BIND_PARAMS / width).max(1);
        let columns = table
            .column_names()
            .map(quote_ident)
            .collect::<Vec<_>>()
            .join(", ");

        let mut inserted = 0;
        for batch in rows.chunks(batch_rows) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {} ({}) ",
                quote_ident(&table.name),
                columns
            ));
            builder.push_values(batch, |mut b, row| {
                for value in row {
                    match value {
                        Value::Int(i) => {
                            b.push_bind(*i);
                        }
                        Value::Float(f) => {
                            b.push_bind(*f);
                        }
                        Value::Text(s) => {
                            b.push_bind(s.clone());
                        }
                    }
                }
            });
            let result = builder
                .build()
                .execute(&self.pool)
                .await
                .map_err(|e| WarehouseError::load(&table.name, e))?;
            inserted += result.rows_affected();
        }
        Ok(inserted)
    }
}

#[async_trait]
impl Loader for PgLoader {
    async fn load(
        &mut self,
        table: &TableSchema,
        rows: &[Vec<Value>],
        policy: ExistencePolicy,
    ) -> Result<u64> {
        match policy {
            ExistencePolicy::Replace => {
                self.execute(
                    &table.name,
                    &format!("DROP TABLE IF EXISTS {}", quote_ident(&table.name)),
                )
                .await?;
                self.execute(&table.name, &create_table_sql(table, false)).await?;
            }
            ExistencePolicy::Append => {
                self.execute(&table.name, &create_table_sql(table, true)).await?;
            }
        }
        if let Some(sql) = primary_key_index_sql(table) {
            self.execute(&table.name, &sql).await?;
        }

        let inserted = self.insert(table, rows).await?;
        info!(table = %table.name, rows = inserted, ?policy, "Loaded into Postgres");
        Ok(inserted)
    }
}
