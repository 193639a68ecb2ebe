//! Calendar (date) dimension generated from a month range.
//!
//! Every day in range is a valid member, so there is no sentinel row. A fact
//! dated outside the range still gets a `date_id`; it just has no row here.

use chrono::{Datelike, Days, Months, NaiveDate};
use tracing::info;

use crate::dimension::{DimensionRow, DimensionSnapshot, SnapshotLayout};
use crate::error::{Result, WarehouseError};
use crate::schema::{ColumnDef, ColumnType, Value};

/// Inclusive month range, each end formatted `YYYY-MM`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarRange {
    pub first_month: String,
    pub last_month: String,
}

impl CalendarRange {
    pub fn new(first_month: impl Into<String>, last_month: impl Into<String>) -> Self {
        Self {
            first_month: first_month.into(),
            last_month: last_month.into(),
        }
    }

    /// First day of `first_month` and last day of `last_month`.
    pub fn days(&self) -> Result<(NaiveDate, NaiveDate)> {
        let start = month_start(&self.first_month)?;
        let last_start = month_start(&self.last_month)?;
        if last_start < start {
            return Err(WarehouseError::InvalidRange(format!(
                "last month {} precedes first month {}",
                self.last_month, self.first_month
            )));
        }
        let end = last_start
            .checked_add_months(Months::new(1))
            .and_then(|d| d.checked_sub_days(Days::new(1)))
            .ok_or_else(|| {
                WarehouseError::InvalidRange(format!("month {} is out of range", self.last_month))
            })?;
        Ok((start, end))
    }
}

fn month_start(month: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(&format!("{}-01", month.trim()), "%Y-%m-%d").map_err(|_| {
        WarehouseError::InvalidRange(format!("'{}' is not a YYYY-MM month", month))
    })
}

/// `20230405` for 2023-04-05.
pub fn date_id(day: NaiveDate) -> i64 {
    day.year() as i64 * 10_000 + day.month() as i64 * 100 + day.day() as i64
}

fn quarter(day: NaiveDate) -> String {
    format!("{}-Q{}", day.year(), (day.month() - 1) / 3 + 1)
}

fn month_id(day: NaiveDate) -> i64 {
    day.year() as i64 * 100 + day.month() as i64
}

pub struct CalendarDimensionBuilder;

impl CalendarDimensionBuilder {
    pub fn layout() -> SnapshotLayout {
        SnapshotLayout {
            table: "dim_date".to_string(),
            id_column: "date_id".to_string(),
            attributes: vec![
                ColumnDef::new("year", ColumnType::Int64),
                ColumnDef::new("quarter", ColumnType::String),
                ColumnDef::new("month", ColumnType::Int64),
                ColumnDef::new("month_name", ColumnType::String),
                ColumnDef::new("day_name", ColumnType::String),
            ],
            key_column: None,
        }
    }

    pub fn build(range: &CalendarRange) -> Result<DimensionSnapshot> {
        let (start, end) = range.days()?;

        let rows: Vec<DimensionRow> = start
            .iter_days()
            .take_while(|day| *day <= end)
            .map(|day| {
                let id = date_id(day);
                DimensionRow {
                    surrogate_id: id,
                    natural_key: id.to_string(),
                    attributes: vec![
                        Value::Int(day.year() as i64),
                        Value::Text(quarter(day)),
                        Value::Int(month_id(day)),
                        Value::Text(day.format("%B, %Y").to_string()),
                        Value::Text(day.format("%B %d, %Y").to_string()),
                    ],
                }
            })
            .collect();

        info!(
            table = "dim_date",
            first_day = %start,
            last_day = %end,
            members = rows.len(),
            "Built calendar dimension"
        );

        Ok(DimensionSnapshot {
            layout: Self::layout(),
            rows,
        })
    }
}
