//! Dimension snapshots and the generic surrogate-key builder.
//!
//! Surrogate ids are positional: the n-th surviving source row gets id `n`,
//! so reordering the raw source renumbers the dimension even when its
//! content is unchanged. Id `0` is reserved for the "Undefined" sentinel.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{Result, WarehouseError};
use crate::loader::{CsvLoader, ExistencePolicy, Loader};
use crate::schema::{ColumnDef, ColumnType, TableSchema, Value};
use crate::source::RawTable;

pub const SENTINEL_ID: i64 = 0;
pub const UNDEFINED: &str = "Undefined";

/// How a natural key is normalised before numbering and deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCase {
    AsIs,
    /// Every word capitalised, the rest lower-cased ("light green" -> "Light Green").
    Title,
}

impl KeyCase {
    pub fn apply(self, key: &str) -> String {
        match self {
            KeyCase::AsIs => key.to_string(),
            KeyCase::Title => title_case(key),
        }
    }
}

/// A word starts after any non-alphabetic character.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_alpha = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

/// Maps a raw source column onto its snapshot column name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceColumn {
    pub source: &'static str,
    pub target: &'static str,
}

/// Everything the generic builder needs to know about one dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct DimensionSpec {
    pub table: &'static str,
    pub id_column: &'static str,
    pub natural_key: SourceColumn,
    pub attributes: Vec<SourceColumn>,
    pub key_case: KeyCase,
    pub dedup: bool,
    /// Natural key written on the sentinel row.
    pub sentinel_key: &'static str,
}

impl DimensionSpec {
    fn country(
        table: &'static str,
        id_column: &'static str,
        name_column: &'static str,
        iso2_column: &'static str,
    ) -> Self {
        Self {
            table,
            id_column,
            natural_key: SourceColumn {
                source: "iso2_code",
                target: iso2_column,
            },
            attributes: vec![SourceColumn {
                source: "country_name",
                target: name_column,
            }],
            key_case: KeyCase::AsIs,
            dedup: false,
            sentinel_key: "XX",
        }
    }

    pub fn origin_country() -> Self {
        Self::country(
            "dim_origin_country",
            "origin_country_id",
            "origin_country_name",
            "origin_country_iso2",
        )
    }

    pub fn destination_country() -> Self {
        Self::country(
            "dim_destination_country",
            "destination_country_id",
            "destination_country_name",
            "destination_country_iso2",
        )
    }

    pub fn product() -> Self {
        Self {
            table: "dim_product",
            id_column: "product_id",
            natural_key: SourceColumn {
                source: "product_name",
                target: "product_name",
            },
            attributes: Vec::new(),
            key_case: KeyCase::AsIs,
            dedup: false,
            sentinel_key: UNDEFINED,
        }
    }

    pub fn color() -> Self {
        Self {
            table: "dim_color",
            id_column: "color_id",
            natural_key: SourceColumn {
                source: "product_color",
                target: "color_name",
            },
            attributes: Vec::new(),
            key_case: KeyCase::Title,
            dedup: true,
            sentinel_key: UNDEFINED,
        }
    }

    pub fn layout(&self) -> SnapshotLayout {
        SnapshotLayout {
            table: self.table.to_string(),
            id_column: self.id_column.to_string(),
            attributes: self
                .attributes
                .iter()
                .map(|a| ColumnDef::new(a.target, ColumnType::String))
                .collect(),
            key_column: Some(self.natural_key.target.to_string()),
        }
    }
}

/// One dimension member.
#[derive(Debug, Clone, PartialEq)]
pub struct DimensionRow {
    pub surrogate_id: i64,
    pub natural_key: String,
    pub attributes: Vec<Value>,
}

/// Column order of a persisted snapshot: id, attributes, then the natural
/// key column when the dimension writes one.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotLayout {
    pub table: String,
    pub id_column: String,
    pub attributes: Vec<ColumnDef>,
    pub key_column: Option<String>,
}

impl SnapshotLayout {
    pub fn schema(&self) -> TableSchema {
        let mut columns = vec![ColumnDef::new(self.id_column.clone(), ColumnType::Int64)];
        columns.extend(self.attributes.iter().cloned());
        if let Some(key) = &self.key_column {
            columns.push(ColumnDef::new(key.clone(), ColumnType::String));
        }
        TableSchema::new(self.table.clone(), columns, &[self.id_column.as_str()])
    }
}

/// The durable artifact of one dimension build. Rebuilt wholesale on every
/// run, never patched.
#[derive(Debug, Clone, PartialEq)]
pub struct DimensionSnapshot {
    pub layout: SnapshotLayout,
    pub rows: Vec<DimensionRow>,
}

impl DimensionSnapshot {
    pub fn table(&self) -> &str {
        &self.layout.table
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[cfg(test)]
    pub fn contains_id(&self, id: i64) -> bool {
        self.rows.iter().any(|r| r.surrogate_id == id)
    }

    #[cfg(test)]
    pub fn sentinel(&self) -> Option<&DimensionRow> {
        self.rows.iter().find(|r| r.surrogate_id == SENTINEL_ID)
    }

    /// Rows in destination column order.
    pub fn to_rows(&self) -> Vec<Vec<Value>> {
        let with_key = self.layout.key_column.is_some();
        self.rows
            .iter()
            .map(|row| {
                let mut values = Vec::with_capacity(row.attributes.len() + 2);
                values.push(Value::Int(row.surrogate_id));
                values.extend(row.attributes.iter().cloned());
                if with_key {
                    values.push(Value::Text(row.natural_key.clone()));
                }
                values
            })
            .collect()
    }

    /// Inverse of [`DimensionSnapshot::to_rows`]. Dimensions that persist no
    /// key column use the decimal id as their natural key.
    pub fn from_rows(layout: SnapshotLayout, rows: Vec<Vec<Value>>) -> Result<Self> {
        let width = layout.schema().columns.len();
        let mut members = Vec::with_capacity(rows.len());
        for (i, mut values) in rows.into_iter().enumerate() {
            if values.len() != width {
                return Err(WarehouseError::SourceRead {
                    path: layout.table.clone(),
                    reason: format!("row {} has {} fields, expected {}", i + 1, values.len(), width),
                });
            }
            let surrogate_id = values[0].as_int().ok_or_else(|| WarehouseError::SourceRead {
                path: layout.table.clone(),
                reason: format!("row {} has a non-integer {}", i + 1, layout.id_column),
            })?;
            let natural_key = match layout.key_column {
                Some(_) => values.pop().map(|v| v.to_string()).unwrap_or_default(),
                None => surrogate_id.to_string(),
            };
            let attributes = values.split_off(1);
            members.push(DimensionRow {
                surrogate_id,
                natural_key,
                attributes,
            });
        }
        Ok(Self {
            layout,
            rows: members,
        })
    }
}

/// Generic surrogate-key builder for dimensions read from a raw source.
#[derive(Debug, Clone)]
pub struct DimensionBuilder {
    spec: DimensionSpec,
}

impl DimensionBuilder {
    pub fn new(spec: DimensionSpec) -> Self {
        Self { spec }
    }

    pub fn build(&self, raw: &RawTable) -> Result<DimensionSnapshot> {
        let spec = &self.spec;
        let keys = raw.column(spec.natural_key.source)?;
        if raw.is_empty() {
            warn!(table = spec.table, source = %raw.path().display(), "Dimension source has no rows");
        }
        let attribute_values = spec
            .attributes
            .iter()
            .map(|a| raw.column(a.source))
            .collect::<Result<Vec<_>>>()?;

        let mut seen = HashSet::new();
        let mut rows = Vec::with_capacity(keys.len() + 1);
        for (i, raw_key) in keys.iter().enumerate() {
            let natural_key = spec.key_case.apply(raw_key);
            if spec.dedup && !seen.insert(natural_key.clone()) {
                continue;
            }
            rows.push(DimensionRow {
                surrogate_id: rows.len() as i64 + 1,
                natural_key,
                attributes: attribute_values
                    .iter()
                    .map(|column| Value::from(column[i]))
                    .collect(),
            });
        }

        rows.push(DimensionRow {
            surrogate_id: SENTINEL_ID,
            natural_key: spec.sentinel_key.to_string(),
            attributes: spec.attributes.iter().map(|_| Value::from(UNDEFINED)).collect(),
        });
        rows.sort_by_key(|r| r.surrogate_id);

        info!(
            table = spec.table,
            source = %raw.path().display(),
            source_rows = raw.len(),
            members = rows.len(),
            "Built dimension snapshot"
        );

        Ok(DimensionSnapshot {
            layout: spec.layout(),
            rows,
        })
    }
}

/// Snapshot artifacts in the intermediate directory. The directory is
/// handed in explicitly; nothing else knows where it lives.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    csv: CsvLoader,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            csv: CsvLoader::new(dir),
        }
    }

    pub fn dir(&self) -> &Path {
        self.csv.dir()
    }

    pub async fn save(&mut self, snapshot: &DimensionSnapshot) -> Result<()> {
        self.csv
            .load(&snapshot.layout.schema(), &snapshot.to_rows(), ExistencePolicy::Replace)
            .await?;
        Ok(())
    }

    pub fn fetch(&self, layout: &SnapshotLayout) -> Result<DimensionSnapshot> {
        let rows = self.csv.read(&layout.schema())?;
        DimensionSnapshot::from_rows(layout.clone(), rows)
    }
}
