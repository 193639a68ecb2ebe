//! Small fixed vocabularies whose ids are hardcoded rather than assigned
//! from a source file.

use tracing::info;

use crate::dimension::{DimensionRow, DimensionSnapshot, SnapshotLayout, SENTINEL_ID, UNDEFINED};
use crate::lookup::{DimensionLookupIndex, KeyMatch};

/// One hardcoded member: the id, the exact spelling found in sources, and
/// the display name written to the dimension table.
#[derive(Debug, Clone, Copy)]
struct StaticEntry {
    id: i64,
    source_key: &'static str,
    name: &'static str,
}

pub struct StaticDimensionBuilder {
    table: &'static str,
    id_column: &'static str,
    name_column: &'static str,
    entries: &'static [StaticEntry],
}

impl StaticDimensionBuilder {
    /// Product categories. Only the exact source spellings map.
    pub fn category() -> Self {
        Self {
            table: "dim_category",
            id_column: "category_id",
            name_column: "category_name",
            entries: &[
                StaticEntry {
                    id: 1,
                    source_key: "fruit",
                    name: "Fruit",
                },
                StaticEntry {
                    id: 2,
                    source_key: "vegetable",
                    name: "Vegetable",
                },
            ],
        }
    }

    pub fn layout(&self) -> SnapshotLayout {
        SnapshotLayout {
            table: self.table.to_string(),
            id_column: self.id_column.to_string(),
            attributes: Vec::new(),
            key_column: Some(self.name_column.to_string()),
        }
    }

    pub fn build(&self) -> DimensionSnapshot {
        let mut rows = vec![DimensionRow {
            surrogate_id: SENTINEL_ID,
            natural_key: UNDEFINED.to_string(),
            attributes: Vec::new(),
        }];
        rows.extend(self.entries.iter().map(|entry| DimensionRow {
            surrogate_id: entry.id,
            natural_key: entry.name.to_string(),
            attributes: Vec::new(),
        }));
        rows.sort_by_key(|r| r.surrogate_id);

        info!(table = self.table, members = rows.len(), "Built static dimension");

        DimensionSnapshot {
            layout: self.layout(),
            rows,
        }
    }

    /// Exact source spelling -> id. Anything else resolves to the sentinel.
    pub fn lookup_index(&self) -> DimensionLookupIndex {
        DimensionLookupIndex::from_pairs(
            self.table,
            KeyMatch::Exact,
            self.entries.iter().map(|entry| (entry.source_key, entry.id)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Value;

    #[test]
    fn test_category_members() {
        let snapshot = StaticDimensionBuilder::category().build();
        assert_eq!(
            snapshot.to_rows(),
            vec![
                vec![Value::Int(0), Value::from("Undefined")],
                vec![Value::Int(1), Value::from("Fruit")],
                vec![Value::Int(2), Value::from("Vegetable")],
            ]
        );
    }

    #[test]
    fn test_category_mapping_is_exact() {
        let index = StaticDimensionBuilder::category().lookup_index();
        assert_eq!(index.resolve(Some("fruit")), 1);
        assert_eq!(index.resolve(Some("vegetable")), 2);
        for other in ["Fruit", "FRUIT", "Vegetable", "nut", ""] {
            assert_eq!(index.resolve(Some(other)), 0, "{} should not map", other);
        }
        assert_eq!(index.table(), "dim_category");
    }

    #[test]
    fn test_category_schema() {
        let schema = StaticDimensionBuilder::category().layout().schema();
        let columns: Vec<&str> = schema.column_names().collect();
        assert_eq!(columns, vec!["category_id", "category_name"]);
        assert_eq!(schema.name, "dim_category");
    }
}
