//! Fact chunk transformation: resolve every natural key of a raw sales row
//! to its surrogate id and project onto the fact schema.
//!
//! Resolution is total. Rows are never dropped for unknown keys; an
//! unresolved key becomes the sentinel `0`. Only a non-numeric measure (or
//! an unparseable date) rejects the chunk, and it rejects all of it.

use tracing::debug;

use crate::dimension::SENTINEL_ID;
use crate::error::{Result, WarehouseError};
use crate::lookup::DimensionIndices;
use crate::schema::{ColumnDef, ColumnType, TableSchema, Value};
use crate::source::{Chunk, RawFactRow};

pub const FACT_TABLE: &str = "sales_fact";

/// One resolved fact row. Every `*_id` is `0` or a member of its dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct FactRecord {
    pub date_id: i64,
    pub origin_country_id: i64,
    pub destination_country_id: i64,
    pub product_id: i64,
    pub category_id: i64,
    pub color_id: i64,
    pub duration: f64,
    pub units: i64,
    pub amount: f64,
}

impl FactRecord {
    /// `date_id` is declared as the primary key although it repeats across
    /// rows; loaders treat it as a lookup key only.
    pub fn schema() -> TableSchema {
        let int = |name: &str| ColumnDef::new(name, ColumnType::Int64);
        let float = |name: &str| ColumnDef::new(name, ColumnType::Float64);
        TableSchema::new(
            FACT_TABLE,
            vec![
                int("date_id"),
                int("origin_country_id"),
                int("destination_country_id"),
                int("product_id"),
                int("category_id"),
                int("color_id"),
                float("duration"),
                int("units"),
                float("amount"),
            ],
            &["date_id"],
        )
    }

    pub fn to_values(&self) -> Vec<Value> {
        vec![
            Value::Int(self.date_id),
            Value::Int(self.origin_country_id),
            Value::Int(self.destination_country_id),
            Value::Int(self.product_id),
            Value::Int(self.category_id),
            Value::Int(self.color_id),
            Value::Float(self.duration),
            Value::Int(self.units),
            Value::Float(self.amount),
        ]
    }

    fn has_unresolved_key(&self) -> bool {
        [
            self.origin_country_id,
            self.destination_country_id,
            self.product_id,
            self.category_id,
            self.color_id,
        ]
        .contains(&SENTINEL_ID)
    }
}

/// Strip the separators of a `YYYY-MM-DD` string and read it as an integer.
/// The calendar dimension is not consulted.
fn parse_date_id(row: &RawFactRow) -> Result<i64> {
    let digits: String = row.date.chars().filter(|c| *c != '-').collect();
    digits.parse().map_err(|_| WarehouseError::DateParse {
        line: row.line,
        value: row.date.clone(),
    })
}

fn parse_decimal(row: &RawFactRow, column: &'static str, raw: &str) -> Result<f64> {
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| WarehouseError::MeasureParse {
            line: row.line,
            column,
            value: raw.to_string(),
        })
}

/// Integer measure; a whole-valued decimal such as `10.0` is accepted.
fn parse_integer(row: &RawFactRow, column: &'static str, raw: &str) -> Result<i64> {
    if let Ok(i) = raw.parse::<i64>() {
        return Ok(i);
    }
    match raw.parse::<f64>() {
        Ok(f) if f.is_finite() && f.fract() == 0.0 => Ok(f as i64),
        _ => Err(WarehouseError::MeasureParse {
            line: row.line,
            column,
            value: raw.to_string(),
        }),
    }
}

pub struct FactChunkProcessor<'a> {
    indices: &'a DimensionIndices,
}

impl<'a> FactChunkProcessor<'a> {
    pub fn new(indices: &'a DimensionIndices) -> Self {
        Self { indices }
    }

    pub fn transform(&self, chunk: &Chunk) -> Result<Vec<FactRecord>> {
        let facts = chunk
            .rows
            .iter()
            .map(|row| self.resolve(row))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            chunk = chunk.index,
            rows = facts.len(),
            with_unresolved_keys = facts.iter().filter(|f| f.has_unresolved_key()).count(),
            "Resolved chunk"
        );
        Ok(facts)
    }

    fn resolve(&self, row: &RawFactRow) -> Result<FactRecord> {
        let idx = self.indices;
        let attributes = idx.catalog.get(&row.product);

        Ok(FactRecord {
            date_id: parse_date_id(row)?,
            origin_country_id: idx.origin_country.resolve(Some(&row.origin_country)),
            destination_country_id: idx.destination_country.resolve(Some(&row.destination_country)),
            product_id: idx.product.resolve(Some(&row.product)),
            category_id: idx.category.resolve(attributes.map(|a| a.category.as_str())),
            color_id: idx.color.resolve(attributes.map(|a| a.color.as_str())),
            duration: parse_decimal(row, "duration", &row.duration)?,
            units: parse_integer(row, "units", &row.units)?,
            amount: parse_decimal(row, "amount", &row.amount)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::{DimensionBuilder, DimensionSnapshot, DimensionSpec};
    use crate::lookup::{IndexSources, ProductCatalog};
    use crate::source::RawTable;
    use crate::vocabulary::StaticDimensionBuilder;

    const COUNTRIES: &str = "country_name,iso2_code\nChile,CL\nGermany,DE\nUnited States,US\n";
    const PRODUCTS: &str = "product_name,product_category,product_color\n\
Banana,fruit,yellow\nCherry,fruit,red\nCarrot,vegetable,orange\nKiwi,fruit,green\n\
Lettuce,vegetable,green\nPotato,vegetable,brown\nApple,fruit,red\n";

    struct Fixture {
        snapshots: Vec<DimensionSnapshot>,
        indices: DimensionIndices,
    }

    fn fixture() -> Fixture {
        fixture_with_products(PRODUCTS)
    }

    fn fixture_with_products(product_list: &str) -> Fixture {
        let countries = RawTable::from_csv(COUNTRIES).unwrap();
        let products = RawTable::from_csv(product_list).unwrap();

        let origin = DimensionBuilder::new(DimensionSpec::origin_country()).build(&countries).unwrap();
        let destination = DimensionBuilder::new(DimensionSpec::destination_country())
            .build(&countries)
            .unwrap();
        let product = DimensionBuilder::new(DimensionSpec::product()).build(&products).unwrap();
        let color = DimensionBuilder::new(DimensionSpec::color()).build(&products).unwrap();
        let category = StaticDimensionBuilder::category().build();

        let indices = DimensionIndices::build(
            IndexSources {
                origin_country: &origin,
                destination_country: &destination,
                product: &product,
                color: &color,
            },
            ProductCatalog::from_source(&products).unwrap(),
        );

        Fixture {
            snapshots: vec![origin, destination, product, category, color],
            indices,
        }
    }

    fn raw(date: &str, origin: &str, destination: &str, product: &str) -> RawFactRow {
        RawFactRow {
            date: date.to_string(),
            origin_country: origin.to_string(),
            destination_country: destination.to_string(),
            product: product.to_string(),
            duration: "12.5".to_string(),
            units: "10".to_string(),
            amount: "50.0".to_string(),
            line: 2,
        }
    }

    fn chunk(rows: Vec<RawFactRow>) -> Chunk {
        Chunk { index: 0, rows }
    }

    #[test]
    fn test_end_to_end_row() {
        let f = fixture();
        let facts = FactChunkProcessor::new(&f.indices)
            .transform(&chunk(vec![raw("2023-04-05", "US", "-", "Apple")]))
            .unwrap();

        assert_eq!(
            facts,
            vec![FactRecord {
                date_id: 20230405,
                origin_country_id: 3,
                destination_country_id: 0,
                product_id: 7,
                category_id: 1,
                color_id: 2,
                duration: 12.5,
                units: 10,
                amount: 50.0,
            }]
        );
    }

    #[test]
    fn test_unknown_keys_resolve_to_sentinel() {
        let f = fixture();
        let facts = FactChunkProcessor::new(&f.indices)
            .transform(&chunk(vec![raw("2023-01-01", "ZZ", "", "Nonexistent Fruit")]))
            .unwrap();

        let fact = &facts[0];
        assert_eq!(fact.origin_country_id, 0);
        assert_eq!(fact.destination_country_id, 0);
        assert_eq!(fact.product_id, 0);
        assert_eq!(fact.category_id, 0);
        assert_eq!(fact.color_id, 0);
        assert_eq!(fact.date_id, 20230101);
    }

    #[test]
    fn test_no_rows_dropped() {
        let f = fixture();
        let rows = vec![
            raw("2023-01-01", "CL", "DE", "Kiwi"),
            raw("2023-01-01", "XX", "XX", ""),
            raw("2023-01-02", "-", "US", "Potato"),
        ];
        let facts = FactChunkProcessor::new(&f.indices).transform(&chunk(rows)).unwrap();
        assert_eq!(facts.len(), 3);
        assert_eq!(facts[2].category_id, 2);
    }

    #[test]
    fn test_category_needs_exact_source_spelling() {
        let f = fixture_with_products(
            "product_name,product_category,product_color\n\
Apple,Fruit,red\nKiwi,FRUIT,green\nPotato,Vegetable,brown\nCarrot,vegetable,orange\n",
        );
        let rows = vec![
            raw("2023-01-01", "US", "CL", "Apple"),
            raw("2023-01-01", "US", "CL", "Kiwi"),
            raw("2023-01-01", "US", "CL", "Potato"),
            raw("2023-01-01", "US", "CL", "Carrot"),
        ];
        let facts = FactChunkProcessor::new(&f.indices).transform(&chunk(rows)).unwrap();
        let categories: Vec<i64> = facts.iter().map(|f| f.category_id).collect();
        assert_eq!(categories, vec![0, 0, 0, 2]);
    }

    #[test]
    fn test_resolved_ids_exist_in_dimensions() {
        let f = fixture();
        let rows = vec![
            raw("2023-01-01", "CL", "DE", "Kiwi"),
            raw("2023-02-01", "DE", "CL", "Lettuce"),
            raw("2023-03-01", "US", "ZZ", "Banana"),
            raw("2023-03-02", "", "US", "Ghost"),
        ];
        let facts = FactChunkProcessor::new(&f.indices).transform(&chunk(rows)).unwrap();

        let [origin, destination, product, category, color] = &f.snapshots[..] else {
            panic!("fixture has five snapshots");
        };
        for fact in &facts {
            assert!(origin.contains_id(fact.origin_country_id));
            assert!(destination.contains_id(fact.destination_country_id));
            assert!(product.contains_id(fact.product_id));
            assert!(category.contains_id(fact.category_id));
            assert!(color.contains_id(fact.color_id));
        }
    }

    #[test]
    fn test_date_outside_calendar_still_gets_id() {
        let f = fixture();
        let facts = FactChunkProcessor::new(&f.indices)
            .transform(&chunk(vec![raw("1999-12-31", "US", "US", "Apple")]))
            .unwrap();
        assert_eq!(facts[0].date_id, 19991231);
    }

    #[test]
    fn test_non_numeric_measure_rejects_chunk() {
        let f = fixture();
        let mut bad = raw("2023-01-02", "US", "CL", "Apple");
        bad.units = "ten".to_string();
        bad.line = 3;
        let rows = vec![raw("2023-01-01", "US", "CL", "Apple"), bad];

        let err = FactChunkProcessor::new(&f.indices).transform(&chunk(rows)).unwrap_err();
        match err {
            WarehouseError::MeasureParse { line, column, value } => {
                assert_eq!(line, 3);
                assert_eq!(column, "units");
                assert_eq!(value, "ten");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_measure_is_an_error() {
        let f = fixture();
        let mut bad = raw("2023-01-02", "US", "CL", "Apple");
        bad.amount = String::new();
        let result = FactChunkProcessor::new(&f.indices).transform(&chunk(vec![bad]));
        assert!(matches!(result, Err(WarehouseError::MeasureParse { column: "amount", .. })));
    }

    #[test]
    fn test_whole_decimal_units_accepted() {
        let f = fixture();
        let mut row = raw("2023-01-02", "US", "CL", "Apple");
        row.units = "10.0".to_string();
        let facts = FactChunkProcessor::new(&f.indices).transform(&chunk(vec![row])).unwrap();
        assert_eq!(facts[0].units, 10);
    }

    #[test]
    fn test_bad_date_is_an_error() {
        let f = fixture();
        let result = FactChunkProcessor::new(&f.indices)
            .transform(&chunk(vec![raw("05/04/2023", "US", "CL", "Apple")]));
        assert!(matches!(result, Err(WarehouseError::DateParse { .. })));
    }

    #[test]
    fn test_fact_schema_order() {
        let schema = FactRecord::schema();
        let columns: Vec<&str> = schema.column_names().collect();
        assert_eq!(
            columns,
            vec![
                "date_id",
                "origin_country_id",
                "destination_country_id",
                "product_id",
                "category_id",
                "color_id",
                "duration",
                "units",
                "amount",
            ]
        );
        assert_eq!(schema.primary_key, vec!["date_id".to_string()]);
    }
}
