//! Natural key -> surrogate id indices, built once per fact run from the
//! dimension snapshots and read-only afterwards.

use std::collections::HashMap;

use crate::dimension::{DimensionSnapshot, SENTINEL_ID};
use crate::error::Result;
use crate::source::RawTable;
use crate::vocabulary::StaticDimensionBuilder;

/// How probe values are compared against snapshot keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMatch {
    /// Case-sensitive exact match (ISO2 codes, product names).
    Exact,
    /// Both sides lower-cased (colors).
    Lowercase,
}

impl KeyMatch {
    fn normalize(self, key: &str) -> String {
        match self {
            KeyMatch::Exact => key.to_string(),
            KeyMatch::Lowercase => key.to_lowercase(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DimensionLookupIndex {
    table: String,
    key_match: KeyMatch,
    ids: HashMap<String, i64>,
}

impl DimensionLookupIndex {
    /// When a key repeats in the snapshot the later row wins.
    pub fn from_snapshot(snapshot: &DimensionSnapshot, key_match: KeyMatch) -> Self {
        let ids = snapshot
            .rows
            .iter()
            .map(|row| (key_match.normalize(&row.natural_key), row.surrogate_id))
            .collect();
        Self {
            table: snapshot.table().to_string(),
            key_match,
            ids,
        }
    }

    /// Index over a fixed key -> id table.
    pub fn from_pairs<'k>(
        table: &str,
        key_match: KeyMatch,
        pairs: impl IntoIterator<Item = (&'k str, i64)>,
    ) -> Self {
        let ids = pairs
            .into_iter()
            .map(|(key, id)| (key_match.normalize(key), id))
            .collect();
        Self {
            table: table.to_string(),
            key_match,
            ids,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Total: missing, empty and unmapped keys all resolve to the sentinel.
    pub fn resolve(&self, key: Option<&str>) -> i64 {
        match key {
            Some(k) if !k.is_empty() => self
                .ids
                .get(&self.key_match.normalize(k))
                .copied()
                .unwrap_or(SENTINEL_ID),
            _ => SENTINEL_ID,
        }
    }
}

/// Category and color of a product, as spelled in the raw product list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductAttributes {
    pub category: String,
    pub color: String,
}

/// The raw product reference table keyed by product name. Category and
/// color live on the product, not on the fact row.
#[derive(Debug, Clone, Default)]
pub struct ProductCatalog {
    products: HashMap<String, ProductAttributes>,
}

impl ProductCatalog {
    pub fn from_source(raw: &RawTable) -> Result<Self> {
        let names = raw.column("product_name")?;
        let categories = raw.column("product_category")?;
        let colors = raw.column("product_color")?;

        let products = names
            .iter()
            .zip(categories.iter().zip(colors.iter()))
            .map(|(name, (category, color))| {
                (
                    name.to_string(),
                    ProductAttributes {
                        category: category.to_string(),
                        color: color.to_string(),
                    },
                )
            })
            .collect();
        Ok(Self { products })
    }

    pub fn get(&self, product: &str) -> Option<&ProductAttributes> {
        self.products.get(product)
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

/// Every index the fact transformation consults.
#[derive(Debug, Clone)]
pub struct DimensionIndices {
    pub origin_country: DimensionLookupIndex,
    pub destination_country: DimensionLookupIndex,
    pub product: DimensionLookupIndex,
    pub category: DimensionLookupIndex,
    pub color: DimensionLookupIndex,
    pub catalog: ProductCatalog,
}

/// Snapshots feeding [`DimensionIndices::build`].
pub struct IndexSources<'a> {
    pub origin_country: &'a DimensionSnapshot,
    pub destination_country: &'a DimensionSnapshot,
    pub product: &'a DimensionSnapshot,
    pub color: &'a DimensionSnapshot,
}

impl DimensionIndices {
    /// Category resolves against its static vocabulary, not a snapshot.
    pub fn build(sources: IndexSources<'_>, catalog: ProductCatalog) -> Self {
        Self {
            origin_country: DimensionLookupIndex::from_snapshot(sources.origin_country, KeyMatch::Exact),
            destination_country: DimensionLookupIndex::from_snapshot(
                sources.destination_country,
                KeyMatch::Exact,
            ),
            product: DimensionLookupIndex::from_snapshot(sources.product, KeyMatch::Exact),
            category: StaticDimensionBuilder::category().lookup_index(),
            color: DimensionLookupIndex::from_snapshot(sources.color, KeyMatch::Lowercase),
            catalog,
        }
    }
}
