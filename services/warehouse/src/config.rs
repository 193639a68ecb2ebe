use std::path::PathBuf;

use anyhow::{Context, Result};

/// Reference chunk size for the fact stream.
pub const DEFAULT_CHUNK_SIZE: usize = 100_000;

#[derive(Debug, Clone)]
pub struct Config {
    /// Raw CSV sources: country_list.csv, product_list.csv, sales_<year>.csv
    pub source_dir: PathBuf,
    /// Dimension snapshots and the fact output artifact
    pub artifact_dir: PathBuf,
    /// Destination directory for the CSV backend
    pub output_dir: PathBuf,
    /// Only needed for the Postgres backend
    pub db_url: Option<String>,
    pub chunk_size: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let chunk_size = match var("CHUNK_SIZE") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .with_context(|| format!("CHUNK_SIZE must be a positive integer, got '{}'", raw))?,
            None => DEFAULT_CHUNK_SIZE,
        };

        Ok(Self {
            source_dir: PathBuf::from(var("SOURCE_DIR").unwrap_or_else(|| "./source_data".to_string())),
            artifact_dir: PathBuf::from(var("ARTIFACT_DIR").unwrap_or_else(|| "./data_temp".to_string())),
            output_dir: PathBuf::from(var("OUTPUT_DIR").unwrap_or_else(|| "./data_out".to_string())),
            db_url: var("DB_URL"),
            chunk_size,
        })
    }

    pub fn db_url(&self) -> Result<&str> {
        self.db_url.as_deref().context("DB_URL env var missing")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.source_dir, PathBuf::from("./source_data"));
        assert_eq!(config.artifact_dir, PathBuf::from("./data_temp"));
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(config.db_url().is_err());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("SOURCE_DIR", "/data/in"),
            ("CHUNK_SIZE", "500"),
            ("DB_URL", "postgres://localhost/warehouse"),
        ]))
        .unwrap();
        assert_eq!(config.source_dir, PathBuf::from("/data/in"));
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.db_url().unwrap(), "postgres://localhost/warehouse");
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(Config::from_lookup(lookup(&[("CHUNK_SIZE", "0")])).is_err());
        assert!(Config::from_lookup(lookup(&[("CHUNK_SIZE", "lots")])).is_err());
    }
}
