//! Source readers for the raw CSV stores.
//!
//! Dimension sources are small and read whole into a [`RawTable`]. The fact
//! source is streamed as a lazy, finite sequence of bounded [`Chunk`]s; a
//! [`FactSource`] can be re-opened from the start but a [`ChunkReader`]
//! cannot be resumed from an arbitrary offset.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use csv::StringRecord;
use serde::Deserialize;

use crate::error::{Result, WarehouseError};

fn csv_reader(path: &Path) -> Result<csv::Reader<File>> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| WarehouseError::source_read(path, e))
}

/// A raw dimension source held entirely in memory, in file order.
#[derive(Debug, Clone)]
pub struct RawTable {
    path: PathBuf,
    headers: StringRecord,
    records: Vec<StringRecord>,
}

impl RawTable {
    pub fn read(path: &Path) -> Result<Self> {
        let reader = csv_reader(path)?;
        Self::from_reader(path.to_path_buf(), reader)
    }

    #[cfg(test)]
    pub fn from_csv(content: &str) -> Result<Self> {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());
        Self::from_reader(PathBuf::from("<memory>"), reader)
    }

    fn from_reader<R: Read>(path: PathBuf, mut reader: csv::Reader<R>) -> Result<Self> {
        let headers = reader
            .headers()
            .map_err(|e| WarehouseError::source_read(&path, e))?
            .clone();

        let records = reader
            .records()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| WarehouseError::source_read(&path, e))?;

        Ok(Self {
            path,
            headers,
            records,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Position of a named column, or `SourceRead` if the header lacks it.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| {
                WarehouseError::source_read(&self.path, format!("missing column '{}'", name))
            })
    }

    /// Values of one column, in source row order.
    pub fn column(&self, name: &str) -> Result<Vec<&str>> {
        let idx = self.column_index(name)?;
        Ok(self
            .records
            .iter()
            .map(|r| r.get(idx).unwrap_or(""))
            .collect())
    }
}

/// Columns every fact source must carry.
pub const FACT_SOURCE_COLUMNS: &[&str] = &[
    "date",
    "origin_country",
    "destination_country",
    "product",
    "duration",
    "units",
    "amount",
];

/// One untyped fact source row. Measures stay textual until the
/// transformation coerces them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawFactRow {
    pub date: String,
    pub origin_country: String,
    pub destination_country: String,
    pub product: String,
    pub duration: String,
    pub units: String,
    pub amount: String,
    /// 1-based line in the source file (header is line 1).
    #[serde(skip)]
    pub line: u64,
}

/// A bounded, ordered batch of raw fact rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub index: usize,
    pub rows: Vec<RawFactRow>,
}

/// Handle on a fact source file. Every [`FactSource::open`] starts over
/// from the first data row.
#[derive(Debug, Clone)]
pub struct FactSource {
    path: PathBuf,
    chunk_size: usize,
}

impl FactSource {
    pub fn new(path: impl Into<PathBuf>, chunk_size: usize) -> Self {
        Self {
            path: path.into(),
            chunk_size: chunk_size.max(1),
        }
    }

    /// Source for the reporting period `year` inside `source_dir`.
    pub fn for_year(source_dir: &Path, year: &str, chunk_size: usize) -> Self {
        Self::new(source_dir.join(format!("sales_{}.csv", year)), chunk_size)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn open(&self) -> Result<ChunkReader> {
        let mut reader = csv_reader(&self.path)?;
        let headers = reader
            .headers()
            .map_err(|e| WarehouseError::source_read(&self.path, e))?
            .clone();

        for required in FACT_SOURCE_COLUMNS {
            if !headers.iter().any(|h| h == *required) {
                return Err(WarehouseError::source_read(
                    &self.path,
                    format!("missing column '{}'", required),
                ));
            }
        }

        Ok(ChunkReader {
            path: self.path.clone(),
            reader,
            headers,
            chunk_size: self.chunk_size,
            next_index: 0,
            finished: false,
        })
    }

    /// Whole-file read: the entire source as a single chunk. The pipeline
    /// always streams; this is the reference the chunked path must match.
    #[cfg(test)]
    pub fn read_all(&self) -> Result<Chunk> {
        let whole = Self {
            path: self.path.clone(),
            chunk_size: usize::MAX,
        };
        let chunk = whole.open()?.next().transpose()?;
        Ok(chunk.unwrap_or(Chunk {
            index: 0,
            rows: Vec::new(),
        }))
    }
}

/// Lazy chunk producer over an open fact source.
pub struct ChunkReader {
    path: PathBuf,
    reader: csv::Reader<File>,
    headers: StringRecord,
    chunk_size: usize,
    next_index: usize,
    finished: bool,
}

impl ChunkReader {
    fn read_row(&self, record: &StringRecord) -> Result<RawFactRow> {
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let mut row: RawFactRow = record
            .deserialize(Some(&self.headers))
            .map_err(|e| WarehouseError::source_read(&self.path, e))?;
        row.line = line;
        Ok(row)
    }
}

impl Iterator for ChunkReader {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut rows = Vec::new();
        let mut record = StringRecord::new();
        while rows.len() < self.chunk_size {
            match self.reader.read_record(&mut record) {
                Ok(true) => match self.read_row(&record) {
                    Ok(row) => rows.push(row),
                    Err(e) => {
                        self.finished = true;
                        return Some(Err(e));
                    }
                },
                Ok(false) => {
                    self.finished = true;
                    break;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(WarehouseError::source_read(&self.path, e)));
                }
            }
        }

        if rows.is_empty() {
            return None;
        }

        let chunk = Chunk {
            index: self.next_index,
            rows,
        };
        self.next_index += 1;
        Some(Ok(chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const SALES: &str = "\"date\",\"origin_country\",\"destination_country\",\"product\",\"duration\",\"units\",\"amount\"\n\
\"2023-01-01\",\"US\",\"CL\",\"Apple\",12.5,10,50.0\n\
\"2023-01-02\",\"-\",\"\",\"Kiwi\",1.0,2,10.0\n\
\"2023-01-03\",\"XX\",\"US\",\"\",3.25,3,30.0\n";

    fn write_source(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("sales_2023.csv");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_chunks_are_bounded_and_ordered() {
        let tmp = tempfile::tempdir().unwrap();
        write_source(tmp.path(), SALES);

        let source = FactSource::for_year(tmp.path(), "2023", 2);
        let chunks: Vec<Chunk> = source.open().unwrap().map(|c| c.unwrap()).collect();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].rows.len(), 2);
        assert_eq!(chunks[1].index, 1);
        assert_eq!(chunks[1].rows.len(), 1);
        assert_eq!(chunks[1].rows[0].origin_country, "XX");
    }

    #[test]
    fn test_row_lines_follow_header() {
        let tmp = tempfile::tempdir().unwrap();
        write_source(tmp.path(), SALES);

        let chunk = FactSource::for_year(tmp.path(), "2023", 10).read_all().unwrap();
        let lines: Vec<u64> = chunk.rows.iter().map(|r| r.line).collect();
        assert_eq!(lines, vec![2, 3, 4]);
    }

    #[test]
    fn test_empty_cells_stay_empty_strings() {
        let tmp = tempfile::tempdir().unwrap();
        write_source(tmp.path(), SALES);

        let chunk = FactSource::for_year(tmp.path(), "2023", 10).read_all().unwrap();
        assert_eq!(chunk.rows[1].destination_country, "");
        assert_eq!(chunk.rows[2].product, "");
    }

    #[test]
    fn test_reopen_starts_from_beginning() {
        let tmp = tempfile::tempdir().unwrap();
        write_source(tmp.path(), SALES);
        let source = FactSource::for_year(tmp.path(), "2023", 1);

        let mut first = source.open().unwrap();
        first.next().unwrap().unwrap();
        first.next().unwrap().unwrap();

        let mut again = source.open().unwrap();
        let chunk = again.next().unwrap().unwrap();
        assert_eq!(chunk.index, 0);
        assert_eq!(chunk.rows[0].date, "2023-01-01");
    }

    #[test]
    fn test_missing_file_is_source_read_error() {
        let tmp = tempfile::tempdir().unwrap();
        let source = FactSource::for_year(tmp.path(), "1999", 10);
        assert!(matches!(
            source.open(),
            Err(WarehouseError::SourceRead { .. })
        ));
    }

    #[test]
    fn test_missing_fact_column_is_source_read_error() {
        let tmp = tempfile::tempdir().unwrap();
        write_source(tmp.path(), "date,origin_country,product\n2023-01-01,US,Apple\n");
        let err = FactSource::for_year(tmp.path(), "2023", 10).open().err().unwrap();
        assert!(err.to_string().contains("destination_country"));
    }

    #[test]
    fn test_header_only_source_yields_no_chunks() {
        let tmp = tempfile::tempdir().unwrap();
        write_source(tmp.path(), "date,origin_country,destination_country,product,duration,units,amount\n");
        let source = FactSource::for_year(tmp.path(), "2023", 10);
        assert_eq!(source.open().unwrap().count(), 0);
        assert!(source.read_all().unwrap().rows.is_empty());
    }

    #[test]
    fn test_raw_table_columns() {
        let table = RawTable::from_csv("country_name,iso2_code\nChile,CL\nUnited States,US\n").unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.column("iso2_code").unwrap(), vec!["CL", "US"]);
        assert!(matches!(
            table.column("iso3_code"),
            Err(WarehouseError::SourceRead { .. })
        ));
    }
}
