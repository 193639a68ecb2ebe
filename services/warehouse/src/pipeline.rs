//! Pipeline plans and their sequential executor.
//!
//! A [`PipelinePlan`] is an ordered list of stages fixed up front from the
//! command and the `ingest` flag. The [`Executor`] runs the stages one after
//! another; the first error aborts the run. No checkpoint is kept, so a
//! rerun starts the fact source over and re-appends any chunk that had
//! already been loaded.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::calendar::{CalendarDimensionBuilder, CalendarRange};
use crate::config::Config;
use crate::dimension::{DimensionBuilder, DimensionSnapshot, DimensionSpec, SnapshotLayout, SnapshotStore};
use crate::error::{Result, WarehouseError};
use crate::fact::{FactChunkProcessor, FactRecord, FACT_TABLE};
use crate::loader::{CsvLoader, ExistencePolicy, Loader};
use crate::lookup::{DimensionIndices, IndexSources, ProductCatalog};
use crate::schema::{TableSchema, Value};
use crate::source::{Chunk, FactSource, RawTable};
use crate::vocabulary::StaticDimensionBuilder;

pub const COUNTRY_SOURCE: &str = "country_list.csv";
pub const PRODUCT_SOURCE: &str = "product_list.csv";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DimensionKind {
    OriginCountry,
    DestinationCountry,
    Product,
    Category,
    Color,
    Date,
}

impl DimensionKind {
    pub fn layout(self) -> SnapshotLayout {
        match self {
            DimensionKind::OriginCountry => DimensionSpec::origin_country().layout(),
            DimensionKind::DestinationCountry => DimensionSpec::destination_country().layout(),
            DimensionKind::Product => DimensionSpec::product().layout(),
            DimensionKind::Category => StaticDimensionBuilder::category().layout(),
            DimensionKind::Color => DimensionSpec::color().layout(),
            DimensionKind::Date => CalendarDimensionBuilder::layout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// Build a source-backed or static dimension and write its snapshot.
    BuildDimension(DimensionKind),
    /// Build the date dimension for a month range and write its snapshot.
    BuildCalendar(CalendarRange),
    /// Replace the destination table with a snapshot built earlier in the run.
    LoadDimension(DimensionKind),
    /// Stream the sales source chunk by chunk: transform, append to the fact
    /// artifact, and append to the destination when `load` is set.
    FactLoop { year: String, load: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelinePlan {
    pub name: &'static str,
    pub stages: Vec<Stage>,
}

impl PipelinePlan {
    fn dimensions(name: &'static str, kinds: &[DimensionKind], ingest: bool) -> Self {
        let mut stages = Vec::new();
        for kind in kinds {
            stages.push(Stage::BuildDimension(*kind));
            if ingest {
                stages.push(Stage::LoadDimension(*kind));
            }
        }
        Self { name, stages }
    }

    pub fn country(ingest: bool) -> Self {
        Self::dimensions(
            "country",
            &[DimensionKind::OriginCountry, DimensionKind::DestinationCountry],
            ingest,
        )
    }

    pub fn product(ingest: bool) -> Self {
        Self::dimensions(
            "product",
            &[DimensionKind::Product, DimensionKind::Category, DimensionKind::Color],
            ingest,
        )
    }

    pub fn date(range: CalendarRange, ingest: bool) -> Self {
        let mut stages = vec![Stage::BuildCalendar(range)];
        if ingest {
            stages.push(Stage::LoadDimension(DimensionKind::Date));
        }
        Self {
            name: "date",
            stages,
        }
    }

    pub fn sales(year: impl Into<String>, ingest: bool) -> Self {
        Self {
            name: "sales",
            stages: vec![Stage::FactLoop {
                year: year.into(),
                load: ingest,
            }],
        }
    }

    /// Every pipeline in dependency order.
    pub fn full(range: CalendarRange, year: impl Into<String>, ingest: bool) -> Self {
        let stages = [
            Self::country(ingest),
            Self::product(ingest),
            Self::date(range, ingest),
            Self::sales(year, ingest),
        ]
        .into_iter()
        .flat_map(|plan| plan.stages)
        .collect();
        Self {
            name: "all",
            stages,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub chunks: usize,
    pub rows: u64,
}

/// Drives transform -> load over the chunk sequence, one chunk at a time.
pub struct ChunkLoop<'a> {
    processor: FactChunkProcessor<'a>,
    schema: TableSchema,
}

impl<'a> ChunkLoop<'a> {
    pub fn new(indices: &'a DimensionIndices) -> Self {
        Self {
            processor: FactChunkProcessor::new(indices),
            schema: FactRecord::schema(),
        }
    }

    /// Every sink receives a chunk before the next chunk is read. Any
    /// failure stops the loop with earlier chunks already appended.
    pub async fn run<I>(&self, chunks: I, sinks: &mut [&mut dyn Loader]) -> Result<LoopSummary>
    where
        I: IntoIterator<Item = Result<Chunk>>,
    {
        let mut summary = LoopSummary::default();
        for chunk in chunks {
            let chunk = chunk?;
            let facts = self.processor.transform(&chunk)?;
            let rows: Vec<Vec<Value>> = facts.iter().map(FactRecord::to_values).collect();

            for sink in sinks.iter_mut() {
                sink.load(&self.schema, &rows, ExistencePolicy::Append).await?;
            }

            summary.chunks += 1;
            summary.rows += rows.len() as u64;
            info!(chunk = chunk.index, rows = rows.len(), "Processed chunk");
        }
        Ok(summary)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub stages: usize,
    pub dimensions_built: usize,
    pub tables_loaded: usize,
    pub fact_chunks: usize,
    pub fact_rows: u64,
}

pub struct Executor {
    source_dir: PathBuf,
    chunk_size: usize,
    snapshots: SnapshotStore,
    artifacts: CsvLoader,
    destination: Option<Box<dyn Loader>>,
    built: BTreeMap<DimensionKind, DimensionSnapshot>,
}

impl Executor {
    /// `destination` is `None` for transform-only runs.
    pub fn new(config: &Config, destination: Option<Box<dyn Loader>>) -> Self {
        Self {
            source_dir: config.source_dir.clone(),
            chunk_size: config.chunk_size,
            snapshots: SnapshotStore::new(config.artifact_dir.clone()),
            artifacts: CsvLoader::new(config.artifact_dir.clone()),
            destination,
            built: BTreeMap::new(),
        }
    }

    pub async fn run(&mut self, plan: &PipelinePlan) -> Result<RunSummary> {
        let span = info_span!("pipeline", name = plan.name, run_id = %Uuid::new_v4());
        async {
            info!(stages = plan.stages.len(), "Starting pipeline");
            let mut summary = RunSummary::default();
            for stage in &plan.stages {
                self.run_stage(stage, &mut summary).await?;
                summary.stages += 1;
            }
            info!(
                dimensions_built = summary.dimensions_built,
                tables_loaded = summary.tables_loaded,
                fact_chunks = summary.fact_chunks,
                fact_rows = summary.fact_rows,
                "Pipeline complete"
            );
            Ok(summary)
        }
        .instrument(span)
        .await
    }

    async fn run_stage(&mut self, stage: &Stage, summary: &mut RunSummary) -> Result<()> {
        match stage {
            Stage::BuildDimension(kind) => {
                let snapshot = self.build_dimension(*kind)?;
                self.store(*kind, snapshot).await?;
                summary.dimensions_built += 1;
            }
            Stage::BuildCalendar(range) => {
                let snapshot = CalendarDimensionBuilder::build(range)?;
                self.store(DimensionKind::Date, snapshot).await?;
                summary.dimensions_built += 1;
            }
            Stage::LoadDimension(kind) => {
                let snapshot = self.built.get(kind).ok_or_else(|| {
                    WarehouseError::load(&kind.layout().table, "dimension was not built in this run")
                })?;
                let destination = self.destination.as_deref_mut().ok_or_else(|| {
                    WarehouseError::load(snapshot.table(), "no destination configured")
                })?;
                let rows = destination
                    .load(&snapshot.layout.schema(), &snapshot.to_rows(), ExistencePolicy::Replace)
                    .await?;
                info!(table = snapshot.table(), rows, "Replaced dimension table");
                summary.tables_loaded += 1;
            }
            Stage::FactLoop { year, load } => {
                let loop_summary = self.fact_loop(year, *load).await?;
                summary.fact_chunks += loop_summary.chunks;
                summary.fact_rows += loop_summary.rows;
                if *load {
                    summary.tables_loaded += 1;
                }
            }
        }
        Ok(())
    }

    fn build_dimension(&self, kind: DimensionKind) -> Result<DimensionSnapshot> {
        let spec = match kind {
            DimensionKind::OriginCountry => DimensionSpec::origin_country(),
            DimensionKind::DestinationCountry => DimensionSpec::destination_country(),
            DimensionKind::Product => DimensionSpec::product(),
            DimensionKind::Color => DimensionSpec::color(),
            DimensionKind::Category => return Ok(StaticDimensionBuilder::category().build()),
            DimensionKind::Date => {
                return Err(WarehouseError::InvalidRange(
                    "the date dimension is built from a month range".to_string(),
                ))
            }
        };
        let source = match kind {
            DimensionKind::OriginCountry | DimensionKind::DestinationCountry => COUNTRY_SOURCE,
            _ => PRODUCT_SOURCE,
        };
        let raw = RawTable::read(&self.source_dir.join(source))?;
        DimensionBuilder::new(spec).build(&raw)
    }

    async fn store(&mut self, kind: DimensionKind, snapshot: DimensionSnapshot) -> Result<()> {
        self.snapshots.save(&snapshot).await?;
        info!(
            table = snapshot.table(),
            members = snapshot.len(),
            dir = %self.snapshots.dir().display(),
            "Wrote snapshot artifact"
        );
        self.built.insert(kind, snapshot);
        Ok(())
    }

    /// Snapshots built in this run win; otherwise read the artifact.
    fn snapshot(&self, kind: DimensionKind) -> Result<DimensionSnapshot> {
        match self.built.get(&kind) {
            Some(snapshot) => Ok(snapshot.clone()),
            None => self.snapshots.fetch(&kind.layout()),
        }
    }

    fn indices(&self) -> Result<DimensionIndices> {
        let origin = self.snapshot(DimensionKind::OriginCountry)?;
        let destination = self.snapshot(DimensionKind::DestinationCountry)?;
        let product = self.snapshot(DimensionKind::Product)?;
        let color = self.snapshot(DimensionKind::Color)?;
        let catalog = ProductCatalog::from_source(&RawTable::read(&self.source_dir.join(PRODUCT_SOURCE))?)?;
        if catalog.is_empty() {
            warn!("Product catalog is empty; every category and color resolves to 0");
        }
        let products = catalog.len();

        let indices = DimensionIndices::build(
            IndexSources {
                origin_country: &origin,
                destination_country: &destination,
                product: &product,
                color: &color,
            },
            catalog,
        );
        for index in [
            &indices.origin_country,
            &indices.destination_country,
            &indices.product,
            &indices.category,
            &indices.color,
        ] {
            debug!(table = index.table(), keys = index.len(), "Built lookup index");
        }
        debug!(products, "Loaded product catalog");
        Ok(indices)
    }

    async fn fact_loop(&mut self, year: &str, load: bool) -> Result<LoopSummary> {
        let indices = self.indices()?;
        let source = FactSource::for_year(&self.source_dir, year, self.chunk_size);
        info!(
            source = %source.path().display(),
            chunk_size = self.chunk_size,
            load,
            "Streaming fact source"
        );
        let chunks = source.open()?;

        let mut sinks: Vec<&mut dyn Loader> = vec![&mut self.artifacts];
        if load {
            let destination = self
                .destination
                .as_deref_mut()
                .ok_or_else(|| WarehouseError::load(FACT_TABLE, "no destination configured"))?;
            sinks.push(destination);
        }

        ChunkLoop::new(&indices).run(chunks, &mut sinks).await
    }
}
