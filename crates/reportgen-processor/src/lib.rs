//! Report Generator Processor: transforms, validation and the fetch cache
//!
//! ```text
//! fetched tables → [filter → aggregate → join …] → schema check → renderer
//!        ↑
//!   FetchCache (TTL + one in-flight fetch per fingerprint)
//! ```

pub mod cache;
pub mod stages;
pub mod validate;

pub use cache::{CacheStats, CacheStatus, FetchCache};
pub use stages::{build_pipeline, stage_for};
pub use validate::{check_schemas, validate};

use reportgen_core::{
    ExecutionContext, Fingerprint, PipelineOutput, ReportId, Result, SourceConfig, Table, TableSet,
    TransformRule,
};
use reportgen_sources::DataSource;
use serde_json::Map;
use std::sync::Arc;
use std::time::Duration;

pub struct Processor {
    cache: FetchCache,
    default_ttl: Duration,
}

impl Processor {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            cache: FetchCache::new(),
            default_ttl,
        }
    }

    /// TTL for a source: its own override, else the engine default.
    pub fn ttl_for(&self, config: &SourceConfig) -> Duration {
        config
            .cache_ttl_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_ttl)
    }

    /// Fetch through the cache. Concurrent calls with the same fingerprint
    /// share one underlying fetch.
    pub async fn cached_fetch(
        &self,
        source: Arc<dyn DataSource>,
        config: &SourceConfig,
        ttl: Duration,
    ) -> Result<(Arc<Table>, CacheStatus)> {
        let owned = config.clone();
        self.cache
            .get_or_fetch(Fingerprint::of(config), ttl, move || async move {
                source.fetch(&owned).await
            })
            .await
            .map_err(|e| e.for_source(&config.name))
    }

    /// Run `rules` in order over the named tables.
    pub fn transform(
        &self,
        tables: TableSet,
        rules: &[TransformRule],
        ctx: &ExecutionContext,
    ) -> Result<PipelineOutput> {
        build_pipeline(rules).run(tables, ctx)
    }

    /// Single-table convenience: rules address the table as `name`.
    pub fn transform_table(&self, name: &str, table: Table, rules: &[TransformRule]) -> Result<Table> {
        let mut tables = TableSet::new();
        tables.insert(name.to_string(), table);
        let ctx = ExecutionContext::new(ReportId::new(), Map::new());
        let mut out = self.transform(tables, rules, &ctx)?;
        Ok(out.tables.remove(name).unwrap_or_default())
    }

    pub fn cache(&self) -> &FetchCache {
        &self.cache
    }
}
