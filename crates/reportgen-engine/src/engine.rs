//! Report Engine: drives one request through fetch, processing, rendering
//! and delivery, and records every step in the status registry.
use chrono::Utc;
use futures::future::join_all;
use reportgen_core::logging::{log_fetch, log_report_operation};
use reportgen_core::validation::validate_request;
use reportgen_core::{
    hash_bytes, Artifact, ArtifactId, ArtifactMetadata, EngineConfig, ExecutionContext,
    FetchResult, Fingerprint, ReportError, ReportId, ReportRequest, Result, RetryPolicy,
    SourceConfig, TableSet,
};
use reportgen_delivery::{validate_sink, Deliverer, Mailer, ObjectStore};
use reportgen_processor::{check_schemas, CacheStats, CacheStatus, Processor};
use reportgen_render::{PdfBackend, RenderContext, Renderer, TemplateLibrary, TextPdf};
use reportgen_sources::{validate_source, DataSource, SourceDispatcher};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::state::ReportState;
use crate::status::{ReportHandle, ReportStatus, StatusRegistry};
use crate::store::{ArtifactStore, InMemoryArtifactStore};

/// Cheap to clone; clones share the cache, registry and store.
#[derive(Clone)]
pub struct ReportEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    source: Arc<dyn DataSource>,
    processor: Processor,
    renderer: Renderer,
    deliverer: Deliverer,
    store: Arc<dyn ArtifactStore>,
    registry: StatusRegistry,
}

/// What a successful run up to the artifact produced.
struct Produced {
    artifact: Artifact,
    warnings: Vec<String>,
}

impl ReportEngine {
    /// Engine with the default collaborators: the source dispatcher, the text
    /// PDF writer, an in-memory artifact store and filesystem delivery under
    /// `output_dir`.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: EngineConfig) -> ReportEngineBuilder {
        ReportEngineBuilder {
            config,
            library: None,
            source: None,
            pdf: None,
            store: None,
            object_store: None,
            mailer: None,
        }
    }

    /// Accept a request and start generating it on a spawned task.
    ///
    /// Returns immediately. A request that fails validation is registered as
    /// `Failed` without ever entering `Fetching`. Must be called inside a
    /// Tokio runtime.
    pub fn generate(&self, request: ReportRequest) -> ReportHandle {
        let id = ReportId::new();
        let handle = ReportHandle { id };
        let inner = &self.inner;
        inner.registry.register(id);
        log_report_operation(
            "generate",
            &id.to_string(),
            "received",
            Some(&request.template.describe()),
        );

        if let Err(error) = inner.validate(&request) {
            log_report_operation("validate", &id.to_string(), "rejected", Some(&error.to_string()));
            inner.registry.fail(&id, error);
            return handle;
        }

        let inner = self.inner.clone();
        tokio::spawn(async move { inner.run(id, request).await });
        handle
    }

    pub fn status(&self, handle: &ReportHandle) -> Result<ReportStatus> {
        self.inner.registry.get(&handle.id)
    }

    /// Resolve once the run is `Completed` or `Failed`.
    pub async fn wait(&self, handle: &ReportHandle) -> Result<ReportStatus> {
        self.inner.registry.wait(&handle.id).await
    }

    pub async fn artifact(&self, id: &ArtifactId) -> Result<Option<Artifact>> {
        self.inner.store.get(id).await
    }

    /// Drop a finished report's status and its stored artifact. Returns
    /// `Ok(false)` while the run is still active.
    pub async fn forget(&self, handle: &ReportHandle) -> Result<bool> {
        self.inner.registry.get(&handle.id)?;
        let Some(status) = self.inner.registry.forget(&handle.id) else {
            return Ok(false);
        };
        self.inner.release(&[status]).await?;
        Ok(true)
    }

    /// Evict finished reports older than `older_than`; returns how many went.
    /// Runs also sweep with `retention_secs` when they finish.
    pub async fn evict_finished(&self, older_than: Duration) -> Result<usize> {
        self.inner.evict_finished(older_than).await
    }

    /// Pre-flight check of one source. Configuration problems are errors;
    /// an unreachable source is `Ok(false)`.
    pub async fn test_connection(&self, config: &SourceConfig) -> Result<bool> {
        validate_source(config)?;
        let reachable = self.inner.source.test_connection(config).await?;
        info!(source = %config.name, kind = config.kind_name(), reachable = reachable, "connection tested");
        Ok(reachable)
    }

    /// Drop the cached table for this source's fingerprint.
    pub fn invalidate_cache(&self, config: &SourceConfig) -> bool {
        self.inner.processor.cache().invalidate(&Fingerprint::of(config))
    }

    /// Drop expired cache entries; returns how many were removed.
    pub fn purge_cache(&self) -> usize {
        let removed = self.inner.processor.cache().purge_expired();
        debug!(removed = removed, "cache purged");
        removed
    }

    pub fn clear_cache(&self) {
        self.inner.processor.cache().invalidate_all();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.processor.cache().stats()
    }

    pub fn list_templates(&self) -> Vec<String> {
        self.inner
            .renderer
            .list_templates()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }
}

impl EngineInner {
    /// Everything checkable before any I/O.
    fn validate(&self, request: &ReportRequest) -> Result<()> {
        validate_request(request)?;
        for source in &request.sources {
            validate_source(source)?;
        }
        if let Some(sink) = &request.delivery {
            validate_sink(sink)?;
        }
        self.renderer.check_template(&request.template)
    }

    async fn run(&self, id: ReportId, request: ReportRequest) {
        self.execute(id, request).await;
        if let Some(retention) = self.config.retention() {
            if let Err(error) = self.evict_finished(retention).await {
                warn!(error = %error, "eviction of finished reports failed");
            }
        }
    }

    async fn evict_finished(&self, older_than: Duration) -> Result<usize> {
        let evicted = self.registry.evict_finished(older_than);
        self.release(&evicted).await?;
        if !evicted.is_empty() {
            debug!(evicted = evicted.len(), "finished reports evicted");
        }
        Ok(evicted.len())
    }

    async fn release(&self, statuses: &[ReportStatus]) -> Result<()> {
        for artifact in statuses.iter().filter_map(|s| s.artifact.as_ref()) {
            self.store.remove(&artifact.id).await?;
        }
        Ok(())
    }

    async fn execute(&self, id: ReportId, request: ReportRequest) {
        let budget = request
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.request_timeout());

        let produced = match tokio::time::timeout(budget, self.produce(id, &request)).await {
            Ok(Ok(produced)) => produced,
            Ok(Err(error)) => {
                self.finish_failed(&id, error);
                return;
            }
            Err(_) => {
                let error = ReportError::timeout(format!(
                    "report did not finish within {}ms",
                    budget.as_millis()
                ));
                self.finish_failed(&id, error);
                return;
            }
        };

        let Produced { artifact, warnings } = produced;
        self.registry.set_artifact(&id, artifact.reference());
        self.registry.add_warnings(&id, warnings);

        // The artifact exists from here on; delivery cannot fail the report.
        if let Some(sink) = &request.delivery {
            self.registry.transition(&id, ReportState::Delivering);
            let outcome = self.deliverer.deliver(&artifact, sink).await;
            if let reportgen_delivery::DeliveryOutcome::Failed { error, .. } = &outcome {
                self.registry
                    .add_warnings(&id, [format!("delivery to {} failed: {}", sink.kind_name(), error)]);
            }
            self.registry.set_delivery(&id, outcome);
        }

        self.registry.transition(&id, ReportState::Completed);
        log_report_operation(
            "generate",
            &id.to_string(),
            "completed",
            Some(&format!("{} bytes", artifact.metadata.size_bytes)),
        );
    }

    fn finish_failed(&self, id: &ReportId, error: ReportError) {
        log_report_operation(
            "generate",
            &id.to_string(),
            "failed",
            Some(&error.to_string()),
        );
        self.registry.fail(id, error);
    }

    #[instrument(skip(self, request), fields(report_id = %id))]
    async fn produce(&self, id: ReportId, request: &ReportRequest) -> Result<Produced> {
        let mut ctx = ExecutionContext::new(id, request.parameters.clone());
        let mut warnings = Vec::new();
        debug!(trace_id = %ctx.trace_id, sources = request.sources.len(), "execution started");

        // Fetching: one fetch per source, all joined, no short-circuit.
        self.registry.transition(&id, ReportState::Fetching);
        let results = join_all(request.sources.iter().map(|cfg| self.fetch(cfg))).await;

        let mut tables = TableSet::new();
        let mut used = Vec::new();
        for result in results {
            match result.outcome {
                Ok(table) => {
                    used.push(result.source_name.clone());
                    tables.insert(result.source_name, Arc::unwrap_or_clone(table));
                }
                Err(error) if result.required => return Err(error),
                Err(error) => {
                    warnings.push(format!(
                        "optional source '{}' unavailable: {}",
                        result.source_name, error
                    ));
                    ctx.missing_tables.push(result.source_name);
                }
            }
        }

        // Processing
        self.registry.transition(&id, ReportState::Processing);
        let output = self
            .processor
            .transform(tables, &request.transforms, &ctx)?;
        for stage in &output.skipped {
            warnings.push(format!("stage {} skipped: input table unavailable", stage));
        }
        let violations = check_schemas(&output.tables, &request.schemas, request.validation_policy)?;
        if !violations.is_empty() {
            warnings.push(format!("{} schema violation(s) recorded", violations.len()));
        }

        // Rendering
        self.registry.transition(&id, ReportState::Rendering);
        let render_ctx = RenderContext::new(id, ctx.parameters.clone(), output.tables)
            .with_missing(ctx.missing_tables.clone());
        let content = self.render(request, &render_ctx).await?;

        let metadata = ArtifactMetadata {
            generated_at: render_ctx.generated_at,
            template: request.template.describe(),
            sources_used: used,
            sources_missing: ctx.missing_tables.clone(),
            size_bytes: content.len(),
            content_hash: hash_bytes(&content),
            mime: request.output_format.mime().to_string(),
            stages: output.records,
            violations,
            warnings: warnings.clone(),
        };
        let artifact = Artifact {
            id: ArtifactId::new(),
            report_id: id,
            format: request.output_format,
            content,
            metadata,
        };
        self.store.put(artifact.clone()).await?;
        info!(
            artifact_id = %artifact.id,
            format = %artifact.format,
            bytes = artifact.metadata.size_bytes,
            elapsed_ms = (Utc::now() - ctx.started_at).num_milliseconds(),
            "artifact stored"
        );

        Ok(Produced { artifact, warnings })
    }

    async fn fetch(&self, config: &SourceConfig) -> FetchResult {
        let ttl = self.processor.ttl_for(config);
        let outcome = match self
            .processor
            .cached_fetch(self.source.clone(), config, ttl)
            .await
        {
            Ok((table, status)) => {
                let cached = matches!(status, CacheStatus::Hit | CacheStatus::Joined);
                log_fetch(&config.name, config.kind_name(), cached, Some(table.row_count()), None);
                Ok(table)
            }
            Err(error) => {
                log_fetch(&config.name, config.kind_name(), false, None, Some(&error.to_string()));
                Err(error)
            }
        };
        FetchResult {
            source_name: config.name.clone(),
            required: config.required,
            outcome,
        }
    }

    /// Backend failures are retried up to `render_attempts`; template errors
    /// are not.
    async fn render(&self, request: &ReportRequest, ctx: &RenderContext) -> Result<Vec<u8>> {
        let renderer = &self.renderer;
        let template = &request.template;
        let format = request.output_format;
        let policy = RetryPolicy::immediate(self.config.render_attempts);

        let (result, attempts) = policy
            .run("render", move |_| {
                futures::future::ready(renderer.render_format(format, template, ctx))
            })
            .await;
        if attempts > 1 {
            match &result {
                Ok(_) => info!(attempts = attempts, format = %format, "render succeeded after retry"),
                Err(error) => warn!(attempts = attempts, format = %format, error = %error, "render failed after retry"),
            }
        }
        result
    }
}

pub struct ReportEngineBuilder {
    config: EngineConfig,
    library: Option<TemplateLibrary>,
    source: Option<Arc<dyn DataSource>>,
    pdf: Option<Arc<dyn PdfBackend>>,
    store: Option<Arc<dyn ArtifactStore>>,
    object_store: Option<Arc<dyn ObjectStore>>,
    mailer: Option<Arc<dyn Mailer>>,
}

impl ReportEngineBuilder {
    /// Templates to use instead of loading `templates_file`/`template_dir`.
    pub fn templates(mut self, library: TemplateLibrary) -> Self {
        self.library = Some(library);
        self
    }

    /// Replace the source dispatcher for every source kind.
    pub fn data_source(mut self, source: Arc<dyn DataSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn pdf_backend(mut self, pdf: Arc<dyn PdfBackend>) -> Self {
        self.pdf = Some(pdf);
        self
    }

    pub fn artifact_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.object_store = Some(store);
        self
    }

    pub fn mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = Some(mailer);
        self
    }

    pub fn build(self) -> Result<ReportEngine> {
        let config = self.config;
        config.validate()?;

        let library = match self.library {
            Some(library) => library,
            None => Renderer::load_library(&config)?,
        };
        let pdf = self.pdf.unwrap_or_else(|| Arc::new(TextPdf::default()));
        let renderer = Renderer::with_pdf_backend(&library, pdf)?;

        let source = match self.source {
            Some(source) => source,
            None => Arc::new(SourceDispatcher::new(&config)?),
        };

        let mut deliverer = Deliverer::new(&config)?;
        if let Some(store) = self.object_store {
            deliverer = deliverer.with_object_store(store);
        }
        if let Some(mailer) = self.mailer {
            deliverer = deliverer.with_mailer(mailer);
        }

        info!(
            templates = library.len(),
            cache_ttl_secs = config.cache_ttl_secs,
            request_timeout_ms = config.request_timeout_ms,
            "report engine ready"
        );

        Ok(ReportEngine {
            inner: Arc::new(EngineInner {
                processor: Processor::new(config.cache_ttl()),
                store: self
                    .store
                    .unwrap_or_else(|| Arc::new(InMemoryArtifactStore::new())),
                registry: StatusRegistry::new(),
                source,
                renderer,
                deliverer,
                config,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reportgen_core::{ErrorKind, FetchErrorKind, FileConfig, OutputFormat, SourceKind, Table, TemplateRef};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StaticSource {
        calls: AtomicU32,
    }

    #[async_trait]
    impl DataSource for StaticSource {
        async fn fetch(&self, config: &SourceConfig) -> Result<Table> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if config.name.starts_with("broken") {
                return Err(ReportError::fetch(&config.name, FetchErrorKind::Connection, "refused"));
            }
            Ok(Table::new(
                vec!["n".into()],
                vec![vec![json!(1)], vec![json!(2)]],
            ))
        }

        async fn test_connection(&self, config: &SourceConfig) -> Result<bool> {
            Ok(!config.name.starts_with("broken"))
        }
    }

    fn engine() -> (ReportEngine, Arc<StaticSource>) {
        let (engine, source, _) = engine_with(EngineConfig::default());
        (engine, source)
    }

    fn engine_with(
        config: EngineConfig,
    ) -> (ReportEngine, Arc<StaticSource>, Arc<InMemoryArtifactStore>) {
        let source = Arc::new(StaticSource {
            calls: AtomicU32::new(0),
        });
        let store = Arc::new(InMemoryArtifactStore::new());
        let mut library = TemplateLibrary::new();
        library.insert("rows", "{{#each data}}[{{n}}]{{/each}}");
        let engine = ReportEngine::builder(config)
            .templates(library)
            .data_source(source.clone())
            .artifact_store(store.clone())
            .build()
            .unwrap();
        (engine, source, store)
    }

    fn file(name: &str) -> SourceConfig {
        SourceConfig::new(name, SourceKind::File(FileConfig::new(format!("{name}.csv"))))
    }

    fn request(sources: &[SourceConfig]) -> ReportRequest {
        sources.iter().cloned().fold(
            ReportRequest::new(TemplateRef::Name("rows".into()), OutputFormat::Html),
            ReportRequest::with_source,
        )
    }

    #[tokio::test]
    async fn test_happy_path_history() {
        let (engine, _) = engine();
        let handle = engine.generate(request(&[file("a")]));
        let status = engine.wait(&handle).await.unwrap();

        assert_eq!(status.state, ReportState::Completed);
        let states: Vec<_> = status.history.iter().map(|c| c.state).collect();
        assert_eq!(
            states,
            vec![
                ReportState::Received,
                ReportState::Fetching,
                ReportState::Processing,
                ReportState::Rendering,
                ReportState::Completed,
            ]
        );

        let reference = status.artifact.unwrap();
        let artifact = engine.artifact(&reference.id).await.unwrap().unwrap();
        assert_eq!(artifact.content, b"[1][2]");
        assert_eq!(artifact.metadata.sources_used, vec!["a"]);
        assert_eq!(artifact.metadata.content_hash, reference.content_hash);
    }

    #[tokio::test]
    async fn test_unknown_template_rejected_before_fetch() {
        let (engine, source) = engine();
        let mut req = request(&[file("a")]);
        req.template = TemplateRef::Name("nope".into());

        let status = engine.wait(&engine.generate(req)).await.unwrap();
        assert_eq!(status.state, ReportState::Failed);
        assert_eq!(status.error.as_ref().unwrap().kind(), ErrorKind::Template);
        assert!(!status.visited(ReportState::Fetching));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_optional_failure_recorded_as_missing() {
        let (engine, _) = engine();
        let handle = engine.generate(request(&[file("a"), file("broken").optional()]));
        let status = engine.wait(&handle).await.unwrap();

        assert_eq!(status.state, ReportState::Completed);
        assert!(status.warnings.iter().any(|w| w.contains("'broken'")));
        let artifact = engine
            .artifact(&status.artifact.unwrap().id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(artifact.metadata.sources_missing, vec!["broken"]);
    }

    #[tokio::test]
    async fn test_test_connection_and_cache_controls() {
        let (engine, source) = engine();
        assert!(engine.test_connection(&file("a")).await.unwrap());
        assert!(!engine.test_connection(&file("broken")).await.unwrap());

        engine.wait(&engine.generate(request(&[file("a")]))).await.unwrap();
        assert!(engine.invalidate_cache(&file("a")));
        assert!(!engine.invalidate_cache(&file("a")));
        assert_eq!(engine.purge_cache(), 0);

        engine.wait(&engine.generate(request(&[file("a")]))).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_forget_releases_status_and_artifact() {
        let (engine, _, store) = engine_with(EngineConfig {
            retention_secs: None,
            ..EngineConfig::default()
        });
        let kept = engine.generate(request(&[file("a")]));
        let dropped = engine.generate(request(&[file("a")]));
        engine.wait(&kept).await.unwrap();
        let status = engine.wait(&dropped).await.unwrap();
        assert_eq!(store.len(), 2);

        assert!(engine.forget(&dropped).await.unwrap());
        assert_eq!(store.len(), 1);
        assert!(engine.status(&dropped).is_err());
        assert!(engine.artifact(&status.artifact.unwrap().id).await.unwrap().is_none());
        assert!(engine.status(&kept).is_ok());
        assert!(engine.forget(&dropped).await.is_err());

        assert_eq!(engine.evict_finished(Duration::ZERO).await.unwrap(), 1);
        assert!(store.is_empty());
        assert!(engine.status(&kept).is_err());
    }

    #[tokio::test]
    async fn test_retention_sweeps_finished_runs() {
        let (engine, _, store) = engine_with(EngineConfig {
            retention_secs: Some(0),
            ..EngineConfig::default()
        });
        let handle = engine.generate(request(&[file("a")]));
        let status = engine.wait(&handle).await.unwrap();
        assert_eq!(status.state, ReportState::Completed);

        for _ in 0..50 {
            if engine.status(&handle).is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(engine.status(&handle).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_status_of_unknown_handle() {
        let (engine, _) = engine();
        let err = engine
            .status(&ReportHandle { id: ReportId::new() })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
