//! Pipeline Runner: chains stages in order and records per-stage lineage
use crate::context::ExecutionContext;
use crate::data_model::{hash_bytes, StageRecord};
use crate::error::ReportError;
use crate::stage::Stage;
use crate::table::TableSet;
use std::collections::BTreeSet;
use std::time::Instant;
use tracing::{debug, info};

pub struct PipelineRunner {
    stages: Vec<Box<dyn Stage>>,
    pipeline_id: String,
}

/// Result of a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub tables: TableSet,
    pub records: Vec<StageRecord>,
    /// Stages skipped because an input came from a failed optional source.
    pub skipped: Vec<String>,
}

impl PipelineRunner {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        let pipeline_id = stages
            .iter()
            .map(|s| s.id().split('.').next().unwrap_or("?").to_string())
            .collect::<Vec<_>>()
            .join("→");

        Self { stages, pipeline_id }
    }

    pub fn run(
        &self,
        mut tables: TableSet,
        ctx: &ExecutionContext,
    ) -> Result<PipelineOutput, ReportError> {
        let mut records = Vec::with_capacity(self.stages.len());
        let mut skipped = Vec::new();
        let mut missing: BTreeSet<String> = ctx.missing_tables.iter().cloned().collect();

        for stage in &self.stages {
            let inputs = stage.inputs();
            if let Some(absent) = inputs.iter().find(|t| missing.contains(*t)) {
                info!(
                    report_id = %ctx.report_id,
                    stage = %stage.id(),
                    table = %absent,
                    "skipping stage, input table unavailable"
                );
                missing.insert(stage.output());
                skipped.push(stage.id());
                records.push(StageRecord {
                    id: stage.id(),
                    in_hash: String::new(),
                    out_hash: String::new(),
                    latency_ms: 0,
                    skipped: true,
                });
                continue;
            }

            let start = Instant::now();
            let in_hash = self.hash_tables(&tables, &inputs);

            stage
                .run(&mut tables, ctx)
                .map_err(|e| ReportError::processing(stage.id(), e.to_string()))?;

            let out_hash = self.hash_tables(&tables, &[stage.output()]);
            let latency_ms = start.elapsed().as_millis() as u64;
            debug!(
                report_id = %ctx.report_id,
                stage = %stage.id(),
                latency_ms = latency_ms,
                "stage complete"
            );

            records.push(StageRecord {
                id: stage.id(),
                in_hash,
                out_hash,
                latency_ms,
                skipped: false,
            });
        }

        Ok(PipelineOutput {
            tables,
            records,
            skipped,
        })
    }

    fn hash_tables(&self, tables: &TableSet, names: &[String]) -> String {
        let selected: Vec<_> = names.iter().map(|n| (n, tables.get(n))).collect();
        hash_bytes(&serde_json::to_vec(&selected).unwrap_or_default())
    }

    pub fn pipeline_id(&self) -> &str {
        &self.pipeline_id
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
