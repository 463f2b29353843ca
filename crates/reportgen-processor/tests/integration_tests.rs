//! Integration tests for the processor: cache deduplication over a real
//! `DataSource` implementation and multi-stage transform pipelines.

use async_trait::async_trait;
use reportgen_core::{
    AggregateFunction, Aggregation, ExecutionContext, FetchErrorKind, FileConfig, FilterOperator,
    JoinKind, ReportError, ReportId, Result, SourceConfig, SourceKind, Table, TableSet,
    TransformRule,
};
use reportgen_processor::{CacheStatus, Processor};
use reportgen_sources::DataSource;
use serde_json::{json, Map};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Counts fetches and answers after a delay.
struct CountingSource {
    calls: AtomicUsize,
    delay: Duration,
    fail: bool,
}

impl CountingSource {
    fn new(delay_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(delay_ms),
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(20),
            fail: true,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSource for CountingSource {
    async fn fetch(&self, config: &SourceConfig) -> Result<Table> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(ReportError::fetch(&config.name, FetchErrorKind::ServerError, "503"));
        }
        Ok(Table::new(vec!["n".into()], vec![vec![json!(1)]]))
    }

    async fn test_connection(&self, _config: &SourceConfig) -> Result<bool> {
        Ok(true)
    }
}

fn source(name: &str) -> SourceConfig {
    SourceConfig::new(name, SourceKind::File(FileConfig::new("shared.csv")))
}

#[tokio::test]
async fn test_concurrent_identical_fetches_run_once() {
    let processor = Arc::new(Processor::new(Duration::from_secs(60)));
    let counting = CountingSource::new(100);

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let processor = processor.clone();
            let src: Arc<dyn DataSource> = counting.clone();
            // Different logical names, same fetch fingerprint.
            let cfg = source(&format!("alias_{}", i));
            tokio::spawn(async move {
                processor
                    .cached_fetch(src, &cfg, Duration::from_secs(60))
                    .await
                    .map(|(_, status)| status)
            })
        })
        .collect();

    let mut statuses = Vec::new();
    for task in futures::future::join_all(tasks).await {
        statuses.push(task.unwrap().unwrap());
    }

    assert_eq!(counting.calls(), 1);
    assert_eq!(statuses.iter().filter(|s| **s == CacheStatus::Miss).count(), 1);
    assert_eq!(processor.cache().len(), 1);
    assert_eq!(processor.cache().in_flight(), 0);
}

#[tokio::test]
async fn test_expired_entry_is_refetched() {
    let processor = Processor::new(Duration::from_secs(60));
    let counting = CountingSource::new(1);
    let ttl = Duration::from_millis(50);

    let (_, first) = processor.cached_fetch(counting.clone(), &source("a"), ttl).await.unwrap();
    let (_, second) = processor.cached_fetch(counting.clone(), &source("a"), ttl).await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    let (_, third) = processor.cached_fetch(counting.clone(), &source("a"), ttl).await.unwrap();

    assert_eq!(first, CacheStatus::Miss);
    assert_eq!(second, CacheStatus::Hit);
    assert_eq!(third, CacheStatus::Miss);
    assert_eq!(counting.calls(), 2);
}

#[tokio::test]
async fn test_concurrent_failure_is_shared_but_not_cached() {
    let processor = Arc::new(Processor::new(Duration::from_secs(60)));
    let failing = CountingSource::failing();

    let (x, y) = (source("x"), source("y"));
    let (a, b) = tokio::join!(
        processor.cached_fetch(failing.clone(), &x, Duration::from_secs(60)),
        processor.cached_fetch(failing.clone(), &y, Duration::from_secs(60)),
    );
    assert!(a.is_err() && b.is_err());
    assert_eq!(b.unwrap_err().source_name(), Some("y"));
    assert_eq!(failing.calls(), 1);
    assert!(processor.cache().is_empty());

    let _ = processor
        .cached_fetch(failing.clone(), &source("x"), Duration::from_secs(60))
        .await;
    assert_eq!(failing.calls(), 2);
}

#[test]
fn test_filter_aggregate_join_pipeline() {
    let mut tables = TableSet::new();
    tables.insert(
        "orders".into(),
        Table::new(
            vec!["region".into(), "amount".into()],
            vec![
                vec![json!("EU"), json!(120)],
                vec![json!("EU"), json!(80)],
                vec![json!("US"), json!(300)],
                vec![json!("APAC"), json!(5)],
            ],
        ),
    );
    tables.insert(
        "regions".into(),
        Table::new(
            vec!["code".into(), "manager".into()],
            vec![vec![json!("EU"), json!("Ines")], vec![json!("US"), json!("Sam")]],
        ),
    );

    let rules = vec![
        TransformRule::Filter {
            table: "orders".into(),
            column: "amount".into(),
            operator: FilterOperator::Gte,
            value: json!(50),
        },
        TransformRule::Aggregate {
            table: "orders".into(),
            group_by: vec!["region".into()],
            aggregations: vec![Aggregation {
                column: "amount".into(),
                function: AggregateFunction::Sum,
                alias: Some("total".into()),
            }],
            into: Some("totals".into()),
        },
        TransformRule::Join {
            left: "totals".into(),
            right: "regions".into(),
            left_on: "region".into(),
            right_on: "code".into(),
            kind: JoinKind::Inner,
            into: "report".into(),
        },
        TransformRule::Sort {
            table: "report".into(),
            by: "total".into(),
            descending: true,
        },
    ];

    let ctx = ExecutionContext::new(ReportId::new(), Map::new());
    let out = Processor::new(Duration::ZERO).transform(tables, &rules, &ctx).unwrap();

    let report = &out.tables["report"];
    assert_eq!(report.column_names(), vec!["region", "total", "manager"]);
    assert_eq!(
        report.rows,
        vec![
            vec![json!("US"), json!(300), json!("Sam")],
            vec![json!("EU"), json!(200), json!("Ines")],
        ]
    );
    assert_eq!(out.records.len(), 4);
    assert!(out.records.iter().all(|r| r.in_hash.starts_with("blake3:")));
}

#[test]
fn test_rules_on_missing_optional_table_are_skipped() {
    let mut tables = TableSet::new();
    tables.insert("sales".into(), Table::new(vec!["n".into()], vec![vec![json!(1)]]));
    let mut ctx = ExecutionContext::new(ReportId::new(), Map::new());
    ctx.missing_tables.push("metrics".into());

    let out = Processor::new(Duration::ZERO)
        .transform(
            tables,
            &[
                TransformRule::Limit {
                    table: "metrics".into(),
                    count: 5,
                },
                TransformRule::Limit {
                    table: "sales".into(),
                    count: 5,
                },
            ],
            &ctx,
        )
        .unwrap();

    assert_eq!(out.skipped, vec!["limit.metrics".to_string()]);
    assert_eq!(out.tables["sales"].row_count(), 1);
}
