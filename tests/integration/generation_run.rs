//! Integration tests for end-to-end generation runs
//!
//! Tests cover:
//! - Merging linked rows into nested payloads
//! - Chunked, sequential execution with concurrent records
//! - Monotonic progress reporting
//! - Fault handling under both failure policies
//! - Linked-record load release across a full run

use async_trait::async_trait;
use docmill::client::{GeneratedFile, GenerationService};
use docmill::error::EngineError;
use docmill::mapping::{Mapping, MappingNode};
use docmill::pipeline::{
    FailurePolicy, GenerationPipeline, NoProgress, ProgressObserver, RunRequest,
};
use docmill::schema::{FieldKind, Template};
use docmill::source::{CellValue, ColumnKind, FieldDef, MemorySource, MemoryTable, Record};
use docmill::types::{FieldId, RecordId, TableId, TemplateId};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Service double that captures every merge payload and fails on demand.
struct CapturingService {
    payloads: Mutex<Vec<Map<String, Value>>>,
    failures: Mutex<HashMap<String, EngineError>>,
}

impl CapturingService {
    fn new() -> Self {
        Self {
            payloads: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    fn fail_for(self, reference: &str, error: EngineError) -> Self {
        self.failures.lock().insert(reference.to_string(), error);
        self
    }

    fn call_count(&self) -> usize {
        self.payloads.lock().len()
    }

    fn payload_for(&self, reference: &str) -> Option<Map<String, Value>> {
        self.payloads
            .lock()
            .iter()
            .find(|p| p.get("ref").and_then(Value::as_str) == Some(reference))
            .cloned()
    }
}

#[async_trait]
impl GenerationService for CapturingService {
    async fn list_templates(&self) -> Result<Vec<Template>, EngineError> {
        Ok(Vec::new())
    }

    async fn generate_document(
        &self,
        _template: &TemplateId,
        payload: Map<String, Value>,
        _with_attachment: bool,
    ) -> Result<GeneratedFile, EngineError> {
        let reference = payload
            .get("ref")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.payloads.lock().push(payload);

        if let Some(err) = self.failures.lock().remove(&reference) {
            return Err(err);
        }
        Ok(GeneratedFile {
            file_name: format!("{}.pdf", reference),
            file_url: Some(format!("https://files.example.com/{}", reference)),
        })
    }

    fn service_name(&self) -> &str {
        "capturing"
    }
}

#[derive(Default)]
struct RunTrace {
    counts: Mutex<Vec<usize>>,
    chunks_started: Mutex<Vec<(usize, usize)>>,
    failures: Mutex<Vec<RecordId>>,
}

impl ProgressObserver for RunTrace {
    fn chunk_started(&self, chunk_index: usize, size: usize) {
        self.chunks_started.lock().push((chunk_index, size));
    }

    fn record_completed(&self, _record: &RecordId, completed: usize) {
        self.counts.lock().push(completed);
    }

    fn record_failed(&self, record: &RecordId, _error: &EngineError) {
        self.failures.lock().push(record.clone());
    }
}

/// Orders linking into a shared items table. Order `recN` is named `ORD-N`;
/// every order carries the same two item rows so payloads are predictable.
fn order_source(order_count: usize) -> MemorySource {
    let items = MemoryTable::new("tblItm", "Items")
        .with_field(FieldDef::new("fldLabel", "Label", ColumnKind::Text))
        .with_field(FieldDef::new("fldQty", "Quantity", ColumnKind::Number))
        .with_record(
            Record::new("itmWidget", "Widget")
                .with_cell("fldLabel", CellValue::Text("Widget".into()))
                .with_cell("fldQty", CellValue::Number(2.0)),
        )
        .with_record(
            Record::new("itmGadget", "Gadget")
                .with_cell("fldLabel", CellValue::Text("Gadget".into()))
                .with_cell("fldQty", CellValue::Number(5.0)),
        );

    let mut orders = MemoryTable::new("tblOrd", "Orders")
        .with_field(FieldDef::new("fldRef", "Reference", ColumnKind::Text))
        .with_field(FieldDef::new(
            "fldItems",
            "Items",
            ColumnKind::Link {
                table: TableId::from("tblItm"),
            },
        ));
    for i in 1..=order_count {
        let name = format!("ORD-{}", i);
        orders = orders.with_record(
            Record::new(format!("rec{}", i), name.clone())
                .with_cell("fldRef", CellValue::Text(name))
                .with_cell(
                    "fldItems",
                    CellValue::Links(vec![
                        RecordId::from("itmWidget"),
                        RecordId::from("itmGadget"),
                    ]),
                ),
        );
    }

    MemorySource::new().with_table(items).with_table(orders)
}

fn order_mapping() -> Mapping {
    Mapping::new()
        .with_entry("ref", MappingNode::bound(FieldKind::Text, "fldRef"))
        .with_entry(
            "items",
            MappingNode::bound(FieldKind::Array, "fldItems").with_children(
                [
                    (
                        "label".to_string(),
                        MappingNode::bound(FieldKind::Text, "fldLabel"),
                    ),
                    (
                        "qty".to_string(),
                        MappingNode::bound(FieldKind::Number, "fldQty"),
                    ),
                ]
                .into(),
            ),
        )
}

fn order_request(count: usize) -> RunRequest {
    RunRequest {
        record_ids: (1..=count)
            .map(|i| RecordId::new(format!("rec{}", i)))
            .collect(),
        mapping: order_mapping(),
        template: TemplateId::from("tmplInvoice"),
        attachment_field: None,
    }
}

#[tokio::test]
async fn run_merges_linked_rows_into_payloads() {
    let source = Arc::new(order_source(7));
    let service = Arc::new(CapturingService::new());
    let pipeline = GenerationPipeline::new(source.clone(), service.clone());

    let report = pipeline.run(&order_request(7), &NoProgress).await.unwrap();

    assert_eq!(report.total_generated, 7);
    assert_eq!(report.total_failed, 0);
    assert_eq!(report.documents.len(), 7);
    assert_eq!(service.call_count(), 7);

    let doc = report.documents.get(&RecordId::from("rec3")).unwrap();
    assert_eq!(doc.record_name, "ORD-3");
    assert_eq!(doc.file_name, "ORD-3.pdf");

    let payload = service.payload_for("ORD-3").unwrap();
    assert_eq!(
        Value::Object(payload),
        serde_json::json!({
            "ref": "ORD-3",
            "items": [
                { "label": "Widget", "qty": 2.0 },
                { "label": "Gadget", "qty": 5.0 }
            ]
        })
    );
}

#[tokio::test]
async fn progress_and_chunking_follow_the_selection() {
    let source = Arc::new(order_source(7));
    let service = Arc::new(CapturingService::new());
    let pipeline = GenerationPipeline::new(source.clone(), service);
    let trace = RunTrace::default();

    let report = pipeline.run(&order_request(7), &trace).await.unwrap();

    assert_eq!(trace.counts.lock().clone(), (1..=7).collect::<Vec<_>>());
    assert_eq!(trace.chunks_started.lock().clone(), vec![(0, 5), (1, 2)]);

    let sizes: Vec<usize> = report
        .chunk_summaries
        .iter()
        .map(|c| c.total_count)
        .collect();
    assert_eq!(sizes, vec![5, 2]);
}

#[tokio::test]
async fn linked_loads_are_released_by_the_end_of_a_run() {
    let source = Arc::new(order_source(7));
    let service = Arc::new(CapturingService::new());
    let pipeline = GenerationPipeline::new(source.clone(), service);

    pipeline.run(&order_request(7), &NoProgress).await.unwrap();

    // One linked load per order, all released.
    assert_eq!(source.loads_started(), 7);
    assert_eq!(source.loads_in_flight(), 0);
}

#[tokio::test]
async fn chunk_fault_drains_the_chunk_then_aborts() {
    let service = CapturingService::new()
        .fail_for(
            "ORD-6",
            EngineError::ServiceRequestFailed("merge refused".into()),
        )
        .fail_for(
            "ORD-7",
            EngineError::ServiceRequestFailed("merge refused".into()),
        );
    let source = Arc::new(order_source(7));
    let service = Arc::new(service);
    let pipeline = GenerationPipeline::new(source.clone(), service.clone());
    let trace = RunTrace::default();

    let err = pipeline.run(&order_request(7), &trace).await.unwrap_err();
    assert!(matches!(err, EngineError::ServiceRequestFailed(_)));

    // Chunk 1 finished, chunk 2 drained both records before the abort.
    assert_eq!(service.call_count(), 7);
    assert_eq!(trace.counts.lock().clone(), vec![1, 2, 3, 4, 5]);
    assert_eq!(trace.failures.lock().len(), 2);

    // Drained loads still get released on the error path.
    assert_eq!(source.loads_in_flight(), 0);
}

#[tokio::test]
async fn isolate_records_policy_finishes_the_whole_selection() {
    let service = CapturingService::new().fail_for(
        "ORD-2",
        EngineError::ServiceRateLimit("merge quota exhausted".into()),
    );
    let source = Arc::new(order_source(7));
    let service = Arc::new(service);
    let pipeline = GenerationPipeline::new(source.clone(), service.clone())
        .with_failure_policy(FailurePolicy::IsolateRecords);
    let trace = RunTrace::default();

    let report = pipeline.run(&order_request(7), &trace).await.unwrap();

    assert_eq!(report.total_generated, 6);
    assert_eq!(report.total_failed, 1);
    assert_eq!(service.call_count(), 7);
    assert!(report.failures[&RecordId::from("rec2")].contains("quota"));
    assert_eq!(trace.counts.lock().clone(), (1..=6).collect::<Vec<_>>());
}

#[tokio::test]
async fn empty_selection_is_rejected_before_any_calls() {
    let source = Arc::new(order_source(3));
    let service = Arc::new(CapturingService::new());
    let pipeline = GenerationPipeline::new(source.clone(), service.clone());

    let mut request = order_request(3);
    request.record_ids.clear();
    let err = pipeline.run(&request, &NoProgress).await.unwrap_err();

    assert!(matches!(err, EngineError::EmptySelection));
    assert!(err.is_usage());
    assert_eq!(service.call_count(), 0);
    assert_eq!(source.loads_started(), 0);
}

#[tokio::test]
async fn attachment_selection_carries_urls_into_the_report() {
    let source = Arc::new(order_source(2));
    let service = Arc::new(CapturingService::new());
    let pipeline = GenerationPipeline::new(source, service);

    let mut request = order_request(2);
    request.attachment_field = Some(FieldId::from("fldDocs"));
    let report = pipeline.run(&request, &NoProgress).await.unwrap();

    let doc = report.documents.get(&RecordId::from("rec1")).unwrap();
    assert_eq!(
        doc.url.as_deref(),
        Some("https://files.example.com/ORD-1")
    );
}
