//! Generation pipeline: merges and generates documents for a record selection.
//! Owns chunking, concurrency, and progress; merge and service behavior stay
//! in their domains.

use crate::client::GenerationService;
use crate::error::EngineError;
use crate::mapping::Mapping;
use crate::merge::MergeEvaluator;
use crate::source::RecordSource;
use crate::types::{FieldId, RecordId, TemplateId};
use chrono::{SecondsFormat, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Records per chunk. Chunks run sequentially and records within a chunk run
/// concurrently, which bounds in-flight work against both collaborators.
pub const CHUNK_SIZE: usize = 5;

/// What a fault in one record does to the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Drain the faulted chunk, then abort the run with the first fault
    /// observed. Later chunks never start.
    #[default]
    AbortOnFault,

    /// Record the fault against its record id and keep going; the report
    /// carries successes and failures side by side.
    IsolateRecords,
}

/// One generation run: which records, under which mapping, into which
/// template.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub record_ids: Vec<RecordId>,
    pub mapping: Mapping,
    pub template: TemplateId,
    /// Attachment column on the originating table. `Some` asks the service
    /// for a download URL per document; writing the attachment back onto the
    /// record is the host's concern.
    pub attachment_field: Option<FieldId>,
}

impl RunRequest {
    /// Usage-fault checks, run before any collaborator is contacted.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.record_ids.is_empty() {
            return Err(EngineError::EmptySelection);
        }
        if self.mapping.is_empty() {
            return Err(EngineError::EmptyMapping);
        }
        if self.template.is_empty() {
            return Err(EngineError::MissingTemplate);
        }
        Ok(())
    }
}

/// Per-record result of a successful generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedDocument {
    pub record_name: String,
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Outcome counts for one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSummary {
    pub chunk_index: usize,
    pub generated_count: usize,
    pub failed_count: usize,
    pub total_count: usize,
}

/// Aggregated outcome of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    /// One entry per successfully generated record.
    pub documents: HashMap<RecordId, GeneratedDocument>,
    /// Per-record faults. Only populated under [`FailurePolicy::IsolateRecords`].
    pub failures: HashMap<RecordId, String>,
    pub chunk_summaries: Vec<ChunkSummary>,
    pub total_generated: usize,
    pub total_failed: usize,
    /// Run start time, RFC 3339 with millisecond precision.
    pub started_at: String,
    /// Wall-clock duration of the run in milliseconds.
    pub duration_ms: u64,
}

/// Observer of run progress.
///
/// All methods default to no-ops; calls happen synchronously on the run task,
/// so implementations should return quickly.
pub trait ProgressObserver: Send + Sync {
    fn run_started(&self, _total_records: usize, _total_chunks: usize) {}

    fn chunk_started(&self, _chunk_index: usize, _size: usize) {}

    /// `completed` is the count of successfully generated records so far,
    /// strictly increasing across the run.
    fn record_completed(&self, _record: &RecordId, _completed: usize) {}

    fn record_failed(&self, _record: &RecordId, _error: &EngineError) {}

    fn chunk_completed(&self, _chunk_index: usize, _generated: usize, _failed: usize) {}
}

/// Observer that ignores everything.
pub struct NoProgress;

impl ProgressObserver for NoProgress {}

/// Adapts a completed-count closure to [`ProgressObserver`].
pub struct CountFn<F: Fn(usize) + Send + Sync>(pub F);

impl<F: Fn(usize) + Send + Sync> ProgressObserver for CountFn<F> {
    fn record_completed(&self, _record: &RecordId, completed: usize) {
        (self.0)(completed)
    }
}

/// Drives merge evaluation and document generation for record selections.
pub struct GenerationPipeline {
    source: Arc<dyn RecordSource>,
    service: Arc<dyn GenerationService>,
    failure_policy: FailurePolicy,
}

impl GenerationPipeline {
    pub fn new(source: Arc<dyn RecordSource>, service: Arc<dyn GenerationService>) -> Self {
        Self {
            source,
            service,
            failure_policy: FailurePolicy::default(),
        }
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Runs one generation pass over the requested records.
    ///
    /// Under [`FailurePolicy::AbortOnFault`] the first fault fails the whole
    /// run after its chunk drains; accumulated results are dropped with the
    /// error. Under [`FailurePolicy::IsolateRecords`] the run always returns
    /// a report, with faulted records listed in `failures`.
    pub async fn run(
        &self,
        request: &RunRequest,
        observer: &dyn ProgressObserver,
    ) -> Result<RunReport, EngineError> {
        request.validate()?;

        let chunks = partition(&request.record_ids);
        info!(
            records = request.record_ids.len(),
            chunks = chunks.len(),
            template = %request.template,
            service = self.service.service_name(),
            policy = ?self.failure_policy,
            "generation run started"
        );
        observer.run_started(request.record_ids.len(), chunks.len());

        let with_attachment = request.attachment_field.is_some();
        let started = Instant::now();
        let mut report = RunReport {
            started_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            ..RunReport::default()
        };

        for (chunk_index, chunk) in chunks.iter().enumerate() {
            observer.chunk_started(chunk_index, chunk.len());
            debug!(chunk_index, size = chunk.len(), "chunk started");

            let mut generated_count = 0usize;
            let mut failed_count = 0usize;
            let mut first_fault: Option<EngineError> = None;

            let mut futures = FuturesUnordered::new();
            for record_id in chunk.iter() {
                futures.push(async move {
                    let outcome = self
                        .process_record(record_id, request, with_attachment)
                        .await;
                    (record_id, outcome)
                });
            }

            while let Some((record_id, outcome)) = futures.next().await {
                match outcome {
                    Ok(document) => {
                        if first_fault.is_some() {
                            // The run is already doomed; drain without
                            // recording so progress never moves again.
                            debug!(record = %record_id, "discarding completion after fault");
                            continue;
                        }
                        generated_count += 1;
                        report.documents.insert(record_id.clone(), document);
                        debug!(record = %record_id, completed = report.documents.len(),
                            "record completed");
                        observer.record_completed(record_id, report.documents.len());
                    }
                    Err(err) => {
                        failed_count += 1;
                        warn!(record = %record_id, error = %err, "record failed");
                        observer.record_failed(record_id, &err);
                        match self.failure_policy {
                            FailurePolicy::AbortOnFault => {
                                if first_fault.is_none() {
                                    first_fault = Some(err);
                                }
                            }
                            FailurePolicy::IsolateRecords => {
                                report.failures.insert(record_id.clone(), err.to_string());
                            }
                        }
                    }
                }
            }

            report.total_generated += generated_count;
            report.total_failed += failed_count;
            report.chunk_summaries.push(ChunkSummary {
                chunk_index,
                generated_count,
                failed_count,
                total_count: chunk.len(),
            });
            observer.chunk_completed(chunk_index, generated_count, failed_count);
            debug!(chunk_index, generated_count, failed_count, "chunk completed");

            if let Some(fault) = first_fault {
                warn!(
                    chunk_index,
                    total_generated = report.total_generated,
                    error = %fault,
                    "generation run aborted"
                );
                return Err(fault);
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            total_generated = report.total_generated,
            total_failed = report.total_failed,
            duration_ms = report.duration_ms,
            "generation run completed"
        );
        Ok(report)
    }

    async fn process_record(
        &self,
        record_id: &RecordId,
        request: &RunRequest,
        with_attachment: bool,
    ) -> Result<GeneratedDocument, EngineError> {
        let record = self.source.record(record_id).await?;
        let payload = MergeEvaluator::new(self.source.as_ref())
            .merge_record(&request.mapping, &record)
            .await?;
        let file = self
            .service
            .generate_document(&request.template, payload, with_attachment)
            .await?;

        Ok(GeneratedDocument {
            record_name: record.name,
            file_name: file.file_name,
            url: if with_attachment { file.file_url } else { None },
        })
    }
}

/// Ordered chunks of at most [`CHUNK_SIZE`] ids; the last may be shorter.
fn partition(ids: &[RecordId]) -> Vec<&[RecordId]> {
    ids.chunks(CHUNK_SIZE).collect()
}
