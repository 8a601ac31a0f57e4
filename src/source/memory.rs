//! In-memory record source.
//!
//! Reference implementation of [`RecordSource`] used by tests, benches, and
//! hosts that assemble their rows up front. Also the template for writing a
//! real backend adapter: resolution order, drift handling, and load
//! accounting here are the contract.

use super::{ColumnKind, FieldDef, LinkedRecords, Record, RecordSource};
use crate::error::SourceError;
use crate::types::{FieldId, RecordId, TableId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// One table of the in-memory source: column declarations plus rows.
#[derive(Debug, Clone)]
pub struct MemoryTable {
    pub id: TableId,
    pub name: String,
    fields: Vec<FieldDef>,
    records: Vec<Record>,
}

impl MemoryTable {
    pub fn new(id: impl Into<TableId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            fields: Vec::new(),
            records: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_record(mut self, record: Record) -> Self {
        self.records.push(record);
        self
    }

    pub fn field(&self, id: &FieldId) -> Option<&FieldDef> {
        self.fields.iter().find(|f| &f.id == id)
    }

    /// Column declarations, in declaration order.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }
}

/// In-memory [`RecordSource`] over a set of tables.
///
/// Tracks how many linked-record loads were started and released so tests can
/// assert the unload discipline.
#[derive(Default)]
pub struct MemorySource {
    tables: Vec<MemoryTable>,
    index: HashMap<RecordId, (usize, usize)>,
    loads_started: Arc<AtomicUsize>,
    loads_released: Arc<AtomicUsize>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: MemoryTable) -> Self {
        let table_idx = self.tables.len();
        for (record_idx, record) in table.records.iter().enumerate() {
            self.index.insert(record.id.clone(), (table_idx, record_idx));
        }
        self.tables.push(table);
        self
    }

    pub fn table(&self, id: &TableId) -> Option<&MemoryTable> {
        self.tables.iter().find(|t| &t.id == id)
    }

    /// Linked-record loads started so far.
    pub fn loads_started(&self) -> usize {
        self.loads_started.load(Ordering::SeqCst)
    }

    /// Loads started but not yet released. Zero once evaluation is done.
    pub fn loads_in_flight(&self) -> usize {
        self.loads_started() - self.loads_released.load(Ordering::SeqCst)
    }

    /// Target table of `field` on the table owning `record`, when the column
    /// is declared as a link. Anything else is drift and resolves to nothing.
    fn link_target(&self, record: &Record, field: &FieldId) -> Option<&MemoryTable> {
        let (table_idx, _) = self.index.get(&record.id)?;
        match &self.tables[*table_idx].field(field)?.kind {
            ColumnKind::Link { table } => self.table(table),
            _ => None,
        }
    }
}

#[async_trait]
impl RecordSource for MemorySource {
    async fn record(&self, id: &RecordId) -> Result<Record, SourceError> {
        match self.index.get(id) {
            Some((table_idx, record_idx)) => {
                Ok(self.tables[*table_idx].records[*record_idx].clone())
            }
            None => Err(SourceError::RecordNotFound(id.clone())),
        }
    }

    async fn linked_records(
        &self,
        record: &Record,
        field: &FieldId,
    ) -> Result<LinkedRecords, SourceError> {
        let rows = match self.link_target(record, field) {
            Some(target) => {
                let mut rows = Vec::new();
                for id in record.link_ids(field) {
                    match target.records.iter().find(|r| &r.id == id) {
                        Some(row) => rows.push(row.clone()),
                        None => {
                            debug!(record = %record.id, field = %field, linked = %id,
                                "stale linked row id skipped");
                        }
                    }
                }
                rows
            }
            None => {
                debug!(record = %record.id, field = %field,
                    "field does not resolve to a link column; yielding no rows");
                Vec::new()
            }
        };

        self.loads_started.fetch_add(1, Ordering::SeqCst);
        let released = self.loads_released.clone();
        Ok(LinkedRecords::with_release(rows, move || {
            released.fetch_add(1, Ordering::SeqCst);
        }))
    }
}
