//! Record access abstraction over the relational source.
//!
//! The merge evaluator and the pipeline read rows through [`RecordSource`],
//! which keeps the backend behind a narrow surface: fetch one record by id,
//! and resolve a record's linked-relationship cell to full rows. Linked rows
//! arrive wrapped in a [`LinkedRecords`] guard whose release hook runs exactly
//! once, on drop or on explicit [`LinkedRecords::unload`].
//!
//! Binding drift is tolerated by contract: an unknown field, a column of the
//! wrong kind, or a stale linked row id yields an empty result, never an
//! error. [`crate::error::SourceError`] is reserved for real faults such as a
//! missing record or an unreachable backend.

mod memory;

pub use memory::{MemorySource, MemoryTable};

use crate::error::SourceError;
use crate::types::{FieldId, RecordId, TableId};
use async_trait::async_trait;
use std::collections::HashMap;

/// Declared kind of a source column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Number,
    Checkbox,
    Date,
    /// Linked-relationship column; cells hold row ids in the target table.
    Link { table: TableId },
    Attachment,
}

impl ColumnKind {
    /// Whether a column of this kind can back a template field of `kind`.
    ///
    /// Advisory only. Evaluation never rejects a binding; it treats
    /// unresolvable ones as absent.
    pub fn is_assignable_to(&self, kind: crate::schema::FieldKind) -> bool {
        use crate::schema::FieldKind;
        match kind {
            FieldKind::Text => matches!(
                self,
                ColumnKind::Text | ColumnKind::Number | ColumnKind::Checkbox | ColumnKind::Date
            ),
            FieldKind::Number => matches!(self, ColumnKind::Number),
            FieldKind::Date => matches!(self, ColumnKind::Date),
            FieldKind::Boolean => matches!(self, ColumnKind::Checkbox),
            FieldKind::Object | FieldKind::Array => matches!(self, ColumnKind::Link { .. }),
        }
    }
}

/// Column declaration within a table.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub id: FieldId,
    pub name: String,
    pub kind: ColumnKind,
}

impl FieldDef {
    pub fn new(id: impl Into<FieldId>, name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
        }
    }
}

/// A cell value as handed over by the source.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Bool(bool),
    Links(Vec<RecordId>),
}

impl CellValue {
    /// Text rendering used when merging scalar text fields. Link cells have
    /// no text rendering here; composites are merged through their rows.
    pub fn as_text(&self) -> String {
        match self {
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) => n.to_string(),
            CellValue::Bool(true) => "checked".to_string(),
            CellValue::Bool(false) => String::new(),
            CellValue::Links(_) => String::new(),
        }
    }

    /// Raw value used by the non-text merge fallback. `None` stands for a
    /// value with no payload representation; empty link cells and non-finite
    /// numbers are absent rather than null.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        match self {
            CellValue::Text(s) => Some(serde_json::Value::String(s.clone())),
            CellValue::Number(n) => serde_json::Number::from_f64(*n).map(serde_json::Value::Number),
            CellValue::Bool(b) => Some(serde_json::Value::Bool(*b)),
            CellValue::Links(ids) if ids.is_empty() => None,
            CellValue::Links(ids) => Some(serde_json::Value::Array(
                ids.iter()
                    .map(|id| serde_json::Value::String(id.as_str().to_string()))
                    .collect(),
            )),
        }
    }
}

/// One row of a source table.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: RecordId,
    /// Display name of the row (its primary field rendering).
    pub name: String,
    cells: HashMap<FieldId, CellValue>,
}

impl Record {
    pub fn new(id: impl Into<RecordId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            cells: HashMap::new(),
        }
    }

    pub fn with_cell(mut self, field: impl Into<FieldId>, value: CellValue) -> Self {
        self.cells.insert(field.into(), value);
        self
    }

    /// The cell for `field`, if the record carries one.
    pub fn cell(&self, field: &FieldId) -> Option<&CellValue> {
        self.cells.get(field)
    }

    /// Linked row ids held in `field`, empty when the cell is missing or not
    /// a link cell.
    pub fn link_ids(&self, field: &FieldId) -> &[RecordId] {
        match self.cells.get(field) {
            Some(CellValue::Links(ids)) => ids,
            _ => &[],
        }
    }
}

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// Linked rows resolved from one cell, paired with their release hook.
///
/// The hook runs exactly once: on [`unload`](Self::unload) for the normal
/// path, or on drop when evaluation bails out early.
pub struct LinkedRecords {
    records: Vec<Record>,
    release: Option<ReleaseHook>,
}

impl LinkedRecords {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records,
            release: None,
        }
    }

    pub fn with_release(records: Vec<Record>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            records,
            release: Some(Box::new(release)),
        }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Releases the load. Dropping without calling this releases as well.
    pub fn unload(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for LinkedRecords {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for LinkedRecords {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkedRecords")
            .field("records", &self.records.len())
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// Read access to the relational source. The engine never writes back.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetches one row by id. A missing row is a collaborator fault.
    async fn record(&self, id: &RecordId) -> Result<Record, SourceError>;

    /// Resolves the linked rows held in `field` of `record`, in cell order,
    /// skipping ids that no longer resolve. Unknown fields and non-link cells
    /// yield an empty result.
    async fn linked_records(
        &self,
        record: &Record,
        field: &FieldId,
    ) -> Result<LinkedRecords, SourceError>;
}
