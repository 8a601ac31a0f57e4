//! Merge evaluation.
//!
//! The evaluator walks a mapping tree against one source record and builds
//! the nested payload submitted for document generation. Evaluation is pure
//! with respect to its inputs: every call returns a freshly built value,
//! parents compose their children's return values, and nothing is written to
//! the source.
//!
//! Absence is omission. An unbound node, an empty cell, a link that resolves
//! to no rows, or a composite whose children all came up absent contributes
//! no key at all. Payloads never contain null, empty-object, or empty-list
//! values.

use crate::error::SourceError;
use crate::mapping::{Mapping, MappingNode};
use crate::schema::FieldKind;
use crate::source::{Record, RecordSource};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};
use tracing::warn;

/// Evaluates mappings against records read through a [`RecordSource`].
pub struct MergeEvaluator<'a> {
    source: &'a dyn RecordSource,
}

impl<'a> MergeEvaluator<'a> {
    pub fn new(source: &'a dyn RecordSource) -> Self {
        Self { source }
    }

    /// Builds the payload for one record: every root mapping entry evaluated,
    /// absent branches omitted. An all-absent mapping yields an empty object,
    /// which is still a valid payload to submit.
    pub async fn merge_record(
        &self,
        mapping: &Mapping,
        record: &Record,
    ) -> Result<Map<String, Value>, SourceError> {
        let mut payload = Map::new();
        for (name, node) in mapping.entries() {
            if let Some(value) = self.evaluate(node, record).await? {
                payload.insert(name.clone(), value);
            }
        }
        Ok(payload)
    }

    /// Evaluates one mapping node. `None` means the branch is absent.
    ///
    /// Recursion is boxed: the mapping depth is user data, not a compile-time
    /// shape.
    fn evaluate<'f>(
        &'f self,
        node: &'f MappingNode,
        record: &'f Record,
    ) -> BoxFuture<'f, Result<Option<Value>, SourceError>> {
        async move {
            let Some(field) = node.source_field.as_ref() else {
                return Ok(None);
            };

            match &node.children {
                Some(children) => {
                    let linked = self.source.linked_records(record, field).await?;
                    // Object cardinality contributes at most the first linked
                    // row; array cardinality contributes all rows in source
                    // order.
                    let take = if node.kind == FieldKind::Object {
                        1
                    } else {
                        linked.len()
                    };

                    let mut rows = Vec::new();
                    for row in linked.records().iter().take(take) {
                        let mut item = Map::new();
                        for (name, child) in children {
                            if let Some(value) = self.evaluate(child, row).await? {
                                item.insert(name.clone(), value);
                            }
                        }
                        if !item.is_empty() {
                            rows.push(Value::Object(item));
                        }
                    }
                    linked.unload();

                    Ok(match node.kind {
                        FieldKind::Object => rows.into_iter().next(),
                        _ => {
                            if rows.is_empty() {
                                None
                            } else {
                                Some(Value::Array(rows))
                            }
                        }
                    })
                }
                None if node.kind == FieldKind::Text => {
                    let text = record
                        .cell(field)
                        .map(|cell| cell.as_text())
                        .unwrap_or_default();
                    if text.is_empty() {
                        Ok(None)
                    } else {
                        Ok(Some(Value::String(text)))
                    }
                }
                None => {
                    // Leaves of other kinds have no dedicated merge rule; the
                    // raw cell value goes through as-is.
                    warn!(field = %field, kind = ?node.kind,
                        "no merge rule for leaf kind; using raw cell value");
                    Ok(record.cell(field).and_then(|cell| cell.to_json()))
                }
            }
        }
        .boxed()
    }
}
