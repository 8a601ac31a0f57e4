//! Field mapping between a template schema and source columns.
//!
//! A [`Mapping`] mirrors a template's schema tree node for node. Each
//! [`MappingNode`] optionally binds a source column; composite nodes carry the
//! child mapping for the rows of the linked table.
//!
//! The serialized form is a persisted contract with existing saved mappings:
//! `af` is the bound column id, `dt` the copied field kind, `fs` the child
//! map. Legacy mappings marked unbound nodes with a `"-"` sentinel in `af`;
//! deserialization folds that into "unset".

use crate::schema::{FieldKind, SchemaField};
use crate::source::{ColumnKind, FieldDef};
use crate::types::FieldId;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// One node of a mapping tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingNode {
    /// Bound source column, unset while the user has not picked one.
    #[serde(
        rename = "af",
        default,
        deserialize_with = "de_source_field",
        skip_serializing_if = "Option::is_none"
    )]
    pub source_field: Option<FieldId>,

    /// Field kind copied from the schema node this mirrors.
    #[serde(rename = "dt")]
    pub kind: FieldKind,

    /// Child mapping, present iff the schema field is composite.
    #[serde(rename = "fs", default, skip_serializing_if = "Option::is_none")]
    pub children: Option<BTreeMap<String, MappingNode>>,
}

fn de_source_field<'de, D>(deserializer: D) -> Result<Option<FieldId>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.is_empty() && s != "-").map(FieldId::from))
}

impl MappingNode {
    pub fn unbound(kind: FieldKind) -> Self {
        Self {
            source_field: None,
            kind,
            children: None,
        }
    }

    pub fn bound(kind: FieldKind, field: impl Into<FieldId>) -> Self {
        Self {
            source_field: Some(field.into()),
            kind,
            children: None,
        }
    }

    pub fn with_children(mut self, children: BTreeMap<String, MappingNode>) -> Self {
        self.children = Some(children);
        self
    }

    pub fn is_bound(&self) -> bool {
        self.source_field.is_some()
    }

    pub fn is_composite(&self) -> bool {
        self.children.as_ref().is_some_and(|c| !c.is_empty())
    }

    fn validate_against(&self, field: &SchemaField, path: &str) -> Result<(), String> {
        if self.kind != field.kind {
            return Err(format!(
                "{}: mapping kind {:?} does not match schema kind {:?}",
                path, self.kind, field.kind
            ));
        }
        match (field.is_composite(), &self.children) {
            (true, None) => {
                return Err(format!("{}: composite field has no child mapping", path))
            }
            (false, Some(_)) => {
                return Err(format!("{}: scalar field carries a child mapping", path))
            }
            (true, Some(children)) => {
                let schema_children = field.fields.as_deref().unwrap_or(&[]);
                validate_level(children, schema_children, path)?;
            }
            (false, None) => {}
        }
        Ok(())
    }
}

fn validate_level(
    nodes: &BTreeMap<String, MappingNode>,
    fields: &[SchemaField],
    path: &str,
) -> Result<(), String> {
    let qualify = |name: &str| {
        if path.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", path, name)
        }
    };
    for field in fields {
        let node = nodes
            .get(&field.name)
            .ok_or_else(|| format!("{}: schema field has no mapping entry", qualify(&field.name)))?;
        node.validate_against(field, &qualify(&field.name))?;
    }
    if nodes.len() != fields.len() {
        let known: std::collections::HashSet<&str> =
            fields.iter().map(|f| f.name.as_str()).collect();
        if let Some(extra) = nodes.keys().find(|k| !known.contains(k.as_str())) {
            return Err(format!("{}: no such field in the schema", qualify(extra)));
        }
    }
    Ok(())
}

/// A full mapping for one template: field name to node, isomorphic to the
/// template's schema.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mapping(BTreeMap<String, MappingNode>);

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, name: impl Into<String>, node: MappingNode) -> Self {
        self.0.insert(name.into(), node);
        self
    }

    pub fn get(&self, name: &str) -> Option<&MappingNode> {
        self.0.get(name)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &MappingNode)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Builds the all-unbound mapping mirroring `schema`. This is the state a
    /// host editor starts from before the user binds columns.
    pub fn scaffold(schema: &[SchemaField]) -> Self {
        Self(scaffold_level(schema))
    }

    /// Enforces the isomorphism invariant against `schema`: same keys at
    /// every level, copied kinds, matching composite shape.
    pub fn validate_against(&self, schema: &[SchemaField]) -> Result<(), String> {
        validate_level(&self.0, schema, "")
    }

    /// Root-level binding lint: bound nodes whose column is gone or of an
    /// inadmissible kind. Child levels bind columns of linked tables, so the
    /// host checks each level with that table's own columns.
    pub fn check_bindings(&self, columns: &[FieldDef]) -> Vec<BindingIssue> {
        let mut issues = Vec::new();
        for (name, node) in &self.0 {
            let Some(field_id) = &node.source_field else {
                continue;
            };
            match columns.iter().find(|c| &c.id == field_id) {
                None => issues.push(BindingIssue {
                    entry: name.clone(),
                    field: field_id.clone(),
                    problem: BindingProblem::MissingColumn,
                }),
                Some(column) if !column.kind.is_assignable_to(node.kind) => {
                    issues.push(BindingIssue {
                        entry: name.clone(),
                        field: field_id.clone(),
                        problem: BindingProblem::WrongKind(column.kind.clone()),
                    })
                }
                Some(_) => {}
            }
        }
        issues
    }
}

fn scaffold_level(fields: &[SchemaField]) -> BTreeMap<String, MappingNode> {
    fields
        .iter()
        .map(|field| {
            let mut node = MappingNode::unbound(field.kind);
            if field.is_composite() {
                node.children = Some(scaffold_level(field.fields.as_deref().unwrap_or(&[])));
            }
            (field.name.clone(), node)
        })
        .collect()
}

/// A column the user may bind to a given field kind. Used by host editors to
/// filter the column picker.
pub fn allowed_columns<'a>(kind: FieldKind, columns: &'a [FieldDef]) -> Vec<&'a FieldDef> {
    columns
        .iter()
        .filter(|c| c.kind.is_assignable_to(kind))
        .collect()
}

/// One questionable binding found by [`Mapping::check_bindings`].
#[derive(Debug, Clone, PartialEq)]
pub struct BindingIssue {
    /// Mapping entry name the binding belongs to.
    pub entry: String,
    pub field: FieldId,
    pub problem: BindingProblem,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BindingProblem {
    /// The bound column no longer exists.
    MissingColumn,
    /// The bound column exists but cannot back the field kind.
    WrongKind(ColumnKind),
}
