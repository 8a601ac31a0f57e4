//! Template schema model.
//!
//! A template exposes its fillable fields as a tree of [`SchemaField`]s.
//! Scalar fields hold a single value; composite fields (objects, and arrays
//! whose elements are objects) carry child fields and are filled from linked
//! rows. The wire shape (`type`, `generics`, `fields`) follows the template
//! service.

use crate::types::TemplateId;
use serde::{Deserialize, Serialize};

/// Semantic kind of a template field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Number,
    Date,
    Boolean,
    Object,
    Array,
}

impl FieldKind {
    /// Scalar kinds hold a single value and never carry child fields.
    pub fn is_scalar(&self) -> bool {
        !matches!(self, FieldKind::Object | FieldKind::Array)
    }
}

/// One fillable field in a template schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: FieldKind,

    /// Element kind, present only on `Array` fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generics: Option<FieldKind>,

    /// Child fields, present only on composite fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<SchemaField>>,
}

impl SchemaField {
    /// A composite field is filled per linked row from its child fields.
    pub fn is_composite(&self) -> bool {
        self.fields.as_ref().is_some_and(|f| !f.is_empty())
    }

    /// Checks the subtree rooted here, reporting the first violation with a
    /// dotted path to the offending field.
    pub fn validate(&self) -> Result<(), String> {
        self.validate_at(&self.name)
    }

    fn validate_at(&self, path: &str) -> Result<(), String> {
        if self.name.is_empty() {
            return Err(format!("{}: field name is empty", path));
        }
        if self.generics.is_some() && self.kind != FieldKind::Array {
            return Err(format!("{}: generics on a non-array field", path));
        }

        let expects_children = match self.kind {
            FieldKind::Object => true,
            FieldKind::Array => self.generics == Some(FieldKind::Object),
            _ => false,
        };
        match (expects_children, self.is_composite()) {
            (true, false) => {
                return Err(format!("{}: composite field has no child fields", path))
            }
            (false, true) => {
                return Err(format!("{}: scalar field carries child fields", path))
            }
            _ => {}
        }

        if let Some(children) = &self.fields {
            let mut seen = std::collections::HashSet::new();
            for child in children {
                if !seen.insert(child.name.as_str()) {
                    return Err(format!("{}.{}: duplicate field name", path, child.name));
                }
                child.validate_at(&format!("{}.{}", path, child.name))?;
            }
        }
        Ok(())
    }
}

/// A template as listed by the generation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    pub title: String,
    pub schema: Vec<SchemaField>,
}

impl Template {
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("template id is empty".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for field in &self.schema {
            if !seen.insert(field.name.as_str()) {
                return Err(format!("{}: duplicate field name", field.name));
            }
            field.validate()?;
        }
        Ok(())
    }
}
