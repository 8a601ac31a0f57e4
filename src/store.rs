//! Mapping persistence.
//!
//! Saved mappings live in a key-value store, one entry per (table, template)
//! pair plus a sibling entry for the attachment column choice. The key scheme
//! and the JSON value encoding are a compatibility contract with previously
//! saved mappings:
//!
//! ```text
//! table#{table}/template#{template}/mapping   -> mapping JSON
//! table#{table}/template#{template}/attach    -> attachment field id
//! ```
//!
//! The store is an explicit interface handed to whoever needs it; nothing in
//! the engine reaches for ambient state.

use crate::error::StoreError;
use crate::mapping::Mapping;
use crate::types::{FieldId, TableId, TemplateId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;

/// A mapping saved for one (table, template) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedMapping {
    pub mapping: Mapping,
    pub attachment_field: Option<FieldId>,
}

/// Key-value persistence for saved mappings.
pub trait MappingStore: Send + Sync {
    fn load(
        &self,
        table: &TableId,
        template: &TemplateId,
    ) -> Result<Option<SavedMapping>, StoreError>;

    fn save(
        &self,
        table: &TableId,
        template: &TemplateId,
        saved: &SavedMapping,
    ) -> Result<(), StoreError>;

    fn delete(&self, table: &TableId, template: &TemplateId) -> Result<(), StoreError>;

    /// Templates that have a saved mapping for `table`, sorted by id.
    fn mapped_templates(&self, table: &TableId) -> Result<Vec<TemplateId>, StoreError>;
}

const MAPPING_SCOPE: &str = "mapping";
const ATTACH_SCOPE: &str = "attach";

fn scoped_key(table: &TableId, template: &TemplateId, scope: &str) -> String {
    format!("table#{}/template#{}/{}", table, template, scope)
}

fn table_prefix(table: &TableId) -> String {
    format!("table#{}/template#", table)
}

/// Sled-backed implementation of [`MappingStore`].
pub struct SledMappingStore {
    db: sled::Db,
}

impl SledMappingStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)
            .map_err(|e| StoreError::Backend(format!("Failed to open mapping store: {}", e)))?;
        Ok(Self { db })
    }

    /// Flushes pending writes to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map_err(|e| StoreError::Backend(format!("Failed to flush mapping store: {}", e)))?;
        Ok(())
    }

    fn get_raw(&self, key: &str) -> Result<Option<sled::IVec>, StoreError> {
        self.db
            .get(key.as_bytes())
            .map_err(|e| StoreError::Backend(format!("Failed to read {}: {}", key, e)))
    }

    fn remove_raw(&self, key: &str) -> Result<(), StoreError> {
        self.db
            .remove(key.as_bytes())
            .map_err(|e| StoreError::Backend(format!("Failed to remove {}: {}", key, e)))?;
        Ok(())
    }
}

impl MappingStore for SledMappingStore {
    fn load(
        &self,
        table: &TableId,
        template: &TemplateId,
    ) -> Result<Option<SavedMapping>, StoreError> {
        let Some(raw) = self.get_raw(&scoped_key(table, template, MAPPING_SCOPE))? else {
            return Ok(None);
        };
        let mapping: Mapping = serde_json::from_slice(&raw).map_err(|e| {
            StoreError::InvalidMapping(format!(
                "table {} template {}: {}",
                table, template, e
            ))
        })?;

        let attachment_field = self
            .get_raw(&scoped_key(table, template, ATTACH_SCOPE))?
            .map(|raw| FieldId::new(String::from_utf8_lossy(&raw).into_owned()))
            .filter(|field| !field.is_empty());

        Ok(Some(SavedMapping {
            mapping,
            attachment_field,
        }))
    }

    fn save(
        &self,
        table: &TableId,
        template: &TemplateId,
        saved: &SavedMapping,
    ) -> Result<(), StoreError> {
        let value = serde_json::to_vec(&saved.mapping)
            .map_err(|e| StoreError::InvalidMapping(e.to_string()))?;
        let key = scoped_key(table, template, MAPPING_SCOPE);
        self.db
            .insert(key.as_bytes(), value)
            .map_err(|e| StoreError::Backend(format!("Failed to write {}: {}", key, e)))?;

        let attach_key = scoped_key(table, template, ATTACH_SCOPE);
        match &saved.attachment_field {
            Some(field) => {
                self.db
                    .insert(attach_key.as_bytes(), field.as_str().as_bytes())
                    .map_err(|e| {
                        StoreError::Backend(format!("Failed to write {}: {}", attach_key, e))
                    })?;
            }
            None => self.remove_raw(&attach_key)?,
        }
        Ok(())
    }

    fn delete(&self, table: &TableId, template: &TemplateId) -> Result<(), StoreError> {
        self.remove_raw(&scoped_key(table, template, MAPPING_SCOPE))?;
        self.remove_raw(&scoped_key(table, template, ATTACH_SCOPE))
    }

    fn mapped_templates(&self, table: &TableId) -> Result<Vec<TemplateId>, StoreError> {
        let prefix = table_prefix(table);
        let suffix = format!("/{}", MAPPING_SCOPE);
        let mut templates = Vec::new();
        for item in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, _) = item
                .map_err(|e| StoreError::Backend(format!("Failed to scan mappings: {}", e)))?;
            let key = String::from_utf8_lossy(&key).into_owned();
            if let Some(middle) = key
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(&suffix))
            {
                templates.push(TemplateId::new(middle));
            }
        }
        templates.sort();
        Ok(templates)
    }
}

/// In-memory implementation of [`MappingStore`] for hosts and tests that
/// need no durability.
#[derive(Default)]
pub struct MemoryMappingStore {
    entries: RwLock<HashMap<(TableId, TemplateId), SavedMapping>>,
}

impl MemoryMappingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MappingStore for MemoryMappingStore {
    fn load(
        &self,
        table: &TableId,
        template: &TemplateId,
    ) -> Result<Option<SavedMapping>, StoreError> {
        Ok(self
            .entries
            .read()
            .get(&(table.clone(), template.clone()))
            .cloned())
    }

    fn save(
        &self,
        table: &TableId,
        template: &TemplateId,
        saved: &SavedMapping,
    ) -> Result<(), StoreError> {
        self.entries
            .write()
            .insert((table.clone(), template.clone()), saved.clone());
        Ok(())
    }

    fn delete(&self, table: &TableId, template: &TemplateId) -> Result<(), StoreError> {
        self.entries
            .write()
            .remove(&(table.clone(), template.clone()));
        Ok(())
    }

    fn mapped_templates(&self, table: &TableId) -> Result<Vec<TemplateId>, StoreError> {
        let mut templates: Vec<TemplateId> = self
            .entries
            .read()
            .keys()
            .filter(|(t, _)| t == table)
            .map(|(_, template)| template.clone())
            .collect();
        templates.sort();
        Ok(templates)
    }
}
