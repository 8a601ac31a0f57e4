//! Integration tests for mapping persistence
//!
//! Tests cover:
//! - The scaffold, bind, validate, save, load editing flow
//! - Mappings surviving a store reopen
//! - Template listings per table
//! - Attachment field storage alongside the mapping

use docmill::mapping::{Mapping, MappingNode};
use docmill::schema::{FieldKind, SchemaField};
use docmill::store::{MappingStore, SavedMapping, SledMappingStore};
use docmill::types::{FieldId, TableId, TemplateId};
use tempfile::TempDir;

fn invoice_schema() -> Vec<SchemaField> {
    serde_json::from_value(serde_json::json!([
        { "name": "ref", "type": "text" },
        { "name": "items", "type": "array", "generics": "object", "fields": [
            { "name": "label", "type": "text" },
            { "name": "qty", "type": "number" }
        ]}
    ]))
    .unwrap()
}

fn bound_mapping() -> Mapping {
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

#[test]
fn scaffold_bind_save_load_flow() {
    let temp_dir = TempDir::new().unwrap();
    let store = SledMappingStore::new(temp_dir.path()).unwrap();
    let table = TableId::from("tblOrd");
    let template = TemplateId::from("tmplInvoice");

    let schema = invoice_schema();
    for field in &schema {
        field.validate().unwrap();
    }

    // An editor starts from the scaffold and ends with bound nodes of the
    // same shape.
    let scaffold = Mapping::scaffold(&schema);
    scaffold.validate_against(&schema).unwrap();
    assert!(!scaffold.get("ref").unwrap().is_bound());

    let mapping = bound_mapping();
    mapping.validate_against(&schema).unwrap();

    let saved = SavedMapping {
        mapping,
        attachment_field: Some(FieldId::from("fldDocs")),
    };
    store.save(&table, &template, &saved).unwrap();

    let loaded = store.load(&table, &template).unwrap().unwrap();
    assert_eq!(loaded, saved);
    loaded.mapping.validate_against(&schema).unwrap();
}

#[test]
fn mappings_survive_store_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let table = TableId::from("tblOrd");
    let template = TemplateId::from("tmplInvoice");
    let saved = SavedMapping {
        mapping: bound_mapping(),
        attachment_field: None,
    };

    {
        let store = SledMappingStore::new(temp_dir.path()).unwrap();
        store.save(&table, &template, &saved).unwrap();
        store.flush().unwrap();
    }

    let reopened = SledMappingStore::new(temp_dir.path()).unwrap();
    let loaded = reopened.load(&table, &template).unwrap().unwrap();
    assert_eq!(loaded, saved);
}

#[test]
fn mapped_templates_track_saves_and_deletes() {
    let temp_dir = TempDir::new().unwrap();
    let store = SledMappingStore::new(temp_dir.path()).unwrap();
    let table = TableId::from("tblOrd");
    let saved = SavedMapping {
        mapping: bound_mapping(),
        attachment_field: None,
    };

    store
        .save(&table, &TemplateId::from("tmplInvoice"), &saved)
        .unwrap();
    store
        .save(&table, &TemplateId::from("tmplDelivery"), &saved)
        .unwrap();
    // A different table must not leak into the listing.
    store
        .save(&TableId::from("tblCus"), &TemplateId::from("tmplLetter"), &saved)
        .unwrap();

    let mut templates = store.mapped_templates(&table).unwrap();
    templates.sort();
    assert_eq!(
        templates,
        vec![
            TemplateId::from("tmplDelivery"),
            TemplateId::from("tmplInvoice")
        ]
    );

    store
        .delete(&table, &TemplateId::from("tmplDelivery"))
        .unwrap();
    assert_eq!(
        store.mapped_templates(&table).unwrap(),
        vec![TemplateId::from("tmplInvoice")]
    );
    assert!(store
        .load(&table, &TemplateId::from("tmplDelivery"))
        .unwrap()
        .is_none());
}

#[test]
fn attachment_field_round_trips_independently() {
    let temp_dir = TempDir::new().unwrap();
    let store = SledMappingStore::new(temp_dir.path()).unwrap();
    let table = TableId::from("tblOrd");
    let template = TemplateId::from("tmplInvoice");

    let with_attachment = SavedMapping {
        mapping: bound_mapping(),
        attachment_field: Some(FieldId::from("fldDocs")),
    };
    store.save(&table, &template, &with_attachment).unwrap();

    // Re-saving without an attachment clears the stored field.
    let without_attachment = SavedMapping {
        mapping: bound_mapping(),
        attachment_field: None,
    };
    store.save(&table, &template, &without_attachment).unwrap();

    let loaded = store.load(&table, &template).unwrap().unwrap();
    assert_eq!(loaded.attachment_field, None);
}
