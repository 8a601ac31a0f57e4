//! Docmill: Bulk Document Generation
//!
//! Merges relational records into document templates through stored field
//! mappings and drives chunked, concurrent generation runs against a
//! template service.

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod mapping;
pub mod merge;
pub mod pipeline;
pub mod schema;
pub mod source;
pub mod store;
pub mod types;
