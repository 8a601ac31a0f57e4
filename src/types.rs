//! Identifier types shared across the document generation engine.
//!
//! Tables, fields, records, and templates are all addressed by opaque string
//! identifiers assigned by their owning systems. Each gets its own newtype so
//! the signatures say which identifier they expect.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identifier of a table in the relational source.
    TableId
);

string_id!(
    /// Identifier of a column within a table.
    FieldId
);

string_id!(
    /// Identifier of a row within a table.
    RecordId
);

string_id!(
    /// Identifier of a document template on the generation service.
    TemplateId
);
