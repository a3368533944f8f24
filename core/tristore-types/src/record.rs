//! Records and field values.
//!
//! A `Record` is one row/page/entity in a remote store, reduced to the
//! shape the sync core understands: an id, an open set of typed fields,
//! and the store's last-modified time.

use crate::{RecordId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Field name → value. Ordered so mapped output is deterministic.
pub type Fields = BTreeMap<String, FieldValue>;

/// A typed field value.
///
/// Every adapter translates its store's native cell/property shapes into
/// one of these variants and back. Values the adapter cannot express are
/// left out of the record rather than guessed at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    /// Plain text.
    Text(String),
    /// A number.
    Number(f64),
    /// A single-select option label.
    Select(String),
    /// Rich text as a sequence of plain-text runs.
    RichText(Vec<String>),
    /// Links to other records, by the linking store's ids.
    Reference(Vec<String>),
}

/// The variant of a `FieldValue`, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Number,
    Select,
    RichText,
    Reference,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldKind::Text => "text",
            FieldKind::Number => "number",
            FieldKind::Select => "select",
            FieldKind::RichText => "rich_text",
            FieldKind::Reference => "reference",
        };
        f.write_str(s)
    }
}

impl FieldValue {
    /// Shorthand for a plain text value.
    pub fn text(s: impl Into<String>) -> Self {
        FieldValue::Text(s.into())
    }

    /// Shorthand for a rich-text value with a single run.
    pub fn rich_text(s: impl Into<String>) -> Self {
        FieldValue::RichText(vec![s.into()])
    }

    /// Shorthand for a select value.
    pub fn select(label: impl Into<String>) -> Self {
        FieldValue::Select(label.into())
    }

    /// Returns the variant of this value.
    #[must_use]
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Text(_) => FieldKind::Text,
            FieldValue::Number(_) => FieldKind::Number,
            FieldValue::Select(_) => FieldKind::Select,
            FieldValue::RichText(_) => FieldKind::RichText,
            FieldValue::Reference(_) => FieldKind::Reference,
        }
    }

    /// Returns the text of a `Text` value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the number of a `Number` value.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Renders textual variants as a single plain string.
    ///
    /// Rich-text runs are concatenated. Numbers and references return `None`.
    #[must_use]
    pub fn plain_text(&self) -> Option<String> {
        match self {
            FieldValue::Text(s) | FieldValue::Select(s) => Some(s.clone()),
            FieldValue::RichText(runs) => Some(runs.concat()),
            FieldValue::Number(_) | FieldValue::Reference(_) => None,
        }
    }
}

/// A record as held by one remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Store-assigned identifier.
    pub id: RecordId,

    /// The record's fields, keyed by the store's native field names.
    #[serde(default)]
    pub fields: Fields,

    /// When the owning store last modified this record.
    pub last_modified: Timestamp,
}

impl Record {
    /// Creates a record with no fields.
    #[must_use]
    pub fn new(id: impl Into<RecordId>, last_modified: Timestamp) -> Self {
        Self {
            id: id.into(),
            fields: Fields::new(),
            last_modified,
        }
    }

    /// Adds a field, replacing any existing value under that name.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}
