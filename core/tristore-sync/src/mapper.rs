//! Table-driven field mapping between stores.
//!
//! Each entity type has a table of `source field -> (target field, transform)`
//! rules. Mapping is a forward-only projection: source fields without a rule
//! are dropped, rules whose source field is absent produce nothing.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tristore_types::{EntityType, FieldValue, Fields};

/// How a single field value is carried across.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    /// Copy the value unchanged.
    #[default]
    Identity,
    /// Numbers only; anything else is a mapping error.
    Number,
    /// Plain text becomes rich text with a single run.
    TextToRichText,
    /// Rich-text runs are flattened into plain text.
    RichTextToText,
    /// A select (or plain text) label becomes a select option.
    SelectLabel,
}

impl Transform {
    /// Applies the transform to one value. `field` is used for error context.
    pub fn apply(self, field: &str, value: &FieldValue) -> SyncResult<FieldValue> {
        match (self, value) {
            (Transform::Identity, v) => Ok(v.clone()),

            (Transform::Number, FieldValue::Number(n)) if n.is_finite() => {
                Ok(FieldValue::Number(*n))
            }
            (Transform::Number, FieldValue::Number(_)) => Err(SyncError::Mapping {
                field: field.to_string(),
                reason: "number is not finite".to_string(),
            }),
            (Transform::Number, other) => {
                Err(SyncError::unexpected_kind(field, "number", other.kind()))
            }

            (Transform::TextToRichText, FieldValue::Text(s)) => {
                Ok(FieldValue::RichText(vec![s.clone()]))
            }
            (Transform::TextToRichText, FieldValue::RichText(runs)) => {
                Ok(FieldValue::RichText(runs.clone()))
            }
            (Transform::TextToRichText, other) => {
                Err(SyncError::unexpected_kind(field, "text", other.kind()))
            }

            (Transform::RichTextToText, FieldValue::RichText(runs)) => {
                Ok(FieldValue::Text(runs.concat()))
            }
            (Transform::RichTextToText, FieldValue::Text(s)) => Ok(FieldValue::Text(s.clone())),
            (Transform::RichTextToText, other) => {
                Err(SyncError::unexpected_kind(field, "rich text", other.kind()))
            }

            (Transform::SelectLabel, FieldValue::Select(label) | FieldValue::Text(label)) => {
                if label.trim().is_empty() {
                    return Err(SyncError::Mapping {
                        field: field.to_string(),
                        reason: "select label is empty".to_string(),
                    });
                }
                Ok(FieldValue::Select(label.clone()))
            }
            (Transform::SelectLabel, other) => {
                Err(SyncError::unexpected_kind(field, "select label", other.kind()))
            }
        }
    }
}

/// One mapping rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub transform: Transform,
}

/// All rules for one entity type on one pipeline leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingTable {
    pub entity_type: EntityType,
    pub rules: Vec<FieldRule>,
}

impl MappingTable {
    /// Creates an empty table.
    pub fn new(entity_type: impl Into<EntityType>) -> Self {
        Self {
            entity_type: entity_type.into(),
            rules: Vec::new(),
        }
    }

    /// Adds a rule.
    #[must_use]
    pub fn rule(
        mut self,
        source: impl Into<String>,
        target: impl Into<String>,
        transform: Transform,
    ) -> Self {
        self.rules.push(FieldRule {
            source: source.into(),
            target: target.into(),
            transform,
        });
        self
    }

    /// Checks the table is well-formed: non-empty names, and no two rules
    /// writing the same target field.
    pub fn validate(&self) -> SyncResult<()> {
        if self.entity_type.as_str().trim().is_empty() {
            return Err(SyncError::MappingConfig("entity type is empty".to_string()));
        }
        let mut targets = HashSet::new();
        for rule in &self.rules {
            if rule.source.trim().is_empty() || rule.target.trim().is_empty() {
                return Err(SyncError::MappingConfig(format!(
                    "'{}' has a rule with an empty field name",
                    self.entity_type
                )));
            }
            if !targets.insert(rule.target.as_str()) {
                return Err(SyncError::MappingConfig(format!(
                    "'{}' maps more than one field onto '{}'",
                    self.entity_type, rule.target
                )));
            }
        }
        Ok(())
    }
}

/// Maps one store's fields onto another's, per entity type.
#[derive(Debug, Clone, Default)]
pub struct FieldMapper {
    tables: HashMap<EntityType, MappingTable>,
}

impl FieldMapper {
    /// Builds a mapper from tables, validating each one.
    pub fn new(tables: impl IntoIterator<Item = MappingTable>) -> SyncResult<Self> {
        let mut by_type = HashMap::new();
        for table in tables {
            table.validate()?;
            let entity_type = table.entity_type.clone();
            if by_type.insert(entity_type.clone(), table).is_some() {
                return Err(SyncError::MappingConfig(format!(
                    "duplicate mapping table for '{entity_type}'"
                )));
            }
        }
        Ok(Self { tables: by_type })
    }

    /// Returns the table for an entity type.
    pub fn table(&self, entity_type: &EntityType) -> SyncResult<&MappingTable> {
        self.tables.get(entity_type).ok_or_else(|| {
            SyncError::MappingConfig(format!("no mapping table for entity type '{entity_type}'"))
        })
    }

    /// Verifies a table exists for `entity_type` and that none of its rules
    /// writes `reserved_field` (the target store's external-ref field).
    pub fn check_ready(&self, entity_type: &EntityType, reserved_field: &str) -> SyncResult<()> {
        let table = self.table(entity_type)?;
        if let Some(rule) = table.rules.iter().find(|r| r.target == reserved_field) {
            return Err(SyncError::MappingConfig(format!(
                "'{entity_type}' maps '{}' onto the reserved external-ref field '{reserved_field}'",
                rule.source
            )));
        }
        Ok(())
    }

    /// Entity types this mapper has tables for.
    pub fn entity_types(&self) -> impl Iterator<Item = &EntityType> {
        self.tables.keys()
    }

    /// Maps `source` through the entity type's table.
    ///
    /// Missing source fields are skipped, so an empty input maps to an empty
    /// output. A present value that its transform cannot accept is an error.
    pub fn map(&self, entity_type: &EntityType, source: &Fields) -> SyncResult<Fields> {
        let table = self.table(entity_type)?;
        let mut target = Fields::new();
        for rule in &table.rules {
            if let Some(value) = source.get(&rule.source) {
                let mapped = rule.transform.apply(&rule.source, value)?;
                target.insert(rule.target.clone(), mapped);
            }
        }
        Ok(target)
    }
}

/// Built-in tables for the product catalogue flow.
pub mod presets {
    use super::{MappingTable, Transform};

    /// Spreadsheet rows → database pages.
    pub fn products_to_pages() -> MappingTable {
        MappingTable::new("product")
            .rule("Name", "Name", Transform::TextToRichText)
            .rule("Description", "Description", Transform::TextToRichText)
            .rule("Status", "Status", Transform::SelectLabel)
            .rule("Price", "Price", Transform::Number)
    }

    /// Database pages → invoicing products.
    pub fn pages_to_invoicing() -> MappingTable {
        MappingTable::new("product")
            .rule("Name", "name", Transform::RichTextToText)
            .rule("Description", "description", Transform::RichTextToText)
            .rule("Price", "price", Transform::Number)
    }
}
