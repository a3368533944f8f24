//! Identifier types used throughout the tristore core.
//!
//! Remote stores assign their own opaque string identifiers, so unlike
//! generated UUIDs these are thin, validated wrappers around `String`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw identifier.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Store-assigned record identifier. Immutable once the store creates it.
    RecordId
);

string_id!(
    /// Label selecting a mapping table and a target collection (e.g. `product`).
    EntityType
);

string_id!(
    /// Identifies one directional leg of the pipeline, e.g. `airtable->notion`.
    StorePairId
);

impl StorePairId {
    /// Builds the conventional `from->to` identifier.
    #[must_use]
    pub fn between(from: &str, to: &str) -> Self {
        Self(format!("{from}->{to}"))
    }
}

/// Cross-store identity key: the system a record came from plus its id there.
///
/// Stored on downstream records in its `system:id` text form and used as the
/// upsert lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalRef {
    pub system: String,
    pub id: RecordId,
}

impl ExternalRef {
    /// Creates a reference, rejecting empty components.
    pub fn new(system: impl Into<String>, id: impl Into<RecordId>) -> Result<Self> {
        let system = system.into();
        let id = id.into();
        if system.trim().is_empty() {
            return Err(Error::InvalidExternalRef("system is empty".to_string()));
        }
        if system.contains(':') {
            return Err(Error::InvalidExternalRef(format!(
                "system '{system}' contains ':'"
            )));
        }
        if id.as_str().trim().is_empty() {
            return Err(Error::InvalidExternalRef("record id is empty".to_string()));
        }
        Ok(Self { system, id })
    }
}

impl fmt::Display for ExternalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.system, self.id)
    }
}

impl FromStr for ExternalRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (system, id) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidExternalRef(format!("'{s}' has no ':' separator")))?;
        Self::new(system, id)
    }
}
