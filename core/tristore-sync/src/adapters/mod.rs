//! HTTP-backed record stores.
//!
//! One adapter per remote system. Each owns its wire format, credentials
//! and retry policy, and classifies HTTP failures into `SyncError`s.

pub mod airtable;
mod http;
pub mod moloni;
pub mod notion;

pub use airtable::{AirtableConfig, AirtableStore};
pub use http::classify_status;
pub use moloni::{MoloniConfig, MoloniStore};
pub use notion::{NotionConfig, NotionStore};
