//! Pipeline configuration and wiring for the `tristore` binary.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use tristore_sync::adapters::{
    AirtableConfig, AirtableStore, MoloniConfig, MoloniStore, NotionConfig, NotionStore,
};
use tristore_sync::{
    ChangeCursor, CursorStore, MemoryStore, OrchestratorConfig, RemoteStore, SyncOrchestrator,
    SyncResult,
};
use tristore_types::StorePairId;

/// Contents of the JSON pipeline file.
///
/// Credentials are never read from here; see [`Secrets`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub orchestrator: OrchestratorConfig,
    pub airtable: AirtableConfig,
    pub notion: NotionConfig,
    pub moloni: MoloniConfig,
}

impl PipelineConfig {
    /// Reads and validates a pipeline file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline config {}", path.display()))?;
        Self::from_json(&contents)
            .with_context(|| format!("Invalid pipeline config {}", path.display()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks that need no remote calls.
    pub fn validate(&self) -> Result<()> {
        if self.orchestrator.concurrency == 0 {
            anyhow::bail!("orchestrator.concurrency must be > 0");
        }
        for policy in [&self.airtable.retry, &self.notion.retry, &self.moloni.retry] {
            policy.validate()?;
        }
        Ok(())
    }

    /// Fills in credentials supplied outside the file.
    pub fn with_secrets(mut self, secrets: Secrets) -> Self {
        if let Some(key) = secrets.airtable_api_key {
            self.airtable.api_key = key;
        }
        if let Some(secret) = secrets.notion_secret {
            self.notion.secret = secret;
        }
        if let Some(id) = secrets.moloni_client_id {
            self.moloni.client_id = id;
        }
        if let Some(secret) = secrets.moloni_client_secret {
            self.moloni.client_secret = secret;
        }
        self
    }
}

/// Credentials taken from flags or the environment.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub airtable_api_key: Option<String>,
    pub notion_secret: Option<String>,
    pub moloni_client_id: Option<String>,
    pub moloni_client_secret: Option<String>,
}

/// A wired-up pipeline.
pub struct Pipeline {
    pub orchestrator: SyncOrchestrator,
    /// The in-memory target used instead of Moloni in dry-run mode.
    pub dry_run_target: Option<Arc<MemoryStore>>,
}

/// Builds the orchestrator over the three configured stores. With
/// `dry_run`, the invoicing store is replaced by an in-memory one.
pub fn build_pipeline(config: PipelineConfig, dry_run: bool) -> Result<Pipeline> {
    let source: Arc<dyn RemoteStore> =
        Arc::new(AirtableStore::new(config.airtable).context("Invalid airtable config")?);
    let intermediate: Arc<dyn RemoteStore> =
        Arc::new(NotionStore::new(config.notion).context("Invalid notion config")?);

    let dry_run_target = dry_run.then(|| {
        Arc::new(MemoryStore::new(
            "moloni",
            config.moloni.reference_field.clone(),
        ))
    });
    let target: Arc<dyn RemoteStore> = match &dry_run_target {
        Some(memory) => memory.clone(),
        None => Arc::new(MoloniStore::new(config.moloni).context("Invalid moloni config")?),
    };

    let orchestrator = SyncOrchestrator::new(config.orchestrator, source, intermediate, target)
        .context("Invalid mapping tables")?;
    Ok(Pipeline {
        orchestrator,
        dry_run_target,
    })
}

/// Cursor store that reads through to another store and discards saves.
pub struct ReadOnlyCursors<'a> {
    inner: &'a dyn CursorStore,
}

impl<'a> ReadOnlyCursors<'a> {
    pub fn new(inner: &'a dyn CursorStore) -> Self {
        Self { inner }
    }
}

impl CursorStore for ReadOnlyCursors<'_> {
    fn load(&self, store_pair: &StorePairId) -> SyncResult<ChangeCursor> {
        self.inner.load(store_pair)
    }

    fn save(&self, cursor: &ChangeCursor) -> SyncResult<()> {
        debug!(
            "Dry run: not saving cursor {} at {}",
            cursor.store_pair, cursor.watermark
        );
        Ok(())
    }
}
