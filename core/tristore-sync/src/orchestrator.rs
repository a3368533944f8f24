//! Sync orchestrator: runs the two pipeline stages in order.
//!
//! Each stage lists changed records from its upstream store, maps them,
//! upserts them into its downstream store with a bounded number of
//! concurrent workers, and computes its next cursor. `run` only returns the
//! new cursors in the summary; `run_with_store` also saves them.

use crate::cursor::{ChangeCursor, CursorStore, WatermarkTracker};
use crate::error::{SyncError, SyncResult};
use crate::mapper::{presets, FieldMapper, MappingTable};
use crate::store::RemoteStore;
use crate::summary::{
    RecordFailure, RunOutcome, RunPhase, StageId, StagePhase, StageReport, SyncSummary,
};
use crate::upsert::{UpsertAction, UpsertEngine, UpsertOutcome};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tristore_types::{EntityType, ExternalRef, Fields, RecordId, StorePairId, Timestamp};
use uuid::Uuid;

/// Default number of records upserted concurrently within a stage.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Configuration for one pipeline leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Identifies this leg's cursor.
    pub store_pair: StorePairId,
    /// Mapping tables, one per entity type.
    pub tables: Vec<MappingTable>,
}

/// Configuration for the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Entity type synced by this pipeline.
    pub entity_type: EntityType,
    /// Maximum concurrent upserts per stage.
    pub concurrency: usize,
    pub source_to_intermediate: StageConfig,
    pub intermediate_to_target: StageConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            entity_type: EntityType::new("product"),
            concurrency: DEFAULT_CONCURRENCY,
            source_to_intermediate: StageConfig {
                store_pair: StorePairId::between("source", "intermediate"),
                tables: vec![presets::products_to_pages()],
            },
            intermediate_to_target: StageConfig {
                store_pair: StorePairId::between("intermediate", "target"),
                tables: vec![presets::pages_to_invoicing()],
            },
        }
    }
}

/// Cursors handed into a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCursors {
    pub source_to_intermediate: ChangeCursor,
    pub intermediate_to_target: ChangeCursor,
}

impl RunCursors {
    /// Beginning-of-time cursors for both legs of `config`.
    pub fn beginning(config: &OrchestratorConfig) -> Self {
        Self {
            source_to_intermediate: ChangeCursor::beginning(
                config.source_to_intermediate.store_pair.clone(),
            ),
            intermediate_to_target: ChangeCursor::beginning(
                config.intermediate_to_target.store_pair.clone(),
            ),
        }
    }
}

/// One record ready to upsert.
struct WorkItem {
    record_id: RecordId,
    last_modified: Timestamp,
    external_ref: ExternalRef,
    fields: Fields,
}

/// How a stage ended.
enum StageEnd {
    Committed(ChangeCursor),
    Cancelled(ChangeCursor),
    Failed(SyncError),
}

/// Mutable bookkeeping for a single run.
struct RunLog {
    phases: Vec<RunPhase>,
    failures: Vec<RecordFailure>,
    stages: Vec<StageReport>,
}

impl RunLog {
    fn new() -> Self {
        Self {
            phases: vec![RunPhase::Idle],
            failures: Vec::new(),
            stages: Vec::new(),
        }
    }

    fn enter(&mut self, next: RunPhase) {
        let current = self.current();
        if !current.can_transition_to(next) {
            warn!("Unexpected orchestrator transition {:?} -> {:?}", current, next);
        }
        debug!("Orchestrator phase {:?}", next);
        self.phases.push(next);
    }

    fn current(&self) -> RunPhase {
        self.phases.last().copied().unwrap_or(RunPhase::Idle)
    }
}

/// Runs source → intermediate → target syncs.
pub struct SyncOrchestrator {
    config: OrchestratorConfig,
    source: Arc<dyn RemoteStore>,
    intermediate: Arc<dyn RemoteStore>,
    target: Arc<dyn RemoteStore>,
    stage_a_mapper: FieldMapper,
    stage_b_mapper: FieldMapper,
    upserts: UpsertEngine,
}

impl SyncOrchestrator {
    /// Creates an orchestrator. Malformed mapping tables are rejected here;
    /// a missing table for the configured entity type is reported by `run`.
    pub fn new(
        config: OrchestratorConfig,
        source: Arc<dyn RemoteStore>,
        intermediate: Arc<dyn RemoteStore>,
        target: Arc<dyn RemoteStore>,
    ) -> SyncResult<Self> {
        let stage_a_mapper = FieldMapper::new(config.source_to_intermediate.tables.clone())?;
        let stage_b_mapper = FieldMapper::new(config.intermediate_to_target.tables.clone())?;
        Ok(Self {
            config,
            source,
            intermediate,
            target,
            stage_a_mapper,
            stage_b_mapper,
            upserts: UpsertEngine::new(),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Checks that both legs can map the configured entity type and that
    /// the given cursors belong to this pipeline. Makes no remote calls.
    pub fn validate(&self, cursors: &RunCursors) -> SyncResult<()> {
        let entity_type = &self.config.entity_type;
        self.stage_a_mapper
            .check_ready(entity_type, self.intermediate.external_ref_field())?;
        self.stage_b_mapper
            .check_ready(entity_type, self.target.external_ref_field())?;

        if cursors.source_to_intermediate.store_pair != self.config.source_to_intermediate.store_pair
        {
            return Err(SyncError::Config(format!(
                "cursor for '{}' passed to stage '{}'",
                cursors.source_to_intermediate.store_pair,
                self.config.source_to_intermediate.store_pair
            )));
        }
        if cursors.intermediate_to_target.store_pair != self.config.intermediate_to_target.store_pair
        {
            return Err(SyncError::Config(format!(
                "cursor for '{}' passed to stage '{}'",
                cursors.intermediate_to_target.store_pair,
                self.config.intermediate_to_target.store_pair
            )));
        }
        Ok(())
    }

    /// Loads both cursors from `store`, runs, and saves the cursor of every
    /// stage that committed.
    ///
    /// Only a failed load is returned as `Err`. Every committed cursor is
    /// saved even if an earlier save fails; the first save failure turns an
    /// otherwise successful or cancelled outcome into `Failed` with kind
    /// `Storage`, and the summary is still returned.
    pub async fn run_with_store(
        &self,
        store: &dyn CursorStore,
        cancel: &CancellationToken,
    ) -> SyncResult<SyncSummary> {
        let cursors = RunCursors {
            source_to_intermediate: store.load(&self.config.source_to_intermediate.store_pair)?,
            intermediate_to_target: store.load(&self.config.intermediate_to_target.store_pair)?,
        };

        let mut summary = self.run(cursors, cancel).await;

        let mut save_failure: Option<(StageId, SyncError)> = None;
        for report in summary.stages.iter().filter(|r| r.committed) {
            if let Err(e) = store.save(&report.cursor_after) {
                warn!(
                    "Stage {}: failed to save cursor {} at {}: {}",
                    report.stage, report.cursor_after.store_pair, report.cursor_after.watermark, e
                );
                save_failure.get_or_insert((report.stage, e));
            }
        }

        if let Some((stage, e)) = save_failure
            && !matches!(summary.outcome, RunOutcome::Failed { .. })
        {
            summary.outcome = RunOutcome::Failed {
                stage: Some(stage),
                kind: e.kind(),
                message: e.to_string(),
            };
        }
        Ok(summary)
    }

    /// Executes one run. Always returns a summary; fatal errors are reported
    /// in `outcome` with the failing stage's cursor left unchanged.
    pub async fn run(&self, cursors: RunCursors, cancel: &CancellationToken) -> SyncSummary {
        let run_id = Uuid::now_v7();
        let started_at = Timestamp::now();
        let mut log = RunLog::new();
        let mut cursor_a = cursors.source_to_intermediate.clone();
        let mut cursor_b = cursors.intermediate_to_target.clone();

        info!("Sync run {} starting for '{}'", run_id, self.config.entity_type);

        let outcome = 'run: {
            if let Err(e) = self.validate(&cursors) {
                warn!("Sync run {} rejected before start: {}", run_id, e);
                log.enter(RunPhase::Failed);
                break 'run RunOutcome::Failed {
                    stage: None,
                    kind: e.kind(),
                    message: e.to_string(),
                };
            }

            if cancel.is_cancelled() {
                log.enter(RunPhase::Cancelled);
                break 'run RunOutcome::Cancelled;
            }

            let legs = [
                (
                    StageId::SourceToIntermediate,
                    &self.source,
                    &self.intermediate,
                    &self.stage_a_mapper,
                ),
                (
                    StageId::IntermediateToTarget,
                    &self.intermediate,
                    &self.target,
                    &self.stage_b_mapper,
                ),
            ];

            for (stage, from, to, mapper) in legs {
                let cursor = match stage {
                    StageId::SourceToIntermediate => &mut cursor_a,
                    StageId::IntermediateToTarget => &mut cursor_b,
                };

                match self
                    .run_stage(stage, from.as_ref(), to.as_ref(), mapper, cursor, cancel, &mut log)
                    .await
                {
                    StageEnd::Committed(next) => {
                        *cursor = next;
                    }
                    StageEnd::Cancelled(next) => {
                        *cursor = next;
                        log.enter(RunPhase::Cancelled);
                        break 'run RunOutcome::Cancelled;
                    }
                    StageEnd::Failed(e) => {
                        warn!("Stage {} failed: {}", stage, e);
                        log.enter(RunPhase::Failed);
                        break 'run RunOutcome::Failed {
                            stage: Some(stage),
                            kind: e.kind(),
                            message: e.to_string(),
                        };
                    }
                }

                if stage == StageId::SourceToIntermediate && cancel.is_cancelled() {
                    log.enter(RunPhase::Cancelled);
                    break 'run RunOutcome::Cancelled;
                }
            }

            log.enter(RunPhase::Done);
            RunOutcome::Done
        };

        let created_count = log.stages.iter().map(|s| s.created).sum();
        let updated_count = log.stages.iter().map(|s| s.updated).sum();
        let skipped_count = log.stages.iter().map(|s| s.skipped).sum();
        let processed_count = log.stages.iter().map(StageReport::processed).sum();

        info!(
            "Sync run {} finished: {:?} (processed {}, created {}, updated {}, skipped {})",
            run_id, outcome, processed_count, created_count, updated_count, skipped_count
        );

        SyncSummary {
            run_id,
            started_at,
            finished_at: Timestamp::now(),
            outcome,
            processed_count,
            created_count,
            updated_count,
            skipped_count,
            new_cursor_a: cursor_a,
            new_cursor_b: cursor_b,
            failures: log.failures,
            stages: log.stages,
            phases: log.phases,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_stage(
        &self,
        stage: StageId,
        from: &dyn RemoteStore,
        to: &dyn RemoteStore,
        mapper: &FieldMapper,
        cursor: &ChangeCursor,
        cancel: &CancellationToken,
        log: &mut RunLog,
    ) -> StageEnd {
        let entity_type = &self.config.entity_type;
        let mut report = StageReport::new(stage, cursor);

        // ── Listing ──────────────────────────────────────────────
        log.enter(RunPhase::stage(stage, StagePhase::Listing));
        info!(
            "Stage {}: listing {} changed in {} since {}",
            stage,
            entity_type,
            from.system(),
            cursor.watermark
        );

        let listed = async {
            from.authenticate().await?;
            to.authenticate().await?;
            from.list_changed_since(entity_type, cursor).await
        }
        .await;

        let records = match listed {
            Ok(records) => records,
            Err(e) => {
                log.stages.push(report);
                return StageEnd::Failed(e);
            }
        };
        report.listed = records.len();

        if records.is_empty() {
            info!("Stage {}: nothing changed", stage);
            log.enter(RunPhase::stage(stage, StagePhase::Committed));
            report.committed = true;
            log.stages.push(report);
            return StageEnd::Committed(cursor.clone());
        }

        // ── Mapping ──────────────────────────────────────────────
        log.enter(RunPhase::stage(stage, StagePhase::Mapping));
        let mut tracker = WatermarkTracker::new();
        let mut work = Vec::with_capacity(records.len());

        for record in records {
            let mapped = ExternalRef::new(from.system(), record.id.clone())
                .map_err(SyncError::from)
                .and_then(|external_ref| {
                    mapper
                        .map(entity_type, &record.fields)
                        .map(|fields| (external_ref, fields))
                });

            match mapped {
                Ok((external_ref, fields)) => work.push(WorkItem {
                    record_id: record.id,
                    last_modified: record.last_modified,
                    external_ref,
                    fields,
                }),
                Err(e) => {
                    warn!("Stage {}: skipping {}: {}", stage, record.id, e);
                    tracker.record_pending(record.last_modified);
                    report.skipped += 1;
                    log.failures.push(RecordFailure {
                        stage,
                        external_id: record.id,
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                }
            }
        }

        // ── Upserting ────────────────────────────────────────────
        log.enter(RunPhase::stage(stage, StagePhase::Upserting));
        let abort = cancel.child_token();
        let results: Vec<(RecordId, Timestamp, Option<SyncResult<UpsertOutcome>>)> =
            stream::iter(work)
                .map(|item| self.upsert_one(to, entity_type, item, &abort))
                .buffer_unordered(self.config.concurrency.max(1))
                .collect()
                .await;

        let mut fatal: Option<SyncError> = None;
        for (record_id, last_modified, result) in results {
            match result {
                None => {
                    tracker.record_pending(last_modified);
                    report.unprocessed += 1;
                }
                Some(Ok(outcome)) => {
                    tracker.record_success(last_modified);
                    match outcome.action {
                        UpsertAction::Created => report.created += 1,
                        UpsertAction::Updated => report.updated += 1,
                    }
                }
                Some(Err(e)) if e.is_fatal() => {
                    tracker.record_pending(last_modified);
                    report.unprocessed += 1;
                    if fatal.is_none() {
                        fatal = Some(e);
                    }
                }
                Some(Err(e)) => {
                    warn!("Stage {}: upsert of {} failed: {}", stage, record_id, e);
                    tracker.record_pending(last_modified);
                    report.skipped += 1;
                    log.failures.push(RecordFailure {
                        stage,
                        external_id: record_id,
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Stage {}: created {}, updated {}, skipped {}, unprocessed {}",
            stage, report.created, report.updated, report.skipped, report.unprocessed
        );

        if let Some(e) = fatal {
            log.stages.push(report);
            return StageEnd::Failed(e);
        }

        // ── Committed ────────────────────────────────────────────
        let next = tracker.advance(cursor);
        log.enter(RunPhase::stage(stage, StagePhase::Committed));
        report.committed = true;
        report.cursor_after = next.clone();
        let interrupted = report.unprocessed > 0;
        log.stages.push(report);

        if interrupted && cancel.is_cancelled() {
            info!("Stage {}: cancelled, cursor at {}", stage, next.watermark);
            StageEnd::Cancelled(next)
        } else {
            StageEnd::Committed(next)
        }
    }

    async fn upsert_one(
        &self,
        to: &dyn RemoteStore,
        entity_type: &EntityType,
        item: WorkItem,
        abort: &CancellationToken,
    ) -> (RecordId, Timestamp, Option<SyncResult<UpsertOutcome>>) {
        if abort.is_cancelled() {
            return (item.record_id, item.last_modified, None);
        }

        let result = self
            .upserts
            .upsert(to, entity_type, item.fields, &item.external_ref)
            .await;

        if let Err(e) = &result
            && e.is_fatal()
        {
            abort.cancel();
        }
        (item.record_id, item.last_modified, Some(result))
    }
}
