//! Edit-session lifecycle and the save pipeline.
//!
//! The snapshot lifecycle is an owned state machine: `Loaded`, then
//! `Editing` holding an immutable original plus the working copy, then
//! `Committing` while a save runs. `begin_edit` takes an independent deep
//! copy, so background refreshes of the base snapshot can never retroactively
//! alter what counts as "original" mid-edit.
//!
//! A save runs detect → validate → build log → merge → queue audit → reload
//! as result-returning stages, short-circuiting on the first typed failure.
//! Validation failures return the complete violation list; store failures are
//! logged with full detail for operators and surfaced generically. Nothing is
//! retried automatically and a failed save leaves the in-memory snapshots
//! untouched, so the whole save is safe to retry.

use anyhow::{Context, Result};
use log::{error, info};
use thiserror::Error;

use crate::{
    catalog::SchemaCatalog,
    changelog::build_change_log,
    diff::{ShapeMismatch, detect_changes},
    merge::{WritebackConfig, log_pending_changes, merge_changes},
    snapshot::Snapshot,
    store::TabularStore,
    tags::{TagRegistry, annotate},
    validate::validate_changes,
};

#[derive(Debug, Error)]
pub enum SaveError {
    #[error(transparent)]
    Shape(#[from] ShapeMismatch),
    #[error("validation failed with {} violation(s); save aborted", .0.len())]
    Validation(Vec<String>),
    #[error("save failed; see the write-back log for details")]
    Store(#[source] anyhow::Error),
    #[error("no edit in progress")]
    NotEditing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The working copy matched the original cell for cell; the store was
    /// never touched and the session stays in edit mode.
    NoChanges,
    Saved {
        cells_changed: usize,
        rows_merged: u64,
        records_queued: u64,
    },
}

enum EditState {
    Loaded,
    Editing {
        original: Snapshot,
        working: Snapshot,
    },
    Committing,
}

pub struct EditSession<S: TabularStore> {
    store: S,
    config: WritebackConfig,
    catalog: SchemaCatalog,
    base: Snapshot,
    tags: TagRegistry,
    state: EditState,
}

impl<S: TabularStore> EditSession<S> {
    /// Loads the base snapshot and tags it.
    pub fn connect(store: S, config: WritebackConfig) -> Result<Self> {
        let (base, tags) = load_base(&store, &config)?;
        Ok(EditSession {
            store,
            config,
            catalog: SchemaCatalog::default(),
            base,
            tags,
            state: EditState::Loaded,
        })
    }

    pub fn base(&self) -> &Snapshot {
        &self.base
    }

    pub fn tags(&self) -> &TagRegistry {
        &self.tags
    }

    pub fn config(&self) -> &WritebackConfig {
        &self.config
    }

    pub fn editing(&self) -> bool {
        matches!(self.state, EditState::Editing { .. })
    }

    /// Enters edit mode, deep-copying the base snapshot as the comparison
    /// baseline.
    pub fn begin_edit(&mut self) -> Result<()> {
        match self.state {
            EditState::Loaded => {
                self.state = EditState::Editing {
                    original: self.base.clone(),
                    working: self.base.clone(),
                };
                Ok(())
            }
            _ => Err(anyhow::anyhow!("an edit is already in progress")),
        }
    }

    /// The user-mutated working copy, when in edit mode.
    pub fn working_mut(&mut self) -> Option<&mut Snapshot> {
        match &mut self.state {
            EditState::Editing { working, .. } => Some(working),
            _ => None,
        }
    }

    pub fn working(&self) -> Option<&Snapshot> {
        match &self.state {
            EditState::Editing { working, .. } => Some(working),
            _ => None,
        }
    }

    /// Discards the working copy and returns to the loaded state.
    pub fn cancel_edit(&mut self) {
        if self.editing() {
            self.state = EditState::Loaded;
        }
    }

    /// Runs the save pipeline. On success the base snapshot is reloaded and
    /// the session leaves edit mode; on any failure (and on a no-change save)
    /// the edit state is preserved exactly as it was.
    pub fn save(&mut self) -> Result<SaveOutcome, SaveError> {
        let (original, working) =
            match std::mem::replace(&mut self.state, EditState::Committing) {
                EditState::Editing { original, working } => (original, working),
                other => {
                    self.state = other;
                    return Err(SaveError::NotEditing);
                }
            };

        match self.commit(&original, &working) {
            Ok(SaveOutcome::NoChanges) => {
                self.state = EditState::Editing { original, working };
                Ok(SaveOutcome::NoChanges)
            }
            Ok(outcome) => {
                self.state = EditState::Loaded;
                Ok(outcome)
            }
            Err(err) => {
                self.state = EditState::Editing { original, working };
                Err(err)
            }
        }
    }

    fn commit(
        &mut self,
        original: &Snapshot,
        working: &Snapshot,
    ) -> Result<SaveOutcome, SaveError> {
        let cells = detect_changes(
            working,
            original,
            &self.config.pk_columns,
            self.config.lock_column.as_deref(),
        )?;
        if cells.is_empty() {
            info!("No changes detected; nothing to save");
            return Ok(SaveOutcome::NoChanges);
        }

        let constraints = self
            .catalog
            .constraints(&self.store, &self.config.table)
            .map_err(|err| {
                error!("Schema metadata fetch failed: {err:#}");
                SaveError::Store(err)
            })?;
        let violations = validate_changes(&cells, &constraints);
        if !violations.is_empty() {
            return Err(SaveError::Validation(violations));
        }

        let records = build_change_log(&cells);
        let rows_merged = merge_changes(&self.store, &self.config, &cells, original)
            .map_err(|err| {
                error!("Write-back merge failed: {err:#}");
                SaveError::Store(err)
            })?;
        let records_queued = log_pending_changes(&self.store, &self.config, &records)
            .map_err(|err| {
                error!("Audit queue insert failed: {err:#}");
                SaveError::Store(err)
            })?;

        // The committed state is authoritative now; reload so the base
        // snapshot and tags reflect it.
        self.catalog.invalidate();
        let (base, tags) = load_base(&self.store, &self.config).map_err(|err| {
            error!("Reload after save failed: {err:#}");
            SaveError::Store(err)
        })?;
        self.base = base;
        self.tags = tags;

        info!(
            "Saved {} changed cell(s): {} row(s) merged, {} audit record(s) queued",
            cells.len(),
            rows_merged,
            records_queued
        );
        Ok(SaveOutcome::Saved {
            cells_changed: cells.len(),
            rows_merged,
            records_queued,
        })
    }
}

pub fn load_sql(config: &WritebackConfig) -> String {
    let order_clause = config
        .order_by
        .as_deref()
        .map(|order_by| format!(" order by {order_by}"))
        .unwrap_or_default();
    format!("select * from {}{order_clause}", config.table.qualified())
}

fn load_base<S: TabularStore>(
    store: &S,
    config: &WritebackConfig,
) -> Result<(Snapshot, TagRegistry)> {
    let raw = store
        .query(&load_sql(config))
        .with_context(|| format!("Loading {}", config.table))?;
    let (snapshot, tags) = annotate(raw.into_display_names());
    info!(
        "Loaded {} row(s), {} column(s) from {}",
        snapshot.row_count(),
        snapshot.columns().len(),
        config.table
    );
    Ok((snapshot, tags))
}
