// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Differential synchronization of the roster against the warehouse.
//!
//! Every run recomputes the desired roster from its source document and
//! diffs it against the warehouse's current rows. The plan is the exact
//! symmetric difference keyed by the full `(group, username)` pair. Deletes
//! run before inserts; a delete rejected by the streaming-buffer consistency
//! restriction is deferred to the next run instead of failing the sync.

use std::collections::BTreeSet;

use octocrab::Octocrab;
use tracing::{debug, info, warn};

use crate::{
    config::RunConfig,
    error::Error,
    roster::{self, RosterEntry},
    warehouse::{RosterStore, WarehouseError}
};

/// Edits that turn the observed roster into the desired one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    /// Entries present in the desired roster but absent from the warehouse.
    pub to_insert: Vec<RosterEntry>,
    /// Entries present in the warehouse but absent from the desired roster.
    pub to_delete: Vec<RosterEntry>
}

impl SyncPlan {
    /// Whether the plan changes nothing.
    pub fn is_noop(&self) -> bool {
        self.to_insert.is_empty() && self.to_delete.is_empty()
    }
}

/// Counts of the edits an applied plan performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncOutcome {
    pub inserted:        usize,
    pub deleted:         usize,
    /// Deletes deferred because the affected rows were still settling.
    pub skipped_deletes: usize
}

/// Computes the set-difference plan between the desired and observed
/// rosters.
///
/// Both directions of the difference are ordered, so plans are
/// deterministic for a given pair of inputs.
pub fn plan_roster_sync(
    desired: &BTreeSet<RosterEntry>,
    observed: &BTreeSet<RosterEntry>,
) -> SyncPlan {
    SyncPlan {
        to_insert: desired.difference(observed).cloned().collect(),
        to_delete: observed.difference(desired).cloned().collect()
    }
}

/// Applies a plan to the roster table: deletes first, then one batched
/// insert.
///
/// A delete hitting the consistency restriction is logged and counted as
/// skipped; the entry remains until a later run retries it. An empty plan is
/// logged as a no-op.
///
/// # Errors
///
/// Any store failure other than the consistency restriction aborts the
/// sync.
pub async fn apply_roster_sync<W: RosterStore>(
    store: &W,
    table: &str,
    plan: &SyncPlan,
) -> Result<SyncOutcome, Error> {
    if plan.is_noop() {
        info!("Roster already in sync, nothing to apply");
        return Ok(SyncOutcome::default());
    }

    let mut outcome = SyncOutcome::default();

    for entry in &plan.to_delete {
        match store.delete_roster_entry(table, entry).await {
            Ok(()) => {
                debug!("Deleted roster entry {}", entry);
                outcome.deleted += 1;
            }
            Err(WarehouseError::ConsistencyRestriction {
                detail
            }) => {
                info!("Delete of {} deferred to the next run: {}", entry, detail);
                outcome.skipped_deletes += 1;
            }
            Err(error) => return Err(error.into())
        }
    }

    if !plan.to_insert.is_empty() {
        store.insert_roster_entries(table, &plan.to_insert).await?;
        outcome.inserted = plan.to_insert.len();
    }

    info!(
        "Roster sync applied: {} inserted, {} deleted, {} deletes deferred",
        outcome.inserted, outcome.deleted, outcome.skipped_deletes
    );
    Ok(outcome)
}

/// Runs the full roster phase: load, validate logins, diff, apply.
///
/// An empty roster document or an empty post-validation roster ends the
/// phase early with a warning rather than wiping the warehouse table.
///
/// # Errors
///
/// Propagates loader, lookup and store failures.
pub async fn sync_roster<W: RosterStore>(
    octocrab: &Octocrab,
    store: &W,
    config: &RunConfig,
) -> Result<SyncOutcome, Error> {
    let Some(path) = config.roster.path.as_deref() else {
        return Err(Error::validation("roster.path is required when roster sync is enabled"));
    };

    let entries = roster::load_roster(path)?;
    if entries.is_empty() {
        warn!("No roster entries found in {}", path.display());
        return Ok(SyncOutcome::default());
    }

    let desired = roster::filter_known_logins(octocrab, entries).await?;
    if desired.is_empty() {
        warn!("No roster entries left after login validation");
        return Ok(SyncOutcome::default());
    }

    let observed = store.fetch_roster(&config.roster.table).await?;
    let plan = plan_roster_sync(&desired, &observed);
    apply_roster_sync(store, &config.roster.table, &plan).await
}
