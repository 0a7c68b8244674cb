//! Dependency graph maintenance and the write path
//!
//! Edges point from a referenced cell to the cells whose formulas mention it
//! (`B -> {A}` when A's formula contains `B`). They are stored as one set per
//! `sheet/cell` key and drive both write validation and change notification.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::formula::{find_all_identifiers, formula_body, ERROR_RESULT};
use super::solver::Solver;
use crate::error::{FormulaError, StoreResult};
use crate::store::{guarded, topic, CellStore};
use crate::types::{canonical, CellResponse};

/// Result of a write request
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// Value persisted, edges updated, dependents notified
    Committed(CellResponse),
    /// Nothing persisted; the response carries the `ERROR` result and reason
    Rejected(CellResponse),
}

impl WriteOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, WriteOutcome::Committed(_))
    }

    pub fn response(&self) -> &CellResponse {
        match self {
            WriteOutcome::Committed(response) | WriteOutcome::Rejected(response) => response,
        }
    }

    pub fn into_response(self) -> CellResponse {
        match self {
            WriteOutcome::Committed(response) | WriteOutcome::Rejected(response) => response,
        }
    }
}

/// Cells a value refers to, by lexical scan of the formula text.
///
/// Over-approximates: function names are identifier-shaped too and end up in
/// the set. Literals refer to nothing. Self-references are dropped.
pub fn references(cell_id: &str, value: &str) -> BTreeSet<String> {
    let Some(body) = formula_body(value) else {
        return BTreeSet::new();
    };
    let cell_id = canonical(cell_id);

    find_all_identifiers(body)
        .iter()
        .map(|name| canonical(name))
        .filter(|name| *name != cell_id)
        .collect()
}

/// Dependents graph of one sheet
pub struct DependencyGraph {
    store: Arc<dyn CellStore>,
    sheet_id: String,
    cancel: CancellationToken,
}

impl DependencyGraph {
    pub fn new(store: Arc<dyn CellStore>, sheet_id: &str, cancel: CancellationToken) -> Self {
        Self {
            store,
            sheet_id: canonical(sheet_id),
            cancel,
        }
    }

    async fn dependents(&self, cell_id: &str) -> StoreResult<BTreeSet<String>> {
        guarded(
            &self.cancel,
            self.store.get_dependents(&self.sheet_id, cell_id),
        )
        .await
    }

    /// Validate, persist and propagate a new value for `cell_id`.
    ///
    /// The candidate is resolved with the override in place, then every
    /// transitive dependent is re-resolved through the same session. Any soft
    /// formula error rejects the write before anything is stored.
    pub async fn upsert(
        &self,
        solver: &mut Solver,
        cell_id: &str,
        value: &str,
    ) -> StoreResult<WriteOutcome> {
        let cell_id = canonical(cell_id);
        solver.set_cell(&cell_id, value);

        let resolution = solver.resolve(&cell_id).await?;
        if let Some(err) = &resolution.error {
            warn!(sheet = %self.sheet_id, cell = %cell_id, error = %err, "write rejected");
            return Ok(WriteOutcome::Rejected(resolution.into()));
        }

        if let Some(err) = self.validate_dependents(solver, &cell_id).await? {
            warn!(sheet = %self.sheet_id, cell = %cell_id, error = %err, "write rejected");
            let response =
                CellResponse::new(value, ERROR_RESULT).with_error(err.to_string());
            return Ok(WriteOutcome::Rejected(response));
        }

        self.commit(&cell_id, value).await?;
        info!(sheet = %self.sheet_id, cell = %cell_id, "cell updated");

        match self.notify(&cell_id).await {
            Ok(notified) => debug!(sheet = %self.sheet_id, cell = %cell_id, notified, "notified"),
            Err(err) => {
                warn!(sheet = %self.sheet_id, cell = %cell_id, error = %err, "notification failed")
            }
        }

        Ok(WriteOutcome::Committed(resolution.into()))
    }

    /// Depth-first re-resolution of every transitive dependent of `cell_id`.
    /// Returns the first failure found.
    pub async fn validate_dependents(
        &self,
        solver: &mut Solver,
        cell_id: &str,
    ) -> StoreResult<Option<FormulaError>> {
        let mut visited = HashSet::from([cell_id.to_string()]);
        let mut stack: Vec<String> = self.dependents(cell_id).await?.into_iter().rev().collect();

        while let Some(dependent) = stack.pop() {
            if !visited.insert(dependent.clone()) {
                continue;
            }

            let resolution = match solver.resolve(&dependent).await {
                Ok(resolution) => resolution,
                Err(err) if err.is_not_found() => {
                    debug!(sheet = %self.sheet_id, cell = %dependent, "stale dependents edge");
                    continue;
                }
                Err(err) => return Err(err),
            };

            if let Some(source) = resolution.error {
                return Ok(Some(FormulaError::BrokenDependent {
                    cell: dependent,
                    source: Box::new(source),
                }));
            }

            let next = self.dependents(&dependent).await?;
            stack.extend(next.into_iter().rev());
        }

        Ok(None)
    }

    /// Persist the value and bring the edges in line with its references.
    /// Edges the previous value had and the new one lacks are removed.
    pub async fn commit(&self, cell_id: &str, value: &str) -> StoreResult<()> {
        let previous = match guarded(&self.cancel, self.store.get_cell(&self.sheet_id, cell_id))
            .await
        {
            Ok(previous) => Some(previous),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err),
        };

        guarded(
            &self.cancel,
            self.store.set_cell(&self.sheet_id, cell_id, value),
        )
        .await?;

        let old_refs = previous
            .map(|previous| references(cell_id, &previous))
            .unwrap_or_default();
        let new_refs = references(cell_id, value);
        let edge = [cell_id.to_string()];

        for stale in old_refs.difference(&new_refs) {
            guarded(
                &self.cancel,
                self.store.remove_dependents(&self.sheet_id, stale, &edge),
            )
            .await?;
        }
        for referenced in &new_refs {
            guarded(
                &self.cancel,
                self.store.add_dependents(&self.sheet_id, referenced, &edge),
            )
            .await?;
        }

        debug!(
            sheet = %self.sheet_id,
            cell = %cell_id,
            references = new_refs.len(),
            "dependents edges updated"
        );
        Ok(())
    }

    /// Publish a change event for `cell_id` and each transitive dependent,
    /// each cell at most once. Returns the number of cells notified.
    pub async fn notify(&self, cell_id: &str) -> StoreResult<usize> {
        let mut visited = HashSet::new();
        let mut stack = vec![cell_id.to_string()];

        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }

            guarded(
                &self.cancel,
                self.store.publish(&topic(&self.sheet_id, &current), &current),
            )
            .await?;

            let next = self.dependents(&current).await?;
            stack.extend(next.into_iter().rev());
        }

        Ok(visited.len())
    }
}
