//! Per-request cell resolution
//!
//! A [`Solver`] lives for exactly one read or write request. It owns the
//! override map (uncommitted values and values already fetched from the
//! store), the result cache and the in-progress set used for cycle detection.
//! Nothing is shared between requests, so nothing ever needs invalidating.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::formula::{evaluate, formula_body, parse_expr, CellResolver, ERROR_RESULT};
use crate::error::{EvalError, EvalResult, FormulaError, ResolveError, StoreError, StoreResult};
use crate::external::{ExternalError, ExternalRef};
use crate::store::{guarded, CellStore};
use crate::types::{canonical, CellResponse};

/// Bound on formula nesting summed over the resolution stack. Each formula on
/// the stack costs its expression height plus one.
pub const MAX_EVALUATION_DEPTH: usize = 512;

/// Outcome of resolving one cell
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Raw cell text, unchanged
    pub value: String,
    /// Computed result, `ERROR` when `error` is set
    pub result: String,
    pub error: Option<FormulaError>,
}

impl Resolution {
    fn computed(value: String, result: String) -> Self {
        Self {
            value,
            result,
            error: None,
        }
    }

    fn failed(value: String, error: FormulaError) -> Self {
        Self {
            value,
            result: ERROR_RESULT.to_string(),
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

impl From<Resolution> for CellResponse {
    fn from(resolution: Resolution) -> Self {
        CellResponse {
            value: resolution.value,
            result: resolution.result,
            error: resolution.error.map(|e| e.to_string()),
        }
    }
}

pub struct Solver {
    store: Arc<dyn CellStore>,
    external: Arc<dyn ExternalRef>,
    sheet_id: String,
    cancel: CancellationToken,
    /// Raw values consulted before the store
    values: HashMap<String, String>,
    /// Results of formulas computed successfully in this session
    cache: HashMap<String, String>,
    /// Current resolution stack
    in_progress: HashSet<String>,
    /// Nesting spent by the formulas on the stack
    nesting: usize,
}

impl Solver {
    pub fn new(
        store: Arc<dyn CellStore>,
        external: Arc<dyn ExternalRef>,
        sheet_id: &str,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            external,
            sheet_id: canonical(sheet_id),
            cancel,
            values: HashMap::new(),
            cache: HashMap::new(),
            in_progress: HashSet::new(),
            nesting: 0,
        }
    }

    pub fn sheet_id(&self) -> &str {
        &self.sheet_id
    }

    /// Override a cell's raw value for this session only
    pub fn set_cell(&mut self, cell_id: &str, value: &str) {
        let cell_id = canonical(cell_id);
        self.cache.remove(&cell_id);
        self.values.insert(cell_id, value.to_string());
    }

    /// Seed the override map with every stored cell in one round trip and
    /// return the stored cell ids, sorted. Existing overrides win.
    pub async fn preload(&mut self) -> StoreResult<Vec<String>> {
        let cells = guarded(&self.cancel, self.store.get_all_cells(&self.sheet_id)).await?;
        debug!(sheet = %self.sheet_id, cells = cells.len(), "preloaded sheet");

        let mut cell_ids = Vec::with_capacity(cells.len());
        for (cell_id, value) in cells {
            let cell_id = canonical(&cell_id);
            self.values.entry(cell_id.clone()).or_insert(value);
            cell_ids.push(cell_id);
        }
        cell_ids.sort();
        Ok(cell_ids)
    }

    /// Resolve a cell.
    ///
    /// Formula problems (parse, evaluation, cycle) come back inside the
    /// [`Resolution`]; only store failures are returned as `Err`, including
    /// `NotFound` when the cell itself does not exist.
    pub async fn resolve(&mut self, cell_id: &str) -> StoreResult<Resolution> {
        let cell_id = canonical(cell_id);
        let value = self.raw_value(&cell_id).await?;

        let Some(body) = formula_body(&value) else {
            return Ok(Resolution::computed(value.clone(), value));
        };

        if let Some(result) = self.cache.get(&cell_id) {
            return Ok(Resolution::computed(value.clone(), result.clone()));
        }

        if self.in_progress.contains(&cell_id) {
            debug!(sheet = %self.sheet_id, cell = %cell_id, "cycle detected");
            return Ok(Resolution::failed(value.clone(), FormulaError::Cycle(cell_id)));
        }

        let expr = match parse_expr(body) {
            Ok(expr) => expr,
            Err(err) => return Ok(Resolution::failed(value.clone(), err.into())),
        };

        let cost = expr.height() + 1;
        if self.nesting + cost > MAX_EVALUATION_DEPTH {
            debug!(sheet = %self.sheet_id, cell = %cell_id, "resolution too deep");
            let err = EvalError::DepthExceeded(MAX_EVALUATION_DEPTH);
            return Ok(Resolution::failed(value.clone(), err.into()));
        }

        debug!(sheet = %self.sheet_id, cell = %cell_id, "evaluating formula");
        self.in_progress.insert(cell_id.clone());
        self.nesting += cost;
        let outcome = evaluate(&expr, self).await;
        self.nesting -= cost;
        self.in_progress.remove(&cell_id);

        match outcome {
            Ok(literal) => {
                self.cache.insert(cell_id, literal.text.clone());
                Ok(Resolution::computed(value, literal.text))
            }
            Err(ResolveError::Formula(err)) => {
                debug!(sheet = %self.sheet_id, cell = %cell_id, error = %err, "formula failed");
                Ok(Resolution::failed(value, err))
            }
            Err(ResolveError::Store(err)) => Err(err),
        }
    }

    async fn raw_value(&mut self, cell_id: &str) -> StoreResult<String> {
        if let Some(value) = self.values.get(cell_id) {
            return Ok(value.clone());
        }

        let value = guarded(&self.cancel, self.store.get_cell(&self.sheet_id, cell_id)).await?;
        self.values.insert(cell_id.to_string(), value.clone());
        Ok(value)
    }
}

#[async_trait]
impl CellResolver for Solver {
    async fn resolve_reference(&mut self, cell_id: &str) -> EvalResult<String> {
        match self.resolve(cell_id).await {
            Ok(Resolution {
                error: Some(err), ..
            }) => Err(err.into()),
            Ok(resolution) => Ok(resolution.result),
            Err(err) if err.is_not_found() => {
                Err(EvalError::UnknownCell(canonical(cell_id)).into())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn fetch_external(&mut self, locator: &str) -> EvalResult<String> {
        match self.external.fetch_result(locator, &self.cancel).await {
            Ok(result) => Ok(result),
            Err(ExternalError::Cancelled) => Err(StoreError::Cancelled.into()),
            Err(err) => Err(EvalError::External(err.to_string()).into()),
        }
    }
}
