//! Request-level operations over the store and the formula pipeline
//!
//! Every call builds its own [`Solver`], so concurrent requests never share
//! resolution state. The write path is not transactional: two concurrent
//! writes along the same dependency chain may both pass validation.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::graph::{DependencyGraph, WriteOutcome};
use super::solver::Solver;
use crate::error::{StoreError, StoreResult};
use crate::external::ExternalRef;
use crate::store::{guarded, topic, CellStore, MessageStream, SUBSCRIPTION_COUNTER};
use crate::types::{canonical, CellResponse, SheetResponse, SubscriptionRecord};

#[derive(Clone)]
pub struct SheetEngine {
    store: Arc<dyn CellStore>,
    external: Arc<dyn ExternalRef>,
}

impl SheetEngine {
    pub fn new(store: Arc<dyn CellStore>, external: Arc<dyn ExternalRef>) -> Self {
        Self { store, external }
    }

    pub fn store(&self) -> &Arc<dyn CellStore> {
        &self.store
    }

    /// Fresh resolution session for one request
    pub fn solver(&self, sheet_id: &str, cancel: &CancellationToken) -> Solver {
        Solver::new(
            self.store.clone(),
            self.external.clone(),
            sheet_id,
            cancel.clone(),
        )
    }

    pub async fn get_cell(
        &self,
        sheet_id: &str,
        cell_id: &str,
        cancel: &CancellationToken,
    ) -> StoreResult<CellResponse> {
        let resolution = self.solver(sheet_id, cancel).resolve(cell_id).await?;
        Ok(resolution.into())
    }

    /// Resolve every cell of a sheet after a single bulk fetch
    pub async fn get_sheet(
        &self,
        sheet_id: &str,
        cancel: &CancellationToken,
    ) -> StoreResult<SheetResponse> {
        let sheet_id = canonical(sheet_id);
        if !guarded(cancel, self.store.sheet_exists(&sheet_id)).await? {
            return Err(StoreError::not_found(sheet_id));
        }

        let mut solver = self.solver(&sheet_id, cancel);
        let cell_ids = solver.preload().await?;

        let mut sheet = SheetResponse::new();
        for cell_id in cell_ids {
            let resolution = solver.resolve(&cell_id).await?;
            sheet.insert(cell_id, resolution.into());
        }

        debug!(sheet = %sheet_id, cells = sheet.len(), "sheet resolved");
        Ok(sheet)
    }

    pub async fn upsert(
        &self,
        sheet_id: &str,
        cell_id: &str,
        value: &str,
        cancel: &CancellationToken,
    ) -> StoreResult<WriteOutcome> {
        let graph = DependencyGraph::new(self.store.clone(), sheet_id, cancel.clone());
        let mut solver = self.solver(sheet_id, cancel);
        graph.upsert(&mut solver, cell_id, value).await
    }

    /// Allocate a subscription id (hex of an atomic counter) watching one cell
    pub async fn create_subscription(
        &self,
        sheet_id: &str,
        cell_id: &str,
        cancel: &CancellationToken,
    ) -> StoreResult<String> {
        let counter = guarded(cancel, self.store.increment(SUBSCRIPTION_COUNTER)).await?;
        let subscription_id = format!("{:x}", counter);
        let record = SubscriptionRecord::new(sheet_id, cell_id);

        guarded(
            cancel,
            self.store.set_subscription(&subscription_id, &record),
        )
        .await?;

        info!(
            subscription = %subscription_id,
            sheet = %record.sheet_id,
            cell = %record.cell_id,
            "subscription created"
        );
        Ok(subscription_id)
    }

    /// Start listening for changes of the subscribed cell.
    ///
    /// Fails with `UnknownSubscription` for ids never handed out.
    pub async fn open_subscription(
        &self,
        subscription_id: &str,
        cancel: &CancellationToken,
    ) -> StoreResult<CellSubscription> {
        let record = guarded(cancel, self.store.get_subscription(subscription_id)).await?;
        let messages = guarded(
            cancel,
            self.store.subscribe(&topic(&record.sheet_id, &record.cell_id)),
        )
        .await?;

        info!(subscription = %subscription_id, "subscription opened");
        Ok(CellSubscription {
            engine: self.clone(),
            record,
            messages,
            cancel: cancel.clone(),
        })
    }
}

/// Live feed of one cell's resolved value
pub struct CellSubscription {
    engine: SheetEngine,
    record: SubscriptionRecord,
    messages: Box<dyn MessageStream>,
    cancel: CancellationToken,
}

impl CellSubscription {
    pub fn record(&self) -> &SubscriptionRecord {
        &self.record
    }

    /// Wait for the next change notification, then resolve the cell afresh.
    ///
    /// Errors end the feed; there is no reconnect.
    pub async fn next_update(&mut self) -> StoreResult<CellResponse> {
        guarded(&self.cancel, self.messages.next_message()).await?;
        self.engine
            .get_cell(&self.record.sheet_id, &self.record.cell_id, &self.cancel)
            .await
    }
}
