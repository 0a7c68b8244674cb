//! Backing store collaborator
//!
//! Cells live in one hash per sheet, dependents edges in one set per
//! `sheet/cell` key, subscriptions in records keyed by a counter-allocated id,
//! and change notifications travel over per-cell pub/sub topics.
//!
//! Every operation is atomic on its own. Nothing here offers a transaction
//! spanning several operations.

mod memory;

pub use memory::MemoryStore;

use std::collections::{BTreeSet, HashMap};
use std::future::Future;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{StoreError, StoreResult};
use crate::types::SubscriptionRecord;

/// Counter that allocates subscription ids
pub const SUBSCRIPTION_COUNTER: &str = "subscription:counter";

/// Key of the set holding the dependents of `cell_id`
pub fn dependents_key(sheet_id: &str, cell_id: &str) -> String {
    format!("{}/{}", sheet_id, cell_id)
}

pub fn subscription_key(subscription_id: &str) -> String {
    format!("subscription:{}", subscription_id)
}

/// Pub/sub topic carrying change notifications for one cell
pub fn topic(sheet_id: &str, cell_id: &str) -> String {
    format!("pubsub:{}/{}", sheet_id, cell_id)
}

/// Operations the engine needs from storage. Ids arrive already lowercased.
#[async_trait]
pub trait CellStore: Send + Sync {
    /// Raw text of a cell; `NotFound` when the cell was never written
    async fn get_cell(&self, sheet_id: &str, cell_id: &str) -> StoreResult<String>;

    async fn set_cell(&self, sheet_id: &str, cell_id: &str, value: &str) -> StoreResult<()>;

    /// All raw cell values of a sheet (empty for an unknown sheet)
    async fn get_all_cells(&self, sheet_id: &str) -> StoreResult<HashMap<String, String>>;

    async fn sheet_exists(&self, sheet_id: &str) -> StoreResult<bool>;

    /// Cells whose formulas mention `cell_id`
    async fn get_dependents(&self, sheet_id: &str, cell_id: &str)
        -> StoreResult<BTreeSet<String>>;

    async fn add_dependents(
        &self,
        sheet_id: &str,
        cell_id: &str,
        dependents: &[String],
    ) -> StoreResult<()>;

    async fn remove_dependents(
        &self,
        sheet_id: &str,
        cell_id: &str,
        dependents: &[String],
    ) -> StoreResult<()>;

    /// Atomically increment a counter and return the new value
    async fn increment(&self, key: &str) -> StoreResult<u64>;

    /// `UnknownSubscription` when no record exists for the id
    async fn get_subscription(&self, subscription_id: &str) -> StoreResult<SubscriptionRecord>;

    async fn set_subscription(
        &self,
        subscription_id: &str,
        record: &SubscriptionRecord,
    ) -> StoreResult<()>;

    async fn publish(&self, topic: &str, message: &str) -> StoreResult<()>;

    async fn subscribe(&self, topic: &str) -> StoreResult<Box<dyn MessageStream>>;
}

/// Receiving end of a topic subscription
#[async_trait]
pub trait MessageStream: Send {
    /// Suspend until the next message is published on the topic
    async fn next_message(&mut self) -> StoreResult<String>;
}

/// Run a store call unless `cancel` fires first
pub async fn guarded<T, F>(cancel: &CancellationToken, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StoreError::Cancelled),
        result = fut => result,
    }
}
