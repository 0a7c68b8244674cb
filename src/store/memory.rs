//! In-process store backed by mutex-protected maps and broadcast channels

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use super::{dependents_key, subscription_key, CellStore, MessageStream};
use crate::error::{StoreError, StoreResult};
use crate::types::SubscriptionRecord;

const TOPIC_CAPACITY: usize = 64;

#[derive(Default)]
struct Tables {
    /// sheet id -> cell id -> raw value
    sheets: HashMap<String, HashMap<String, String>>,
    /// `sheet/cell` -> dependents
    dependents: HashMap<String, BTreeSet<String>>,
    counters: HashMap<String, u64>,
    subscriptions: HashMap<String, SubscriptionRecord>,
    topics: HashMap<String, broadcast::Sender<String>>,
}

/// Store that keeps everything in memory for the lifetime of the process
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        // A panic mid-operation leaves plain maps behind, still usable.
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CellStore for MemoryStore {
    async fn get_cell(&self, sheet_id: &str, cell_id: &str) -> StoreResult<String> {
        self.tables()
            .sheets
            .get(sheet_id)
            .and_then(|cells| cells.get(cell_id))
            .cloned()
            .ok_or_else(|| StoreError::not_found(dependents_key(sheet_id, cell_id)))
    }

    async fn set_cell(&self, sheet_id: &str, cell_id: &str, value: &str) -> StoreResult<()> {
        self.tables()
            .sheets
            .entry(sheet_id.to_string())
            .or_default()
            .insert(cell_id.to_string(), value.to_string());
        Ok(())
    }

    async fn get_all_cells(&self, sheet_id: &str) -> StoreResult<HashMap<String, String>> {
        Ok(self
            .tables()
            .sheets
            .get(sheet_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn sheet_exists(&self, sheet_id: &str) -> StoreResult<bool> {
        Ok(self
            .tables()
            .sheets
            .get(sheet_id)
            .is_some_and(|cells| !cells.is_empty()))
    }

    async fn get_dependents(
        &self,
        sheet_id: &str,
        cell_id: &str,
    ) -> StoreResult<BTreeSet<String>> {
        Ok(self
            .tables()
            .dependents
            .get(&dependents_key(sheet_id, cell_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn add_dependents(
        &self,
        sheet_id: &str,
        cell_id: &str,
        dependents: &[String],
    ) -> StoreResult<()> {
        if dependents.is_empty() {
            return Ok(());
        }
        self.tables()
            .dependents
            .entry(dependents_key(sheet_id, cell_id))
            .or_default()
            .extend(dependents.iter().cloned());
        Ok(())
    }

    async fn remove_dependents(
        &self,
        sheet_id: &str,
        cell_id: &str,
        dependents: &[String],
    ) -> StoreResult<()> {
        let key = dependents_key(sheet_id, cell_id);
        let mut tables = self.tables();
        if let Some(set) = tables.dependents.get_mut(&key) {
            for dependent in dependents {
                set.remove(dependent);
            }
            if set.is_empty() {
                tables.dependents.remove(&key);
            }
        }
        Ok(())
    }

    async fn increment(&self, key: &str) -> StoreResult<u64> {
        let mut tables = self.tables();
        let counter = tables.counters.entry(key.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn get_subscription(&self, subscription_id: &str) -> StoreResult<SubscriptionRecord> {
        self.tables()
            .subscriptions
            .get(&subscription_key(subscription_id))
            .cloned()
            .ok_or_else(|| StoreError::UnknownSubscription(subscription_id.to_string()))
    }

    async fn set_subscription(
        &self,
        subscription_id: &str,
        record: &SubscriptionRecord,
    ) -> StoreResult<()> {
        self.tables()
            .subscriptions
            .insert(subscription_key(subscription_id), record.clone());
        Ok(())
    }

    async fn publish(&self, topic: &str, message: &str) -> StoreResult<()> {
        let mut tables = self.tables();
        let Some(sender) = tables.topics.get(topic) else {
            return Ok(());
        };
        if sender.receiver_count() == 0 {
            tables.topics.remove(topic);
            return Ok(());
        }
        // A receiver dropped since the check is not an error either.
        let _ = sender.send(message.to_string());
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> StoreResult<Box<dyn MessageStream>> {
        let mut tables = self.tables();
        tables.topics.retain(|_, sender| sender.receiver_count() > 0);
        let receiver = tables
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe();

        Ok(Box::new(BroadcastStream {
            topic: topic.to_string(),
            receiver,
        }))
    }
}

struct BroadcastStream {
    topic: String,
    receiver: broadcast::Receiver<String>,
}

#[async_trait]
impl MessageStream for BroadcastStream {
    async fn next_message(&mut self) -> StoreResult<String> {
        match self.receiver.recv().await {
            Ok(message) => Ok(message),
            // Skipped notifications collapse into one; the reader recomputes anyway.
            Err(RecvError::Lagged(skipped)) => {
                warn!(topic = %self.topic, skipped, "subscriber lagged behind");
                Ok(String::new())
            }
            Err(RecvError::Closed) => Err(StoreError::Backend(format!(
                "topic {} closed",
                self.topic
            ))),
        }
    }
}
