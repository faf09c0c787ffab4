//! Named message queues plugins can push to.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::manifest::PluginId;

/// A message pushed by a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Queue it was pushed to.
    pub queue: String,
    /// Plugin that pushed it.
    pub plugin_id: PluginId,
    /// Structured payload.
    pub payload: serde_json::Value,
    /// When it was pushed.
    pub pushed_at: DateTime<Utc>,
}

/// Per-name bounded broadcast channels shared by the host and its plugins.
///
/// Cloning is cheap; clones share the same queues.
#[derive(Debug, Clone)]
pub struct QueueHub {
    queues: Arc<DashMap<String, broadcast::Sender<QueueMessage>>>,
    capacity: usize,
}

impl Default for QueueHub {
    fn default() -> Self {
        Self::new(256)
    }
}

impl QueueHub {
    /// Create a hub whose queues hold up to `capacity` unread messages per
    /// subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, name: &str) -> broadcast::Sender<QueueMessage> {
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Subscribe to a queue by name, creating it if needed.
    #[must_use]
    pub fn subscribe(&self, name: &str) -> broadcast::Receiver<QueueMessage> {
        self.sender(name).subscribe()
    }

    /// Push a message. Returns how many subscribers received it; messages
    /// pushed to a queue nobody listens to are dropped.
    pub fn push(&self, name: &str, plugin_id: &PluginId, payload: serde_json::Value) -> usize {
        let message = QueueMessage {
            queue: name.to_string(),
            plugin_id: plugin_id.clone(),
            payload,
            pushed_at: Utc::now(),
        };
        let delivered = self.sender(name).send(message).unwrap_or(0);
        trace!(queue = %name, plugin_id = %plugin_id, delivered, "queue push");
        delivered
    }

    /// Names of queues created so far.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
