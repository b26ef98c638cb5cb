//! Lifecycle events fanned out to websocket clients

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::monitor::InventoryFlag;
use crate::redemption::RedemptionStatus;
use crate::registry::VerificationStatus;
use crate::verification::RequestState;

/// Event types for real-time batch updates
#[derive(Debug, Serialize, Clone)]
#[serde(tag = "type")]
pub enum LifecycleEvent {
    BatchRegistered {
        batch_id: u64,
        metadata_ref: String,
        tx_hash: String,
    },
    BatchStatusChanged {
        batch_id: u64,
        status: VerificationStatus,
    },
    VerificationUpdated {
        batch_id: u64,
        verification_id: Uuid,
        state: RequestState,
    },
    TokensMinted {
        batch_id: u64,
        recipient: String,
        amount: u64,
        tx_hash: String,
    },
    TokensBurned {
        batch_id: u64,
        holder: String,
        amount: u64,
        tx_hash: String,
    },
    RedemptionUpdated {
        batch_id: u64,
        redemption_id: Uuid,
        status: RedemptionStatus,
    },
    InventoryFlagged {
        batch_id: u64,
        flags: Vec<InventoryFlag>,
    },
}

impl LifecycleEvent {
    pub fn batch_id(&self) -> u64 {
        match self {
            LifecycleEvent::BatchRegistered { batch_id, .. }
            | LifecycleEvent::BatchStatusChanged { batch_id, .. }
            | LifecycleEvent::VerificationUpdated { batch_id, .. }
            | LifecycleEvent::TokensMinted { batch_id, .. }
            | LifecycleEvent::TokensBurned { batch_id, .. }
            | LifecycleEvent::RedemptionUpdated { batch_id, .. }
            | LifecycleEvent::InventoryFlagged { batch_id, .. } => *batch_id,
        }
    }
}

/// Broadcast channel shared by every component that reports lifecycle changes
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event; having no subscribers is not an error
    pub fn publish(&self, event: LifecycleEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("No event subscribers connected");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
