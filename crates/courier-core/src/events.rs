//! Dispatch observer: lifecycle and outcome notifications

use chrono::{DateTime, Utc};
use courier_common::types::{CampaignId, ShippingRecordId};
use courier_storage::models::{CampaignStatus, ShippingStatus};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Event emitted by the dispatch engine
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchEvent {
    Transition {
        campaign_id: CampaignId,
        from: CampaignStatus,
        to: CampaignStatus,
    },
    BatchStarted {
        campaign_id: CampaignId,
        batch_number: u32,
        size: usize,
    },
    Outcome {
        campaign_id: CampaignId,
        record_id: ShippingRecordId,
        address: String,
        status: ShippingStatus,
        error_message: Option<String>,
    },
    CompositionDegraded {
        campaign_id: CampaignId,
        address: String,
        reason: String,
    },
    Halted {
        campaign_id: CampaignId,
        reason: HaltReason,
        until: DateTime<Utc>,
    },
}

/// Why a worker stopped sending for a while
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    OutsideBusinessHours,
    DailyLimitReached,
    RateLimited,
}

/// Receiver of dispatch events
pub trait DispatchObserver: Send + Sync {
    fn notify(&self, event: &DispatchEvent);
}

/// Observer that writes events to the tracing log
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingObserver;

impl DispatchObserver for LoggingObserver {
    fn notify(&self, event: &DispatchEvent) {
        match event {
            DispatchEvent::Transition { campaign_id, from, to } => {
                info!(campaign_id = %campaign_id, from = %from, to = %to, "Campaign status changed");
            }
            DispatchEvent::BatchStarted { campaign_id, batch_number, size } => {
                info!(campaign_id = %campaign_id, batch_number, size, "Batch started");
            }
            DispatchEvent::Outcome { campaign_id, address, status, error_message, .. } => {
                debug!(
                    campaign_id = %campaign_id,
                    address = %address,
                    status = %status,
                    error = error_message.as_deref().unwrap_or(""),
                    "Recipient outcome recorded"
                );
            }
            DispatchEvent::CompositionDegraded { campaign_id, address, reason } => {
                warn!(campaign_id = %campaign_id, address = %address, reason = %reason, "Composition degraded");
            }
            DispatchEvent::Halted { campaign_id, reason, until } => {
                info!(campaign_id = %campaign_id, reason = ?reason, until = %until, "Dispatch halted");
            }
        }
    }
}

/// Observer that fans events out over a broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastObserver {
    tx: broadcast::Sender<DispatchEvent>,
}

impl BroadcastObserver {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.tx.subscribe()
    }
}

impl DispatchObserver for BroadcastObserver {
    fn notify(&self, event: &DispatchEvent) {
        // No subscribers is fine
        let _ = self.tx.send(event.clone());
    }
}

/// Observer that forwards to several observers
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<std::sync::Arc<dyn DispatchObserver>>,
}

impl CompositeObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: std::sync::Arc<dyn DispatchObserver>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl DispatchObserver for CompositeObserver {
    fn notify(&self, event: &DispatchEvent) {
        for observer in &self.observers {
            observer.notify(event);
        }
    }
}
