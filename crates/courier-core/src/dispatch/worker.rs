//! Dispatch Worker - Sends one campaign batch by batch

use super::composer::ContentComposer;
use super::governor::{RateGovernor, Verdict};
use super::manager::CampaignError;
use super::resolver::RecipientResolver;
use super::state::CampaignAction;
use crate::clock::{Clock, SystemClock};
use crate::events::{DispatchEvent, DispatchObserver, HaltReason, LoggingObserver};
use crate::transport::{ChannelTransport, TransportError, Transports};
use crate::variation::ContentVariation;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use courier_common::config::DispatchConfig;
use courier_common::types::CampaignId;
use courier_storage::models::{Campaign, CampaignStatus, Recipient, ShippingStatus};
use courier_storage::repository::{CampaignStore, ContactDirectory, Reservation, ShippingLedger};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Control signal from the manager to a running worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerSignal {
    Run,
    /// Finish the in-flight send, then exit
    Stop,
}

/// How a worker run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Every recipient was processed and the campaign is COMPLETED
    Completed,
    /// Paused, cancelled, shut down, or the campaign left SENDING elsewhere
    Stopped,
    /// Today's quota is used up; the campaign stays SENDING
    DailyLimitReached { resume_at: DateTime<Utc> },
}

/// Collaborators shared by the manager and its workers
#[derive(Clone)]
pub struct DispatchContext {
    pub campaigns: Arc<dyn CampaignStore>,
    pub ledger: Arc<dyn ShippingLedger>,
    pub contacts: Arc<dyn ContactDirectory>,
    pub transports: Transports,
    pub variation: Option<Arc<dyn ContentVariation>>,
    pub observer: Arc<dyn DispatchObserver>,
    pub clock: Arc<dyn Clock>,
    pub config: DispatchConfig,
}

impl DispatchContext {
    /// Context over one store implementing every persistence trait
    pub fn from_store<S>(store: S) -> Self
    where
        S: CampaignStore + ShippingLedger + ContactDirectory + Clone + 'static,
    {
        Self {
            campaigns: Arc::new(store.clone()),
            ledger: Arc::new(store.clone()),
            contacts: Arc::new(store),
            transports: Transports::new(),
            variation: None,
            observer: Arc::new(LoggingObserver),
            clock: Arc::new(SystemClock),
            config: DispatchConfig::default(),
        }
    }

    pub fn with_transports(mut self, transports: Transports) -> Self {
        self.transports = transports;
        self
    }

    pub fn with_variation(mut self, variation: Arc<dyn ContentVariation>) -> Self {
        self.variation = Some(variation);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn DispatchObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }
}

/// Per-recipient result inside a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Sent,
    Failed,
    /// Another worker holds the reservation
    Skipped,
    /// Stopped before the provider accepted the send; the reservation was given back
    Released,
}

/// Dispatch worker for one campaign
pub struct DispatchWorker {
    ctx: DispatchContext,
    campaign_id: CampaignId,
    signal: watch::Receiver<WorkerSignal>,
    resolver: RecipientResolver,
    composer: ContentComposer,
}

impl DispatchWorker {
    pub fn new(
        ctx: DispatchContext,
        campaign_id: CampaignId,
        signal: watch::Receiver<WorkerSignal>,
    ) -> Self {
        let resolver = RecipientResolver::new(ctx.contacts.clone(), ctx.clock.clone());
        let composer = ContentComposer::new(
            ctx.variation.clone(),
            Duration::from_millis(ctx.config.variation_timeout_ms),
        );

        Self {
            ctx,
            campaign_id,
            signal,
            resolver,
            composer,
        }
    }

    fn stopped(&self) -> bool {
        *self.signal.borrow() == WorkerSignal::Stop
    }

    /// Sleep unless stopped first; returns whether the worker may continue
    async fn pause_for(&mut self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.stopped();
        }

        let elapsed = tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.signal.wait_for(|s| *s == WorkerSignal::Stop) => false,
        };
        elapsed && !self.stopped()
    }

    /// Wait until sending is allowed by the business-hours window
    async fn wait_for_window(&mut self, governor: &RateGovernor) -> bool {
        loop {
            let now = self.ctx.clock.now();
            let Some(until) = governor.window_closed_until(now) else {
                return !self.stopped();
            };
            self.halted(HaltReason::OutsideBusinessHours, until);
            let wait = (until - now).to_std().unwrap_or_default();
            if !self.pause_for(wait).await {
                return false;
            }
        }
    }

    /// Run the campaign until it completes, stops or halts for the day
    pub async fn run(mut self) -> Result<WorkerExit, CampaignError> {
        let id = self.campaign_id;
        let campaign = self
            .ctx
            .campaigns
            .get(id)
            .await?
            .ok_or(CampaignError::NotFound)?;

        if campaign.status != CampaignStatus::Sending {
            debug!(campaign_id = %id, status = %campaign.status, "Campaign not sending, worker exits");
            return Ok(WorkerExit::Stopped);
        }

        let transport = self
            .ctx
            .transports
            .get(campaign.channel)
            .ok_or(CampaignError::ChannelNotConfigured(campaign.channel))?;

        let cutoff = self.ctx.clock.now()
            - ChronoDuration::seconds(self.ctx.config.stale_reservation_secs as i64);
        let recovered = self.ctx.ledger.fail_stale_pending(id, cutoff).await?;
        if recovered > 0 {
            warn!(
                campaign_id = %id,
                count = recovered,
                "Closed abandoned reservations as failed"
            );
        }

        let recipients = self.resolver.resolve(&campaign).await?;
        let reserved = self.ctx.ledger.reserved_addresses(id).await?;
        let mut queue: VecDeque<Recipient> = recipients
            .into_iter()
            .filter(|r| !reserved.contains(&r.address))
            .collect();
        let total = reserved.len() + queue.len();
        self.ctx.campaigns.set_total_recipients(id, total as i32).await?;

        info!(
            campaign_id = %id,
            total,
            remaining = queue.len(),
            "Dispatch worker started"
        );

        let mut governor = RateGovernor::new(campaign.policy.clone(), &self.ctx.config);
        let mut batch_number = 0u32;

        loop {
            if queue.is_empty() {
                return self.complete().await;
            }
            if self.stopped() {
                return Ok(WorkerExit::Stopped);
            }

            let now = self.ctx.clock.now();
            let sent_today = if campaign.policy.daily_limit > 0 {
                self.ctx
                    .ledger
                    .count_reserved_since(id, governor.day_start(now))
                    .await?
            } else {
                0
            };

            let batch_len = match governor.evaluate(now, sent_today) {
                Verdict::Proceed { batch_len } => batch_len,
                Verdict::HaltDailyLimit { resume_at } => {
                    self.halted(HaltReason::DailyLimitReached, resume_at);
                    return Ok(WorkerExit::DailyLimitReached { resume_at });
                }
                Verdict::HaltUntil(until) => {
                    self.halted(HaltReason::OutsideBusinessHours, until);
                    let wait = (until - now).to_std().unwrap_or_default();
                    if !self.pause_for(wait).await {
                        return Ok(WorkerExit::Stopped);
                    }
                    continue;
                }
            };

            batch_number += 1;
            let batch: Vec<Recipient> = queue.drain(..batch_len.min(queue.len())).collect();
            self.ctx.observer.notify(&DispatchEvent::BatchStarted {
                campaign_id: id,
                batch_number,
                size: batch.len(),
            });

            for recipient in &batch {
                // Cooldowns and backoffs can run past the end of the window
                if !self.wait_for_window(&governor).await {
                    return Ok(WorkerExit::Stopped);
                }
                let step = self
                    .process(&campaign, recipient, transport.as_ref(), &governor)
                    .await?;
                match step {
                    Step::Released => return Ok(WorkerExit::Stopped),
                    Step::Sent => {
                        if let Some(cooldown) = governor.after_send() {
                            debug!(campaign_id = %id, secs = cooldown.as_secs(), "Cooldown after sends");
                            if !self.pause_for(cooldown).await {
                                return Ok(WorkerExit::Stopped);
                            }
                        }
                    }
                    Step::Failed | Step::Skipped => {}
                }
            }

            // Pause or cancel may have been persisted by another process
            let status = self.ctx.campaigns.get(id).await?.map(|c| c.status);
            if status != Some(CampaignStatus::Sending) {
                info!(campaign_id = %id, status = ?status, "Campaign left sending, worker exits");
                return Ok(WorkerExit::Stopped);
            }

            if queue.is_empty() {
                return self.complete().await;
            }
            let delay = governor.inter_batch_delay();
            if !self.pause_for(delay).await {
                return Ok(WorkerExit::Stopped);
            }
        }
    }

    /// Reserve, compose, send and record one recipient
    async fn process(
        &mut self,
        campaign: &Campaign,
        recipient: &Recipient,
        transport: &dyn ChannelTransport,
        governor: &RateGovernor,
    ) -> Result<Step, CampaignError> {
        let reservation = self
            .ctx
            .ledger
            .reserve(campaign, recipient, self.ctx.clock.now())
            .await?;
        let record = match reservation {
            Reservation::Acquired(record) => record,
            Reservation::AlreadyReserved(record) => {
                debug!(
                    campaign_id = %campaign.id,
                    address = %recipient.address,
                    status = %record.status,
                    "Recipient already reserved, skipping"
                );
                return Ok(Step::Skipped);
            }
        };

        let composition = match self.composer.compose(campaign, recipient).await {
            Ok(composition) => composition,
            Err(e) => {
                let message = e.to_string();
                self.ctx
                    .ledger
                    .record_outcome(record.id, ShippingStatus::Failed, Some(&message), None)
                    .await?;
                self.outcome(campaign, record.id, recipient, ShippingStatus::Failed, Some(message));
                return Ok(Step::Failed);
            }
        };

        if let Some(reason) = &composition.degraded_reason {
            self.ctx.observer.notify(&DispatchEvent::CompositionDegraded {
                campaign_id: campaign.id,
                address: recipient.address.clone(),
                reason: reason.clone(),
            });
        }
        self.ctx
            .ledger
            .attach_content(record.id, &composition.content)
            .await?;

        let mut attempt = 0;
        let result = loop {
            match transport.send(&recipient.address, &composition.content).await {
                Err(TransportError::RateLimited(message))
                    if attempt < self.ctx.config.max_rate_limit_retries =>
                {
                    let backoff = governor.rate_limit_backoff(attempt);
                    attempt += 1;
                    warn!(
                        campaign_id = %campaign.id,
                        address = %recipient.address,
                        attempt,
                        backoff_secs = backoff.as_secs(),
                        "Provider rate limited, backing off"
                    );
                    let until = self.ctx.clock.now()
                        + ChronoDuration::from_std(backoff).unwrap_or_else(|_| ChronoDuration::zero());
                    self.halted(HaltReason::RateLimited, until);
                    if !self.pause_for(backoff).await || !self.wait_for_window(governor).await {
                        // Nothing was delivered; a later run sends to this recipient again
                        self.ctx.ledger.release(record.id).await?;
                        info!(
                            campaign_id = %campaign.id,
                            address = %recipient.address,
                            reason = %message,
                            "Stopped during rate-limit backoff, reservation released"
                        );
                        return Ok(Step::Released);
                    }
                }
                other => break other,
            }
        };

        let (status, error_message) = match result {
            Ok(external_id) => {
                self.ctx
                    .ledger
                    .record_outcome(record.id, ShippingStatus::Sent, None, Some(&external_id))
                    .await?;
                (ShippingStatus::Sent, None)
            }
            Err(e) => {
                let message = e.to_string();
                self.ctx
                    .ledger
                    .record_outcome(record.id, ShippingStatus::Failed, Some(&message), None)
                    .await?;
                (ShippingStatus::Failed, Some(message))
            }
        };

        self.outcome(campaign, record.id, recipient, status, error_message);
        Ok(if status == ShippingStatus::Sent {
            Step::Sent
        } else {
            Step::Failed
        })
    }

    fn outcome(
        &self,
        campaign: &Campaign,
        record_id: uuid::Uuid,
        recipient: &Recipient,
        status: ShippingStatus,
        error_message: Option<String>,
    ) {
        self.ctx.observer.notify(&DispatchEvent::Outcome {
            campaign_id: campaign.id,
            record_id,
            address: recipient.address.clone(),
            status,
            error_message,
        });
    }

    fn halted(&self, reason: HaltReason, until: DateTime<Utc>) {
        self.ctx.observer.notify(&DispatchEvent::Halted {
            campaign_id: self.campaign_id,
            reason,
            until,
        });
    }

    async fn complete(&self) -> Result<WorkerExit, CampaignError> {
        let id = self.campaign_id;
        let action = CampaignAction::Complete;
        let updated = self
            .ctx
            .campaigns
            .compare_and_set_status(id, &action.sources(), action.target(), None)
            .await?;

        if let Some(campaign) = updated {
            info!(
                campaign_id = %id,
                sent = campaign.counters.total_sent,
                failed = campaign.counters.total_failed,
                "Campaign completed"
            );
            self.ctx.observer.notify(&DispatchEvent::Transition {
                campaign_id: id,
                from: CampaignStatus::Sending,
                to: CampaignStatus::Completed,
            });
            return Ok(WorkerExit::Completed);
        }

        let status = self.ctx.campaigns.get(id).await?.map(|c| c.status);
        Ok(if status == Some(CampaignStatus::Completed) {
            WorkerExit::Completed
        } else {
            WorkerExit::Stopped
        })
    }
}
