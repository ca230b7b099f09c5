//! Campaign Manager - Lifecycle operations, worker registry and supervisor

use super::state::CampaignAction;
use super::worker::{DispatchContext, DispatchWorker, WorkerExit, WorkerSignal};
use crate::events::DispatchEvent;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use courier_common::types::{CampaignId, Channel, TenantId};
use courier_storage::models::{
    Campaign, CampaignReport, CampaignStatus, ContactSource, NewCampaign, ProviderEvent, SetMember,
    ShippingRecord, ShippingStatus,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Campaign operation errors
#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("Campaign not found")]
    NotFound,

    #[error("Cannot {action} a campaign in {from} status")]
    InvalidTransition {
        from: CampaignStatus,
        action: CampaignAction,
    },

    #[error("Campaign is already running")]
    AlreadyRunning,

    #[error("No transport configured for channel {0}")]
    ChannelNotConfigured(Channel),

    #[error(transparent)]
    Storage(#[from] courier_common::Error),
}

/// Paging and filtering of a campaign report
#[derive(Debug, Clone, Copy)]
pub struct ReportPage {
    pub status: Option<ShippingStatus>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for ReportPage {
    fn default() -> Self {
        Self {
            status: None,
            limit: 50,
            offset: 0,
        }
    }
}

struct WorkerSlot {
    generation: u64,
    signal: watch::Sender<WorkerSignal>,
    done: watch::Receiver<bool>,
    handle: JoinHandle<()>,
}

impl WorkerSlot {
    fn is_live(&self) -> bool {
        !self.handle.is_finished() && *self.signal.borrow() == WorkerSignal::Run
    }
}

type Registry = Arc<Mutex<HashMap<CampaignId, WorkerSlot>>>;
type Deferrals = Arc<Mutex<HashMap<CampaignId, DateTime<Utc>>>>;

/// Campaign manager: the single entry point for lifecycle operations
pub struct CampaignManager {
    ctx: DispatchContext,
    workers: Registry,
    /// SENDING campaigns the supervisor must not respawn before the given time
    deferred: Deferrals,
    generation: AtomicU64,
}

impl CampaignManager {
    pub fn new(ctx: DispatchContext) -> Self {
        Self {
            ctx,
            workers: Arc::new(Mutex::new(HashMap::new())),
            deferred: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Create a campaign in DRAFT, or SCHEDULED when `scheduled_at` is set
    pub async fn create(&self, input: NewCampaign) -> Result<Campaign, CampaignError> {
        let campaign = self.ctx.campaigns.create(input).await?;
        info!(
            campaign_id = %campaign.id,
            tenant_id = %campaign.tenant_id,
            channel = %campaign.channel,
            status = %campaign.status,
            "Campaign created"
        );
        Ok(campaign)
    }

    pub async fn get(&self, id: CampaignId) -> Result<Campaign, CampaignError> {
        self.ctx
            .campaigns
            .get(id)
            .await?
            .ok_or(CampaignError::NotFound)
    }

    /// Campaign lookup scoped to a tenant
    pub async fn get_for_tenant(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
    ) -> Result<Campaign, CampaignError> {
        self.ctx
            .campaigns
            .get_by_tenant(tenant_id, id)
            .await?
            .ok_or(CampaignError::NotFound)
    }

    /// Supply the recipient set of an `import` campaign before it starts
    pub async fn import_recipients(
        &self,
        id: CampaignId,
        members: Vec<SetMember>,
    ) -> Result<u64, CampaignError> {
        let campaign = self.get(id).await?;
        if campaign.targeting.contact_source != ContactSource::Import {
            return Err(courier_common::Error::Validation(format!(
                "Campaign {} targets {} contacts; only import campaigns take a recipient set",
                id, campaign.targeting.contact_source
            ))
            .into());
        }
        if !matches!(
            campaign.status,
            CampaignStatus::Draft | CampaignStatus::Scheduled
        ) {
            return Err(courier_common::Error::Conflict(format!(
                "Recipients can only be imported before campaign {} starts",
                id
            ))
            .into());
        }

        let stored = self.ctx.contacts.materialize(id, &members).await?;
        if stored == 0 && !members.is_empty() {
            return Err(courier_common::Error::Conflict(format!(
                "Campaign {} already has a recipient set",
                id
            ))
            .into());
        }
        info!(campaign_id = %id, count = stored, "Recipients imported");
        Ok(stored)
    }

    /// Start now: DRAFT or SCHEDULED to SENDING, then spawn the worker
    pub async fn start(&self, id: CampaignId) -> Result<Campaign, CampaignError> {
        let campaign = self.get(id).await?;
        if self.ctx.transports.get(campaign.channel).is_none() {
            return Err(CampaignError::ChannelNotConfigured(campaign.channel));
        }

        let updated = self.transition(id, CampaignAction::Start, None).await?;
        self.spawn_worker(id).await;
        Ok(updated)
    }

    /// Set or move the start time of a DRAFT or SCHEDULED campaign
    pub async fn schedule(
        &self,
        id: CampaignId,
        at: DateTime<Utc>,
    ) -> Result<Campaign, CampaignError> {
        self.transition(id, CampaignAction::Schedule, Some(at)).await
    }

    /// Stop sending; the in-flight send finishes first
    pub async fn pause(&self, id: CampaignId) -> Result<Campaign, CampaignError> {
        let updated = self.transition(id, CampaignAction::Pause, None).await?;
        self.signal_stop(id).await;
        Ok(updated)
    }

    /// Continue a PAUSED campaign, skipping recipients already in the ledger
    pub async fn resume(&self, id: CampaignId) -> Result<Campaign, CampaignError> {
        let campaign = self.get(id).await?;
        if self.ctx.transports.get(campaign.channel).is_none() {
            return Err(CampaignError::ChannelNotConfigured(campaign.channel));
        }

        let updated = self.transition(id, CampaignAction::Resume, None).await?;
        // The paused worker may still be finishing its last send
        self.wait_for_worker(id).await;
        self.spawn_worker(id).await;
        Ok(updated)
    }

    pub async fn cancel(&self, id: CampaignId) -> Result<Campaign, CampaignError> {
        let updated = self.transition(id, CampaignAction::Cancel, None).await?;
        self.signal_stop(id).await;
        Ok(updated)
    }

    /// Counters, per-status counts and one page of shipping records
    pub async fn report(
        &self,
        id: CampaignId,
        page: ReportPage,
    ) -> Result<CampaignReport, CampaignError> {
        let campaign = self.get(id).await?;
        let limit = page.limit.clamp(1, 500);
        let offset = page.offset.max(0);

        let counts = self.ctx.ledger.status_counts(id).await?;
        let records = self.ctx.ledger.list(id, page.status, limit, offset).await?;

        Ok(CampaignReport {
            campaign_id: id,
            status: campaign.status,
            progress_percentage: campaign.progress_percentage(),
            counters: campaign.counters,
            counts,
            records,
            limit,
            offset,
        })
    }

    /// Apply a delivered/opened/replied/bounced event reported by a provider.
    ///
    /// Returns `None` when the event is stale for the record.
    pub async fn apply_provider_event(
        &self,
        channel: Channel,
        external_id: &str,
        event: &ProviderEvent,
    ) -> Result<Option<ShippingRecord>, CampaignError> {
        let updated = self
            .ctx
            .ledger
            .apply_provider_event(channel, external_id, event)
            .await?;

        match &updated {
            Some(record) => self.ctx.observer.notify(&DispatchEvent::Outcome {
                campaign_id: record.campaign_id,
                record_id: record.id,
                address: record.address.clone(),
                status: record.status,
                error_message: record.error_message.clone(),
            }),
            None => debug!(external_id, status = %event.status(), "Stale provider event ignored"),
        }
        Ok(updated)
    }

    async fn transition(
        &self,
        id: CampaignId,
        action: CampaignAction,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<Campaign, CampaignError> {
        let current = self.get(id).await?;
        if action.apply(current.status).is_none() {
            return Err(rejection(current.status, action));
        }

        let updated = self
            .ctx
            .campaigns
            .compare_and_set_status(id, &action.sources(), action.target(), scheduled_at)
            .await?;

        match updated {
            Some(campaign) => {
                info!(
                    campaign_id = %id,
                    from = %current.status,
                    to = %campaign.status,
                    "Campaign {}", action
                );
                self.ctx.observer.notify(&DispatchEvent::Transition {
                    campaign_id: id,
                    from: current.status,
                    to: campaign.status,
                });
                Ok(campaign)
            }
            None => {
                // Lost a race with another transition
                let now = self.get(id).await?;
                Err(rejection(now.status, action))
            }
        }
    }

    async fn signal_stop(&self, id: CampaignId) {
        if let Some(slot) = self.workers.lock().await.get(&id) {
            // A worker that already exited has no receiver; nothing to stop
            let _ = slot.signal.send(WorkerSignal::Stop);
        }
        self.deferred.lock().await.remove(&id);
    }

    /// Spawn a worker unless a live one exists; returns whether one was spawned
    async fn spawn_worker(&self, id: CampaignId) -> bool {
        let mut workers = self.workers.lock().await;
        if workers.get(&id).map_or(false, WorkerSlot::is_live) {
            return false;
        }
        self.deferred.lock().await.remove(&id);

        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let (signal, rx) = watch::channel(WorkerSignal::Run);
        let (done_tx, done) = watch::channel(false);
        let worker = DispatchWorker::new(self.ctx.clone(), id, rx);

        let registry = self.workers.clone();
        let deferred = self.deferred.clone();
        let clock = self.ctx.clock.clone();
        let restart_backoff = ChronoDuration::seconds(self.ctx.config.restart_backoff_secs as i64);

        let handle = tokio::spawn(async move {
            match worker.run().await {
                Ok(WorkerExit::Completed) => {
                    debug!(campaign_id = %id, "Worker finished");
                }
                Ok(WorkerExit::Stopped) => {
                    debug!(campaign_id = %id, "Worker stopped");
                }
                Ok(WorkerExit::DailyLimitReached { resume_at }) => {
                    info!(campaign_id = %id, resume_at = %resume_at, "Daily limit reached, dispatch deferred");
                    deferred.lock().await.insert(id, resume_at);
                }
                Err(e) => {
                    let retry_at = clock.now() + restart_backoff;
                    error!(
                        campaign_id = %id,
                        error = %e,
                        retry_at = %retry_at,
                        "Worker failed, campaign stays in its status"
                    );
                    deferred.lock().await.insert(id, retry_at);
                }
            }

            let mut workers = registry.lock().await;
            if workers.get(&id).map_or(false, |slot| slot.generation == generation) {
                workers.remove(&id);
            }
            let _ = done_tx.send(true);
        });

        workers.insert(
            id,
            WorkerSlot {
                generation,
                signal,
                done,
                handle,
            },
        );
        debug!(campaign_id = %id, generation, "Worker spawned");
        true
    }

    /// Whether a worker is currently registered and running for the campaign
    pub async fn is_running(&self, id: CampaignId) -> bool {
        self.workers
            .lock()
            .await
            .get(&id)
            .map_or(false, |slot| !slot.handle.is_finished())
    }

    /// Wait until the campaign's current worker, if any, has exited
    pub async fn wait_for_worker(&self, id: CampaignId) {
        let done = self.workers.lock().await.get(&id).map(|slot| slot.done.clone());
        if let Some(mut done) = done {
            // A dropped sender means the task is gone as well
            let _ = done.wait_for(|finished| *finished).await;
        }
    }

    /// One supervisor pass: promote due schedules and revive SENDING campaigns
    /// that have no live worker.
    pub async fn tick(&self) -> Result<(), CampaignError> {
        let now = self.ctx.clock.now();

        for campaign in self.ctx.campaigns.list_scheduled_due(now).await? {
            if self.ctx.transports.get(campaign.channel).is_none() {
                warn!(
                    campaign_id = %campaign.id,
                    channel = %campaign.channel,
                    "Scheduled campaign is due but its channel has no transport"
                );
                continue;
            }

            match self.transition(campaign.id, CampaignAction::Start, None).await {
                Ok(_) => {
                    info!(campaign_id = %campaign.id, "Scheduled campaign started");
                    self.spawn_worker(campaign.id).await;
                }
                Err(CampaignError::InvalidTransition { .. }) | Err(CampaignError::AlreadyRunning) => {
                    debug!(campaign_id = %campaign.id, "Scheduled campaign changed concurrently");
                }
                Err(e) => return Err(e),
            }
        }

        for campaign in self.ctx.campaigns.list_by_status(CampaignStatus::Sending).await? {
            let deferred_until = self.deferred.lock().await.get(&campaign.id).copied();
            if deferred_until.map_or(false, |until| until > now) {
                continue;
            }
            if self.ctx.transports.get(campaign.channel).is_none() {
                warn!(
                    campaign_id = %campaign.id,
                    channel = %campaign.channel,
                    "Sending campaign has no transport for its channel"
                );
                continue;
            }
            if self.spawn_worker(campaign.id).await {
                info!(campaign_id = %campaign.id, "Dispatch worker revived");
            }
        }

        Ok(())
    }

    /// Run the supervisor loop until the task is dropped
    pub async fn run_supervisor(self: Arc<Self>) {
        let interval = Duration::from_secs(self.ctx.config.poll_interval_secs.max(1));
        let mut ticker = tokio::time::interval(interval);
        info!(interval_secs = interval.as_secs(), "Campaign supervisor started");

        loop {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                error!(error = %e, "Supervisor pass failed");
            }
        }
    }

    /// Stop every worker after its in-flight send and wait for all of them
    pub async fn shutdown(&self) {
        let waiters: Vec<watch::Receiver<bool>> = {
            let workers = self.workers.lock().await;
            for slot in workers.values() {
                let _ = slot.signal.send(WorkerSignal::Stop);
            }
            workers.values().map(|slot| slot.done.clone()).collect()
        };

        info!(workers = waiters.len(), "Stopping dispatch workers");
        for mut done in waiters {
            let _ = done.wait_for(|finished| *finished).await;
        }
    }
}

fn rejection(from: CampaignStatus, action: CampaignAction) -> CampaignError {
    if action == CampaignAction::Start && from == CampaignStatus::Sending {
        CampaignError::AlreadyRunning
    } else {
        CampaignError::InvalidTransition { from, action }
    }
}
