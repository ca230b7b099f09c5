//! Shared fixtures for dispatch tests

use super::worker::{DispatchContext, DispatchWorker, WorkerExit, WorkerSignal};
use super::manager::CampaignError;
use crate::clock::Clock;
use crate::events::{DispatchEvent, DispatchObserver, HaltReason};
use crate::transport::{ChannelTransport, TransportError, Transports};
use crate::variation::{ContentVariation, VariationError};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use courier_common::types::{CampaignId, Channel};
use courier_storage::models::{
    Campaign, CampaignContent, CampaignCounters, CampaignStatus, ComposedContent, Contact,
    ContactSource, NewCampaign, Recipient, Targeting, ThroughputPolicy,
};
use courier_storage::repository::{CampaignStore, ShippingLedger};
use courier_storage::MemoryStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

/// Campaign value for composer tests; never stored
pub(crate) fn campaign_with(channel: Channel, body: &str, use_ai_variation: bool) -> Campaign {
    let now = Utc::now();
    Campaign {
        id: Uuid::new_v4(),
        tenant_id: Uuid::new_v4(),
        name: "Test".to_string(),
        channel,
        content: CampaignContent {
            subject: match channel {
                Channel::Email => Some("Hi {{first_name}}".to_string()),
                Channel::Whatsapp => None,
            },
            body: body.to_string(),
            use_ai_variation,
            variation_prompt: None,
        },
        targeting: Targeting {
            contact_source: ContactSource::Import,
            list_id: None,
            active_days_filter: 30,
        },
        policy: ThroughputPolicy::default(),
        status: CampaignStatus::Draft,
        scheduled_at: None,
        started_at: None,
        completed_at: None,
        counters: CampaignCounters::default(),
        created_at: now,
        updated_at: now,
    }
}

/// Variation service that never answers in time
pub(crate) struct SlowVariation;

#[async_trait]
impl ContentVariation for SlowVariation {
    async fn rewrite(&self, _base: &str, _hints: Option<&str>) -> Result<String, VariationError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok("too late".to_string())
    }
}

/// Clock that only moves when told to
pub(crate) struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub(crate) fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub(crate) fn advance(&self, by: ChronoDuration) {
        let mut now = self.now.lock().unwrap();
        *now = *now + by;
    }

    pub(crate) fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Clock that moves with tokio time, so paused-time sleeps advance it
pub(crate) struct TokioClock {
    start: DateTime<Utc>,
    origin: Instant,
}

impl TokioClock {
    pub(crate) fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            start,
            origin: Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        self.start + ChronoDuration::from_std(self.origin.elapsed()).unwrap_or_else(|_| ChronoDuration::zero())
    }
}

#[derive(Default)]
struct MockState {
    sent: Vec<(String, Instant)>,
    attempts: HashMap<String, usize>,
    failures: HashMap<String, TransportError>,
    rate_limits: HashMap<String, usize>,
    latency: Duration,
}

/// Scripted WhatsApp transport recording every attempt
#[derive(Default)]
pub(crate) struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    /// Always fail sends to `address`
    pub(crate) fn fail(&self, address: &str, error: TransportError) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(address.to_string(), error);
    }

    /// Answer the next `times` sends to `address` with a rate limit
    pub(crate) fn rate_limit(&self, address: &str, times: usize) {
        self.state
            .lock()
            .unwrap()
            .rate_limits
            .insert(address.to_string(), times);
    }

    pub(crate) fn set_latency(&self, latency: Duration) {
        self.state.lock().unwrap().latency = latency;
    }

    /// Successfully sent addresses in send order
    pub(crate) fn sent_addresses(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .map(|(address, _)| address.clone())
            .collect()
    }

    pub(crate) fn send_times(&self) -> Vec<Instant> {
        self.state.lock().unwrap().sent.iter().map(|(_, at)| *at).collect()
    }

    pub(crate) fn attempts(&self, address: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .attempts
            .get(address)
            .copied()
            .unwrap_or(0)
    }

    /// Wait until `address` saw at least `count` attempts
    pub(crate) async fn wait_for_attempts(&self, address: &str, count: usize) {
        while self.attempts(address) < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub(crate) fn total_attempts(&self) -> usize {
        self.state.lock().unwrap().attempts.values().sum()
    }

    /// Wait until at least `count` sends succeeded
    pub(crate) async fn wait_for_sends(&self, count: usize) {
        while self.state.lock().unwrap().sent.len() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl ChannelTransport for MockTransport {
    fn channel(&self) -> Channel {
        Channel::Whatsapp
    }

    async fn send(&self, address: &str, _content: &ComposedContent) -> Result<String, TransportError> {
        let latency = {
            let mut state = self.state.lock().unwrap();
            *state.attempts.entry(address.to_string()).or_default() += 1;

            if let Some(remaining) = state.rate_limits.get_mut(address) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(TransportError::RateLimited("429 Too Many Requests".to_string()));
                }
            }
            if let Some(error) = state.failures.get(address) {
                return Err(error.clone());
            }
            state.latency
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock().unwrap();
        state.sent.push((address.to_string(), Instant::now()));
        Ok(format!("msg-{}", state.sent.len()))
    }
}

/// Observer keeping every event
#[derive(Default)]
pub(crate) struct RecordingObserver {
    events: Mutex<Vec<DispatchEvent>>,
}

impl RecordingObserver {
    pub(crate) fn events(&self) -> Vec<DispatchEvent> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn batch_sizes(&self) -> Vec<usize> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                DispatchEvent::BatchStarted { size, .. } => Some(size),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn degraded_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, DispatchEvent::CompositionDegraded { .. }))
            .count()
    }

    /// Business-hours halts as their resume times
    pub(crate) fn window_waits(&self) -> Vec<DateTime<Utc>> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                DispatchEvent::Halted {
                    reason: HaltReason::OutsideBusinessHours,
                    until,
                    ..
                } => Some(until),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn transitions(&self) -> Vec<(CampaignStatus, CampaignStatus)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                DispatchEvent::Transition { from, to, .. } => Some((from, to)),
                _ => None,
            })
            .collect()
    }
}

impl DispatchObserver for RecordingObserver {
    fn notify(&self, event: &DispatchEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// A memory-backed dispatch context with scripted collaborators
pub(crate) struct Harness {
    pub(crate) store: MemoryStore,
    pub(crate) transport: Arc<MockTransport>,
    pub(crate) observer: Arc<RecordingObserver>,
    pub(crate) clock: Arc<ManualClock>,
    pub(crate) ctx: DispatchContext,
    pub(crate) tenant_id: Uuid,
}

impl Harness {
    pub(crate) fn new() -> Self {
        let store = MemoryStore::new();
        let transport = Arc::new(MockTransport::default());
        let observer = Arc::new(RecordingObserver::default());
        // A Tuesday morning, inside business hours
        let clock = Arc::new(ManualClock::at(
            DateTime::parse_from_rfc3339("2024-03-05T10:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        ));

        let ctx = DispatchContext::from_store(store.clone())
            .with_transports(Transports::new().with(transport.clone()))
            .with_observer(observer.clone())
            .with_clock(clock.clone());

        Self {
            store,
            transport,
            observer,
            clock,
            ctx,
            tenant_id: Uuid::new_v4(),
        }
    }

    /// Harness whose clock follows tokio time from `start`
    pub(crate) fn following_tokio_time(start: &str) -> Self {
        let mut harness = Self::new();
        let start = DateTime::parse_from_rfc3339(start)
            .unwrap()
            .with_timezone(&Utc);
        harness.ctx = harness
            .ctx
            .clone()
            .with_clock(Arc::new(TokioClock::starting_at(start)));
        harness
    }

    pub(crate) fn with_variation(variation: Arc<dyn ContentVariation>) -> Self {
        let mut harness = Self::new();
        harness.ctx = harness.ctx.clone().with_variation(variation);
        harness
    }

    /// Phone addresses of the first `n` seeded contacts, in resolution order
    pub(crate) fn addresses(&self, n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("+55119{:08}", i)).collect()
    }

    async fn seed(&self, n: usize, policy: ThroughputPolicy, use_ai_variation: bool) -> Campaign {
        let list_id = Uuid::new_v4();
        for (i, phone) in self.addresses(n).into_iter().enumerate() {
            let contact = Contact {
                // Sequential ids keep list order equal to seeding order
                id: Uuid::from_u128(i as u128 + 1),
                tenant_id: self.tenant_id,
                name: Some(format!("Contact{} Test", i + 1)),
                phone: Some(phone),
                email: None,
                fields: serde_json::json!({}),
                last_interaction_at: None,
                created_at: Utc::now(),
            };
            let contact_id = contact.id;
            self.store.insert_contact(contact).await;
            self.store.add_to_list(list_id, contact_id).await;
        }

        let targeting = Targeting {
            contact_source: ContactSource::List,
            list_id: Some(list_id),
            active_days_filter: 30,
        };
        self.create_campaign(format!("{} recipients", n), targeting, policy, use_ai_variation)
            .await
    }

    async fn create_campaign(
        &self,
        name: String,
        targeting: Targeting,
        policy: ThroughputPolicy,
        use_ai_variation: bool,
    ) -> Campaign {
        self.store
            .create(NewCampaign {
                tenant_id: self.tenant_id,
                name,
                channel: Channel::Whatsapp,
                content: CampaignContent {
                    subject: None,
                    body: "Hello {{first_name}}".to_string(),
                    use_ai_variation,
                    variation_prompt: None,
                },
                targeting,
                policy,
                scheduled_at: None,
            })
            .await
            .unwrap()
    }

    /// Draft WhatsApp campaign over an explicitly supplied recipient set
    pub(crate) async fn import_campaign(&self) -> Campaign {
        let targeting = Targeting {
            contact_source: ContactSource::Import,
            list_id: None,
            active_days_filter: 30,
        };
        self.create_campaign("Imported".to_string(), targeting, ThroughputPolicy::default(), false)
            .await
    }

    /// Draft WhatsApp campaign over contacts active in the last 30 days
    pub(crate) async fn active_campaign(&self) -> Campaign {
        let targeting = Targeting {
            contact_source: ContactSource::Active,
            list_id: None,
            active_days_filter: 30,
        };
        self.create_campaign("Active".to_string(), targeting, ThroughputPolicy::default(), false)
            .await
    }

    /// Contact that interacted at `at`, outside any list
    pub(crate) async fn insert_active_contact(&self, phone: &str, at: DateTime<Utc>) {
        self.store
            .insert_contact(Contact {
                id: Uuid::new_v4(),
                tenant_id: self.tenant_id,
                name: Some("Active Contact".to_string()),
                phone: Some(phone.to_string()),
                email: None,
                fields: serde_json::json!({}),
                last_interaction_at: Some(at),
                created_at: at,
            })
            .await;
    }

    /// Draft WhatsApp campaign over a fresh list of `n` contacts
    pub(crate) async fn list_campaign(&self, n: usize, policy: ThroughputPolicy) -> Campaign {
        self.seed(n, policy, false).await
    }

    pub(crate) async fn list_campaign_with_ai(&self, n: usize, policy: ThroughputPolicy) -> Campaign {
        self.seed(n, policy, true).await
    }

    pub(crate) async fn mark_sending(&self, id: CampaignId) {
        self.store
            .compare_and_set_status(
                id,
                &[CampaignStatus::Draft, CampaignStatus::Scheduled],
                CampaignStatus::Sending,
                None,
            )
            .await
            .unwrap()
            .unwrap();
    }

    pub(crate) async fn campaign(&self, id: CampaignId) -> Campaign {
        self.store.get(id).await.unwrap().unwrap()
    }

    /// Leave a PENDING reservation as a crashed worker would
    pub(crate) async fn reserve_at(&self, campaign: &Campaign, address: &str, at: DateTime<Utc>) {
        let recipient = Recipient {
            contact_id: None,
            address: address.to_string(),
            display_name: None,
            phone: Some(address.to_string()),
            email: None,
            fields: serde_json::json!({}),
        };
        self.store.reserve(campaign, &recipient, at).await.unwrap();
    }

    pub(crate) fn batch_sizes(&self) -> Vec<usize> {
        self.observer.batch_sizes()
    }

    /// Run one worker to its exit with a signal that never stops it
    pub(crate) async fn run_worker(&self, id: CampaignId) -> Result<WorkerExit, CampaignError> {
        let (_tx, rx) = watch::channel(WorkerSignal::Run);
        DispatchWorker::new(self.ctx.clone(), id, rx).run().await
    }
}
