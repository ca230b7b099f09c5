//! In-memory store implementing every persistence trait
//!
//! Used by the `memory` database backend and by tests. All state sits behind
//! one mutex so each operation is atomic, matching the transactional
//! guarantees of the PostgreSQL repositories.

use crate::models::{
    Campaign, CampaignCounters, CampaignStatus, ComposedContent, Contact, CounterDelta,
    NewCampaign, ProviderEvent, Recipient, SetMember, ShippingRecord, ShippingStatus,
    StatusCounts, TransitionCheck,
};
use crate::repository::{CampaignStore, ContactDirectory, Reservation, ShippingLedger};
use crate::repository::shipping_records::INTERRUPTED_MESSAGE;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_common::types::{
    CampaignId, Channel, ContactId, ContactListId, ShippingRecordId, TenantId,
};
use courier_common::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct State {
    campaigns: HashMap<CampaignId, Campaign>,
    contacts: HashMap<ContactId, Contact>,
    lists: HashMap<ContactListId, Vec<ContactId>>,
    campaign_sets: HashMap<CampaignId, Vec<SetMember>>,
    /// Records in reservation order
    records: Vec<ShippingRecord>,
    by_id: HashMap<ShippingRecordId, usize>,
    by_address: HashMap<(CampaignId, String), usize>,
    by_external_id: HashMap<String, Vec<usize>>,
}

impl State {
    fn position(&self, id: ShippingRecordId) -> Result<usize> {
        self.by_id
            .get(&id)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("Shipping record {}", id)))
    }

    fn record_mut(&mut self, id: ShippingRecordId) -> Result<&mut ShippingRecord> {
        let index = self.position(id)?;
        Ok(&mut self.records[index])
    }

    fn push_record(&mut self, record: ShippingRecord) {
        let index = self.records.len();
        self.by_id.insert(record.id, index);
        self.by_address
            .insert((record.campaign_id, record.address.clone()), index);
        if let Some(ext) = &record.external_id {
            self.by_external_id.entry(ext.clone()).or_default().push(index);
        }
        self.records.push(record);
    }

    /// Rebuild every index after records were removed
    fn reindex(&mut self) {
        let records = std::mem::take(&mut self.records);
        self.by_id.clear();
        self.by_address.clear();
        self.by_external_id.clear();
        for record in records {
            self.push_record(record);
        }
    }

    fn transition(
        &mut self,
        index: usize,
        status: ShippingStatus,
        error_message: Option<&str>,
        external_id: Option<&str>,
    ) -> Result<Option<ShippingRecord>> {
        let current = &self.records[index];
        match current.status.check_transition(status) {
            TransitionCheck::Allowed => {}
            TransitionCheck::Stale => return Ok(None),
            TransitionCheck::Rejected => {
                return Err(Error::Validation(format!(
                    "Shipping record {} cannot move from {} to {}",
                    current.id, current.status, status
                )));
            }
        }

        let delta = CounterDelta::for_transition(current, status);
        let campaign_id = current.campaign_id;
        let now = Utc::now();

        let record = &mut self.records[index];
        record.apply_status(status, error_message, external_id, now);
        let updated = record.clone();
        if let Some(ext) = external_id {
            let positions = self.by_external_id.entry(ext.to_string()).or_default();
            if !positions.contains(&index) {
                positions.push(index);
            }
        }

        if let Some(campaign) = self.campaigns.get_mut(&campaign_id) {
            campaign.counters.apply(delta);
            campaign.updated_at = now;
        }
        Ok(Some(updated))
    }
}

/// In-memory persistence store
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with a database error
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Database("store unavailable".to_string()));
        }
        Ok(())
    }

    /// Add a contact to the directory
    pub async fn insert_contact(&self, contact: Contact) {
        self.state.lock().await.contacts.insert(contact.id, contact);
    }

    /// Add a contact to a contact list
    pub async fn add_to_list(&self, list_id: ContactListId, contact_id: ContactId) {
        let mut state = self.state.lock().await;
        let members = state.lists.entry(list_id).or_default();
        if !members.contains(&contact_id) {
            members.push(contact_id);
        }
    }

    /// Every shipping record of a campaign, in reservation order
    pub async fn records(&self, campaign_id: CampaignId) -> Vec<ShippingRecord> {
        self.state
            .lock()
            .await
            .records
            .iter()
            .filter(|r| r.campaign_id == campaign_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CampaignStore for MemoryStore {
    async fn create(&self, input: NewCampaign) -> Result<Campaign> {
        self.check()?;
        input.validate()?;

        let now = Utc::now();
        let campaign = Campaign {
            id: Uuid::now_v7(),
            tenant_id: input.tenant_id,
            name: input.name,
            channel: input.channel,
            content: input.content,
            targeting: input.targeting,
            policy: input.policy,
            status: if input.scheduled_at.is_some() {
                CampaignStatus::Scheduled
            } else {
                CampaignStatus::Draft
            },
            scheduled_at: input.scheduled_at,
            started_at: None,
            completed_at: None,
            counters: CampaignCounters::default(),
            created_at: now,
            updated_at: now,
        };

        self.state
            .lock()
            .await
            .campaigns
            .insert(campaign.id, campaign.clone());
        Ok(campaign)
    }

    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>> {
        self.check()?;
        Ok(self.state.lock().await.campaigns.get(&id).cloned())
    }

    async fn get_by_tenant(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
    ) -> Result<Option<Campaign>> {
        self.check()?;
        Ok(self
            .state
            .lock()
            .await
            .campaigns
            .get(&id)
            .filter(|c| c.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_by_status(&self, status: CampaignStatus) -> Result<Vec<Campaign>> {
        self.check()?;
        let state = self.state.lock().await;
        let mut campaigns: Vec<Campaign> = state
            .campaigns
            .values()
            .filter(|c| c.status == status)
            .cloned()
            .collect();
        campaigns.sort_by_key(|c| c.created_at);
        Ok(campaigns)
    }

    async fn list_scheduled_due(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>> {
        self.check()?;
        let state = self.state.lock().await;
        let mut campaigns: Vec<Campaign> = state
            .campaigns
            .values()
            .filter(|c| {
                c.status == CampaignStatus::Scheduled
                    && c.scheduled_at.map_or(false, |at| at <= now)
            })
            .cloned()
            .collect();
        campaigns.sort_by_key(|c| c.scheduled_at);
        Ok(campaigns)
    }

    async fn compare_and_set_status(
        &self,
        id: CampaignId,
        expected: &[CampaignStatus],
        to: CampaignStatus,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Campaign>> {
        self.check()?;
        let mut state = self.state.lock().await;
        let Some(campaign) = state.campaigns.get_mut(&id) else {
            return Ok(None);
        };
        if !expected.contains(&campaign.status) {
            return Ok(None);
        }

        let now = Utc::now();
        campaign.status = to;
        if scheduled_at.is_some() {
            campaign.scheduled_at = scheduled_at;
        }
        if to == CampaignStatus::Sending && campaign.started_at.is_none() {
            campaign.started_at = Some(now);
        }
        if to.is_terminal() {
            campaign.completed_at = Some(now);
        }
        campaign.updated_at = now;
        Ok(Some(campaign.clone()))
    }

    async fn set_total_recipients(&self, id: CampaignId, total: i32) -> Result<()> {
        self.check()?;
        if let Some(campaign) = self.state.lock().await.campaigns.get_mut(&id) {
            campaign.counters.total_recipients = total;
            campaign.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[async_trait]
impl ContactDirectory for MemoryStore {
    async fn list_members(
        &self,
        tenant_id: TenantId,
        list_id: ContactListId,
    ) -> Result<Vec<Contact>> {
        self.check()?;
        let state = self.state.lock().await;
        let mut contacts: Vec<Contact> = state
            .lists
            .get(&list_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.contacts.get(id))
            .filter(|c| c.tenant_id == tenant_id)
            .cloned()
            .collect();
        contacts.sort_by_key(|c| c.id);
        Ok(contacts)
    }

    async fn active_since(
        &self,
        tenant_id: TenantId,
        since: DateTime<Utc>,
    ) -> Result<Vec<Contact>> {
        self.check()?;
        let state = self.state.lock().await;
        let mut contacts: Vec<Contact> = state
            .contacts
            .values()
            .filter(|c| {
                c.tenant_id == tenant_id && c.last_interaction_at.map_or(false, |at| at >= since)
            })
            .cloned()
            .collect();
        contacts.sort_by_key(|c| c.id);
        Ok(contacts)
    }

    async fn campaign_set(&self, campaign_id: CampaignId) -> Result<Vec<SetMember>> {
        self.check()?;
        Ok(self
            .state
            .lock()
            .await
            .campaign_sets
            .get(&campaign_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn materialize(&self, campaign_id: CampaignId, members: &[SetMember]) -> Result<u64> {
        self.check()?;
        let mut state = self.state.lock().await;
        let set = state.campaign_sets.entry(campaign_id).or_default();
        if !set.is_empty() {
            return Ok(0);
        }
        set.extend_from_slice(members);
        Ok(members.len() as u64)
    }
}

#[async_trait]
impl ShippingLedger for MemoryStore {
    async fn reserve(
        &self,
        campaign: &Campaign,
        recipient: &Recipient,
        reserved_at: DateTime<Utc>,
    ) -> Result<Reservation> {
        self.check()?;
        let mut state = self.state.lock().await;
        if let Some(&index) = state
            .by_address
            .get(&(campaign.id, recipient.address.clone()))
        {
            return Ok(Reservation::AlreadyReserved(state.records[index].clone()));
        }

        let record = ShippingRecord {
            id: Uuid::now_v7(),
            campaign_id: campaign.id,
            tenant_id: campaign.tenant_id,
            contact_id: recipient.contact_id,
            address: recipient.address.clone(),
            display_name: recipient.display_name.clone(),
            subject: None,
            content: None,
            composition_degraded: false,
            status: ShippingStatus::Pending,
            error_message: None,
            external_id: None,
            reserved_at,
            sent_at: None,
            delivered_at: None,
            opened_at: None,
            replied_at: None,
            updated_at: reserved_at,
        };
        state.push_record(record.clone());
        Ok(Reservation::Acquired(record))
    }

    async fn attach_content(
        &self,
        id: ShippingRecordId,
        content: &ComposedContent,
    ) -> Result<()> {
        self.check()?;
        let mut state = self.state.lock().await;
        let record = state.record_mut(id)?;
        if record.status != ShippingStatus::Pending {
            return Err(Error::Conflict(format!(
                "Shipping record {} is not pending",
                id
            )));
        }
        record.subject = content.subject.clone();
        record.content = Some(content.body.clone());
        record.composition_degraded = content.degraded;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn record_outcome(
        &self,
        id: ShippingRecordId,
        status: ShippingStatus,
        error_message: Option<&str>,
        external_id: Option<&str>,
    ) -> Result<Option<ShippingRecord>> {
        self.check()?;
        let mut state = self.state.lock().await;
        let index = state.position(id)?;
        state.transition(index, status, error_message, external_id)
    }

    async fn release(&self, id: ShippingRecordId) -> Result<bool> {
        self.check()?;
        let mut state = self.state.lock().await;
        let Ok(index) = state.position(id) else {
            return Ok(false);
        };
        if state.records[index].status != ShippingStatus::Pending {
            return Ok(false);
        }
        state.records.remove(index);
        state.reindex();
        Ok(true)
    }

    async fn apply_provider_event(
        &self,
        channel: Channel,
        external_id: &str,
        event: &ProviderEvent,
    ) -> Result<Option<ShippingRecord>> {
        self.check()?;
        let mut state = self.state.lock().await;
        let index = state
            .by_external_id
            .get(external_id)
            .into_iter()
            .flatten()
            .copied()
            .find(|&i| {
                state
                    .campaigns
                    .get(&state.records[i].campaign_id)
                    .map_or(false, |c| c.channel == channel)
            })
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "No {} shipping record for external id {}",
                    channel, external_id
                ))
            })?;
        state.transition(index, event.status(), event.error_message(), None)
    }

    async fn get_record(&self, id: ShippingRecordId) -> Result<Option<ShippingRecord>> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state.position(id).ok().map(|i| state.records[i].clone()))
    }

    async fn reserved_addresses(&self, campaign_id: CampaignId) -> Result<HashSet<String>> {
        self.check()?;
        Ok(self
            .state
            .lock()
            .await
            .records
            .iter()
            .filter(|r| r.campaign_id == campaign_id)
            .map(|r| r.address.clone())
            .collect())
    }

    async fn count_reserved_since(
        &self,
        campaign_id: CampaignId,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        self.check()?;
        Ok(self
            .state
            .lock()
            .await
            .records
            .iter()
            .filter(|r| r.campaign_id == campaign_id && r.reserved_at >= since)
            .count() as i64)
    }

    async fn status_counts(&self, campaign_id: CampaignId) -> Result<StatusCounts> {
        self.check()?;
        let state = self.state.lock().await;
        let mut counts = StatusCounts::default();
        for record in state.records.iter().filter(|r| r.campaign_id == campaign_id) {
            counts.add(record.status, 1);
        }
        Ok(counts)
    }

    async fn list(
        &self,
        campaign_id: CampaignId,
        status: Option<ShippingStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ShippingRecord>> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state
            .records
            .iter()
            .filter(|r| r.campaign_id == campaign_id)
            .filter(|r| status.map_or(true, |s| r.status == s))
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn fail_stale_pending(
        &self,
        campaign_id: CampaignId,
        older_than: DateTime<Utc>,
    ) -> Result<u64> {
        self.check()?;
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut closed = 0;
        for record in state.records.iter_mut().filter(|r| {
            r.campaign_id == campaign_id
                && r.status == ShippingStatus::Pending
                && r.reserved_at < older_than
        }) {
            record.apply_status(ShippingStatus::Failed, Some(INTERRUPTED_MESSAGE), None, now);
            closed += 1;
        }
        if closed > 0 {
            if let Some(campaign) = state.campaigns.get_mut(&campaign_id) {
                campaign.counters.total_failed += closed as i32;
                campaign.updated_at = now;
            }
        }
        Ok(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CampaignContent, ContactSource, Targeting, ThroughputPolicy};
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn new_campaign() -> NewCampaign {
        NewCampaign {
            tenant_id: Uuid::new_v4(),
            name: "Launch".to_string(),
            channel: Channel::Whatsapp,
            content: CampaignContent {
                subject: None,
                body: "Hi {{name}}".to_string(),
                use_ai_variation: false,
                variation_prompt: None,
            },
            targeting: Targeting {
                contact_source: ContactSource::Import,
                list_id: None,
                active_days_filter: 0,
            },
            policy: ThroughputPolicy::default(),
            scheduled_at: None,
        }
    }

    fn recipient(address: &str) -> Recipient {
        Recipient {
            contact_id: None,
            address: address.to_string(),
            display_name: None,
            phone: Some(address.to_string()),
            email: None,
            fields: serde_json::json!({}),
        }
    }

    async fn sent_record(store: &MemoryStore, campaign: &Campaign, address: &str) -> ShippingRecord {
        let Reservation::Acquired(record) = store
            .reserve(campaign, &recipient(address), Utc::now())
            .await
            .unwrap()
        else {
            panic!("expected a fresh reservation");
        };
        store
            .record_outcome(record.id, ShippingStatus::Sent, None, Some(&format!("ext-{}", address)))
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_compare_and_set_status() {
        let store = MemoryStore::new();
        let campaign = store.create(new_campaign()).await.unwrap();
        assert_eq!(campaign.status, CampaignStatus::Draft);

        let started = store
            .compare_and_set_status(
                campaign.id,
                &[CampaignStatus::Draft, CampaignStatus::Scheduled],
                CampaignStatus::Sending,
                None,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(started.status, CampaignStatus::Sending);
        assert!(started.started_at.is_some());

        let again = store
            .compare_and_set_status(
                campaign.id,
                &[CampaignStatus::Draft, CampaignStatus::Scheduled],
                CampaignStatus::Sending,
                None,
            )
            .await
            .unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn test_reserve_is_exclusive() {
        let store = MemoryStore::new();
        let campaign = store.create(new_campaign()).await.unwrap();

        let first = store
            .reserve(&campaign, &recipient("+5511900000001"), Utc::now())
            .await
            .unwrap();
        let second = store
            .reserve(&campaign, &recipient("+5511900000001"), Utc::now())
            .await
            .unwrap();

        assert!(matches!(first, Reservation::Acquired(_)));
        assert!(matches!(second, Reservation::AlreadyReserved(_)));
        assert_eq!(first.record().id, second.record().id);
        assert_eq!(store.records(campaign.id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_outcomes_update_counters() {
        let store = MemoryStore::new();
        let campaign = store.create(new_campaign()).await.unwrap();

        let a = sent_record(&store, &campaign, "+5511900000001").await;
        sent_record(&store, &campaign, "+5511900000002").await;

        store
            .apply_provider_event(Channel::Whatsapp, "ext-+5511900000002", &ProviderEvent::Replied)
            .await
            .unwrap();
        store
            .apply_provider_event(
                Channel::Whatsapp,
                a.external_id.as_deref().unwrap(),
                &ProviderEvent::Bounced { reason: None },
            )
            .await
            .unwrap();

        let counters = store.get(campaign.id).await.unwrap().unwrap().counters;
        assert_eq!(counters.total_sent, 1);
        assert_eq!(counters.total_failed, 1);
        assert_eq!(counters.total_opened, 1);
        assert_eq!(counters.total_replied, 1);

        let counts = store.status_counts(campaign.id).await.unwrap();
        assert_eq!(counts.sent_side(), counters.total_sent as i64);
        assert_eq!(counts.failed_side(), counters.total_failed as i64);
    }

    #[tokio::test]
    async fn test_stale_and_rejected_events() {
        let store = MemoryStore::new();
        let campaign = store.create(new_campaign()).await.unwrap();
        let record = sent_record(&store, &campaign, "+5511900000001").await;
        let ext = record.external_id.clone().unwrap();

        store.apply_provider_event(Channel::Whatsapp, &ext, &ProviderEvent::Opened).await.unwrap();
        let stale = store
            .apply_provider_event(Channel::Whatsapp, &ext, &ProviderEvent::Delivered)
            .await
            .unwrap();
        assert!(stale.is_none());

        let rejected = store
            .record_outcome(record.id, ShippingStatus::Failed, Some("late"), None)
            .await;
        assert!(matches!(rejected, Err(Error::Validation(_))));

        let unknown = store
            .apply_provider_event(Channel::Whatsapp, "missing", &ProviderEvent::Delivered)
            .await;
        assert!(matches!(unknown, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_fail_stale_pending() {
        let store = MemoryStore::new();
        let campaign = store.create(new_campaign()).await.unwrap();
        let old = Utc::now() - Duration::hours(1);

        store
            .reserve(&campaign, &recipient("+5511900000001"), old)
            .await
            .unwrap();
        store
            .reserve(&campaign, &recipient("+5511900000002"), Utc::now())
            .await
            .unwrap();

        let closed = store
            .fail_stale_pending(campaign.id, Utc::now() - Duration::minutes(15))
            .await
            .unwrap();
        assert_eq!(closed, 1);

        let records = store.records(campaign.id).await;
        assert_eq!(records[0].status, ShippingStatus::Failed);
        assert_eq!(records[0].error_message.as_deref(), Some(INTERRUPTED_MESSAGE));
        assert_eq!(records[1].status, ShippingStatus::Pending);
        assert_eq!(
            store.get(campaign.id).await.unwrap().unwrap().counters.total_failed,
            1
        );
    }

    #[tokio::test]
    async fn test_bounce_after_open() {
        let store = MemoryStore::new();
        let campaign = store.create(new_campaign()).await.unwrap();
        let record = sent_record(&store, &campaign, "+5511900000001").await;
        let ext = record.external_id.clone().unwrap();

        store.apply_provider_event(Channel::Whatsapp, &ext, &ProviderEvent::Opened).await.unwrap();
        let bounced = store
            .apply_provider_event(
                Channel::Whatsapp,
                &ext,
                &ProviderEvent::Bounced { reason: Some("mailbox gone".to_string()) },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bounced.status, ShippingStatus::Bounced);

        let counters = store.get(campaign.id).await.unwrap().unwrap().counters;
        assert_eq!(counters.total_sent, 0);
        assert_eq!(counters.total_failed, 1);
        assert_eq!(counters.total_opened, 1);
    }

    #[tokio::test]
    async fn test_provider_event_scoped_by_channel() {
        let store = MemoryStore::new();
        let whatsapp = store.create(new_campaign()).await.unwrap();
        let mut email = new_campaign();
        email.channel = Channel::Email;
        email.content.subject = Some("Hi".to_string());
        let email = store.create(email).await.unwrap();

        // Both providers hand out the same id
        for campaign in [&whatsapp, &email] {
            let Reservation::Acquired(record) = store
                .reserve(campaign, &recipient("+5511900000001"), Utc::now())
                .await
                .unwrap()
            else {
                panic!("expected a fresh reservation");
            };
            store
                .record_outcome(record.id, ShippingStatus::Sent, None, Some("id-1"))
                .await
                .unwrap();
        }

        let updated = store
            .apply_provider_event(Channel::Email, "id-1", &ProviderEvent::Delivered)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.campaign_id, email.id);
        assert_eq!(store.records(whatsapp.id).await[0].status, ShippingStatus::Sent);
    }

    #[tokio::test]
    async fn test_release_pending_only() {
        let store = MemoryStore::new();
        let campaign = store.create(new_campaign()).await.unwrap();
        let sent = sent_record(&store, &campaign, "+5511900000001").await;
        let pending = store
            .reserve(&campaign, &recipient("+5511900000002"), Utc::now())
            .await
            .unwrap()
            .record()
            .clone();

        assert!(!store.release(sent.id).await.unwrap());
        assert!(store.release(pending.id).await.unwrap());
        assert!(store.get_record(pending.id).await.unwrap().is_none());

        // Indexes still point at the surviving record
        assert_eq!(store.get_record(sent.id).await.unwrap().unwrap().id, sent.id);
        let again = store
            .reserve(&campaign, &recipient("+5511900000002"), Utc::now())
            .await
            .unwrap();
        assert!(matches!(again, Reservation::Acquired(_)));
        assert_eq!(store.reserved_addresses(campaign.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_materialize_once() {
        let store = MemoryStore::new();
        let campaign_id = Uuid::new_v4();
        let member = SetMember {
            contact_id: None,
            name: Some("Ana".to_string()),
            phone: Some("+5511900000001".to_string()),
            email: None,
            fields: serde_json::json!({}),
        };

        assert_eq!(store.materialize(campaign_id, &[member.clone()]).await.unwrap(), 1);
        assert_eq!(store.materialize(campaign_id, &[member.clone(), member]).await.unwrap(), 0);
        assert_eq!(store.campaign_set(campaign_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(store.create(new_campaign()).await, Err(Error::Database(_))));
        store.set_unavailable(false);
        assert!(store.create(new_campaign()).await.is_ok());
    }
}
