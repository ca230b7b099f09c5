//! Domain models for campaigns, contacts and shipping records

use chrono::{DateTime, Utc};
use courier_common::types::{
    CampaignId, Channel, ContactId, ContactListId, ShippingRecordId, TenantId,
};
use courier_common::{Error, Result};
use serde::{Deserialize, Serialize};

// ============================================================================
// Campaigns
// ============================================================================

/// Campaign lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Paused,
    Completed,
    Cancelled,
}

impl CampaignStatus {
    pub const ALL: [CampaignStatus; 6] = [
        CampaignStatus::Draft,
        CampaignStatus::Scheduled,
        CampaignStatus::Sending,
        CampaignStatus::Paused,
        CampaignStatus::Completed,
        CampaignStatus::Cancelled,
    ];

    /// No transition leaves a terminal status
    pub fn is_terminal(self) -> bool {
        matches!(self, CampaignStatus::Completed | CampaignStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Sending => "sending",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(CampaignStatus::Draft),
            "scheduled" => Ok(CampaignStatus::Scheduled),
            "sending" => Ok(CampaignStatus::Sending),
            "paused" => Ok(CampaignStatus::Paused),
            "completed" => Ok(CampaignStatus::Completed),
            "cancelled" => Ok(CampaignStatus::Cancelled),
            _ => Err(Error::Validation(format!("Invalid campaign status: {}", s))),
        }
    }
}

/// Where a campaign's recipients come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactSource {
    /// Members of a contact list
    List,
    /// Contacts active within the last N days, snapshotted at start
    Active,
    /// A set materialized for this campaign ahead of time
    Import,
}

impl ContactSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ContactSource::List => "list",
            ContactSource::Active => "active",
            ContactSource::Import => "import",
        }
    }
}

impl std::fmt::Display for ContactSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContactSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "list" => Ok(ContactSource::List),
            "active" => Ok(ContactSource::Active),
            "import" => Ok(ContactSource::Import),
            _ => Err(Error::Validation(format!("Invalid contact source: {}", s))),
        }
    }
}

/// Message templates of a campaign
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignContent {
    /// Subject template, required for email
    pub subject: Option<String>,
    /// Body template (plain text for WhatsApp, HTML for email)
    pub body: String,
    /// Ask the variation service for a per-recipient paraphrase
    #[serde(default)]
    pub use_ai_variation: bool,
    /// Style hints passed to the variation service
    pub variation_prompt: Option<String>,
}

/// Recipient selection of a campaign
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Targeting {
    pub contact_source: ContactSource,
    pub list_id: Option<ContactListId>,
    /// Only meaningful for `ContactSource::Active`
    #[serde(default)]
    pub active_days_filter: i32,
}

/// Throughput policy enforced by the rate governor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThroughputPolicy {
    /// Recipients per batch, at least 1
    pub batch_size: i32,
    /// Seconds to wait between batches
    #[serde(default)]
    pub delay_between_batches: i32,
    /// Attempts per local day, 0 = unlimited
    #[serde(default)]
    pub daily_limit: i32,
    #[serde(default)]
    pub send_only_business_hours: bool,
    /// Cooldown after this many successful sends, 0 disables
    #[serde(default)]
    pub pause_after_messages: i32,
    /// Cooldown length in seconds
    #[serde(default)]
    pub pause_duration: i32,
}

impl Default for ThroughputPolicy {
    fn default() -> Self {
        Self {
            batch_size: 50,
            delay_between_batches: 60,
            daily_limit: 0,
            send_only_business_hours: false,
            pause_after_messages: 0,
            pause_duration: 0,
        }
    }
}

/// Denormalized aggregates, kept equal to the shipping record counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignCounters {
    pub total_recipients: i32,
    pub total_sent: i32,
    pub total_failed: i32,
    pub total_opened: i32,
    pub total_replied: i32,
}

impl CampaignCounters {
    pub fn apply(&mut self, delta: CounterDelta) {
        self.total_sent += delta.sent;
        self.total_failed += delta.failed;
        self.total_opened += delta.opened;
        self.total_replied += delta.replied;
    }
}

/// Campaign model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub tenant_id: TenantId,
    pub name: String,
    pub channel: Channel,
    pub content: CampaignContent,
    pub targeting: Targeting,
    pub policy: ThroughputPolicy,
    pub status: CampaignStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub counters: CampaignCounters,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Calculate progress percentage
    pub fn progress_percentage(&self) -> f64 {
        let c = &self.counters;
        if c.total_recipients == 0 {
            0.0
        } else {
            ((c.total_sent + c.total_failed) as f64 / c.total_recipients as f64) * 100.0
        }
    }
}

/// Create campaign input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCampaign {
    pub tenant_id: TenantId,
    pub name: String,
    pub channel: Channel,
    pub content: CampaignContent,
    pub targeting: Targeting,
    #[serde(default)]
    pub policy: ThroughputPolicy,
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl NewCampaign {
    /// Validate the content, targeting and policy fields
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("Campaign name is required".to_string()));
        }
        if self.content.body.trim().is_empty() {
            return Err(Error::Validation("Body template is required".to_string()));
        }
        if self.channel == Channel::Email
            && self
                .content
                .subject
                .as_deref()
                .map_or(true, |s| s.trim().is_empty())
        {
            return Err(Error::Validation("Email campaigns require a subject".to_string()));
        }
        match self.targeting.contact_source {
            ContactSource::List if self.targeting.list_id.is_none() => {
                return Err(Error::Validation(
                    "List campaigns require a list_id".to_string(),
                ));
            }
            ContactSource::Active if self.targeting.active_days_filter < 1 => {
                return Err(Error::Validation(
                    "active_days_filter must be at least 1".to_string(),
                ));
            }
            _ => {}
        }

        let p = &self.policy;
        if p.batch_size < 1 {
            return Err(Error::Validation("batch_size must be at least 1".to_string()));
        }
        if p.delay_between_batches < 0 || p.daily_limit < 0 {
            return Err(Error::Validation(
                "delay_between_batches and daily_limit must not be negative".to_string(),
            ));
        }
        if p.pause_after_messages < 0 || p.pause_duration < 0 {
            return Err(Error::Validation(
                "pause_after_messages and pause_duration must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Contacts and recipients
// ============================================================================

/// Contact as supplied by the contact directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub tenant_id: TenantId,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    /// Custom fields available to templates
    pub fields: serde_json::Value,
    pub last_interaction_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Entry of a campaign's materialized recipient set
///
/// Holds raw contact data; normalization happens when the set is resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetMember {
    #[serde(default)]
    pub contact_id: Option<ContactId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default = "empty_fields")]
    pub fields: serde_json::Value,
}

fn empty_fields() -> serde_json::Value {
    serde_json::json!({})
}

impl From<&Contact> for SetMember {
    fn from(contact: &Contact) -> Self {
        Self {
            contact_id: Some(contact.id),
            name: contact.name.clone(),
            phone: contact.phone.clone(),
            email: contact.email.clone(),
            fields: contact.fields.clone(),
        }
    }
}

/// A resolved, sendable recipient of one campaign
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub contact_id: Option<ContactId>,
    /// Normalized phone number or email, unique per campaign
    pub address: String,
    pub display_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub fields: serde_json::Value,
}

/// Content composed for one recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposedContent {
    pub subject: Option<String>,
    pub body: String,
    /// The variation service was requested but the base content was used
    #[serde(default)]
    pub degraded: bool,
}

// ============================================================================
// Shipping records
// ============================================================================

/// Per-recipient send outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShippingStatus {
    Pending,
    Sent,
    Delivered,
    Opened,
    Replied,
    Failed,
    Bounced,
}

/// Result of checking a shipping status transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCheck {
    Allowed,
    /// An older forward event arriving after a newer one; ignored
    Stale,
    Rejected,
}

impl ShippingStatus {
    pub const ALL: [ShippingStatus; 7] = [
        ShippingStatus::Pending,
        ShippingStatus::Sent,
        ShippingStatus::Delivered,
        ShippingStatus::Opened,
        ShippingStatus::Replied,
        ShippingStatus::Failed,
        ShippingStatus::Bounced,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ShippingStatus::Pending => "pending",
            ShippingStatus::Sent => "sent",
            ShippingStatus::Delivered => "delivered",
            ShippingStatus::Opened => "opened",
            ShippingStatus::Replied => "replied",
            ShippingStatus::Failed => "failed",
            ShippingStatus::Bounced => "bounced",
        }
    }

    /// Counted in `total_sent`
    pub fn is_sent_side(self) -> bool {
        matches!(
            self,
            ShippingStatus::Sent
                | ShippingStatus::Delivered
                | ShippingStatus::Opened
                | ShippingStatus::Replied
        )
    }

    /// Counted in `total_failed`
    pub fn is_failed_side(self) -> bool {
        matches!(self, ShippingStatus::Failed | ShippingStatus::Bounced)
    }

    fn progress_rank(self) -> Option<u8> {
        match self {
            ShippingStatus::Sent => Some(1),
            ShippingStatus::Delivered => Some(2),
            ShippingStatus::Opened => Some(3),
            ShippingStatus::Replied => Some(4),
            _ => None,
        }
    }

    /// Check whether a record may move from `self` to `next`
    pub fn check_transition(self, next: ShippingStatus) -> TransitionCheck {
        use ShippingStatus::*;

        match (self, next) {
            (Pending, Sent) | (Pending, Failed) => TransitionCheck::Allowed,
            (Pending, _) => TransitionCheck::Rejected,
            (Failed, _) | (Bounced, _) => TransitionCheck::Rejected,
            (_, Pending) | (_, Failed) => TransitionCheck::Rejected,
            (Sent, Bounced) | (Delivered, Bounced) | (Opened, Bounced) => TransitionCheck::Allowed,
            (_, Bounced) => TransitionCheck::Rejected,
            (from, to) => match (from.progress_rank(), to.progress_rank()) {
                (Some(a), Some(b)) if b > a => TransitionCheck::Allowed,
                (Some(_), Some(_)) => TransitionCheck::Stale,
                _ => TransitionCheck::Rejected,
            },
        }
    }
}

impl std::fmt::Display for ShippingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ShippingStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ShippingStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("Invalid shipping status: {}", s)))
    }
}

/// Counter changes caused by one shipping record transition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterDelta {
    pub sent: i32,
    pub failed: i32,
    pub opened: i32,
    pub replied: i32,
}

impl CounterDelta {
    /// Delta for moving `record` to `next`; a reply implies the message was opened
    pub fn for_transition(record: &ShippingRecord, next: ShippingStatus) -> Self {
        let side = |s: ShippingStatus| (s.is_sent_side() as i32, s.is_failed_side() as i32);
        let (old_sent, old_failed) = side(record.status);
        let (new_sent, new_failed) = side(next);

        let opens = matches!(next, ShippingStatus::Opened | ShippingStatus::Replied);
        let replies = next == ShippingStatus::Replied;

        Self {
            sent: new_sent - old_sent,
            failed: new_failed - old_failed,
            opened: (opens && record.opened_at.is_none()) as i32,
            replied: (replies && record.replied_at.is_none()) as i32,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// Shipping record: one per (campaign, recipient address)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingRecord {
    pub id: ShippingRecordId,
    pub campaign_id: CampaignId,
    pub tenant_id: TenantId,
    pub contact_id: Option<ContactId>,
    pub address: String,
    pub display_name: Option<String>,
    pub subject: Option<String>,
    pub content: Option<String>,
    pub composition_degraded: bool,
    pub status: ShippingStatus,
    pub error_message: Option<String>,
    pub external_id: Option<String>,
    pub reserved_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub replied_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ShippingRecord {
    /// Apply an accepted transition to the in-memory record
    pub fn apply_status(
        &mut self,
        next: ShippingStatus,
        error_message: Option<&str>,
        external_id: Option<&str>,
        now: DateTime<Utc>,
    ) {
        self.status = next;
        self.updated_at = now;
        if let Some(error) = error_message {
            self.error_message = Some(error.to_string());
        }
        if let Some(id) = external_id {
            self.external_id = Some(id.to_string());
        }
        match next {
            ShippingStatus::Sent => self.sent_at = Some(now),
            ShippingStatus::Delivered => {
                self.delivered_at.get_or_insert(now);
            }
            ShippingStatus::Opened => {
                self.opened_at.get_or_insert(now);
            }
            ShippingStatus::Replied => {
                self.opened_at.get_or_insert(now);
                self.replied_at.get_or_insert(now);
            }
            ShippingStatus::Pending | ShippingStatus::Failed | ShippingStatus::Bounced => {}
        }
    }
}

/// Shipping record counts by status for one campaign
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: i64,
    pub sent: i64,
    pub delivered: i64,
    pub opened: i64,
    pub replied: i64,
    pub failed: i64,
    pub bounced: i64,
}

impl StatusCounts {
    pub fn add(&mut self, status: ShippingStatus, n: i64) {
        match status {
            ShippingStatus::Pending => self.pending += n,
            ShippingStatus::Sent => self.sent += n,
            ShippingStatus::Delivered => self.delivered += n,
            ShippingStatus::Opened => self.opened += n,
            ShippingStatus::Replied => self.replied += n,
            ShippingStatus::Failed => self.failed += n,
            ShippingStatus::Bounced => self.bounced += n,
        }
    }

    pub fn total(&self) -> i64 {
        self.pending + self.sent_side() + self.failed_side()
    }

    pub fn sent_side(&self) -> i64 {
        self.sent + self.delivered + self.opened + self.replied
    }

    pub fn failed_side(&self) -> i64 {
        self.failed + self.bounced
    }
}

/// Asynchronous provider callback event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProviderEvent {
    Delivered,
    Opened,
    Replied,
    Bounced { reason: Option<String> },
}

impl ProviderEvent {
    pub fn status(&self) -> ShippingStatus {
        match self {
            ProviderEvent::Delivered => ShippingStatus::Delivered,
            ProviderEvent::Opened => ShippingStatus::Opened,
            ProviderEvent::Replied => ShippingStatus::Replied,
            ProviderEvent::Bounced { .. } => ShippingStatus::Bounced,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            ProviderEvent::Bounced { reason } => Some(reason.as_deref().unwrap_or("bounced")),
            _ => None,
        }
    }
}

/// Campaign report: counters, status counts and one page of records
#[derive(Debug, Clone, Serialize)]
pub struct CampaignReport {
    pub campaign_id: CampaignId,
    pub status: CampaignStatus,
    pub counters: CampaignCounters,
    pub counts: StatusCounts,
    pub progress_percentage: f64,
    pub records: Vec<ShippingRecord>,
    pub limit: i64,
    pub offset: i64,
}
