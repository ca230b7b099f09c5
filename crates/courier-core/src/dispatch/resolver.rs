//! Recipient Resolver - Produces the ordered, deduplicated recipient sequence

use crate::clock::Clock;
use chrono::Duration;
use courier_common::types::{Channel, EmailAddress, PhoneNumber};
use courier_common::{Error, Result};
use courier_storage::models::{Campaign, ContactSource, Recipient, SetMember};
use courier_storage::repository::ContactDirectory;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Resolves a campaign's targeting into recipients
#[derive(Clone)]
pub struct RecipientResolver {
    contacts: Arc<dyn ContactDirectory>,
    clock: Arc<dyn Clock>,
}

impl RecipientResolver {
    pub fn new(contacts: Arc<dyn ContactDirectory>, clock: Arc<dyn Clock>) -> Self {
        Self { contacts, clock }
    }

    /// Resolve the campaign's recipients in deterministic order.
    ///
    /// The `active` source is evaluated once and snapshotted into the
    /// campaign's recipient set; later calls read the snapshot.
    pub async fn resolve(&self, campaign: &Campaign) -> Result<Vec<Recipient>> {
        let members = match campaign.targeting.contact_source {
            ContactSource::List => {
                let list_id = campaign.targeting.list_id.ok_or_else(|| {
                    Error::Validation(format!("Campaign {} has no contact list", campaign.id))
                })?;
                self.contacts
                    .list_members(campaign.tenant_id, list_id)
                    .await?
                    .iter()
                    .map(SetMember::from)
                    .collect()
            }
            ContactSource::Active => self.active_snapshot(campaign).await?,
            ContactSource::Import => self.contacts.campaign_set(campaign.id).await?,
        };

        let recipients = normalize(campaign.channel, members);
        debug!(
            campaign_id = %campaign.id,
            source = %campaign.targeting.contact_source,
            count = recipients.len(),
            "Resolved recipients"
        );
        Ok(recipients)
    }

    async fn active_snapshot(&self, campaign: &Campaign) -> Result<Vec<SetMember>> {
        let existing = self.contacts.campaign_set(campaign.id).await?;
        if !existing.is_empty() {
            return Ok(existing);
        }

        let since =
            self.clock.now() - Duration::days(i64::from(campaign.targeting.active_days_filter));
        let members: Vec<SetMember> = self
            .contacts
            .active_since(campaign.tenant_id, since)
            .await?
            .iter()
            .map(SetMember::from)
            .collect();

        let stored = self.contacts.materialize(campaign.id, &members).await?;
        if stored > 0 {
            info!(
                campaign_id = %campaign.id,
                count = stored,
                "Snapshotted active contacts"
            );
            return Ok(members);
        }

        // Another worker may have taken the snapshot first
        self.contacts.campaign_set(campaign.id).await
    }
}

/// Normalize addresses, drop members without the channel's medium and
/// deduplicate by address (first occurrence wins)
pub(crate) fn normalize(channel: Channel, members: Vec<SetMember>) -> Vec<Recipient> {
    let mut seen = HashSet::new();
    let mut recipients = Vec::with_capacity(members.len());

    for member in members {
        let phone = member
            .phone
            .as_deref()
            .and_then(PhoneNumber::parse)
            .map(|p| p.to_string());
        let email = member
            .email
            .as_deref()
            .and_then(EmailAddress::parse)
            .map(|e| e.to_string());

        let address = match channel {
            Channel::Whatsapp => phone.clone(),
            Channel::Email => email.clone(),
        };
        let Some(address) = address else {
            continue;
        };
        if !seen.insert(address.clone()) {
            continue;
        }

        recipients.push(Recipient {
            contact_id: member.contact_id,
            address,
            display_name: member.name.filter(|n| !n.trim().is_empty()),
            phone,
            email,
            fields: member.fields,
        });
    }

    recipients
}
