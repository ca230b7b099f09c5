//! Shipping ledger: per-recipient delivery records

use crate::db::{db_err, DatabasePool};
use crate::models::{
    Campaign, ComposedContent, CounterDelta, ProviderEvent, Recipient, ShippingRecord,
    ShippingStatus, StatusCounts, TransitionCheck,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_common::types::{CampaignId, Channel, ShippingRecordId};
use courier_common::{Error, Result};
use sqlx::{FromRow, Postgres, Transaction};
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

/// Result of reserving a recipient
#[derive(Debug, Clone)]
pub enum Reservation {
    /// A new PENDING record; the caller owns the send
    Acquired(ShippingRecord),
    /// The address already has a record for this campaign; skip it
    AlreadyReserved(ShippingRecord),
}

impl Reservation {
    pub fn record(&self) -> &ShippingRecord {
        match self {
            Reservation::Acquired(r) | Reservation::AlreadyReserved(r) => r,
        }
    }
}

/// Shipping ledger trait
#[async_trait]
pub trait ShippingLedger: Send + Sync {
    /// Insert a PENDING record for (campaign, address), or return the existing one
    async fn reserve(
        &self,
        campaign: &Campaign,
        recipient: &Recipient,
        reserved_at: DateTime<Utc>,
    ) -> Result<Reservation>;
    /// Store the composed content on a record before it is sent
    async fn attach_content(&self, id: ShippingRecordId, content: &ComposedContent)
        -> Result<()>;
    /// Move a record to `status` and update the campaign counters atomically.
    ///
    /// Returns `None` for stale events, `Error::Validation` for rejected ones.
    async fn record_outcome(
        &self,
        id: ShippingRecordId,
        status: ShippingStatus,
        error_message: Option<&str>,
        external_id: Option<&str>,
    ) -> Result<Option<ShippingRecord>>;
    /// Give up a PENDING reservation whose send was never accepted by the provider.
    ///
    /// Returns `false` when the record is gone or no longer pending.
    async fn release(&self, id: ShippingRecordId) -> Result<bool>;
    /// Apply a provider callback to the `channel` record carrying `external_id`
    async fn apply_provider_event(
        &self,
        channel: Channel,
        external_id: &str,
        event: &ProviderEvent,
    ) -> Result<Option<ShippingRecord>>;
    async fn get_record(&self, id: ShippingRecordId) -> Result<Option<ShippingRecord>>;
    async fn reserved_addresses(&self, campaign_id: CampaignId) -> Result<HashSet<String>>;
    /// Records reserved at or after `since`; attempts count against the daily limit
    async fn count_reserved_since(&self, campaign_id: CampaignId, since: DateTime<Utc>)
        -> Result<i64>;
    async fn status_counts(&self, campaign_id: CampaignId) -> Result<StatusCounts>;
    async fn list(
        &self,
        campaign_id: CampaignId,
        status: Option<ShippingStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ShippingRecord>>;
    /// Close PENDING records reserved before `older_than` as FAILED
    async fn fail_stale_pending(&self, campaign_id: CampaignId, older_than: DateTime<Utc>)
        -> Result<u64>;
}

/// Error message stored on records closed by stale-reservation recovery
pub const INTERRUPTED_MESSAGE: &str = "interrupted before outcome was recorded";

#[derive(FromRow)]
struct ShippingRecordRow {
    id: Uuid,
    campaign_id: Uuid,
    tenant_id: Uuid,
    contact_id: Option<Uuid>,
    address: String,
    display_name: Option<String>,
    subject: Option<String>,
    content: Option<String>,
    composition_degraded: bool,
    status: String,
    error_message: Option<String>,
    external_id: Option<String>,
    reserved_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    replied_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ShippingRecordRow> for ShippingRecord {
    type Error = Error;

    fn try_from(row: ShippingRecordRow) -> Result<Self> {
        Ok(ShippingRecord {
            id: row.id,
            campaign_id: row.campaign_id,
            tenant_id: row.tenant_id,
            contact_id: row.contact_id,
            address: row.address,
            display_name: row.display_name,
            subject: row.subject,
            content: row.content,
            composition_degraded: row.composition_degraded,
            status: row.status.parse()?,
            error_message: row.error_message,
            external_id: row.external_id,
            reserved_at: row.reserved_at,
            sent_at: row.sent_at,
            delivered_at: row.delivered_at,
            opened_at: row.opened_at,
            replied_at: row.replied_at,
            updated_at: row.updated_at,
        })
    }
}

/// Database shipping ledger
#[derive(Clone)]
pub struct DbShippingLedger {
    pool: DatabasePool,
}

impl DbShippingLedger {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Lock the record, validate the transition, write it and bump the counters
    async fn transition(
        tx: &mut Transaction<'_, Postgres>,
        current: ShippingRecord,
        status: ShippingStatus,
        error_message: Option<&str>,
        external_id: Option<&str>,
    ) -> Result<Option<ShippingRecord>> {
        match current.status.check_transition(status) {
            TransitionCheck::Allowed => {}
            TransitionCheck::Stale => {
                debug!(
                    record_id = %current.id,
                    from = %current.status,
                    to = %status,
                    "Ignoring stale shipping record event"
                );
                return Ok(None);
            }
            TransitionCheck::Rejected => {
                return Err(Error::Validation(format!(
                    "Shipping record {} cannot move from {} to {}",
                    current.id, current.status, status
                )));
            }
        }

        let delta = CounterDelta::for_transition(&current, status);

        let row = sqlx::query_as::<_, ShippingRecordRow>(
            r#"
            UPDATE shipping_records SET
                status = $2,
                error_message = COALESCE($3, error_message),
                external_id = COALESCE($4, external_id),
                sent_at = CASE WHEN $2 = 'sent' THEN NOW() ELSE sent_at END,
                delivered_at = CASE WHEN $2 = 'delivered' THEN COALESCE(delivered_at, NOW()) ELSE delivered_at END,
                opened_at = CASE WHEN $2 IN ('opened', 'replied') THEN COALESCE(opened_at, NOW()) ELSE opened_at END,
                replied_at = CASE WHEN $2 = 'replied' THEN COALESCE(replied_at, NOW()) ELSE replied_at END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(current.id)
        .bind(status.as_str())
        .bind(error_message)
        .bind(external_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(db_err)?;

        if !delta.is_zero() {
            sqlx::query(
                r#"
                UPDATE campaigns SET
                    total_sent = total_sent + $2,
                    total_failed = total_failed + $3,
                    total_opened = total_opened + $4,
                    total_replied = total_replied + $5,
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(current.campaign_id)
            .bind(delta.sent)
            .bind(delta.failed)
            .bind(delta.opened)
            .bind(delta.replied)
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;
        }

        Ok(Some(row.try_into()?))
    }
}

#[async_trait]
impl ShippingLedger for DbShippingLedger {
    async fn reserve(
        &self,
        campaign: &Campaign,
        recipient: &Recipient,
        reserved_at: DateTime<Utc>,
    ) -> Result<Reservation> {
        let inserted = sqlx::query_as::<_, ShippingRecordRow>(
            r#"
            INSERT INTO shipping_records (
                id, campaign_id, tenant_id, contact_id, address, display_name,
                status, reserved_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, $7)
            ON CONFLICT (campaign_id, address) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(campaign.id)
        .bind(campaign.tenant_id)
        .bind(recipient.contact_id)
        .bind(&recipient.address)
        .bind(&recipient.display_name)
        .bind(reserved_at)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)?;

        if let Some(row) = inserted {
            return Ok(Reservation::Acquired(row.try_into()?));
        }

        let existing = sqlx::query_as::<_, ShippingRecordRow>(
            "SELECT * FROM shipping_records WHERE campaign_id = $1 AND address = $2",
        )
        .bind(campaign.id)
        .bind(&recipient.address)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_err)?;

        Ok(Reservation::AlreadyReserved(existing.try_into()?))
    }

    async fn attach_content(
        &self,
        id: ShippingRecordId,
        content: &ComposedContent,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE shipping_records
            SET subject = $2, content = $3, composition_degraded = $4, updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(&content.subject)
        .bind(&content.body)
        .bind(content.degraded)
        .execute(self.pool.pool())
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::Conflict(format!(
                "Shipping record {} is not pending",
                id
            )));
        }
        Ok(())
    }

    async fn record_outcome(
        &self,
        id: ShippingRecordId,
        status: ShippingStatus,
        error_message: Option<&str>,
        external_id: Option<&str>,
    ) -> Result<Option<ShippingRecord>> {
        let mut tx = self.pool.pool().begin().await.map_err(db_err)?;

        let current: ShippingRecord = sqlx::query_as::<_, ShippingRecordRow>(
            "SELECT * FROM shipping_records WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| Error::NotFound(format!("Shipping record {}", id)))?
        .try_into()?;

        let updated = Self::transition(&mut tx, current, status, error_message, external_id).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(updated)
    }

    async fn release(&self, id: ShippingRecordId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM shipping_records WHERE id = $1 AND status = 'pending'")
            .bind(id)
            .execute(self.pool.pool())
            .await
            .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn apply_provider_event(
        &self,
        channel: Channel,
        external_id: &str,
        event: &ProviderEvent,
    ) -> Result<Option<ShippingRecord>> {
        let mut tx = self.pool.pool().begin().await.map_err(db_err)?;

        let current: ShippingRecord = sqlx::query_as::<_, ShippingRecordRow>(
            r#"
            SELECT sr.* FROM shipping_records sr
            JOIN campaigns c ON c.id = sr.campaign_id
            WHERE sr.external_id = $1 AND c.channel = $2
            FOR UPDATE OF sr
            "#,
        )
        .bind(external_id)
        .bind(channel.to_string())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| {
            Error::NotFound(format!(
                "No {} shipping record for external id {}",
                channel, external_id
            ))
        })?
        .try_into()?;

        let updated =
            Self::transition(&mut tx, current, event.status(), event.error_message(), None).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(updated)
    }

    async fn get_record(&self, id: ShippingRecordId) -> Result<Option<ShippingRecord>> {
        sqlx::query_as::<_, ShippingRecordRow>("SELECT * FROM shipping_records WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)?
            .map(ShippingRecord::try_from)
            .transpose()
    }

    async fn reserved_addresses(&self, campaign_id: CampaignId) -> Result<HashSet<String>> {
        let addresses: Vec<String> =
            sqlx::query_scalar("SELECT address FROM shipping_records WHERE campaign_id = $1")
                .bind(campaign_id)
                .fetch_all(self.pool.pool())
                .await
                .map_err(db_err)?;

        Ok(addresses.into_iter().collect())
    }

    async fn count_reserved_since(
        &self,
        campaign_id: CampaignId,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM shipping_records WHERE campaign_id = $1 AND reserved_at >= $2",
        )
        .bind(campaign_id)
        .bind(since)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn status_counts(&self, campaign_id: CampaignId) -> Result<StatusCounts> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT status, COUNT(*) FROM shipping_records
            WHERE campaign_id = $1
            GROUP BY status
            "#,
        )
        .bind(campaign_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)?;

        let mut counts = StatusCounts::default();
        for (status, n) in rows {
            counts.add(status.parse()?, n);
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
        let rows = sqlx::query_as::<_, ShippingRecordRow>(
            r#"
            SELECT * FROM shipping_records
            WHERE campaign_id = $1 AND ($2::text IS NULL OR status = $2)
            ORDER BY reserved_at, id
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(campaign_id)
        .bind(status.map(|s| s.as_str()))
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)?;

        rows.into_iter().map(ShippingRecord::try_from).collect()
    }

    async fn fail_stale_pending(
        &self,
        campaign_id: CampaignId,
        older_than: DateTime<Utc>,
    ) -> Result<u64> {
        let mut tx = self.pool.pool().begin().await.map_err(db_err)?;

        let closed = sqlx::query(
            r#"
            UPDATE shipping_records
            SET status = 'failed', error_message = $3, updated_at = NOW()
            WHERE campaign_id = $1 AND status = 'pending' AND reserved_at < $2
            "#,
        )
        .bind(campaign_id)
        .bind(older_than)
        .bind(INTERRUPTED_MESSAGE)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?
        .rows_affected();

        if closed > 0 {
            sqlx::query(
                "UPDATE campaigns SET total_failed = total_failed + $2, updated_at = NOW() WHERE id = $1",
            )
            .bind(campaign_id)
            .bind(closed as i32)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(closed)
    }
}
