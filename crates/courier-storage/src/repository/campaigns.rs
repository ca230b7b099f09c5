//! Campaign repository

use crate::db::{db_err, DatabasePool};
use crate::models::{
    Campaign, CampaignContent, CampaignCounters, CampaignStatus, NewCampaign, Targeting,
    ThroughputPolicy,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_common::types::{CampaignId, TenantId};
use courier_common::{Error, Result};
use sqlx::FromRow;
use uuid::Uuid;

/// Campaign persistence used by the dispatch engine
#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn create(&self, input: NewCampaign) -> Result<Campaign>;
    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>>;
    async fn get_by_tenant(&self, tenant_id: TenantId, id: CampaignId)
        -> Result<Option<Campaign>>;
    async fn list_by_status(&self, status: CampaignStatus) -> Result<Vec<Campaign>>;
    /// SCHEDULED campaigns whose `scheduled_at` is at or before `now`
    async fn list_scheduled_due(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>>;
    /// Move the campaign to `to` if its persisted status is one of `expected`.
    ///
    /// Returns the updated campaign, or `None` when the status did not match.
    /// `scheduled_at` is only written when given.
    async fn compare_and_set_status(
        &self,
        id: CampaignId,
        expected: &[CampaignStatus],
        to: CampaignStatus,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Campaign>>;
    async fn set_total_recipients(&self, id: CampaignId, total: i32) -> Result<()>;
}

#[derive(FromRow)]
struct CampaignRow {
    id: Uuid,
    tenant_id: Uuid,
    name: String,
    channel: String,
    subject: Option<String>,
    body: String,
    use_ai_variation: bool,
    variation_prompt: Option<String>,
    contact_source: String,
    list_id: Option<Uuid>,
    active_days_filter: i32,
    batch_size: i32,
    delay_between_batches: i32,
    daily_limit: i32,
    send_only_business_hours: bool,
    pause_after_messages: i32,
    pause_duration: i32,
    status: String,
    scheduled_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    total_recipients: i32,
    total_sent: i32,
    total_failed: i32,
    total_opened: i32,
    total_replied: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CampaignRow> for Campaign {
    type Error = Error;

    fn try_from(row: CampaignRow) -> Result<Self> {
        Ok(Campaign {
            id: row.id,
            tenant_id: row.tenant_id,
            name: row.name,
            channel: row.channel.parse()?,
            content: CampaignContent {
                subject: row.subject,
                body: row.body,
                use_ai_variation: row.use_ai_variation,
                variation_prompt: row.variation_prompt,
            },
            targeting: Targeting {
                contact_source: row.contact_source.parse()?,
                list_id: row.list_id,
                active_days_filter: row.active_days_filter,
            },
            policy: ThroughputPolicy {
                batch_size: row.batch_size,
                delay_between_batches: row.delay_between_batches,
                daily_limit: row.daily_limit,
                send_only_business_hours: row.send_only_business_hours,
                pause_after_messages: row.pause_after_messages,
                pause_duration: row.pause_duration,
            },
            status: row.status.parse()?,
            scheduled_at: row.scheduled_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            counters: CampaignCounters {
                total_recipients: row.total_recipients,
                total_sent: row.total_sent,
                total_failed: row.total_failed,
                total_opened: row.total_opened,
                total_replied: row.total_replied,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn convert(rows: Vec<CampaignRow>) -> Result<Vec<Campaign>> {
    rows.into_iter().map(Campaign::try_from).collect()
}

/// Database campaign repository
#[derive(Clone)]
pub struct DbCampaignRepository {
    pool: DatabasePool,
}

impl DbCampaignRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CampaignStore for DbCampaignRepository {
    async fn create(&self, input: NewCampaign) -> Result<Campaign> {
        input.validate()?;

        let id = Uuid::now_v7();
        let now = Utc::now();
        let status = if input.scheduled_at.is_some() {
            CampaignStatus::Scheduled
        } else {
            CampaignStatus::Draft
        };

        let row = sqlx::query_as::<_, CampaignRow>(
            r#"
            INSERT INTO campaigns (
                id, tenant_id, name, channel, subject, body, use_ai_variation, variation_prompt,
                contact_source, list_id, active_days_filter,
                batch_size, delay_between_batches, daily_limit, send_only_business_hours,
                pause_after_messages, pause_duration,
                status, scheduled_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $20)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.tenant_id)
        .bind(&input.name)
        .bind(input.channel.to_string())
        .bind(&input.content.subject)
        .bind(&input.content.body)
        .bind(input.content.use_ai_variation)
        .bind(&input.content.variation_prompt)
        .bind(input.targeting.contact_source.as_str())
        .bind(input.targeting.list_id)
        .bind(input.targeting.active_days_filter)
        .bind(input.policy.batch_size)
        .bind(input.policy.delay_between_batches)
        .bind(input.policy.daily_limit)
        .bind(input.policy.send_only_business_hours)
        .bind(input.policy.pause_after_messages)
        .bind(input.policy.pause_duration)
        .bind(status.as_str())
        .bind(input.scheduled_at)
        .bind(now)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_err)?;

        row.try_into()
    }

    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>> {
        sqlx::query_as::<_, CampaignRow>("SELECT * FROM campaigns WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)?
            .map(Campaign::try_from)
            .transpose()
    }

    async fn get_by_tenant(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
    ) -> Result<Option<Campaign>> {
        sqlx::query_as::<_, CampaignRow>(
            "SELECT * FROM campaigns WHERE id = $1 AND tenant_id = $2",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)?
        .map(Campaign::try_from)
        .transpose()
    }

    async fn list_by_status(&self, status: CampaignStatus) -> Result<Vec<Campaign>> {
        let rows = sqlx::query_as::<_, CampaignRow>(
            "SELECT * FROM campaigns WHERE status = $1 ORDER BY created_at",
        )
        .bind(status.as_str())
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)?;

        convert(rows)
    }

    async fn list_scheduled_due(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>> {
        let rows = sqlx::query_as::<_, CampaignRow>(
            r#"
            SELECT * FROM campaigns
            WHERE status = 'scheduled' AND scheduled_at <= $1
            ORDER BY scheduled_at
            "#,
        )
        .bind(now)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)?;

        convert(rows)
    }

    async fn compare_and_set_status(
        &self,
        id: CampaignId,
        expected: &[CampaignStatus],
        to: CampaignStatus,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Campaign>> {
        let expected: Vec<&str> = expected.iter().map(|s| s.as_str()).collect();

        sqlx::query_as::<_, CampaignRow>(
            r#"
            UPDATE campaigns SET
                status = $2,
                scheduled_at = COALESCE($4, scheduled_at),
                started_at = CASE WHEN $2 = 'sending' THEN COALESCE(started_at, NOW()) ELSE started_at END,
                completed_at = CASE WHEN $2 IN ('completed', 'cancelled') THEN NOW() ELSE completed_at END,
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($3)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(to.as_str())
        .bind(&expected)
        .bind(scheduled_at)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)?
        .map(Campaign::try_from)
        .transpose()
    }

    async fn set_total_recipients(&self, id: CampaignId, total: i32) -> Result<()> {
        sqlx::query(
            "UPDATE campaigns SET total_recipients = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(total)
        .execute(self.pool.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }
}
