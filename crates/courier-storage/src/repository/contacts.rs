//! Contact directory: read access to contacts and campaign recipient sets

use crate::db::{db_err, DatabasePool};
use crate::models::{Contact, SetMember};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_common::types::{CampaignId, ContactListId, TenantId};
use courier_common::Result;
use sqlx::FromRow;
use uuid::Uuid;

/// Contact directory trait
#[async_trait]
pub trait ContactDirectory: Send + Sync {
    /// Members of a contact list, ordered by contact id
    async fn list_members(&self, tenant_id: TenantId, list_id: ContactListId)
        -> Result<Vec<Contact>>;
    /// Contacts whose last interaction is at or after `since`, ordered by contact id
    async fn active_since(&self, tenant_id: TenantId, since: DateTime<Utc>)
        -> Result<Vec<Contact>>;
    /// The campaign's materialized recipient set in insertion order
    async fn campaign_set(&self, campaign_id: CampaignId) -> Result<Vec<SetMember>>;
    /// Store `members` as the campaign's recipient set unless one already exists.
    ///
    /// Returns the number of members stored (0 when a set was already present).
    async fn materialize(&self, campaign_id: CampaignId, members: &[SetMember]) -> Result<u64>;
}

#[derive(FromRow)]
struct SetMemberRow {
    contact_id: Option<Uuid>,
    name: Option<String>,
    phone: Option<String>,
    email: Option<String>,
    fields: serde_json::Value,
}

impl From<SetMemberRow> for SetMember {
    fn from(row: SetMemberRow) -> Self {
        Self {
            contact_id: row.contact_id,
            name: row.name,
            phone: row.phone,
            email: row.email,
            fields: row.fields,
        }
    }
}

#[derive(FromRow)]
struct ContactRow {
    id: Uuid,
    tenant_id: Uuid,
    name: Option<String>,
    phone: Option<String>,
    email: Option<String>,
    fields: serde_json::Value,
    last_interaction_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<ContactRow> for Contact {
    fn from(row: ContactRow) -> Self {
        Self {
            id: row.id,
            tenant_id: row.tenant_id,
            name: row.name,
            phone: row.phone,
            email: row.email,
            fields: row.fields,
            last_interaction_at: row.last_interaction_at,
            created_at: row.created_at,
        }
    }
}

/// Database contact directory
#[derive(Clone)]
pub struct DbContactDirectory {
    pool: DatabasePool,
}

impl DbContactDirectory {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContactDirectory for DbContactDirectory {
    async fn list_members(
        &self,
        tenant_id: TenantId,
        list_id: ContactListId,
    ) -> Result<Vec<Contact>> {
        let rows = sqlx::query_as::<_, ContactRow>(
            r#"
            SELECT c.* FROM contacts c
            JOIN contact_list_members m ON m.contact_id = c.id
            WHERE m.list_id = $1 AND c.tenant_id = $2
            ORDER BY c.id
            "#,
        )
        .bind(list_id)
        .bind(tenant_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(Contact::from).collect())
    }

    async fn active_since(
        &self,
        tenant_id: TenantId,
        since: DateTime<Utc>,
    ) -> Result<Vec<Contact>> {
        let rows = sqlx::query_as::<_, ContactRow>(
            r#"
            SELECT * FROM contacts
            WHERE tenant_id = $1 AND last_interaction_at >= $2
            ORDER BY id
            "#,
        )
        .bind(tenant_id)
        .bind(since)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(Contact::from).collect())
    }

    async fn campaign_set(&self, campaign_id: CampaignId) -> Result<Vec<SetMember>> {
        let rows = sqlx::query_as::<_, SetMemberRow>(
            r#"
            SELECT contact_id, name, phone, email, fields
            FROM campaign_recipients
            WHERE campaign_id = $1
            ORDER BY position
            "#,
        )
        .bind(campaign_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(SetMember::from).collect())
    }

    async fn materialize(&self, campaign_id: CampaignId, members: &[SetMember]) -> Result<u64> {
        let mut tx = self.pool.pool().begin().await.map_err(db_err)?;

        // Serialize concurrent snapshots of the same campaign
        sqlx::query("SELECT id FROM campaigns WHERE id = $1 FOR UPDATE")
            .bind(campaign_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let existing: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM campaign_recipients WHERE campaign_id = $1")
                .bind(campaign_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(db_err)?;
        if existing > 0 {
            return Ok(0);
        }

        for member in members {
            sqlx::query(
                r#"
                INSERT INTO campaign_recipients (campaign_id, contact_id, name, phone, email, fields)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(campaign_id)
            .bind(member.contact_id)
            .bind(&member.name)
            .bind(&member.phone)
            .bind(&member.email)
            .bind(&member.fields)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(members.len() as u64)
    }
}
