//! Campaign handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use courier_common::types::Channel;
use courier_core::ReportPage;
use courier_storage::models::{
    Campaign, CampaignContent, CampaignReport, NewCampaign, SetMember, ShippingStatus, Targeting,
    ThroughputPolicy,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::{api_error, campaign_error, ApiError};
use crate::state::AppState;

/// Campaign response
#[derive(Debug, Serialize)]
pub struct CampaignResponse {
    #[serde(flatten)]
    pub campaign: Campaign,
    pub progress_percentage: f64,
}

impl From<Campaign> for CampaignResponse {
    fn from(campaign: Campaign) -> Self {
        let progress_percentage = campaign.progress_percentage();
        Self {
            campaign,
            progress_percentage,
        }
    }
}

/// Request body for creating a campaign
#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
    pub channel: Channel,
    pub content: CampaignContent,
    pub targeting: Targeting,
    #[serde(default)]
    pub policy: ThroughputPolicy,
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Request body for scheduling a campaign
#[derive(Debug, Deserialize)]
pub struct ScheduleCampaignRequest {
    pub scheduled_at: DateTime<Utc>,
}

/// Request body for importing a campaign's recipient set
#[derive(Debug, Deserialize)]
pub struct ImportRecipientsRequest {
    pub recipients: Vec<SetMember>,
}

#[derive(Debug, Serialize)]
pub struct ImportRecipientsResponse {
    pub imported: u64,
}

/// Query parameters for a campaign report
#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

async fn load(state: &AppState, tenant_id: Uuid, campaign_id: Uuid) -> Result<Campaign, ApiError> {
    state
        .manager
        .get_for_tenant(tenant_id, campaign_id)
        .await
        .map_err(campaign_error)
}

/// Create a new campaign
///
/// POST /api/v1/tenants/:tenant_id/campaigns
pub async fn create_campaign(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
    Json(input): Json<CreateCampaignRequest>,
) -> Result<(StatusCode, Json<CampaignResponse>), ApiError> {
    let campaign = state
        .manager
        .create(NewCampaign {
            tenant_id,
            name: input.name,
            channel: input.channel,
            content: input.content,
            targeting: input.targeting,
            policy: input.policy,
            scheduled_at: input.scheduled_at,
        })
        .await
        .map_err(campaign_error)?;

    Ok((StatusCode::CREATED, Json(CampaignResponse::from(campaign))))
}

/// Get a campaign by ID
///
/// GET /api/v1/tenants/:tenant_id/campaigns/:campaign_id
pub async fn get_campaign(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, campaign_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<CampaignResponse>, ApiError> {
    let campaign = load(&state, tenant_id, campaign_id).await?;
    Ok(Json(CampaignResponse::from(campaign)))
}

/// Supply the recipient set of an `import` campaign
///
/// POST /api/v1/tenants/:tenant_id/campaigns/:campaign_id/recipients
pub async fn import_recipients(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, campaign_id)): Path<(Uuid, Uuid)>,
    Json(input): Json<ImportRecipientsRequest>,
) -> Result<(StatusCode, Json<ImportRecipientsResponse>), ApiError> {
    load(&state, tenant_id, campaign_id).await?;

    let imported = state
        .manager
        .import_recipients(campaign_id, input.recipients)
        .await
        .map_err(campaign_error)?;

    Ok((StatusCode::CREATED, Json(ImportRecipientsResponse { imported })))
}

/// Start sending a campaign now
///
/// POST /api/v1/tenants/:tenant_id/campaigns/:campaign_id/start
pub async fn start_campaign(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, campaign_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<CampaignResponse>, ApiError> {
    load(&state, tenant_id, campaign_id).await?;
    let campaign = state
        .manager
        .start(campaign_id)
        .await
        .map_err(campaign_error)?;

    info!("Started campaign {} for tenant {}", campaign_id, tenant_id);
    Ok(Json(CampaignResponse::from(campaign)))
}

/// Schedule a campaign
///
/// POST /api/v1/tenants/:tenant_id/campaigns/:campaign_id/schedule
pub async fn schedule_campaign(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, campaign_id)): Path<(Uuid, Uuid)>,
    Json(input): Json<ScheduleCampaignRequest>,
) -> Result<Json<CampaignResponse>, ApiError> {
    load(&state, tenant_id, campaign_id).await?;
    let campaign = state
        .manager
        .schedule(campaign_id, input.scheduled_at)
        .await
        .map_err(campaign_error)?;

    Ok(Json(CampaignResponse::from(campaign)))
}

/// Pause a sending campaign
///
/// POST /api/v1/tenants/:tenant_id/campaigns/:campaign_id/pause
pub async fn pause_campaign(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, campaign_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<CampaignResponse>, ApiError> {
    load(&state, tenant_id, campaign_id).await?;
    let campaign = state
        .manager
        .pause(campaign_id)
        .await
        .map_err(campaign_error)?;

    Ok(Json(CampaignResponse::from(campaign)))
}

/// Resume a paused campaign
///
/// POST /api/v1/tenants/:tenant_id/campaigns/:campaign_id/resume
pub async fn resume_campaign(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, campaign_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<CampaignResponse>, ApiError> {
    load(&state, tenant_id, campaign_id).await?;
    let campaign = state
        .manager
        .resume(campaign_id)
        .await
        .map_err(campaign_error)?;

    Ok(Json(CampaignResponse::from(campaign)))
}

/// Cancel a campaign
///
/// POST /api/v1/tenants/:tenant_id/campaigns/:campaign_id/cancel
pub async fn cancel_campaign(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, campaign_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<CampaignResponse>, ApiError> {
    load(&state, tenant_id, campaign_id).await?;
    let campaign = state
        .manager
        .cancel(campaign_id)
        .await
        .map_err(campaign_error)?;

    Ok(Json(CampaignResponse::from(campaign)))
}

/// Campaign report with one page of shipping records
///
/// GET /api/v1/tenants/:tenant_id/campaigns/:campaign_id/report
pub async fn get_campaign_report(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, campaign_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<CampaignReport>, ApiError> {
    load(&state, tenant_id, campaign_id).await?;

    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(s) => Some(s.parse::<ShippingStatus>().map_err(|e| {
            api_error(StatusCode::UNPROCESSABLE_ENTITY, "validation_error", e.to_string())
        })?),
    };

    let report = state
        .manager
        .report(
            campaign_id,
            ReportPage {
                status,
                limit: query.limit,
                offset: query.offset,
            },
        )
        .await
        .map_err(campaign_error)?;

    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use crate::handlers::testing::{app, body_json, send, TestApp};
    use axum::http::{Method, StatusCode};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use uuid::Uuid;

    fn whatsapp_campaign(list_id: Uuid) -> serde_json::Value {
        json!({
            "name": "Spring promo",
            "channel": "whatsapp",
            "content": {"body": "Hello {{first_name}}"},
            "targeting": {"contact_source": "list", "list_id": list_id},
            "policy": {"batch_size": 2, "delay_between_batches": 0}
        })
    }

    async fn create(test: &TestApp, body: serde_json::Value) -> serde_json::Value {
        let response = send(
            &test.router,
            Method::POST,
            &format!("/api/v1/tenants/{}/campaigns", test.tenant_id),
            Some(body),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        body_json(response).await
    }

    #[tokio::test]
    async fn test_create_and_get_campaign() {
        let test = app().await;
        let created = create(&test, whatsapp_campaign(test.list_id)).await;
        assert_eq!(created["status"], "draft");
        assert_eq!(created["policy"]["batch_size"], 2);

        let id = created["id"].as_str().unwrap();
        let response = send(
            &test.router,
            Method::GET,
            &format!("/api/v1/tenants/{}/campaigns/{}", test.tenant_id, id),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["name"], "Spring promo");

        // Another tenant cannot see it
        let response = send(
            &test.router,
            Method::GET,
            &format!("/api/v1/tenants/{}/campaigns/{}", Uuid::new_v4(), id),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_campaign() {
        let test = app().await;
        let response = send(
            &test.router,
            Method::POST,
            &format!("/api/v1/tenants/{}/campaigns", test.tenant_id),
            Some(json!({
                "name": "No subject",
                "channel": "email",
                "content": {"body": "<p>Hi</p>"},
                "targeting": {"contact_source": "list", "list_id": test.list_id}
            })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body_json(response).await["error"], "validation_error");
    }

    #[tokio::test]
    async fn test_start_then_report() {
        let test = app().await;
        let created = create(&test, whatsapp_campaign(test.list_id)).await;
        let id = created["id"].as_str().unwrap().to_string();
        let base = format!("/api/v1/tenants/{}/campaigns/{}", test.tenant_id, id);

        let response = send(&test.router, Method::POST, &format!("{}/start", base), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "sending");

        test.manager.wait_for_worker(id.parse().unwrap()).await;

        let response = send(&test.router, Method::GET, &format!("{}/report", base), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let report = body_json(response).await;
        assert_eq!(report["status"], "completed");
        assert_eq!(report["counters"]["total_sent"], 3);
        assert_eq!(report["counts"]["sent"], 3);
        assert_eq!(report["progress_percentage"], 100.0);
        assert_eq!(report["records"].as_array().unwrap().len(), 3);

        let response = send(
            &test.router,
            Method::GET,
            &format!("{}/report?status=failed&limit=10", base),
            None,
        )
        .await;
        let report = body_json(response).await;
        assert_eq!(report["records"].as_array().unwrap().len(), 0);
        assert_eq!(report["limit"], 10);

        let response = send(
            &test.router,
            Method::GET,
            &format!("{}/report?status=lost", base),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_invalid_transition_is_conflict() {
        let test = app().await;
        let created = create(&test, whatsapp_campaign(test.list_id)).await;
        let base = format!(
            "/api/v1/tenants/{}/campaigns/{}",
            test.tenant_id,
            created["id"].as_str().unwrap()
        );

        let response = send(&test.router, Method::POST, &format!("{}/pause", base), None).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(response).await["error"], "invalid_transition");

        let response = send(&test.router, Method::POST, &format!("{}/cancel", base), None).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_schedule_and_cancel() {
        let test = app().await;
        let created = create(&test, whatsapp_campaign(test.list_id)).await;
        let base = format!(
            "/api/v1/tenants/{}/campaigns/{}",
            test.tenant_id,
            created["id"].as_str().unwrap()
        );

        let response = send(
            &test.router,
            Method::POST,
            &format!("{}/schedule", base),
            Some(json!({"scheduled_at": "2099-01-01T09:00:00Z"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "scheduled");
        assert_eq!(body["scheduled_at"], "2099-01-01T09:00:00Z");

        let response = send(&test.router, Method::POST, &format!("{}/cancel", base), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "cancelled");

        let response = send(&test.router, Method::POST, &format!("{}/start", base), None).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_import_recipients() {
        let test = app().await;
        let created = create(
            &test,
            json!({
                "name": "Imported",
                "channel": "whatsapp",
                "content": {"body": "Hi {{name}}"},
                "targeting": {"contact_source": "import"}
            }),
        )
        .await;
        let base = format!(
            "/api/v1/tenants/{}/campaigns/{}",
            test.tenant_id,
            created["id"].as_str().unwrap()
        );

        let recipients = json!({"recipients": [
            {"name": "Ana", "phone": "+5511912345678"},
            {"name": "Bia", "phone": "+5511912345679"}
        ]});
        let response = send(
            &test.router,
            Method::POST,
            &format!("{}/recipients", base),
            Some(recipients.clone()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(body_json(response).await["imported"], 2);

        let response = send(
            &test.router,
            Method::POST,
            &format!("{}/recipients", base),
            Some(recipients),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_import_into_list_campaign_is_rejected() {
        let test = app().await;
        let created = create(&test, whatsapp_campaign(test.list_id)).await;
        let uri = format!(
            "/api/v1/tenants/{}/campaigns/{}/recipients",
            test.tenant_id,
            created["id"].as_str().unwrap()
        );

        let recipients = json!({"recipients": [{"name": "Ana", "phone": "+5511912345678"}]});
        let response = send(&test.router, Method::POST, &uri, Some(recipients)).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body_json(response).await["error"], "validation_error");
    }
}
