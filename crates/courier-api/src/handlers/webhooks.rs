//! Provider webhook intake

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use courier_common::types::Channel;
use courier_common::Error;
use courier_storage::models::{ProviderEvent, ShippingStatus};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{api_error, campaign_error, common_error, ApiError};
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying `sha256=<hex>` of the raw request body
pub const SIGNATURE_HEADER: &str = "x-courier-signature";

/// Callback body sent by a provider relay
#[derive(Debug, Deserialize)]
pub struct ProviderCallback {
    pub external_id: String,
    pub event: String,
    pub reason: Option<String>,
}

impl ProviderCallback {
    fn into_event(self) -> Option<(String, ProviderEvent)> {
        let event = match self.event.to_lowercase().as_str() {
            "delivered" => ProviderEvent::Delivered,
            "opened" | "read" => ProviderEvent::Opened,
            "replied" => ProviderEvent::Replied,
            "bounced" => ProviderEvent::Bounced {
                reason: self.reason,
            },
            _ => return None,
        };
        Some((self.external_id, event))
    }
}

#[derive(Debug, Serialize)]
pub struct CallbackResponse {
    /// False when the event was older than the record's current status
    pub applied: bool,
    pub status: Option<ShippingStatus>,
}

/// Check a `sha256=<hex>` signature against the body
pub fn verify_signature(secret: &str, body: &[u8], header: &str) -> bool {
    let Some(signature) = header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Compute the signature header value for a body
pub fn sign(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Delivery, open, reply or bounce reported by a provider
///
/// POST /api/v1/webhooks/:provider
pub async fn provider_callback(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CallbackResponse>, ApiError> {
    let channel: Channel = provider
        .parse()
        .map_err(|_| api_error(StatusCode::NOT_FOUND, "not_found", "Unknown provider"))?;

    if let Some(ref secret) = state.webhook_secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !verify_signature(secret, &body, signature) {
            warn!(provider = %channel, "Rejected webhook with invalid signature");
            return Err(common_error(Error::Unauthorized(
                "Invalid webhook signature".to_string(),
            )));
        }
    }

    let callback: ProviderCallback = serde_json::from_slice(&body).map_err(|e| {
        api_error(StatusCode::BAD_REQUEST, "bad_request", format!("Invalid callback body: {}", e))
    })?;
    let (external_id, event) = callback.into_event().ok_or_else(|| {
        api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "validation_error",
            "Unsupported event",
        )
    })?;

    debug!(provider = %channel, external_id = %external_id, status = %event.status(), "Provider callback");

    let updated = state
        .manager
        .apply_provider_event(channel, &external_id, &event)
        .await
        .map_err(campaign_error)?;

    Ok(Json(CallbackResponse {
        applied: updated.is_some(),
        status: updated.map(|record| record.status),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{app_with_secret, body_json, TestApp};
    use axum::body::Body;
    use axum::http::{Method, Request};
    use pretty_assertions::assert_eq;
    use tower::ServiceExt;
    use uuid::Uuid;

    const SECRET: &str = "whsec-test";

    async fn sent_record(test: &TestApp) -> (Uuid, String) {
        let campaign_id = test.start_list_campaign().await;
        let records = test.store.records(campaign_id).await;
        (campaign_id, records[0].external_id.clone().unwrap())
    }

    async fn callback(
        test: &TestApp,
        provider: &str,
        body: serde_json::Value,
        signature: Option<String>,
    ) -> axum::response::Response {
        let body = serde_json::to_vec(&body).unwrap();
        let mut request = Request::builder()
            .method(Method::POST)
            .uri(format!("/api/v1/webhooks/{}", provider))
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            request = request.header(SIGNATURE_HEADER, signature);
        }
        test.router
            .clone()
            .oneshot(request.body(Body::from(body)).unwrap())
            .await
            .unwrap()
    }

    fn signed(body: &serde_json::Value) -> Option<String> {
        sign(SECRET, &serde_json::to_vec(body).unwrap())
    }

    #[test]
    fn test_signature_roundtrip() {
        let header = sign(SECRET, b"{}").unwrap();
        assert!(verify_signature(SECRET, b"{}", &header));
        assert!(!verify_signature(SECRET, b"{ }", &header));
        assert!(!verify_signature("other", b"{}", &header));
        assert!(!verify_signature(SECRET, b"{}", "md5=abc"));
    }

    #[tokio::test]
    async fn test_signed_callback_applies_event() {
        let test = app_with_secret(Some(SECRET)).await;
        let (_, external_id) = sent_record(&test).await;

        let body = serde_json::json!({"external_id": external_id, "event": "delivered"});
        let response = callback(&test, "whatsapp", body.clone(), signed(&body)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["applied"], true);
        assert_eq!(json["status"], "delivered");

        // Replaying the same event is stale
        let response = callback(&test, "whatsapp", body.clone(), signed(&body)).await;
        assert_eq!(body_json(response).await["applied"], false);
    }

    #[tokio::test]
    async fn test_bad_signature_is_rejected() {
        let test = app_with_secret(Some(SECRET)).await;
        let (_, external_id) = sent_record(&test).await;

        let body = serde_json::json!({"external_id": external_id, "event": "opened"});
        let response = callback(&test, "whatsapp", body.clone(), None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"], "unauthorized");

        let forged = sign("wrong", &serde_json::to_vec(&body).unwrap());
        let response = callback(&test, "whatsapp", body, forged).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_bounce_moves_counters() {
        let test = app_with_secret(None).await;
        let (campaign_id, external_id) = sent_record(&test).await;

        let body = serde_json::json!({
            "external_id": external_id,
            "event": "bounced",
            "reason": "number disconnected"
        });
        let response = callback(&test, "whatsapp", body, None).await;
        assert_eq!(body_json(response).await["status"], "bounced");

        let records = test.store.records(campaign_id).await;
        let bounced = records
            .iter()
            .find(|r| r.external_id.as_deref() == Some(external_id.as_str()))
            .unwrap();
        assert_eq!(bounced.error_message.as_deref(), Some("number disconnected"));

        let campaign = test.manager.get(campaign_id).await.unwrap();
        assert_eq!(campaign.counters.total_sent, 2);
        assert_eq!(campaign.counters.total_failed, 1);
    }

    #[tokio::test]
    async fn test_event_for_other_channel_is_not_found() {
        let test = app_with_secret(None).await;
        let (_, external_id) = sent_record(&test).await;

        let body = serde_json::json!({"external_id": external_id, "event": "delivered"});
        let response = callback(&test, "email", body, None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bounce_after_open_is_applied() {
        let test = app_with_secret(None).await;
        let (campaign_id, external_id) = sent_record(&test).await;

        let opened = serde_json::json!({"external_id": external_id, "event": "read"});
        callback(&test, "whatsapp", opened, None).await;
        let bounced = serde_json::json!({"external_id": external_id, "event": "bounced"});
        let response = callback(&test, "whatsapp", bounced, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "bounced");

        let campaign = test.manager.get(campaign_id).await.unwrap();
        assert_eq!(campaign.counters.total_failed, 1);
        assert_eq!(campaign.counters.total_opened, 1);
    }

    #[tokio::test]
    async fn test_unknown_provider_or_record() {
        let test = app_with_secret(None).await;
        let body = serde_json::json!({"external_id": "nope", "event": "delivered"});

        let response = callback(&test, "pigeon", body.clone(), None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = callback(&test, "whatsapp", body, None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = callback(
            &test,
            "whatsapp",
            serde_json::json!({"external_id": "x", "event": "exploded"}),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
