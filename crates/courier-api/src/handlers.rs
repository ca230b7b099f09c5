//! API request handlers

pub mod campaigns;
pub mod health;
pub mod webhooks;

use axum::{http::StatusCode, Json};
use courier_core::CampaignError;
use serde::Serialize;
use tracing::error;

/// Error response
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn api_error(status: StatusCode, error: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message: message.into(),
        }),
    )
}

/// Map a control-surface error onto an HTTP response
pub(crate) fn campaign_error(e: CampaignError) -> ApiError {
    match e {
        CampaignError::NotFound => api_error(StatusCode::NOT_FOUND, "not_found", "Campaign not found"),
        CampaignError::InvalidTransition { .. } => {
            api_error(StatusCode::CONFLICT, "invalid_transition", e.to_string())
        }
        CampaignError::AlreadyRunning => {
            api_error(StatusCode::CONFLICT, "already_running", e.to_string())
        }
        CampaignError::ChannelNotConfigured(_) => {
            api_error(StatusCode::CONFLICT, "channel_not_configured", e.to_string())
        }
        CampaignError::Storage(inner) => common_error(inner),
    }
}

/// Map a shared error onto an HTTP response, hiding server-side details
pub(crate) fn common_error(inner: courier_common::Error) -> ApiError {
    let status =
        StatusCode::from_u16(inner.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!(error = %inner, "Storage failure while handling request");
        api_error(status, "internal_error", "Storage unavailable")
    } else {
        api_error(status, &inner.code().to_lowercase(), inner.to_string())
    }
}
