// src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::order::OrderStatus;

/// Domain error taxonomy of the fulfillment engine. Guard failures carry
/// enough state for the caller to retry with fresh data; idempotency guards
/// are their own variants so callers can tell a replay from a real conflict.
#[derive(Debug, Error)]
pub enum OpsError {
    #[error("invalid transition {from:?} -> {to:?} for order {order_id}")]
    InvalidTransition {
        order_id: i64,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("insufficient stock for variant {variant_id}: available {available}, requested {requested}")]
    InsufficientStock {
        variant_id: i64,
        available: i64,
        requested: i64,
    },

    #[error("order {0} is already on an open manifest")]
    OrderAlreadyManifested(i64),

    #[error("handover {0} has already been processed")]
    HandoverAlreadyProcessed(i64),

    #[error("booking with {provider} failed: {reason}")]
    ProviderBookingFailed { provider: String, reason: String },

    #[error("tracking sync with {provider} failed: {reason}")]
    ProviderSyncFailed { provider: String, reason: String },

    #[error("unknown courier provider: {0}")]
    UnknownProvider(String),

    #[error("rider {0} already has a settlement pending verification")]
    SettlementAlreadyPending(i64),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl OpsError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        OpsError::NotFound { entity, id }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        OpsError::Validation(msg.into())
    }

    /// Stable machine-readable code, also used as the HTTP body `code`.
    pub fn code(&self) -> &'static str {
        match self {
            OpsError::InvalidTransition { .. } => "invalid_transition",
            OpsError::InsufficientStock { .. } => "insufficient_stock",
            OpsError::OrderAlreadyManifested(_) => "order_already_manifested",
            OpsError::HandoverAlreadyProcessed(_) => "handover_already_processed",
            OpsError::ProviderBookingFailed { .. } => "provider_booking_failed",
            OpsError::ProviderSyncFailed { .. } => "provider_sync_failed",
            OpsError::UnknownProvider(_) => "unknown_provider",
            OpsError::SettlementAlreadyPending(_) => "settlement_already_pending",
            OpsError::NotFound { .. } => "not_found",
            OpsError::Forbidden(_) => "forbidden",
            OpsError::Validation(_) => "validation",
            OpsError::Storage(_) => "storage",
        }
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        OpsError::Forbidden(msg.into())
    }
}

#[derive(Debug)]
pub enum AppError {
    Ops(OpsError),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    ValidationError(String),
    Conflict(String),
    Internal(String),
}

impl AppError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        AppError::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        AppError::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::ValidationError(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        AppError::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::Ops(ref err) => {
                let status = match err {
                    OpsError::InvalidTransition { .. } => StatusCode::CONFLICT,
                    OpsError::InsufficientStock { .. } => StatusCode::CONFLICT,
                    OpsError::OrderAlreadyManifested(_) => StatusCode::CONFLICT,
                    OpsError::HandoverAlreadyProcessed(_) => StatusCode::CONFLICT,
                    OpsError::SettlementAlreadyPending(_) => StatusCode::CONFLICT,
                    OpsError::ProviderBookingFailed { .. } => StatusCode::BAD_GATEWAY,
                    OpsError::ProviderSyncFailed { .. } => StatusCode::BAD_GATEWAY,
                    OpsError::UnknownProvider(_) => StatusCode::NOT_FOUND,
                    OpsError::NotFound { .. } => StatusCode::NOT_FOUND,
                    OpsError::Forbidden(_) => StatusCode::FORBIDDEN,
                    OpsError::Validation(_) => StatusCode::BAD_REQUEST,
                    OpsError::Storage(e) => {
                        tracing::error!(error = %e, "Storage error");
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                let message = match err {
                    OpsError::Storage(_) => "Storage error occurred".to_string(),
                    other => other.to_string(),
                };
                (status, err.code(), message)
            }
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "validation", msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

impl From<OpsError> for AppError {
    fn from(err: OpsError) -> Self {
        AppError::Ops(err)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Ops(OpsError::Storage(err))
    }
}
