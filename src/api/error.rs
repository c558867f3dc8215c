//! HTTP mapping of [`EcommerceError`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use crate::EcommerceError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available: Option<u32>,
}

impl EcommerceError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::ProductNotFound(_) | Self::OrderNotFound(_) | Self::ReturnCaseNotFound(_) => StatusCode::NOT_FOUND,
            Self::InsufficientStock { .. } | Self::ConcurrentModification(_) => StatusCode::CONFLICT,
            Self::InvalidQuantity
            | Self::InvalidStateTransition(_)
            | Self::RefundExceedsTotal { .. }
            | Self::Validation(_)
            | Self::SignatureInvalid(_) => StatusCode::BAD_REQUEST,
            Self::Gateway(_) => StatusCode::BAD_GATEWAY,
            Self::Messaging(_) | Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::ProductNotFound(_) | Self::OrderNotFound(_) | Self::ReturnCaseNotFound(_) => "not_found",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::InvalidQuantity => "invalid_quantity",
            Self::InvalidStateTransition(_) => "invalid_state_transition",
            Self::RefundExceedsTotal { .. } => "refund_exceeds_total",
            Self::Validation(_) => "validation_failed",
            Self::ConcurrentModification(_) => "concurrent_modification",
            Self::Gateway(_) => "gateway_failure",
            Self::SignatureInvalid(_) => "signature_invalid",
            Self::Messaging(_) | Self::Storage(_) => "internal",
        }
    }
}

impl IntoResponse for EcommerceError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Internal details stay in the log.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "request failed");
            "internal error".to_string()
        } else {
            self.to_string()
        };
        let available = match &self {
            Self::InsufficientStock { available, .. } => Some(*available),
            _ => None,
        };
        (status, Json(ErrorBody { code: self.code(), message, available })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::ProductId;

    #[test]
    fn test_status_mapping() {
        assert_eq!(EcommerceError::InsufficientStock { product_id: ProductId(1), available: 0 }.status(), StatusCode::CONFLICT);
        assert_eq!(EcommerceError::SignatureInvalid("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(EcommerceError::Gateway("down".into()).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(EcommerceError::ProductNotFound(ProductId(2)).status(), StatusCode::NOT_FOUND);
    }
}
