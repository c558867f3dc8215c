//! HTTP surface: customer cart and order endpoints, the payment webhook, admin decisions.

pub mod admin;
pub mod cart;
pub mod checkout;
pub mod error;
pub mod orders;

use axum::async_trait;
use axum::extract::{FromRequest, Request};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use validator::Validate;

use crate::application::OrderOrchestrator;
use crate::EcommerceError;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<OrderOrchestrator>,
    pub webhook_secret: Arc<str>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "storefront-core"})) }))
        .route("/api/v1/cart/add", post(cart::add_to_cart))
        .route("/api/v1/cart/release", post(cart::release))
        .route("/api/v1/products/:id/availability", get(cart::availability))
        .route("/api/v1/checkout", post(checkout::start_checkout))
        .route("/api/v1/webhooks/payment", post(checkout::payment_webhook))
        .route("/api/v1/orders/:id", get(orders::get_order))
        .route("/api/v1/orders/:id/returns", post(orders::request_return))
        .route("/api/v1/orders/:id/cancel", post(orders::cancel_order))
        .route("/api/v1/admin/orders/cancel", post(admin::cancel_order))
        .route("/api/v1/admin/orders/ship", post(admin::ship_order))
        .route("/api/v1/admin/orders/deliver", post(admin::deliver_order))
        .route("/api/v1/admin/returns/confirm", post(admin::confirm_return))
        .route("/api/v1/admin/returns/reject", post(admin::reject_return))
        .with_state(state)
}

/// `Json<T>` that also runs the body's `validator` rules.
pub struct Validated<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for Validated<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = EcommerceError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(body) = Json::<T>::from_request(req, state).await
            .map_err(|rejection| EcommerceError::Validation(rejection.body_text()))?;
        body.validate().map_err(|errors| EcommerceError::Validation(errors.to_string()))?;
        Ok(Validated(body))
    }
}
