#![allow(dead_code)]

use chrono::Duration;
use rust_decimal::Decimal;
use std::sync::Arc;

use storefront_core::application::{CheckoutRequest, InventoryLedger, OrderOrchestrator, OrderPolicy, ReservationService};
use storefront_core::domain::aggregates::{CartLine, Order, ShippingPolicy};
use storefront_core::domain::value_objects::{CustomerContact, Money, ProductId, SessionId, ShippingAddress};
use storefront_core::infrastructure::memory::{InMemoryGateway, InMemoryStore, RecordingNotifier, RecordingPublisher};

pub struct Harness {
    pub store: InMemoryStore,
    pub gateway: InMemoryGateway,
    pub notifier: RecordingNotifier,
    pub events: RecordingPublisher,
    pub orchestrator: Arc<OrderOrchestrator>,
}

pub fn eur(cents: i64) -> Money { Money::eur(Decimal::new(cents, 2)) }

pub fn session(s: &str) -> SessionId { SessionId::new(s).unwrap() }

pub fn policy() -> OrderPolicy {
    OrderPolicy {
        currency: "eur".into(),
        shipping: ShippingPolicy { flat_fee: eur(495), free_above: eur(5000) },
        return_reason_min_len: 10,
    }
}

pub fn harness() -> Harness {
    let store = InMemoryStore::new();
    let gateway = InMemoryGateway::new();
    let notifier = RecordingNotifier::default();
    let events = RecordingPublisher::default();
    let reservations = ReservationService::new(
        Arc::new(store.clone()), Arc::new(store.clone()), Arc::new(events.clone()), Duration::minutes(15),
    );
    let orchestrator = OrderOrchestrator::new(
        InventoryLedger::new(Arc::new(store.clone())),
        reservations,
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(gateway.clone()),
        Arc::new(notifier.clone()),
        Arc::new(events.clone()),
        policy(),
    );
    Harness { store, gateway, notifier, events, orchestrator: Arc::new(orchestrator) }
}

pub fn checkout_request(session_id: &str, lines: &[(i64, u32)]) -> CheckoutRequest {
    CheckoutRequest {
        session_id: session(session_id),
        user_id: None,
        customer: CustomerContact { name: "Ana".into(), email: "ana@example.com".into(), phone: None },
        shipping_address: ShippingAddress {
            line1: "Calle Mayor 1".into(), city: "Madrid".into(), postal_code: "28013".into(), country: "ES".into(), ..Default::default()
        },
        lines: lines.iter().map(|&(p, q)| CartLine { product_id: ProductId(p), quantity: q, size: None }).collect(),
    }
}

/// Checkout plus the processor's confirmation, as the webhook would deliver it.
pub async fn paid_order(h: &Harness, session_id: &str, lines: &[(i64, u32)]) -> Order {
    let started = h.orchestrator.start_checkout(checkout_request(session_id, lines)).await.unwrap();
    let (snapshot, _) = h.gateway.session(&started.session.id).unwrap();
    h.orchestrator.confirm_payment(&started.session.id, None, snapshot).await.unwrap()
}
