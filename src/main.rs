//! Storefront core service

use anyhow::Result;
use chrono::Duration;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storefront_core::api::{self, AppState};
use storefront_core::application::ports::{EventPublisher, Notifier};
use storefront_core::application::{HoldSweeper, InventoryLedger, OrderOrchestrator, OrderPolicy, ReservationService};
use storefront_core::config::Config;
use storefront_core::domain::aggregates::ShippingPolicy;
use storefront_core::domain::value_objects::Money;
use storefront_core::infrastructure::notify::{LogBus, NatsBus};
use storefront_core::infrastructure::postgres::PgStore;
use storefront_core::infrastructure::stripe::{StripeConfig, StripeGateway};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let db = PgPoolOptions::new().max_connections(10).connect(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&db).await?;
    let store = Arc::new(PgStore::new(db));

    let (notifier, events) = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => nats_bus(client),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, notifications go to the log");
                log_bus()
            }
        },
        None => log_bus(),
    };

    let gateway = Arc::new(StripeGateway::new(StripeConfig {
        secret_key: config.stripe_secret_key.clone(),
        api_base: config.stripe_api_base.clone(),
        success_url: config.checkout_success_url.clone(),
        cancel_url: config.checkout_cancel_url.clone(),
    }));
    let ttl = Duration::seconds(i64::try_from(config.reservation_ttl_secs)?);
    let reservations = ReservationService::new(store.clone(), store.clone(), events.clone(), ttl);
    let policy = OrderPolicy {
        currency: config.currency.clone(),
        shipping: ShippingPolicy {
            flat_fee: Money::new(config.shipping_flat_fee, &config.currency),
            free_above: Money::new(config.free_shipping_threshold, &config.currency),
        },
        return_reason_min_len: config.return_reason_min_len,
    };
    let orchestrator = Arc::new(OrderOrchestrator::new(
        InventoryLedger::new(store.clone()),
        reservations.clone(),
        store.clone(),
        store,
        gateway,
        notifier,
        events,
        policy,
    ));

    let sweeper = HoldSweeper::start(reservations, std::time::Duration::from_secs(config.reservation_sweep_secs.max(1)));
    let state = AppState { orchestrator, webhook_secret: Arc::from(config.stripe_webhook_secret.as_str()) };
    let app = api::router(state).layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()));

    tracing::info!("Storefront core listening on 0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    sweeper.stop().await;
    Ok(())
}

type Messaging = (Arc<dyn Notifier>, Arc<dyn EventPublisher>);

fn nats_bus(client: async_nats::Client) -> Messaging {
    let bus = Arc::new(NatsBus::new(client));
    (bus.clone(), bus)
}

fn log_bus() -> Messaging { (Arc::new(LogBus), Arc::new(LogBus)) }

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutting down");
}
