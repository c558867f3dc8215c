//! Cart holds
//!
//! Add-to-cart places a hold instead of touching stock; checkout turns holds into a
//! single ledger decrement. Holds lapse after a fixed window and a sweeper, started
//! and stopped by whoever owns the process, deletes the dead rows.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::application::ports::{EventPublisher, HoldOutcome, HoldRequest, HoldStore, StockStore};
use crate::domain::aggregates::reservation;
use crate::domain::aggregates::Hold;
use crate::domain::events::{DomainEvent, InventoryEvent};
use crate::domain::value_objects::{ProductId, SessionId};
use crate::{EcommerceError, Result};

#[derive(Clone)]
pub struct ReservationService {
    stock: Arc<dyn StockStore>,
    holds: Arc<dyn HoldStore>,
    events: Arc<dyn EventPublisher>,
    ttl: Duration,
}

impl ReservationService {
    pub fn new(stock: Arc<dyn StockStore>, holds: Arc<dyn HoldStore>, events: Arc<dyn EventPublisher>, ttl: Duration) -> Self {
        Self { stock, holds, events, ttl }
    }

    /// Holds `quantity` more units for the session and returns what is left for everyone.
    pub async fn reserve(&self, session_id: &SessionId, product_id: ProductId, quantity: u32) -> Result<u32> {
        if quantity == 0 { return Err(EcommerceError::InvalidQuantity); }
        let request = HoldRequest { session_id: session_id.clone(), product_id, quantity, now: Utc::now(), ttl: self.ttl };
        match self.holds.place_hold(request).await? {
            HoldOutcome::Placed { hold, available } => {
                debug!(%session_id, %product_id, held = hold.quantity, available, "hold placed");
                self.publish(InventoryEvent::Held { session_id: session_id.clone(), product_id, quantity: hold.quantity }).await;
                Ok(available)
            }
            HoldOutcome::Refused { available } => {
                debug!(%session_id, %product_id, quantity, available, "hold refused");
                Err(EcommerceError::InsufficientStock { product_id, available })
            }
        }
    }

    pub async fn release(&self, session_id: &SessionId, product_id: ProductId) -> Result<()> {
        if self.holds.release_hold(session_id, product_id).await?.is_some() {
            self.publish(InventoryEvent::Released { session_id: session_id.clone(), product_id }).await;
        }
        Ok(())
    }

    pub async fn release_session(&self, session_id: &SessionId) -> Result<Vec<Hold>> {
        let released = self.holds.release_session(session_id).await?;
        for hold in &released {
            self.publish(InventoryEvent::Released { session_id: session_id.clone(), product_id: hold.product_id }).await;
        }
        Ok(released)
    }

    /// `authoritative_stock` minus every live hold on the product.
    pub async fn available(&self, product_id: ProductId, authoritative_stock: u32) -> Result<u32> {
        let now = Utc::now();
        let holds = self.holds.live_holds(product_id, now).await?;
        Ok(reservation::available(product_id, authoritative_stock, &holds, now))
    }

    /// Fresh stock read followed by [`Self::available`].
    pub async fn availability(&self, product_id: ProductId) -> Result<u32> {
        let stock = self.stock.read_stock(product_id).await?.ok_or(EcommerceError::ProductNotFound(product_id))?;
        self.available(product_id, stock).await
    }

    /// Units of `product_id` the session currently holds.
    pub async fn held_by(&self, session_id: &SessionId, product_id: ProductId) -> Result<u32> {
        let holds = self.holds.session_holds(session_id, Utc::now()).await?;
        Ok(holds.iter().filter(|h| h.product_id == product_id).map(|h| h.quantity).sum())
    }

    pub async fn sweep(&self) -> Result<u64> {
        let purged = self.holds.purge_expired(Utc::now()).await?;
        if purged > 0 { info!(purged, "expired holds purged"); }
        Ok(purged)
    }

    async fn publish(&self, event: InventoryEvent) {
        if let Err(e) = self.events.publish(&DomainEvent::Inventory(event)).await {
            debug!(error = %e, "inventory event not published");
        }
    }
}

/// Periodic purge of expired holds.
pub struct HoldSweeper {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl HoldSweeper {
    pub fn start(service: ReservationService, every: std::time::Duration) -> Self {
        let (shutdown, mut stop) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = service.sweep().await {
                            error!(error = %e, "hold sweep failed");
                        }
                    }
                    _ = stop.changed() => break,
                }
            }
            debug!("hold sweeper stopped");
        });
        info!(interval_secs = every.as_secs(), "hold sweeper started");
        Self { shutdown, handle }
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            error!(error = %e, "hold sweeper task panicked");
        }
    }
}
