//! Stock holds
//!
//! A hold is a server-owned, time-bounded claim a cart session places on a product.
//! Holds never touch `Product.stock`; they only shrink what other sessions may claim.
//! An expired hold is ignored by every read, whether or not the sweeper has removed it.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use crate::domain::value_objects::{ProductId, SessionId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    pub session_id: SessionId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub reserved_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Hold {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool { self.expires_at > now }
}

/// Sum of quantities held on `product_id` by live holds.
pub fn held_quantity<'a>(holds: impl IntoIterator<Item = &'a Hold>, product_id: ProductId, now: DateTime<Utc>) -> u32 {
    holds.into_iter()
        .filter(|h| h.product_id == product_id && h.is_active(now))
        .map(|h| h.quantity)
        .sum()
}

/// What a shopper may still claim: stock minus everything already held.
pub fn available<'a>(product_id: ProductId, authoritative_stock: u32, holds: impl IntoIterator<Item = &'a Hold>, now: DateTime<Utc>) -> u32 {
    authoritative_stock.saturating_sub(held_quantity(holds, product_id, now))
}

/// Decides a hold placement against a consistent view of stock and other sessions' holds.
///
/// A repeat add by the same session accumulates onto its live hold and pushes the
/// expiry out; an expired hold of the same session is replaced, not extended.
/// On refusal returns how many more units the session could still claim.
#[allow(clippy::too_many_arguments)]
pub fn place(
    existing: Option<&Hold>,
    held_by_others: u32,
    stock: u32,
    session_id: &SessionId,
    product_id: ProductId,
    quantity: u32,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Result<Hold, u32> {
    let already = existing.filter(|h| h.is_active(now)).map_or(0, |h| h.quantity);
    let claimable = stock.saturating_sub(held_by_others);
    let wanted = already.saturating_add(quantity);
    if wanted > claimable {
        return Err(claimable.saturating_sub(already));
    }
    let reserved_at = existing.filter(|h| h.is_active(now)).map_or(now, |h| h.reserved_at);
    Ok(Hold { session_id: session_id.clone(), product_id, quantity: wanted, reserved_at, expires_at: now + ttl })
}
