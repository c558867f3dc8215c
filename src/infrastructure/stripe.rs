//! Stripe payment gateway over the REST API (no SDK dependency)
//!
//! The checkout snapshot travels in the session's metadata and comes back on the
//! `checkout.session.completed` webhook. Stripe caps metadata at 50 keys of at most
//! 500 characters each, so every cart line gets its own `item_{i}` key.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::application::ports::{PaymentGateway, PaymentSession, RefundReceipt};
use crate::domain::aggregates::{CheckoutSnapshot, LineItem};
use crate::domain::value_objects::{CustomerContact, Money, PaymentReference, ProductId, SessionId, ShippingAddress};
use crate::{EcommerceError, Result};

const MAX_METADATA_KEYS: usize = 50;
const MAX_METADATA_VALUE: usize = 500;
/// Webhooks signed longer ago than this are refused as replays.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Clone, Debug)]
pub struct StripeConfig {
    pub secret_key: String,
    pub api_base: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Clone)]
pub struct StripeGateway {
    client: reqwest::Client,
    config: StripeConfig,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Self {
        Self { client: reqwest::Client::new(), config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<Value> {
        let resp = request.basic_auth(&self.config.secret_key, None::<&str>).send().await
            .map_err(|e| EcommerceError::Gateway(format!("{what}: {e}")))?;
        let status = resp.status();
        let body: Value = resp.json().await.map_err(|e| EcommerceError::Gateway(format!("{what}: {e}")))?;
        if !status.is_success() {
            let message = body["error"]["message"].as_str().unwrap_or("no message");
            return Err(EcommerceError::Gateway(format!("{what} failed with {status}: {message}")));
        }
        Ok(body)
    }
}

fn form_lines(snapshot: &CheckoutSnapshot) -> Vec<(String, String)> {
    let mut form = Vec::new();
    let mut push_line = |i: usize, name: &str, unit: &Money, quantity: u32| {
        form.push((format!("line_items[{i}][price_data][currency]"), unit.currency().to_string()));
        form.push((format!("line_items[{i}][price_data][product_data][name]"), name.to_string()));
        form.push((format!("line_items[{i}][price_data][unit_amount]"), unit.minor_units().to_string()));
        form.push((format!("line_items[{i}][quantity]"), quantity.to_string()));
    };
    for (i, item) in snapshot.items.iter().enumerate() {
        let name = match &item.size {
            Some(size) => format!("{} ({size})", item.name),
            None => item.name.clone(),
        };
        push_line(i, &name, &item.unit_price, item.quantity);
    }
    if !snapshot.shipping.is_zero() {
        push_line(snapshot.items.len(), "Shipping", &snapshot.shipping, 1);
    }
    form
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_payment_session(&self, snapshot: &CheckoutSnapshot) -> Result<PaymentSession> {
        if !snapshot.discount.is_zero() {
            return Err(EcommerceError::Validation("hosted checkout cannot carry a discount line".into()));
        }
        let mut form: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("success_url".into(), self.config.success_url.clone()),
            ("cancel_url".into(), self.config.cancel_url.clone()),
            ("customer_email".into(), snapshot.customer.email.clone()),
            ("client_reference_id".into(), snapshot.session_id.as_str().to_string()),
        ];
        form.extend(form_lines(snapshot));
        for (key, value) in encode_metadata(snapshot)? {
            form.push((format!("metadata[{key}]"), value));
        }

        let body = self.send(self.client.post(self.url("checkout/sessions")).form(&form), "create checkout session").await?;
        let id = body["id"].as_str().ok_or_else(|| EcommerceError::Gateway("checkout session without id".into()))?;
        let url = body["url"].as_str().ok_or_else(|| EcommerceError::Gateway("checkout session without url".into()))?;
        debug!(payment_session = id, "checkout session created");
        Ok(PaymentSession { id: id.to_string(), url: url.to_string() })
    }

    async fn retrieve_payment_reference(&self, session_id: &str) -> Result<PaymentReference> {
        let body = self.send(self.client.get(self.url(&format!("checkout/sessions/{session_id}"))), "retrieve checkout session").await?;
        body["payment_intent"].as_str()
            .map(|p| PaymentReference(p.to_string()))
            .ok_or_else(|| EcommerceError::Gateway(format!("checkout session {session_id} has no payment intent")))
    }

    async fn refund(&self, payment: &PaymentReference, amount: Option<&Money>, idempotency_key: &str) -> Result<RefundReceipt> {
        let mut form = vec![("payment_intent".to_string(), payment.0.clone())];
        if let Some(amount) = amount {
            form.push(("amount".into(), amount.minor_units().to_string()));
        }
        let request = self.client.post(self.url("refunds")).header("Idempotency-Key", idempotency_key).form(&form);
        let body = self.send(request, "refund").await?;

        if body["status"].as_str() == Some("failed") {
            return Err(EcommerceError::Gateway(format!("refund for {payment} was declined")));
        }
        let reference = body["id"].as_str().ok_or_else(|| EcommerceError::Gateway("refund without id".into()))?;
        let minor = body["amount"].as_i64().ok_or_else(|| EcommerceError::Gateway("refund without amount".into()))?;
        let currency = body["currency"].as_str().unwrap_or("eur");
        Ok(RefundReceipt { reference: reference.to_string(), amount: Money::from_minor_units(minor, currency) })
    }
}

// =============================================================================
// Metadata codec
// =============================================================================

/// One cart line in the fewest characters that survive a round trip.
#[derive(Debug, Serialize, Deserialize)]
struct MetaLine {
    p: i64,
    q: u32,
    u: i64,
    n: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    s: Option<String>,
}

pub fn encode_metadata(snapshot: &CheckoutSnapshot) -> Result<BTreeMap<String, String>> {
    let mut meta = BTreeMap::new();
    meta.insert("session_id".to_string(), snapshot.session_id.as_str().to_string());
    if let Some(user_id) = &snapshot.user_id {
        meta.insert("user_id".into(), user_id.clone());
    }
    meta.insert("currency".into(), snapshot.shipping.currency().to_string());
    meta.insert("shipping".into(), snapshot.shipping.minor_units().to_string());
    meta.insert("discount".into(), snapshot.discount.minor_units().to_string());
    meta.insert("customer".into(), serde_json::to_string(&snapshot.customer)?);
    meta.insert("address".into(), serde_json::to_string(&snapshot.shipping_address)?);
    meta.insert("item_count".into(), snapshot.items.len().to_string());
    for (i, item) in snapshot.items.iter().enumerate() {
        let line = MetaLine {
            p: item.product_id.0, q: item.quantity, u: item.unit_price.minor_units(), n: item.name.clone(), s: item.size.clone(),
        };
        meta.insert(format!("item_{i}"), serde_json::to_string(&line)?);
    }

    if meta.len() > MAX_METADATA_KEYS {
        return Err(EcommerceError::Validation(format!("cart too large for checkout: {} lines", snapshot.items.len())));
    }
    if let Some((key, _)) = meta.iter().find(|(_, v)| v.chars().count() > MAX_METADATA_VALUE) {
        return Err(EcommerceError::Validation(format!("checkout field {key} exceeds {MAX_METADATA_VALUE} characters")));
    }
    Ok(meta)
}

fn field<'a>(meta: &'a serde_json::Map<String, Value>, key: &str) -> Result<&'a str> {
    meta.get(key).and_then(Value::as_str)
        .ok_or_else(|| EcommerceError::Validation(format!("checkout metadata missing {key}")))
}

fn minor(meta: &serde_json::Map<String, Value>, key: &str) -> Result<i64> {
    field(meta, key)?.parse().map_err(|_| EcommerceError::Validation(format!("checkout metadata {key} is not a number")))
}

pub fn decode_metadata(meta: &serde_json::Map<String, Value>) -> Result<CheckoutSnapshot> {
    let currency = field(meta, "currency")?;
    let count: usize = field(meta, "item_count")?.parse()
        .map_err(|_| EcommerceError::Validation("checkout metadata item_count is not a number".into()))?;
    let items = (0..count)
        .map(|i| {
            let line: MetaLine = serde_json::from_str(field(meta, &format!("item_{i}"))?)
                .map_err(|e| EcommerceError::Validation(format!("checkout metadata item_{i}: {e}")))?;
            let unit_price = Money::from_minor_units(line.u, currency);
            Ok(LineItem {
                product_id: ProductId(line.p), name: line.n, quantity: line.q,
                subtotal: unit_price.multiply(line.q), unit_price, size: line.s,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let customer: CustomerContact = serde_json::from_str(field(meta, "customer")?)
        .map_err(|e| EcommerceError::Validation(format!("checkout metadata customer: {e}")))?;
    let shipping_address: ShippingAddress = serde_json::from_str(field(meta, "address")?)
        .map_err(|e| EcommerceError::Validation(format!("checkout metadata address: {e}")))?;
    Ok(CheckoutSnapshot {
        session_id: SessionId::new(field(meta, "session_id")?).map_err(|e| EcommerceError::Validation(e.to_string()))?,
        user_id: meta.get("user_id").and_then(Value::as_str).map(str::to_string),
        customer,
        shipping_address,
        items,
        shipping: Money::from_minor_units(minor(meta, "shipping")?, currency),
        discount: Money::from_minor_units(minor(meta, "discount")?, currency),
    })
}

// =============================================================================
// Webhooks
// =============================================================================

/// Verify Stripe webhook signature (HMAC-SHA256) and reject stale timestamps.
pub fn verify_webhook_signature(payload: &[u8], sig_header: &str, secret: &str, now: i64) -> Result<()> {
    let invalid = |why: &str| EcommerceError::SignatureInvalid(why.to_string());
    let mut timestamp = "";
    let mut signatures = Vec::new();
    for part in sig_header.split(',') {
        if let Some(t) = part.trim().strip_prefix("t=") {
            timestamp = t;
        } else if let Some(v) = part.trim().strip_prefix("v1=") {
            signatures.push(v);
        }
    }
    if timestamp.is_empty() || signatures.is_empty() {
        return Err(invalid("malformed Stripe-Signature header"));
    }

    let ts: i64 = timestamp.parse().map_err(|_| invalid("bad timestamp"))?;
    if (now - ts).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(invalid("timestamp outside tolerance"));
    }

    let matched = signatures.iter().any(|sig| {
        let Ok(expected) = hex::decode(sig) else { return false };
        let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else { return false };
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    });
    if !matched {
        return Err(invalid("signature mismatch"));
    }
    Ok(())
}

/// A paid hosted checkout, as reported by the webhook.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedCheckout {
    pub payment_session: String,
    pub payment_reference: Option<PaymentReference>,
    pub snapshot: CheckoutSnapshot,
}

/// `Ok(None)` for event types or unpaid sessions we do not act on.
pub fn parse_webhook_event(payload: &[u8]) -> Result<Option<CompletedCheckout>> {
    let event: Value = serde_json::from_slice(payload)
        .map_err(|e| EcommerceError::Validation(format!("webhook body is not JSON: {e}")))?;
    let kind = event["type"].as_str().unwrap_or_default();
    if kind != "checkout.session.completed" {
        debug!(event_type = kind, "webhook event ignored");
        return Ok(None);
    }
    let session = &event["data"]["object"];
    if session["payment_status"].as_str().is_some_and(|s| s != "paid") {
        warn!(payment_session = ?session["id"].as_str(), "checkout completed without payment, ignored");
        return Ok(None);
    }
    let payment_session = session["id"].as_str()
        .ok_or_else(|| EcommerceError::Validation("checkout session without id".into()))?;
    let meta = session["metadata"].as_object()
        .ok_or_else(|| EcommerceError::Validation("checkout session without metadata".into()))?;
    Ok(Some(CompletedCheckout {
        payment_session: payment_session.to_string(),
        payment_reference: session["payment_intent"].as_str().map(|p| PaymentReference(p.to_string())),
        snapshot: decode_metadata(meta)?,
    }))
}

/// Signs a payload the way Stripe does. Used by tests and local tooling.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| EcommerceError::SignatureInvalid(e.to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes())))
}

pub fn now_secs() -> i64 { Utc::now().timestamp() }

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn snapshot() -> CheckoutSnapshot {
        let unit = Money::eur(Decimal::new(2000, 2));
        CheckoutSnapshot {
            session_id: SessionId::new("sess-1").unwrap(),
            user_id: Some("u-7".into()),
            customer: CustomerContact { name: "Ana".into(), email: "ana@example.com".into(), phone: None },
            shipping_address: ShippingAddress { line1: "Calle 1".into(), city: "Madrid".into(), postal_code: "28001".into(), country: "ES".into(), ..Default::default() },
            items: vec![LineItem {
                product_id: ProductId(9), name: "Linen shirt".into(), quantity: 2,
                subtotal: unit.multiply(2), unit_price: unit, size: Some("M".into()),
            }],
            shipping: Money::eur(Decimal::new(495, 2)),
            discount: Money::zero("eur"),
        }
    }

    #[test]
    fn test_metadata_restores_snapshot() {
        let original = snapshot();
        let meta: serde_json::Map<String, Value> = encode_metadata(&original).unwrap()
            .into_iter().map(|(k, v)| (k, Value::String(v))).collect();
        assert_eq!(decode_metadata(&meta).unwrap(), original);
    }

    #[test]
    fn test_metadata_refuses_oversized_cart() {
        let mut big = snapshot();
        big.items = std::iter::repeat(big.items[0].clone()).take(45).collect();
        assert!(matches!(encode_metadata(&big), Err(EcommerceError::Validation(_))));
    }

    #[test]
    fn test_signature_accepts_valid_and_rejects_tampered() {
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let header = sign_payload(payload, "whsec_test", 1_700_000_000).unwrap();
        assert!(verify_webhook_signature(payload, &header, "whsec_test", 1_700_000_010).is_ok());
        assert!(verify_webhook_signature(b"{}", &header, "whsec_test", 1_700_000_010).is_err());
        assert!(verify_webhook_signature(payload, &header, "whsec_other", 1_700_000_010).is_err());
        assert!(verify_webhook_signature(payload, "garbage", "whsec_test", 1_700_000_010).is_err());
    }

    #[test]
    fn test_signature_rejects_replay() {
        let payload = b"{}";
        let header = sign_payload(payload, "whsec_test", 1_700_000_000).unwrap();
        let err = verify_webhook_signature(payload, &header, "whsec_test", 1_700_000_000 + SIGNATURE_TOLERANCE_SECS + 1).unwrap_err();
        assert!(matches!(err, EcommerceError::SignatureInvalid(_)));
    }

    #[test]
    fn test_parse_completed_checkout() {
        let meta: serde_json::Map<String, Value> = encode_metadata(&snapshot()).unwrap()
            .into_iter().map(|(k, v)| (k, Value::String(v))).collect();
        let event = serde_json::json!({
            "type": "checkout.session.completed",
            "data": { "object": { "id": "cs_1", "payment_intent": "pi_1", "payment_status": "paid", "metadata": meta } }
        });
        let parsed = parse_webhook_event(event.to_string().as_bytes()).unwrap().unwrap();
        assert_eq!(parsed.payment_session, "cs_1");
        assert_eq!(parsed.payment_reference, Some(PaymentReference("pi_1".into())));
        assert_eq!(parsed.snapshot.items.len(), 1);

        let other = serde_json::json!({ "type": "charge.refunded", "data": { "object": {} } });
        assert_eq!(parse_webhook_event(other.to_string().as_bytes()).unwrap(), None);
    }
}
