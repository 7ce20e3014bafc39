//! Promotion payment confirmation.
//!
//! The checkout widget returns an order id, a payment id and a signature.
//! The gateway signs `order_id|payment_id` with the merchant key secret using
//! HMAC-SHA256; a receipt is accepted only when the signature matches.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::info;

use crate::domain::PaymentReceipt;
use crate::errors::ProviderError;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionFee {
    pub amount: Decimal,
    pub currency: String,
}

impl PromotionFee {
    /// Amount in the currency's smallest unit, as the checkout widget expects.
    pub fn minor_units(&self) -> i64 {
        let scaled = (self.amount * Decimal::ONE_HUNDRED).round();
        scaled.to_i64().unwrap_or(i64::MAX)
    }
}

impl Default for PromotionFee {
    fn default() -> Self {
        Self { amount: Decimal::new(4900, 2), currency: "INR".to_string() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    pub order_id: String,
    pub payment_id: String,
    pub fee: PromotionFee,
    pub confirmed_at: DateTime<Utc>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn confirm_payment(
        &self,
        receipt: &PaymentReceipt,
    ) -> Result<PaymentConfirmation, ProviderError>;
}

pub struct RazorpaySignatureVerifier {
    key_id: String,
    key_secret: SecretString,
    fee: PromotionFee,
}

impl RazorpaySignatureVerifier {
    pub fn new(key_id: impl Into<String>, key_secret: SecretString, fee: PromotionFee) -> Self {
        Self { key_id: key_id.into(), key_secret, fee }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn fee(&self) -> &PromotionFee {
        &self.fee
    }
}

#[async_trait]
impl PaymentGateway for RazorpaySignatureVerifier {
    async fn confirm_payment(
        &self,
        receipt: &PaymentReceipt,
    ) -> Result<PaymentConfirmation, ProviderError> {
        let mismatch =
            || ProviderError::with_code("SIGNATURE_MISMATCH", "payment signature mismatch");
        let signature = decode_hex(&receipt.signature).ok_or_else(mismatch)?;
        receipt_mac(&self.key_secret, &receipt.order_id, &receipt.payment_id)?
            .verify_slice(&signature)
            .map_err(|_| mismatch())?;

        info!(
            event_name = "payment.confirmed",
            order_id = %receipt.order_id,
            payment_id = %receipt.payment_id,
            amount = %self.fee.amount,
            currency = %self.fee.currency,
            "promotion payment confirmed"
        );

        Ok(PaymentConfirmation {
            order_id: receipt.order_id.clone(),
            payment_id: receipt.payment_id.clone(),
            fee: self.fee.clone(),
            confirmed_at: Utc::now(),
        })
    }
}

/// Signature the gateway attaches to a successful checkout.
pub fn sign_receipt(
    key_secret: &SecretString,
    order_id: &str,
    payment_id: &str,
) -> Result<String, ProviderError> {
    let mac = receipt_mac(key_secret, order_id, payment_id)?;
    Ok(encode_hex(mac.finalize().into_bytes().as_slice()))
}

fn receipt_mac(
    key_secret: &SecretString,
    order_id: &str,
    payment_id: &str,
) -> Result<HmacSha256, ProviderError> {
    let mut mac = HmacSha256::new_from_slice(key_secret.expose_secret().as_bytes())
        .map_err(|_| ProviderError::new("payment key secret is unusable"))?;
    mac.update(format!("{order_id}|{payment_id}").as_bytes());
    Ok(mac)
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

/// `None` for odd lengths or non-hex characters.
fn decode_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 || !text.bytes().all(|byte| byte.is_ascii_hexdigit()) {
        return None;
    }
    text.as_bytes()
        .chunks(2)
        .map(|pair| {
            let pair = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(pair, 16).ok()
        })
        .collect()
}
