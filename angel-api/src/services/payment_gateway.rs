use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;

use crate::models::billing::PaymentMethod;

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub amount_cents: i64,
    pub currency: String,
    pub method: PaymentMethod,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChargeReceipt {
    pub transaction_id: String,
    pub receipt_url: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("Payment processing failed")]
    Declined,
}

/// Charges a customer. Subscriptions and featured listings only see this trait.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeReceipt, GatewayError>;
}

const TXN_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Stand-in gateway that approves a configurable share of charges.
pub struct MockGateway {
    success_rate: f64,
    receipt_base_url: String,
}

impl MockGateway {
    /// A rate outside `0..=1` is clamped; a non-finite one approves everything.
    pub fn new(success_rate: f64, receipt_base_url: impl Into<String>) -> Self {
        let success_rate = if success_rate.is_finite() { success_rate.clamp(0.0, 1.0) } else { 1.0 };
        Self {
            success_rate,
            receipt_base_url: receipt_base_url.into(),
        }
    }

    fn transaction_id(rng: &mut impl Rng) -> String {
        let suffix: String = (0..13)
            .map(|_| TXN_ALPHABET[rng.gen_range(0..TXN_ALPHABET.len())] as char)
            .collect();
        format!("txn_{suffix}")
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeReceipt, GatewayError> {
        let (approved, transaction_id) = {
            let mut rng = rand::thread_rng();
            (rng.gen_bool(self.success_rate), Self::transaction_id(&mut rng))
        };

        if !approved {
            tracing::warn!(
                amount_cents = request.amount_cents,
                method = request.method.as_str(),
                "mock payment declined"
            );
            return Err(GatewayError::Declined);
        }

        let receipt_url = format!(
            "{}/receipt-{}.pdf",
            self.receipt_base_url.trim_end_matches('/'),
            Utc::now().timestamp_millis()
        );
        tracing::info!(
            transaction_id = %transaction_id,
            amount_cents = request.amount_cents,
            currency = %request.currency,
            description = %request.description,
            "mock payment approved"
        );
        Ok(ChargeReceipt { transaction_id, receipt_url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ChargeRequest {
        ChargeRequest {
            amount_cents: 2999,
            currency: "AUD".into(),
            method: PaymentMethod::CreditCard,
            description: "Subscription to basic plan".into(),
        }
    }

    #[tokio::test]
    async fn always_approves_at_full_rate() {
        let gateway = MockGateway::new(1.0, "https://receipts.test/");
        let receipt = gateway.charge(&request()).await.unwrap();
        assert!(receipt.transaction_id.starts_with("txn_"));
        assert_eq!(receipt.transaction_id.len(), 17);
        assert!(receipt.transaction_id[4..].chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert!(receipt.receipt_url.starts_with("https://receipts.test/receipt-"));
        assert!(receipt.receipt_url.ends_with(".pdf"));
    }

    #[tokio::test]
    async fn always_declines_at_zero_rate() {
        let gateway = MockGateway::new(0.0, "https://receipts.test");
        let err = gateway.charge(&request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Declined));
        assert_eq!(err.to_string(), "Payment processing failed");
    }

    #[test]
    fn success_rate_is_clamped() {
        assert_eq!(MockGateway::new(3.0, "x").success_rate, 1.0);
        assert_eq!(MockGateway::new(-1.0, "x").success_rate, 0.0);
    }

    #[tokio::test]
    async fn non_finite_rate_approves() {
        for rate in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let gateway = MockGateway::new(rate, "https://receipts.test");
            assert_eq!(gateway.success_rate, 1.0);
            assert!(gateway.charge(&request()).await.is_ok());
        }
    }
}
