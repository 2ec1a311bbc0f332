use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use diesel::sql_types::Jsonb;
use diesel::{AsExpression, FromSqlRow};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use angel_shared::jsonb_document;

use crate::schema::{payments, subscriptions};

pub const CURRENCY: &str = "AUD";
pub const SUBSCRIPTION_TERM_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Basic,
    Premium,
    Vip,
}

impl Plan {
    pub const ALL: [Plan; 4] = [Plan::Free, Plan::Basic, Plan::Premium, Plan::Vip];

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Basic => "basic",
            Plan::Premium => "premium",
            Plan::Vip => "vip",
        }
    }

    pub fn price_cents(&self) -> i64 {
        match self {
            Plan::Free => 0,
            Plan::Basic => 2999,
            Plan::Premium => 5999,
            Plan::Vip => 9999,
        }
    }

    pub fn is_paid(&self) -> bool {
        self.price_cents() > 0
    }

    /// Premium tiers put the companion in the featured rotation for the whole term.
    pub fn grants_featured(&self) -> bool {
        matches!(self, Plan::Premium | Plan::Vip)
    }

    pub fn features(&self) -> PlanFeatures {
        let (featured, priority, enhanced, messages, media, verification, badge) = match self {
            Plan::Free => (false, false, false, 20, 5, false, false),
            Plan::Basic => (false, false, true, 100, 20, false, false),
            Plan::Premium => (true, true, true, 500, 50, true, false),
            Plan::Vip => (true, true, true, -1, -1, true, true),
        };
        PlanFeatures {
            featured_profile: featured,
            priority_listing: priority,
            enhanced_visibility: enhanced,
            message_limit: messages,
            media_limit: media,
            verification_included: verification,
            custom_badge: badge,
        }
    }

    fn display_name(&self) -> &'static str {
        match self {
            Plan::Free => "Free",
            Plan::Basic => "Basic",
            Plan::Premium => "Premium",
            Plan::Vip => "VIP",
        }
    }

    fn highlights(&self) -> &'static [&'static str] {
        match self {
            Plan::Free => &["Basic profile", "Limited messages", "Standard search visibility"],
            Plan::Basic => &[
                "Enhanced profile",
                "Unlimited messages",
                "Improved search visibility",
                "Basic analytics",
            ],
            Plan::Premium => &[
                "Premium profile",
                "Unlimited messages",
                "Priority search placement",
                "Featured in rotation",
                "Advanced analytics",
                "Verification badge",
            ],
            Plan::Vip => &[
                "VIP profile",
                "Unlimited messages",
                "Top search placement",
                "Permanent featured status",
                "Premium verification badge",
                "Comprehensive analytics",
                "Priority support",
            ],
        }
    }
}

/// Entitlements copied onto a subscription. A limit of -1 means unlimited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Jsonb)]
#[serde(rename_all = "camelCase")]
pub struct PlanFeatures {
    pub featured_profile: bool,
    pub priority_listing: bool,
    pub enhanced_visibility: bool,
    pub message_limit: i32,
    pub media_limit: i32,
    pub verification_included: bool,
    pub custom_badge: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Jsonb)]
#[serde(transparent)]
pub struct PaymentMetadata(pub BTreeMap<String, String>);

impl PaymentMetadata {
    pub fn from_pairs(pairs: &[(&str, String)]) -> Self {
        Self(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
    }
}

jsonb_document!(PlanFeatures, PaymentMetadata);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeaturedDuration {
    #[serde(rename = "7days")]
    SevenDays,
    #[serde(rename = "14days")]
    FourteenDays,
    #[serde(rename = "30days")]
    ThirtyDays,
}

impl FeaturedDuration {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeaturedDuration::SevenDays => "7days",
            FeaturedDuration::FourteenDays => "14days",
            FeaturedDuration::ThirtyDays => "30days",
        }
    }

    pub fn days(&self) -> i64 {
        match self {
            FeaturedDuration::SevenDays => 7,
            FeaturedDuration::FourteenDays => 14,
            FeaturedDuration::ThirtyDays => 30,
        }
    }

    pub fn price_cents(&self) -> i64 {
        match self {
            FeaturedDuration::SevenDays => 1999,
            FeaturedDuration::FourteenDays => 3499,
            FeaturedDuration::ThirtyDays => 5999,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CreditCard,
    DebitCard,
    Paypal,
    BankTransfer,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::CreditCard => "credit_card",
            PaymentMethod::DebitCard => "debit_card",
            PaymentMethod::Paypal => "paypal",
            PaymentMethod::BankTransfer => "bank_transfer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentType {
    Subscription,
    FeaturedListing,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Subscription => "subscription",
            PaymentType::FeaturedListing => "featured_listing",
        }
    }
}

pub mod status {
    pub const ACTIVE: &str = "active";
    pub const CANCELED: &str = "canceled";
    pub const COMPLETED: &str = "completed";
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Insertable, AsChangeset, Serialize)]
#[diesel(table_name = subscriptions, treat_none_as_null = true)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: Uuid,
    #[serde(rename = "user")]
    pub user_id: Uuid,
    pub plan: String,
    pub status: String,
    pub features: PlanFeatures,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub auto_renew: bool,
    pub payment_method: Option<String>,
    #[serde(rename = "lastPayment")]
    pub last_payment_id: Option<Uuid>,
    pub next_billing_date: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Starts a fixed 30-day term. Paid plans record the method and payment.
    pub fn start(
        user_id: Uuid,
        plan: Plan,
        method: Option<PaymentMethod>,
        auto_renew: bool,
        last_payment_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Self {
        let end_date = now + Duration::days(SUBSCRIPTION_TERM_DAYS);
        Self {
            id: Uuid::now_v7(),
            user_id,
            plan: plan.as_str().to_string(),
            status: status::ACTIVE.to_string(),
            features: plan.features(),
            start_date: now,
            end_date,
            auto_renew,
            payment_method: method.filter(|_| plan.is_paid()).map(|m| m.as_str().to_string()),
            last_payment_id,
            next_billing_date: auto_renew.then_some(end_date),
            canceled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.status = status::CANCELED.to_string();
        self.auto_renew = false;
        self.canceled_at = Some(now);
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Insertable)]
#[diesel(table_name = payments)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub payment_method: String,
    pub payment_type: String,
    pub status: String,
    pub transaction_id: Option<String>,
    pub receipt_url: Option<String>,
    pub metadata: PaymentMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    #[allow(clippy::too_many_arguments)]
    pub fn completed(
        user_id: Uuid,
        amount_cents: i64,
        method: PaymentMethod,
        kind: PaymentType,
        transaction_id: String,
        receipt_url: String,
        metadata: PaymentMetadata,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            amount_cents,
            currency: CURRENCY.to_string(),
            payment_method: method.as_str().to_string(),
            payment_type: kind.as_str().to_string(),
            status: status::COMPLETED.to_string(),
            transaction_id: Some(transaction_id),
            receipt_url: Some(receipt_url),
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn receipt(&self) -> PaymentReceipt {
        PaymentReceipt {
            amount: cents_to_amount(self.amount_cents),
            currency: self.currency.clone(),
            status: self.status.clone(),
            transaction_id: self.transaction_id.clone(),
            receipt_url: self.receipt_url.clone(),
        }
    }

    pub fn view(self) -> PaymentView {
        PaymentView {
            id: self.id,
            user_id: self.user_id,
            amount: cents_to_amount(self.amount_cents),
            currency: self.currency,
            payment_method: self.payment_method,
            payment_type: self.payment_type,
            status: self.status,
            transaction_id: self.transaction_id,
            receipt_url: self.receipt_url,
            metadata: self.metadata,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

pub fn cents_to_amount(cents: i64) -> f64 {
    cents as f64 / 100.0
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    pub amount: f64,
    pub currency: String,
    pub status: String,
    pub transaction_id: Option<String>,
    pub receipt_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentView {
    pub id: Uuid,
    #[serde(rename = "user")]
    pub user_id: Uuid,
    pub amount: f64,
    pub currency: String,
    pub payment_method: String,
    pub payment_type: String,
    pub status: String,
    pub transaction_id: Option<String>,
    pub receipt_url: Option<String>,
    pub metadata: PaymentMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Public catalogue entry.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanOffer {
    pub id: &'static str,
    pub name: &'static str,
    pub price: f64,
    pub currency: &'static str,
    pub interval: &'static str,
    pub features: &'static [&'static str],
}

pub fn plan_catalogue() -> Vec<PlanOffer> {
    Plan::ALL
        .iter()
        .map(|plan| PlanOffer {
            id: plan.as_str(),
            name: plan.display_name(),
            price: cents_to_amount(plan.price_cents()),
            currency: CURRENCY,
            interval: "month",
            features: plan.highlights(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_table_matches_prices_and_limits() {
        assert_eq!(Plan::Basic.price_cents(), 2999);
        assert!(!Plan::Free.is_paid());
        assert_eq!(Plan::Free.features().message_limit, 20);
        assert_eq!(Plan::Vip.features().media_limit, -1);
        assert!(Plan::Vip.features().custom_badge);
        assert!(Plan::Premium.grants_featured());
        assert!(!Plan::Basic.grants_featured());
    }

    #[test]
    fn featured_durations() {
        let parsed: FeaturedDuration = serde_json::from_str("\"14days\"").unwrap();
        assert_eq!(parsed.days(), 14);
        assert_eq!(parsed.price_cents(), 3499);
        assert!(serde_json::from_str::<FeaturedDuration>("\"60days\"").is_err());
    }

    #[test]
    fn subscription_term_and_billing_date() {
        let now = Utc::now();
        let sub = Subscription::start(Uuid::now_v7(), Plan::Premium, Some(PaymentMethod::Paypal), true, None, now);
        assert_eq!(sub.end_date - sub.start_date, Duration::days(30));
        assert_eq!(sub.next_billing_date, Some(sub.end_date));
        assert_eq!(sub.payment_method.as_deref(), Some("paypal"));

        let free = Subscription::start(Uuid::now_v7(), Plan::Free, Some(PaymentMethod::Paypal), false, None, now);
        assert_eq!(free.payment_method, None);
        assert_eq!(free.next_billing_date, None);
    }

    #[test]
    fn cancel_disables_auto_renew() {
        let now = Utc::now();
        let mut sub = Subscription::start(Uuid::now_v7(), Plan::Basic, Some(PaymentMethod::CreditCard), true, None, now);
        sub.cancel(now);
        assert_eq!(sub.status, "canceled");
        assert!(!sub.auto_renew);
        assert_eq!(sub.canceled_at, Some(now));
    }

    #[test]
    fn payment_views_report_decimal_amounts() {
        let payment = Payment::completed(
            Uuid::now_v7(),
            5999,
            PaymentMethod::CreditCard,
            PaymentType::FeaturedListing,
            "txn_abc".into(),
            "https://receipts.example/r.pdf".into(),
            PaymentMetadata::from_pairs(&[("duration", "30days".into()), ("days", "30".into())]),
            Utc::now(),
        );
        assert_eq!(payment.receipt().amount, 59.99);
        let value = serde_json::to_value(payment.view()).unwrap();
        assert_eq!(value["paymentType"], "featured_listing");
        assert_eq!(value["metadata"]["days"], "30");
    }

    #[test]
    fn catalogue_lists_every_plan() {
        let catalogue = plan_catalogue();
        assert_eq!(catalogue.len(), 4);
        assert_eq!(catalogue[3].name, "VIP");
        assert_eq!(catalogue[1].price, 29.99);
    }
}
