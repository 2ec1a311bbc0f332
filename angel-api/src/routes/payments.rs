use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use angel_shared::errors::{AppError, AppResult, ErrorCode};
use angel_shared::middleware::ValidatedJson;
use angel_shared::types::auth::AuthUser;
use angel_shared::types::{ApiResponse, Created, Paginated, PaginationParams};

use crate::models::billing::{
    self, FeaturedDuration, Payment, PaymentMetadata, PaymentMethod, PaymentReceipt, PaymentType, PaymentView, Plan,
    PlanOffer, Subscription,
};
use crate::models::user::SubscriptionMirror;
use crate::schema::{companion_profiles, payments, subscriptions, users};
use crate::services::payment_gateway::ChargeRequest;
use crate::services::profile_service;
use crate::AppState;

const DEFAULT_HISTORY_LIMIT: i64 = 10;

fn active_subscription(conn: &mut PgConnection, user_id: Uuid) -> AppResult<Option<Subscription>> {
    Ok(subscriptions::table
        .filter(subscriptions::user_id.eq(user_id))
        .filter(subscriptions::status.eq(billing::status::ACTIVE))
        .select(Subscription::as_select())
        .first(conn)
        .optional()?)
}

fn no_active_subscription() -> AppError {
    AppError::new(ErrorCode::SubscriptionNotFound, "No active subscription found")
}

/// Runs the charge through the configured gateway and records the completed payment.
#[allow(clippy::too_many_arguments)]
async fn charge_and_record(
    state: &AppState,
    conn: &mut PgConnection,
    user_id: Uuid,
    amount_cents: i64,
    method: PaymentMethod,
    kind: PaymentType,
    description: String,
    metadata: PaymentMetadata,
) -> AppResult<Payment> {
    let request = ChargeRequest {
        amount_cents,
        currency: billing::CURRENCY.to_string(),
        method,
        description,
    };
    let receipt = state
        .payments
        .charge(&request)
        .await
        .map_err(|e| AppError::new(ErrorCode::PaymentFailed, e.to_string()))?;

    let payment = Payment::completed(
        user_id,
        amount_cents,
        method,
        kind,
        receipt.transaction_id,
        receipt.receipt_url,
        metadata,
        Utc::now(),
    );
    diesel::insert_into(payments::table).values(&payment).execute(conn)?;

    tracing::info!(
        payment_id = %payment.id,
        user_id = %user_id,
        amount_cents,
        kind = kind.as_str(),
        "payment recorded"
    );
    Ok(payment)
}

/// Copies the plan onto the companion profile, if the user has one.
fn mirror_on_companion(
    conn: &mut PgConnection,
    user_id: Uuid,
    plan: Plan,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> AppResult<()> {
    let Some(profile) = profile_service::companion_for_user(conn, user_id)? else {
        return Ok(());
    };

    let target = companion_profiles::table.find(profile.id);
    diesel::update(target)
        .set((
            companion_profiles::subscription_level.eq(plan.as_str()),
            companion_profiles::subscription_expires_at.eq(Some(expires_at)),
            companion_profiles::updated_at.eq(now),
        ))
        .execute(conn)?;

    if plan.grants_featured() {
        diesel::update(target)
            .set((
                companion_profiles::is_featured.eq(true),
                companion_profiles::featured_until.eq(Some(expires_at)),
            ))
            .execute(conn)?;
    }
    Ok(())
}

// --- POST /subscriptions ---

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscriptionRequest {
    pub plan: Plan,
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub auto_renew: bool,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionCreated {
    pub subscription: Subscription,
    pub payment: Option<PaymentReceipt>,
}

pub async fn create_subscription(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<CreateSubscriptionRequest>,
) -> AppResult<Created<SubscriptionCreated>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;

    if active_subscription(&mut conn, user.id)?.is_some() {
        return Err(AppError::new(
            ErrorCode::SubscriptionAlreadyActive,
            "User already has an active subscription",
        ));
    }

    let plan = req.plan;
    let payment = if plan.is_paid() {
        let method = req
            .payment_method
            .ok_or_else(|| AppError::invalid_field("paymentMethod", "Payment method is required for paid plans"))?;
        let metadata = PaymentMetadata::from_pairs(&[
            ("plan", plan.as_str().to_string()),
            ("duration", format!("{} days", billing::SUBSCRIPTION_TERM_DAYS)),
        ]);
        Some(
            charge_and_record(
                &state,
                &mut conn,
                user.id,
                plan.price_cents(),
                method,
                PaymentType::Subscription,
                format!("Subscription to {} plan", plan.as_str()),
                metadata,
            )
            .await?,
        )
    } else {
        None
    };

    let now = Utc::now();
    let subscription = Subscription::start(
        user.id,
        plan,
        req.payment_method,
        req.auto_renew,
        payment.as_ref().map(|p| p.id),
        now,
    );
    let subscription: Subscription = diesel::insert_into(subscriptions::table)
        .values(&subscription)
        .returning(Subscription::as_returning())
        .get_result(&mut conn)?;

    let mirror = SubscriptionMirror {
        plan: plan.as_str().to_string(),
        is_active: true,
        expires_at: Some(subscription.end_date),
    };
    diesel::update(users::table.find(user.id))
        .set((users::subscription_status.eq(Some(mirror)), users::updated_at.eq(now)))
        .execute(&mut conn)?;

    mirror_on_companion(&mut conn, user.id, plan, subscription.end_date, now)?;

    tracing::info!(
        subscription_id = %subscription.id,
        user_id = %user.id,
        plan = plan.as_str(),
        "subscription created"
    );

    Ok(Created(ApiResponse::ok_with_message(
        SubscriptionCreated {
            subscription,
            payment: payment.map(|p| p.receipt()),
        },
        "Subscription created successfully",
    )))
}

// --- GET /subscriptions/current ---

pub async fn current_subscription(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Subscription>>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;
    let subscription = active_subscription(&mut conn, user.id)?.ok_or_else(no_active_subscription)?;
    Ok(Json(ApiResponse::ok(subscription)))
}

// --- PUT /subscriptions/cancel ---

/// No refund; the mirrored status just stops being active.
pub async fn cancel_subscription(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Subscription>>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;
    let mut subscription = active_subscription(&mut conn, user.id)?.ok_or_else(no_active_subscription)?;

    let now = Utc::now();
    subscription.cancel(now);
    let saved: Subscription = diesel::update(subscriptions::table.find(subscription.id))
        .set(&subscription)
        .returning(Subscription::as_returning())
        .get_result(&mut conn)?;

    let mirror = SubscriptionMirror {
        plan: saved.plan.clone(),
        is_active: false,
        expires_at: Some(saved.end_date),
    };
    diesel::update(users::table.find(user.id))
        .set((users::subscription_status.eq(Some(mirror)), users::updated_at.eq(now)))
        .execute(&mut conn)?;

    tracing::info!(subscription_id = %saved.id, user_id = %user.id, "subscription canceled");

    Ok(Json(ApiResponse::ok_with_message(saved, "Subscription canceled successfully")))
}

// --- POST /featured-listings ---

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct FeaturedListingRequest {
    pub duration: FeaturedDuration,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeaturedWindow {
    pub is_featured: bool,
    pub featured_until: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct FeaturedListingCreated {
    pub featured: FeaturedWindow,
    pub payment: PaymentReceipt,
}

pub async fn create_featured_listing(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<FeaturedListingRequest>,
) -> AppResult<Created<FeaturedListingCreated>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;
    let profile = profile_service::companion_for_user(&mut conn, user.id)?.ok_or_else(|| {
        AppError::new(
            ErrorCode::CompanionProfileRequired,
            "Only companions can purchase featured listings",
        )
    })?;

    let duration = req.duration;
    let metadata = PaymentMetadata::from_pairs(&[
        ("duration", duration.as_str().to_string()),
        ("days", duration.days().to_string()),
    ]);
    let payment = charge_and_record(
        &state,
        &mut conn,
        user.id,
        duration.price_cents(),
        req.payment_method,
        PaymentType::FeaturedListing,
        format!("Featured listing for {} days", duration.days()),
        metadata,
    )
    .await?;

    let now = Utc::now();
    let featured_until = featured_until(now, duration);
    diesel::update(companion_profiles::table.find(profile.id))
        .set((
            companion_profiles::is_featured.eq(true),
            companion_profiles::featured_until.eq(Some(featured_until)),
            companion_profiles::updated_at.eq(now),
        ))
        .execute(&mut conn)?;

    tracing::info!(profile_id = %profile.id, until = %featured_until, "featured listing purchased");

    Ok(Created(ApiResponse::ok_with_message(
        FeaturedListingCreated {
            featured: FeaturedWindow { is_featured: true, featured_until },
            payment: payment.receipt(),
        },
        "Featured listing created successfully",
    )))
}

fn featured_until(now: DateTime<Utc>, duration: FeaturedDuration) -> DateTime<Utc> {
    now + Duration::days(duration.days())
}

// --- GET /history ---

pub async fn history(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> AppResult<Json<ApiResponse<Paginated<PaymentView>>>> {
    let page = params.resolve(DEFAULT_HISTORY_LIMIT)?;
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;

    let total: i64 = payments::table
        .filter(payments::user_id.eq(user.id))
        .count()
        .get_result(&mut conn)?;
    let found: Vec<Payment> = payments::table
        .filter(payments::user_id.eq(user.id))
        .order(payments::created_at.desc())
        .offset(page.offset())
        .limit(page.limit())
        .select(Payment::as_select())
        .load(&mut conn)?;

    let items = found.into_iter().map(Payment::view).collect();
    Ok(Json(ApiResponse::ok(Paginated::new(items, total, &page))))
}

// --- GET /subscription-plans ---

pub async fn subscription_plans() -> Json<ApiResponse<Vec<PlanOffer>>> {
    Json(ApiResponse::ok(billing::plan_catalogue()))
}
