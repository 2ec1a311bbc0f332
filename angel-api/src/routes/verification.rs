use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, NaiveDate, Utc};
use diesel::dsl::sql;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::sql_types::Bool;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use angel_shared::errors::{AppError, AppResult, ErrorCode};
use angel_shared::middleware::{AdminUser, ValidatedJson};
use angel_shared::types::auth::AuthUser;
use angel_shared::types::{ApiResponse, Created};

use crate::models::user::{UserSummary, UserVerificationStatus};
use crate::models::verification::{
    ComparisonMedia, DocumentType, IdVerification, OverallStatus, PendingVerification, Review, SelfieVerification,
    Verification, VerificationChannel, VerificationStatusView,
};
use crate::routes::parse_id;
use crate::schema::{users, verifications};
use crate::services::profile_service;
use crate::AppState;

fn find_for_user(conn: &mut PgConnection, user_id: Uuid) -> AppResult<Option<Verification>> {
    Ok(verifications::table
        .filter(verifications::user_id.eq(user_id))
        .select(Verification::as_select())
        .first(conn)
        .optional()?)
}

/// Inserts or rewrites the record after re-deriving its overall status.
fn persist(conn: &mut PgConnection, record: &mut Verification, is_new: bool, now: DateTime<Utc>) -> AppResult<Verification> {
    record.before_save(now);
    let saved = if is_new {
        diesel::insert_into(verifications::table)
            .values(&*record)
            .returning(Verification::as_returning())
            .get_result(conn)?
    } else {
        diesel::update(verifications::table.find(record.id))
            .set(&*record)
            .returning(Verification::as_returning())
            .get_result(conn)?
    };
    Ok(saved)
}

/// Applies `change` to the per-channel status mirrored on the account.
fn mirror_on_user<F>(conn: &mut PgConnection, user_id: Uuid, now: DateTime<Utc>, change: F) -> AppResult<()>
where
    F: FnOnce(&mut UserVerificationStatus),
{
    let mut status: UserVerificationStatus = users::table
        .find(user_id)
        .select(users::verification_status)
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::new(ErrorCode::UserNotFound, "User not found"))?;
    change(&mut status);
    diesel::update(users::table.find(user_id))
        .set((users::verification_status.eq(status), users::updated_at.eq(now)))
        .execute(conn)?;
    Ok(())
}

/// Loads (or starts) the caller's record, stores one channel submission and
/// mirrors it onto the account.
fn submit<F>(conn: &mut PgConnection, user_id: Uuid, channel: VerificationChannel, fill: F) -> AppResult<Verification>
where
    F: FnOnce(&mut Verification, Review),
{
    let now = Utc::now();
    let (mut record, is_new) = match find_for_user(conn, user_id)? {
        Some(existing) => (existing, false),
        None => (Verification::new(user_id, now), true),
    };
    fill(&mut record, Review::submitted(now));
    let saved = persist(conn, &mut record, is_new, now)?;
    mirror_on_user(conn, user_id, now, |status| status.mark_submitted(channel, now))?;

    tracing::info!(user_id = %user_id, channel = channel.label(), "verification submitted");
    Ok(saved)
}

fn channel_from_path(raw: &str) -> AppResult<VerificationChannel> {
    match raw {
        "id" => Ok(VerificationChannel::Id),
        "selfie" => Ok(VerificationChannel::Selfie),
        "comparison-media" => Ok(VerificationChannel::ComparisonMedia),
        _ => Err(AppError::not_found("Unknown verification channel")),
    }
}

fn submitted_message(channel: VerificationChannel) -> String {
    match channel {
        VerificationChannel::Id => "ID verification submitted successfully".to_string(),
        VerificationChannel::Selfie => "Selfie verification submitted successfully".to_string(),
        VerificationChannel::ComparisonMedia => "Comparison media submitted successfully".to_string(),
    }
}

// --- POST /id ---

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct IdSubmission {
    #[validate(length(min = 1, message = "Front image is required"))]
    pub front_image: String,
    pub back_image: Option<String>,
    pub document_type: DocumentType,
    #[validate(length(min = 1, message = "Document number is required"))]
    pub document_number: String,
    pub expiry_date: Option<NaiveDate>,
}

pub async fn submit_id(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<IdSubmission>,
) -> AppResult<Created<serde_json::Value>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;
    let channel = VerificationChannel::Id;

    let saved = submit(&mut conn, user.id, channel, |record, review| {
        record.id_verification = Some(IdVerification {
            front_image: req.front_image,
            back_image: req.back_image.filter(|b| !b.is_empty()),
            document_type: req.document_type,
            document_number: req.document_number,
            expiry_date: req.expiry_date,
            review,
        });
    })?;

    Ok(Created(ApiResponse::ok_with_message(saved.channel_json(channel), submitted_message(channel))))
}

// --- POST /selfie ---

#[derive(Debug, Deserialize, Validate)]
pub struct SelfieSubmission {
    #[validate(length(min = 1, message = "Selfie image is required"))]
    pub image: String,
}

pub async fn submit_selfie(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<SelfieSubmission>,
) -> AppResult<Created<serde_json::Value>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;
    let channel = VerificationChannel::Selfie;

    let saved = submit(&mut conn, user.id, channel, |record, review| {
        record.selfie_verification = Some(SelfieVerification { image: req.image, review });
    })?;

    Ok(Created(ApiResponse::ok_with_message(saved.channel_json(channel), submitted_message(channel))))
}

// --- POST /comparison-media ---

#[derive(Debug, Deserialize, Validate)]
pub struct ComparisonSubmission {
    #[validate(length(min = 1, message = "At least one image is required"))]
    pub images: Vec<String>,
    #[serde(default)]
    pub videos: Vec<String>,
}

pub async fn submit_comparison_media(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<ComparisonSubmission>,
) -> AppResult<Created<serde_json::Value>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;
    let channel = VerificationChannel::ComparisonMedia;

    let saved = submit(&mut conn, user.id, channel, |record, review| {
        record.comparison_media = Some(ComparisonMedia { images: req.images, videos: req.videos, review });
    })?;

    Ok(Created(ApiResponse::ok_with_message(saved.channel_json(channel), submitted_message(channel))))
}

// --- GET /status ---

pub async fn get_status(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<VerificationStatusView>>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;
    let view = match find_for_user(&mut conn, user.id)? {
        Some(record) => VerificationStatusView::from(&record),
        None => VerificationStatusView::unverified(),
    };
    Ok(Json(ApiResponse::ok(view)))
}

// --- GET /pending (admin) ---

const ANY_CHANNEL_PENDING: &str = "(verifications.id_verification->>'status' = 'pending' \
     OR verifications.selfie_verification->>'status' = 'pending' \
     OR verifications.comparison_media->>'status' = 'pending')";

pub async fn list_pending(
    AdminUser(_admin): AdminUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Vec<PendingVerification>>>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;

    let pending: Vec<Verification> = verifications::table
        .filter(sql::<Bool>(ANY_CHANNEL_PENDING))
        .order(verifications::updated_at.asc())
        .select(Verification::as_select())
        .load(&mut conn)?;

    let user_ids: Vec<Uuid> = pending.iter().map(|v| v.user_id).collect();
    let mut owners: HashMap<Uuid, UserSummary> = users::table
        .filter(users::id.eq_any(user_ids))
        .select(UserSummary::as_select())
        .load::<UserSummary>(&mut conn)?
        .into_iter()
        .map(|u| (u.id, u))
        .collect();

    let queue = pending
        .into_iter()
        .filter_map(|verification| {
            owners
                .remove(&verification.user_id)
                .map(|user_info| PendingVerification { verification, user_info })
        })
        .collect();

    Ok(Json(ApiResponse::ok(queue)))
}

// --- PUT /:channel/:userId/approve (admin) ---

pub async fn approve(
    AdminUser(admin): AdminUser,
    State(state): State<Arc<AppState>>,
    Path((raw_channel, raw_user)): Path<(String, String)>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let channel = channel_from_path(&raw_channel)?;
    let user_id = parse_id(&raw_user, ErrorCode::VerificationNotFound, "Verification not found")?;
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;

    let mut record = find_for_user(&mut conn, user_id)?
        .ok_or_else(|| AppError::new(ErrorCode::VerificationNotFound, "Verification not found"))?;

    let now = Utc::now();
    record.approve(channel, admin.id, now)?;
    let saved = persist(&mut conn, &mut record, false, now)?;
    mirror_on_user(&mut conn, user_id, now, |status| status.mark_verified(channel, now))?;

    if channel == VerificationChannel::ComparisonMedia && saved.status() == OverallStatus::FullyVerified {
        mark_account_verified(&mut conn, &saved, now)?;
    }

    tracing::info!(
        user_id = %user_id,
        admin_id = %admin.id,
        channel = channel.label(),
        overall = saved.status().as_str(),
        "verification approved"
    );

    Ok(Json(ApiResponse::ok_with_message(saved.channel_json(channel), "Verification approved")))
}

/// Flags the companion's matching media and the account itself once every channel passed.
fn mark_account_verified(conn: &mut PgConnection, record: &Verification, now: DateTime<Utc>) -> AppResult<()> {
    if let (Some(media), Some(mut profile)) = (
        record.comparison_media.as_ref(),
        profile_service::companion_for_user(conn, record.user_id)?,
    ) {
        let marked = profile.mark_verified_media(&media.images, &media.videos);
        profile_service::save_companion(conn, &mut profile, now)?;
        tracing::info!(profile_id = %profile.id, marked, "companion media verified");
    }

    diesel::update(users::table.find(record.user_id))
        .set((users::is_verified.eq(true), users::updated_at.eq(now)))
        .execute(conn)?;
    Ok(())
}

// --- PUT /:channel/:userId/reject (admin) ---

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RejectRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "Rejection reason is required"))]
    pub rejection_reason: String,
}

pub async fn reject(
    AdminUser(admin): AdminUser,
    State(state): State<Arc<AppState>>,
    Path((raw_channel, raw_user)): Path<(String, String)>,
    ValidatedJson(req): ValidatedJson<RejectRequest>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let channel = channel_from_path(&raw_channel)?;
    let user_id = parse_id(&raw_user, ErrorCode::VerificationNotFound, "Verification not found")?;
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;

    let mut record = find_for_user(&mut conn, user_id)?
        .ok_or_else(|| AppError::new(ErrorCode::VerificationNotFound, "Verification not found"))?;

    let now = Utc::now();
    let submitted_at = record.reject(channel, req.rejection_reason, now)?.submitted_at;
    let saved = persist(&mut conn, &mut record, false, now)?;
    mirror_on_user(&mut conn, user_id, now, |status| status.mark_rejected(channel, submitted_at))?;

    tracing::info!(user_id = %user_id, admin_id = %admin.id, channel = channel.label(), "verification rejected");

    Ok(Json(ApiResponse::ok_with_message(saved.channel_json(channel), "Verification rejected")))
}
