use axum::extract::State;
use axum::Json;
use chrono::{Duration, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use angel_shared::errors::{AppError, AppResult, ErrorCode};
use angel_shared::middleware::ValidatedJson;
use angel_shared::types::auth::{AuthUser, UserRole};
use angel_shared::types::{ApiResponse, Created};

use crate::models::compliance::AgeVerification;
use crate::models::user::{AgreementStatus, NewUser, PublicUser, User, UserPatch, UserVerificationStatus};
use crate::schema::users;
use crate::services::auth_service;
use crate::services::{profile_service, token_service};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct AuthPayload {
    pub token: String,
    pub user: PublicUser,
}

// --- POST /register ---

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(email(message = "Please include a valid email"))]
    pub email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,
    pub role: Option<UserRole>,
    #[validate(length(min = 1, max = 100, message = "First name is required"))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100, message = "Last name is required"))]
    pub last_name: String,
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> AppResult<Created<AuthPayload>> {
    let role = req.role.unwrap_or(UserRole::Client);
    if role == UserRole::Admin {
        return Err(AppError::invalid_field("role", "Role must be client or companion"));
    }

    let email = auth_service::normalize_email(&req.email);
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;

    let taken: i64 = users::table
        .filter(users::email.eq(&email))
        .count()
        .get_result(&mut conn)?;
    if taken > 0 {
        return Err(AppError::new(ErrorCode::EmailAlreadyExists, "User already exists"));
    }

    let new_user = NewUser {
        id: Uuid::now_v7(),
        email,
        password_hash: auth_service::hash_password(&req.password)?,
        role: role.as_str().to_string(),
        first_name: req.first_name.trim().to_string(),
        last_name: req.last_name.trim().to_string(),
        verification_status: UserVerificationStatus::default(),
        agreement_status: AgreementStatus::default(),
        age_verification: AgeVerification::default(),
    };

    let user: User = diesel::insert_into(users::table)
        .values(&new_user)
        .returning(User::as_returning())
        .get_result(&mut conn)?;

    let token = token_service::create_access_token(user.id, role, &state.config.jwt_secret, state.config.jwt_access_ttl_secs)?;

    tracing::info!(user_id = %user.id, role = %role, "user registered");

    Ok(Created(ApiResponse::ok(AuthPayload { token, user: user.into() })))
}

// --- POST /login ---

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Please include a valid email"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> AppResult<Json<ApiResponse<AuthPayload>>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;

    let user: User = users::table
        .filter(users::email.eq(auth_service::normalize_email(&req.email)))
        .select(User::as_select())
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::new(ErrorCode::InvalidCredentials, "Invalid credentials"))?;

    if !auth_service::verify_password(&req.password, &user.password_hash)? {
        return Err(AppError::new(ErrorCode::InvalidCredentials, "Invalid credentials"));
    }
    if !user.is_active {
        return Err(AppError::new(ErrorCode::AccountDisabled, "Account is deactivated"));
    }

    let role = user
        .role()
        .ok_or_else(|| AppError::internal(format!("stored role is invalid: {}", user.role)))?;

    let now = Utc::now();
    let user: User = diesel::update(users::table.find(user.id))
        .set((users::last_login_at.eq(now), users::updated_at.eq(now)))
        .returning(User::as_returning())
        .get_result(&mut conn)?;

    let token = token_service::create_access_token(user.id, role, &state.config.jwt_secret, state.config.jwt_access_ttl_secs)?;

    tracing::info!(user_id = %user.id, "user logged in");

    Ok(Json(ApiResponse::ok(AuthPayload { token, user: user.into() })))
}

// --- GET /me ---

pub async fn me(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<PublicUser>>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;
    let found = profile_service::find_user(&mut conn, user.id)?;
    Ok(Json(ApiResponse::ok(found.into())))
}

// --- PUT /profile ---

pub async fn update_profile(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    ValidatedJson(patch): ValidatedJson<UserPatch>,
) -> AppResult<Json<ApiResponse<PublicUser>>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;

    let mut found = profile_service::find_user(&mut conn, user.id)?;
    found.apply_patch(patch);

    let updated: User = diesel::update(users::table.find(found.id))
        .set(&found.profile_changes(Utc::now()))
        .returning(User::as_returning())
        .get_result(&mut conn)?;

    tracing::info!(user_id = %updated.id, "user profile updated");

    Ok(Json(ApiResponse::ok(updated.into())))
}

// --- POST /password-reset-request ---

#[derive(Debug, Deserialize, Validate)]
pub struct ResetRequest {
    #[validate(email(message = "Please include a valid email"))]
    pub email: String,
}

const RESET_REQUESTED: &str = "If an account with that email exists, a password reset link has been sent";

pub async fn request_password_reset(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<ResetRequest>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;

    let found: Option<User> = users::table
        .filter(users::email.eq(auth_service::normalize_email(&req.email)))
        .select(User::as_select())
        .first(&mut conn)
        .optional()?;

    // Same answer whether or not the account exists.
    let Some(found) = found else {
        return Ok(Json(ApiResponse::message(RESET_REQUESTED)));
    };

    let token = token_service::create_reset_token();
    let ttl = state.config.password_reset_ttl_minutes;
    diesel::update(users::table.find(found.id))
        .set((
            users::reset_token_hash.eq(token_service::hash_token(&token)),
            users::reset_token_expires_at.eq(Utc::now() + Duration::minutes(ttl)),
        ))
        .execute(&mut conn)?;

    let reset_url = format!("{}/reset-password?token={token}", state.config.app_url.trim_end_matches('/'));
    if let Err(e) = state.email.send_password_reset(&found.email, &reset_url, ttl).await {
        tracing::error!(user_id = %found.id, error = %e, "failed to send password reset email");
    }

    tracing::info!(user_id = %found.id, "password reset requested");

    Ok(Json(ApiResponse::message(RESET_REQUESTED)))
}

// --- POST /password-reset ---

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    #[validate(length(min = 1, message = "Reset token is required"))]
    pub token: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub new_password: String,
}

pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<ResetPasswordRequest>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;

    let found: User = users::table
        .filter(users::reset_token_hash.eq(token_service::hash_token(&req.token)))
        .select(User::as_select())
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::new(ErrorCode::ResetTokenInvalid, "Invalid or already used reset token"))?;

    let now = Utc::now();
    if found.reset_token_expires_at.map_or(true, |expires| expires <= now) {
        return Err(AppError::new(ErrorCode::ResetTokenExpired, "Reset token has expired"));
    }

    diesel::update(users::table.find(found.id))
        .set((
            users::password_hash.eq(auth_service::hash_password(&req.new_password)?),
            users::reset_token_hash.eq(None::<String>),
            users::reset_token_expires_at.eq(None::<chrono::DateTime<Utc>>),
            users::updated_at.eq(now),
        ))
        .execute(&mut conn)?;

    tracing::info!(user_id = %found.id, "password reset completed");

    Ok(Json(ApiResponse::message("Password has been reset successfully")))
}
