use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use angel_shared::errors::{AppError, AppResult, ErrorCode};
use angel_shared::middleware::{ClientUser, ValidatedJson};
use angel_shared::types::auth::{AuthUser, UserRole};
use angel_shared::types::{ApiResponse, Created};

use crate::models::client_profile::{ClientProfile, ClientProfilePatch, FavoriteEntry, ResolvedEntry, ViewedEntry};
use crate::models::companion_profile::{CompanionProfile, CompanionSummary};
use crate::routes::parse_id;
use crate::schema::companion_profiles;
use crate::services::profile_service;
use crate::AppState;

fn companion_id(raw: &str) -> AppResult<Uuid> {
    parse_id(raw, ErrorCode::CompanionNotFound, "Companion profile not found")
}

/// Loads summaries for the given companions. Missing ids are simply absent.
fn summaries(conn: &mut PgConnection, ids: Vec<Uuid>) -> AppResult<HashMap<Uuid, CompanionSummary>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let found: Vec<CompanionProfile> = companion_profiles::table
        .filter(companion_profiles::id.eq_any(ids))
        .select(CompanionProfile::as_select())
        .load(conn)?;
    Ok(found.into_iter().map(|p| (p.id, p.summary())).collect())
}

fn resolve_favorites(conn: &mut PgConnection, entries: Vec<FavoriteEntry>) -> AppResult<Vec<ResolvedEntry>> {
    let mut found = summaries(conn, entries.iter().map(|e| e.companion_id).collect())?;
    Ok(entries
        .into_iter()
        .map(|e| ResolvedEntry {
            companion: found.remove(&e.companion_id),
            added_at: Some(e.added_at),
            viewed_at: None,
        })
        .collect())
}

fn resolve_viewed(conn: &mut PgConnection, entries: Vec<ViewedEntry>) -> AppResult<Vec<ResolvedEntry>> {
    let mut found = summaries(conn, entries.iter().map(|e| e.companion_id).collect())?;
    Ok(entries
        .into_iter()
        .map(|e| ResolvedEntry {
            companion: found.remove(&e.companion_id),
            added_at: None,
            viewed_at: Some(e.viewed_at),
        })
        .collect())
}

// --- POST /profile ---

pub async fn upsert_profile(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    ValidatedJson(patch): ValidatedJson<ClientProfilePatch>,
) -> AppResult<Response> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;
    let owner = profile_service::find_user_with_role(&mut conn, user.id, UserRole::Client)?;
    let now = Utc::now();

    match profile_service::client_for_user(&mut conn, owner.id)? {
        Some(mut profile) => {
            profile.apply_patch(patch);
            let saved = profile_service::save_client(&mut conn, &mut profile, now)?;
            tracing::info!(profile_id = %saved.id, user_id = %owner.id, "client profile updated");
            Ok(Json(ApiResponse::ok_with_message(saved, "Profile updated")).into_response())
        }
        None => {
            let profile = ClientProfile::create(owner.id, &owner.first_name, patch, now);
            let saved = profile_service::insert_client(&mut conn, &profile)?;
            tracing::info!(profile_id = %saved.id, user_id = %owner.id, "client profile created");
            Ok(Created(ApiResponse::ok_with_message(saved, "Profile created")).into_response())
        }
    }
}

// --- GET /profile ---

pub async fn get_own_profile(
    ClientUser(user): ClientUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<ClientProfile>>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;
    let profile = profile_service::require_client_for_user(&mut conn, user.id)?;
    Ok(Json(ApiResponse::ok(profile)))
}

// --- POST /favorites/:companionId ---

/// The favorite list and the companion's counter are two separate writes.
pub async fn add_favorite(
    ClientUser(user): ClientUser,
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> AppResult<Json<ApiResponse<Vec<FavoriteEntry>>>> {
    let companion_id = companion_id(&raw_id)?;
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;

    let companion = profile_service::find_companion(&mut conn, companion_id)?;
    let mut profile = profile_service::require_client_for_user(&mut conn, user.id)?;

    let now = Utc::now();
    profile.add_favorite(companion.id, now)?;
    let saved = profile_service::save_client(&mut conn, &mut profile, now)?;
    profile_service::adjust_favorite_count(&mut conn, companion.id, 1)?;

    tracing::info!(client_id = %saved.id, companion_id = %companion.id, "favorite added");

    Ok(Json(ApiResponse::ok_with_message(saved.favorites.0, "Companion added to favorites")))
}

// --- DELETE /favorites/:companionId ---

pub async fn remove_favorite(
    ClientUser(user): ClientUser,
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> AppResult<Json<ApiResponse<Vec<FavoriteEntry>>>> {
    let companion_id = parse_id(&raw_id, ErrorCode::FavoriteNotFound, "Companion not found in favorites")?;
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;
    let mut profile = profile_service::require_client_for_user(&mut conn, user.id)?;

    profile.remove_favorite(companion_id)?;
    let saved = profile_service::save_client(&mut conn, &mut profile, Utc::now())?;
    let touched = profile_service::adjust_favorite_count(&mut conn, companion_id, -1)?;
    if touched == 0 {
        tracing::warn!(companion_id = %companion_id, "favorite removed for a companion that no longer exists");
    }

    tracing::info!(client_id = %saved.id, companion_id = %companion_id, "favorite removed");

    Ok(Json(ApiResponse::ok_with_message(saved.favorites.0, "Companion removed from favorites")))
}

// --- GET /favorites ---

pub async fn list_favorites(
    ClientUser(user): ClientUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Vec<ResolvedEntry>>>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;
    let profile = profile_service::require_client_for_user(&mut conn, user.id)?;
    let resolved = resolve_favorites(&mut conn, profile.favorites.0)?;
    Ok(Json(ApiResponse::ok(resolved)))
}

// --- POST /recently-viewed/:companionId ---

pub async fn touch_recently_viewed(
    ClientUser(user): ClientUser,
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> AppResult<Json<ApiResponse<Vec<ViewedEntry>>>> {
    let companion_id = companion_id(&raw_id)?;
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;

    let companion = profile_service::find_companion(&mut conn, companion_id)?;
    let mut profile = profile_service::require_client_for_user(&mut conn, user.id)?;

    let now = Utc::now();
    profile.touch_recently_viewed(companion.id, now);
    let saved = profile_service::save_client(&mut conn, &mut profile, now)?;

    tracing::info!(client_id = %saved.id, companion_id = %companion.id, "recently viewed updated");

    Ok(Json(ApiResponse::ok(saved.recently_viewed.0)))
}

// --- GET /recently-viewed ---

pub async fn list_recently_viewed(
    ClientUser(user): ClientUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Vec<ResolvedEntry>>>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;
    let profile = profile_service::require_client_for_user(&mut conn, user.id)?;
    let resolved = resolve_viewed(&mut conn, profile.recently_viewed.0)?;
    Ok(Json(ApiResponse::ok(resolved)))
}
