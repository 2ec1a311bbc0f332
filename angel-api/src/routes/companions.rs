use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use angel_shared::errors::{AppError, AppResult, ErrorCode};
use angel_shared::middleware::{CompanionUser, ValidatedJson};
use angel_shared::types::auth::{AuthUser, UserRole};
use angel_shared::types::{ApiResponse, Created};

use crate::models::companion_profile::{
    AudioIntroduction, CompanionProfile, CompanionProfilePatch, CompanionProfileView, Photo, Video,
};
use crate::models::user::{PublicUser, User, UserSummary};
use crate::routes::parse_id;
use crate::schema::users;
use crate::services::profile_service;
use crate::AppState;

// --- POST /profile ---

/// Creates the caller's profile on first call, shallow-merges afterwards.
pub async fn upsert_profile(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    ValidatedJson(patch): ValidatedJson<CompanionProfilePatch>,
) -> AppResult<Response> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;
    let owner = profile_service::find_user_with_role(&mut conn, user.id, UserRole::Companion)?;
    let now = Utc::now();

    match profile_service::companion_for_user(&mut conn, owner.id)? {
        Some(mut profile) => {
            profile.apply_patch(patch);
            let saved = profile_service::save_companion(&mut conn, &mut profile, now)?;
            tracing::info!(profile_id = %saved.id, user_id = %owner.id, "companion profile updated");
            Ok(Json(ApiResponse::ok_with_message(saved.view(owner.id), "Profile updated")).into_response())
        }
        None => {
            let profile = CompanionProfile::create(owner.id, &owner.first_name, patch, now)?;
            let saved = profile_service::insert_companion(&mut conn, &profile)?;
            tracing::info!(profile_id = %saved.id, user_id = %owner.id, "companion profile created");
            Ok(Created(ApiResponse::ok_with_message(saved.view(owner.id), "Profile created")).into_response())
        }
    }
}

// --- GET /profile ---

pub async fn get_own_profile(
    CompanionUser(user): CompanionUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<CompanionProfileView<UserSummary>>>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;

    let profile = profile_service::require_companion_for_user(&mut conn, user.id)?;
    let owner: UserSummary = users::table
        .find(user.id)
        .select(UserSummary::as_select())
        .first(&mut conn)?;

    Ok(Json(ApiResponse::ok(profile.view(owner))))
}

// --- GET /profile/:id ---

/// Public profile page. Every fetch counts as a view.
pub async fn get_profile_by_id(
    _user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> AppResult<Json<ApiResponse<CompanionProfileView<PublicUser>>>> {
    let profile_id = parse_id(&raw_id, ErrorCode::ProfileNotFound, "Profile not found")?;
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;

    let profile = profile_service::record_profile_view(&mut conn, profile_id, Utc::now())?;
    let owner: User = users::table
        .find(profile.user_id)
        .select(User::as_select())
        .first(&mut conn)?;

    Ok(Json(ApiResponse::ok(profile.view(PublicUser::from(owner)))))
}

// --- POST /photos ---

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddPhotoRequest {
    #[validate(length(min = 1, message = "Photo URL is required"))]
    pub url: String,
    #[serde(default)]
    pub is_main: bool,
}

pub async fn add_photo(
    CompanionUser(user): CompanionUser,
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<AddPhotoRequest>,
) -> AppResult<Created<Vec<Photo>>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;
    let mut profile = profile_service::require_companion_for_user(&mut conn, user.id)?;

    let now = Utc::now();
    let photo = profile.add_photo(req.url, req.is_main, now);
    let saved = profile_service::save_companion(&mut conn, &mut profile, now)?;

    tracing::info!(profile_id = %saved.id, photo_id = %photo.id, is_main = photo.is_main, "photo added");

    Ok(Created(ApiResponse::ok_with_message(saved.photos.0, "Photo added")))
}

// --- DELETE /photos/:photoId ---

pub async fn delete_photo(
    CompanionUser(user): CompanionUser,
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> AppResult<Json<ApiResponse<Vec<Photo>>>> {
    let photo_id = parse_id(&raw_id, ErrorCode::PhotoNotFound, "Photo not found")?;
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;
    let mut profile = profile_service::require_companion_for_user(&mut conn, user.id)?;

    profile.delete_photo(photo_id)?;
    let saved = profile_service::save_companion(&mut conn, &mut profile, Utc::now())?;

    tracing::info!(profile_id = %saved.id, photo_id = %photo_id, "photo deleted");

    Ok(Json(ApiResponse::ok_with_message(saved.photos.0, "Photo deleted")))
}

// --- PUT /photos/:photoId/main ---

pub async fn set_main_photo(
    CompanionUser(user): CompanionUser,
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> AppResult<Json<ApiResponse<Vec<Photo>>>> {
    let photo_id = parse_id(&raw_id, ErrorCode::PhotoNotFound, "Photo not found")?;
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;
    let mut profile = profile_service::require_companion_for_user(&mut conn, user.id)?;

    profile.set_main_photo(photo_id)?;
    let saved = profile_service::save_companion(&mut conn, &mut profile, Utc::now())?;

    tracing::info!(profile_id = %saved.id, photo_id = %photo_id, "main photo changed");

    Ok(Json(ApiResponse::ok_with_message(saved.photos.0, "Main photo updated")))
}

// --- POST /videos ---

#[derive(Debug, Deserialize, Validate)]
pub struct AddVideoRequest {
    #[validate(length(min = 1, message = "Video URL is required"))]
    pub url: String,
    pub thumbnail: Option<String>,
}

pub async fn add_video(
    CompanionUser(user): CompanionUser,
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<AddVideoRequest>,
) -> AppResult<Created<Vec<Video>>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;
    let mut profile = profile_service::require_companion_for_user(&mut conn, user.id)?;

    let now = Utc::now();
    let video = profile.add_video(req.url, req.thumbnail, now);
    let saved = profile_service::save_companion(&mut conn, &mut profile, now)?;

    tracing::info!(profile_id = %saved.id, video_id = %video.id, "video added");

    Ok(Created(ApiResponse::ok_with_message(saved.videos.0, "Video added")))
}

// --- DELETE /videos/:videoId ---

pub async fn delete_video(
    CompanionUser(user): CompanionUser,
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> AppResult<Json<ApiResponse<Vec<Video>>>> {
    let video_id = parse_id(&raw_id, ErrorCode::VideoNotFound, "Video not found")?;
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;
    let mut profile = profile_service::require_companion_for_user(&mut conn, user.id)?;

    profile.delete_video(video_id)?;
    let saved = profile_service::save_companion(&mut conn, &mut profile, Utc::now())?;

    tracing::info!(profile_id = %saved.id, video_id = %video_id, "video deleted");

    Ok(Json(ApiResponse::ok_with_message(saved.videos.0, "Video deleted")))
}

// --- POST /audio ---

#[derive(Debug, Deserialize, Validate)]
pub struct AudioRequest {
    #[validate(length(min = 1, message = "Audio URL is required"))]
    pub url: String,
    #[validate(range(min = 0.0, message = "duration cannot be negative"))]
    pub duration: Option<f64>,
}

pub async fn set_audio(
    CompanionUser(user): CompanionUser,
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<AudioRequest>,
) -> AppResult<Json<ApiResponse<AudioIntroduction>>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;
    let mut profile = profile_service::require_companion_for_user(&mut conn, user.id)?;

    let now = Utc::now();
    let audio = profile.set_audio(req.url, req.duration, now);
    let saved = profile_service::save_companion(&mut conn, &mut profile, now)?;

    tracing::info!(profile_id = %saved.id, "audio introduction set");

    Ok(Json(ApiResponse::ok_with_message(audio, "Audio introduction updated")))
}

// --- DELETE /audio ---

pub async fn delete_audio(
    CompanionUser(user): CompanionUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;
    let mut profile = profile_service::require_companion_for_user(&mut conn, user.id)?;

    profile.clear_audio();
    let saved = profile_service::save_companion(&mut conn, &mut profile, Utc::now())?;

    tracing::info!(profile_id = %saved.id, "audio introduction removed");

    Ok(Json(ApiResponse::message("Audio introduction removed")))
}
