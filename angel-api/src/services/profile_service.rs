use chrono::{DateTime, Utc};
use diesel::dsl::sql;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::sql_types::Integer;
use uuid::Uuid;

use angel_shared::errors::{AppError, AppResult, ErrorCode};
use angel_shared::types::auth::UserRole;

use crate::models::client_profile::ClientProfile;
use crate::models::companion_profile::CompanionProfile;
use crate::models::user::User;
use crate::schema::{client_profiles, companion_profiles, users};

pub fn find_user(conn: &mut PgConnection, user_id: Uuid) -> AppResult<User> {
    users::table
        .find(user_id)
        .select(User::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::new(ErrorCode::UserNotFound, "User not found"))
}

/// Loads the caller and checks their stored role against the profile type being written.
pub fn find_user_with_role(conn: &mut PgConnection, user_id: Uuid, role: UserRole) -> AppResult<User> {
    let user = find_user(conn, user_id)?;
    if user.role() != Some(role) {
        let message = match role {
            UserRole::Companion => "Only companions can create this type of profile",
            UserRole::Client => "Only clients can create this type of profile",
            UserRole::Admin => "Only admins can perform this action",
        };
        return Err(AppError::new(ErrorCode::ProfileRoleMismatch, message));
    }
    Ok(user)
}

pub fn companion_for_user(conn: &mut PgConnection, user_id: Uuid) -> AppResult<Option<CompanionProfile>> {
    Ok(companion_profiles::table
        .filter(companion_profiles::user_id.eq(user_id))
        .select(CompanionProfile::as_select())
        .first(conn)
        .optional()?)
}

pub fn require_companion_for_user(conn: &mut PgConnection, user_id: Uuid) -> AppResult<CompanionProfile> {
    companion_for_user(conn, user_id)?.ok_or_else(|| AppError::new(ErrorCode::ProfileNotFound, "Profile not found"))
}

pub fn find_companion(conn: &mut PgConnection, profile_id: Uuid) -> AppResult<CompanionProfile> {
    companion_profiles::table
        .find(profile_id)
        .select(CompanionProfile::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::new(ErrorCode::CompanionNotFound, "Companion profile not found"))
}

pub fn client_for_user(conn: &mut PgConnection, user_id: Uuid) -> AppResult<Option<ClientProfile>> {
    Ok(client_profiles::table
        .filter(client_profiles::user_id.eq(user_id))
        .select(ClientProfile::as_select())
        .first(conn)
        .optional()?)
}

pub fn require_client_for_user(conn: &mut PgConnection, user_id: Uuid) -> AppResult<ClientProfile> {
    client_for_user(conn, user_id)?.ok_or_else(|| AppError::new(ErrorCode::ProfileNotFound, "Client profile not found"))
}

pub fn insert_companion(conn: &mut PgConnection, profile: &CompanionProfile) -> AppResult<CompanionProfile> {
    Ok(diesel::insert_into(companion_profiles::table)
        .values(profile)
        .returning(CompanionProfile::as_returning())
        .get_result(conn)?)
}

/// Writes the owner-edited document back, stamping `updated_at`. Counters, the
/// featured window and the subscription tier have their own targeted updates and are
/// left untouched, so the returned row carries their current values.
pub fn save_companion(conn: &mut PgConnection, profile: &mut CompanionProfile, now: DateTime<Utc>) -> AppResult<CompanionProfile> {
    profile.before_save(now);
    Ok(diesel::update(companion_profiles::table.find(profile.id))
        .set((
            companion_profiles::display_name.eq(&profile.display_name),
            companion_profiles::age.eq(profile.age),
            companion_profiles::height.eq(profile.height),
            companion_profiles::body_type.eq(&profile.body_type),
            companion_profiles::ethnicity.eq(&profile.ethnicity),
            companion_profiles::languages.eq(&profile.languages),
            companion_profiles::about_me.eq(&profile.about_me),
            companion_profiles::services.eq(&profile.services),
            companion_profiles::rates.eq(&profile.rates),
            companion_profiles::availability.eq(&profile.availability),
            companion_profiles::location.eq(&profile.location),
            companion_profiles::photos.eq(&profile.photos),
            companion_profiles::videos.eq(&profile.videos),
            companion_profiles::audio_introduction.eq(&profile.audio_introduction),
            companion_profiles::social_media.eq(&profile.social_media),
            companion_profiles::preferences.eq(&profile.preferences),
            companion_profiles::updated_at.eq(profile.updated_at),
        ))
        .returning(CompanionProfile::as_returning())
        .get_result(conn)?)
}

pub fn insert_client(conn: &mut PgConnection, profile: &ClientProfile) -> AppResult<ClientProfile> {
    Ok(diesel::insert_into(client_profiles::table)
        .values(profile)
        .returning(ClientProfile::as_returning())
        .get_result(conn)?)
}

/// Writes the whole document back. History is capped before the write.
pub fn save_client(conn: &mut PgConnection, profile: &mut ClientProfile, now: DateTime<Utc>) -> AppResult<ClientProfile> {
    profile.before_save(now);
    Ok(diesel::update(client_profiles::table.find(profile.id))
        .set(&*profile)
        .returning(ClientProfile::as_returning())
        .get_result(conn)?)
}

/// Adjusts the favorite counter in place. Never drops below zero.
pub fn adjust_favorite_count(conn: &mut PgConnection, companion_id: Uuid, delta: i32) -> AppResult<usize> {
    Ok(diesel::update(companion_profiles::table.find(companion_id))
        .set(companion_profiles::favorite_count.eq(sql::<Integer>("GREATEST(favorite_count + ")
            .bind::<Integer, _>(delta)
            .sql(", 0)")))
        .execute(conn)?)
}

/// Counts a profile view and refreshes the last-active stamp.
pub fn record_profile_view(conn: &mut PgConnection, profile_id: Uuid, now: DateTime<Utc>) -> AppResult<CompanionProfile> {
    diesel::update(companion_profiles::table.find(profile_id))
        .set((
            companion_profiles::profile_views.eq(companion_profiles::profile_views + 1),
            companion_profiles::last_active_at.eq(now),
            companion_profiles::updated_at.eq(now),
        ))
        .returning(CompanionProfile::as_returning())
        .get_result(conn)
        .optional()?
        .ok_or_else(|| AppError::new(ErrorCode::ProfileNotFound, "Profile not found"))
}
