use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::Jsonb;
use diesel::{AsExpression, FromSqlRow};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use angel_shared::errors::{AppError, AppResult, ErrorCode};
use angel_shared::jsonb_document;

use crate::models::companion_profile::{CompanionSummary, GenderPreference};
use crate::models::patch::{always_truthy, merge, merge_opt};
use crate::models::user::Gender;
use crate::schema::client_profiles;

pub const RECENTLY_VIEWED_LIMIT: usize = 20;

fn default_min_age() -> i32 {
    18
}

fn default_companion_gender() -> GenderPreference {
    GenderPreference::All
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AgeRange {
    #[serde(default = "default_min_age")]
    #[validate(range(min = 18, message = "minimum age must be at least 18"))]
    pub min: i32,
    #[serde(default)]
    #[validate(range(min = 18, message = "maximum age must be at least 18"))]
    pub max: Option<i32>,
}

impl Default for AgeRange {
    fn default() -> Self {
        Self { min: default_min_age(), max: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, AsExpression, FromSqlRow)]
#[diesel(sql_type = Jsonb)]
#[serde(rename_all = "camelCase")]
pub struct ClientPreferences {
    #[serde(default = "default_companion_gender")]
    pub companion_gender: GenderPreference,
    #[serde(default)]
    #[validate]
    pub age_range: AgeRange,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
}

impl Default for ClientPreferences {
    fn default() -> Self {
        Self {
            companion_gender: default_companion_gender(),
            age_range: AgeRange::default(),
            services: Vec::new(),
            locations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteEntry {
    #[serde(rename = "companion")]
    pub companion_id: Uuid,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewedEntry {
    #[serde(rename = "companion")]
    pub companion_id: Uuid,
    pub viewed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Jsonb)]
#[serde(transparent)]
pub struct Favorites(pub Vec<FavoriteEntry>);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Jsonb)]
#[serde(transparent)]
pub struct RecentlyViewed(pub Vec<ViewedEntry>);

jsonb_document!(ClientPreferences, Favorites, RecentlyViewed);
always_truthy!(ClientPreferences);

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Insertable, AsChangeset, Serialize)]
#[diesel(table_name = client_profiles, treat_none_as_null = true)]
#[serde(rename_all = "camelCase")]
pub struct ClientProfile {
    pub id: Uuid,
    #[serde(rename = "user")]
    pub user_id: Uuid,
    pub display_name: Option<String>,
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub preferences: ClientPreferences,
    pub favorites: Favorites,
    pub recently_viewed: RecentlyViewed,
    pub verification_level: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ClientProfilePatch {
    #[validate(length(min = 1, message = "display name cannot be empty"))]
    pub display_name: Option<String>,
    #[validate(range(min = 18, message = "age must be at least 18"))]
    pub age: Option<i32>,
    pub gender: Option<Gender>,
    #[validate]
    pub preferences: Option<ClientPreferences>,
}

impl ClientProfile {
    pub fn create(user_id: Uuid, first_name: &str, patch: ClientProfilePatch, now: DateTime<Utc>) -> Self {
        let display_name = patch
            .display_name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| first_name.to_string());

        Self {
            id: Uuid::now_v7(),
            user_id,
            display_name: Some(display_name),
            age: patch.age,
            gender: patch.gender.map(|g| g.as_str().to_string()),
            preferences: patch.preferences.unwrap_or_default(),
            favorites: Favorites::default(),
            recently_viewed: RecentlyViewed::default(),
            verification_level: "none".to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply_patch(&mut self, patch: ClientProfilePatch) {
        merge_opt(&mut self.display_name, patch.display_name);
        merge_opt(&mut self.age, patch.age);
        merge_opt(&mut self.gender, patch.gender.map(|g| g.as_str().to_string()));
        merge(&mut self.preferences, patch.preferences);
    }

    /// Runs before every write: stamps `updated_at` and caps the history.
    pub fn before_save(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.recently_viewed.0.truncate(RECENTLY_VIEWED_LIMIT);
    }

    pub fn has_favorite(&self, companion_id: Uuid) -> bool {
        self.favorites.0.iter().any(|f| f.companion_id == companion_id)
    }

    pub fn add_favorite(&mut self, companion_id: Uuid, now: DateTime<Utc>) -> AppResult<FavoriteEntry> {
        if self.has_favorite(companion_id) {
            return Err(AppError::new(ErrorCode::FavoriteAlreadyExists, "Companion already in favorites"));
        }
        let entry = FavoriteEntry { companion_id, added_at: now };
        self.favorites.0.push(entry.clone());
        Ok(entry)
    }

    pub fn remove_favorite(&mut self, companion_id: Uuid) -> AppResult<()> {
        let index = self
            .favorites
            .0
            .iter()
            .position(|f| f.companion_id == companion_id)
            .ok_or_else(|| AppError::new(ErrorCode::FavoriteNotFound, "Companion not found in favorites"))?;
        self.favorites.0.remove(index);
        Ok(())
    }

    /// Moves `companion_id` to the front of the history.
    pub fn touch_recently_viewed(&mut self, companion_id: Uuid, now: DateTime<Utc>) {
        self.recently_viewed.0.retain(|v| v.companion_id != companion_id);
        self.recently_viewed.0.insert(0, ViewedEntry { companion_id, viewed_at: now });
    }
}

/// Favorite or history entry with the companion summary resolved.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedEntry {
    pub companion: Option<CompanionSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> ClientProfile {
        ClientProfile::create(Uuid::now_v7(), "Liam", ClientProfilePatch::default(), Utc::now())
    }

    #[test]
    fn create_uses_first_name_and_default_preferences() {
        let p = profile();
        assert_eq!(p.display_name.as_deref(), Some("Liam"));
        assert_eq!(p.preferences.companion_gender, GenderPreference::All);
        assert_eq!(p.preferences.age_range.min, 18);
        assert_eq!(p.verification_level, "none");
    }

    #[test]
    fn duplicate_favorite_is_rejected() {
        let mut p = profile();
        let companion = Uuid::now_v7();
        p.add_favorite(companion, Utc::now()).unwrap();
        let err = p.add_favorite(companion, Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::Known { code: ErrorCode::FavoriteAlreadyExists, .. }));
        assert_eq!(p.favorites.0.len(), 1);
    }

    #[test]
    fn removing_unknown_favorite_is_not_found() {
        let mut p = profile();
        let err = p.remove_favorite(Uuid::now_v7()).unwrap_err();
        assert!(matches!(err, AppError::Known { code: ErrorCode::FavoriteNotFound, .. }));
    }

    #[test]
    fn recently_viewed_is_capped_deduplicated_and_newest_first() {
        let mut p = profile();
        let ids: Vec<Uuid> = (0..25).map(|_| Uuid::now_v7()).collect();
        for id in &ids {
            p.touch_recently_viewed(*id, Utc::now());
            p.before_save(Utc::now());
        }
        assert_eq!(p.recently_viewed.0.len(), RECENTLY_VIEWED_LIMIT);
        assert_eq!(p.recently_viewed.0[0].companion_id, ids[24]);

        p.touch_recently_viewed(ids[10], Utc::now());
        p.before_save(Utc::now());
        assert_eq!(p.recently_viewed.0[0].companion_id, ids[10]);
        let occurrences = p.recently_viewed.0.iter().filter(|v| v.companion_id == ids[10]).count();
        assert_eq!(occurrences, 1);
        assert!(p.recently_viewed.0.len() <= RECENTLY_VIEWED_LIMIT);
    }

    #[test]
    fn under_age_is_rejected() {
        let patch = ClientProfilePatch { age: Some(17), ..Default::default() };
        assert!(patch.validate().is_err());
    }

    #[test]
    fn favorites_serialize_with_companion_key() {
        let mut p = profile();
        let companion = Uuid::now_v7();
        p.add_favorite(companion, Utc::now()).unwrap();
        let value = serde_json::to_value(&p).unwrap();
        assert_eq!(value["favorites"][0]["companion"], serde_json::json!(companion));
        assert_eq!(value["user"], serde_json::json!(p.user_id));
    }
}
