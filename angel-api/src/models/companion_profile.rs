use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::Jsonb;
use diesel::{AsExpression, FromSqlRow};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use angel_shared::errors::{AppError, AppResult, ErrorCode};
use angel_shared::jsonb_document;

use crate::models::patch::{always_truthy, merge, merge_opt};
use crate::schema::companion_profiles;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BodyType {
    Slim,
    Athletic,
    Average,
    Curvy,
    PlusSize,
}

impl BodyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BodyType::Slim => "slim",
            BodyType::Athletic => "athletic",
            BodyType::Average => "average",
            BodyType::Curvy => "curvy",
            BodyType::PlusSize => "plus-size",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenderPreference {
    Male,
    Female,
    All,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate, AsExpression, FromSqlRow)]
#[diesel(sql_type = Jsonb)]
#[serde(rename_all = "camelCase", default)]
pub struct Rates {
    #[validate(range(min = 0.0, message = "hourly rate must be a positive number"))]
    pub hourly: Option<f64>,
    #[validate(range(min = 0.0, message = "rate must be a positive number"))]
    pub two_hours: Option<f64>,
    #[validate(range(min = 0.0, message = "rate must be a positive number"))]
    pub three_hours: Option<f64>,
    #[validate(range(min = 0.0, message = "rate must be a positive number"))]
    pub dinner: Option<f64>,
    #[validate(range(min = 0.0, message = "rate must be a positive number"))]
    pub overnight: Option<f64>,
    pub additional_info: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DaySlot {
    pub available: bool,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Jsonb)]
#[serde(default)]
pub struct Availability {
    pub monday: DaySlot,
    pub tuesday: DaySlot,
    pub wednesday: DaySlot,
    pub thursday: DaySlot,
    pub friday: DaySlot,
    pub saturday: DaySlot,
    pub sunday: DaySlot,
}

fn default_country() -> String {
    "Australia".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, AsExpression, FromSqlRow)]
#[diesel(sql_type = Jsonb)]
#[serde(rename_all = "camelCase")]
pub struct CompanionLocation {
    #[validate(length(min = 1, message = "city is required"))]
    pub city: String,
    #[validate(length(min = 1, message = "state is required"))]
    pub state: String,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default)]
    pub travel_availability: bool,
    #[serde(default)]
    pub travel_locations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Photo {
    pub id: Uuid,
    pub url: String,
    pub is_main: bool,
    pub is_verified: bool,
    pub upload_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    pub id: Uuid,
    pub url: String,
    pub thumbnail: String,
    pub is_verified: bool,
    pub upload_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Jsonb)]
#[serde(transparent)]
pub struct Photos(pub Vec<Photo>);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Jsonb)]
#[serde(transparent)]
pub struct Videos(pub Vec<Video>);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Jsonb)]
#[serde(rename_all = "camelCase")]
pub struct AudioIntroduction {
    pub url: String,
    pub duration: f64,
    pub upload_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Jsonb)]
#[serde(rename_all = "camelCase", default)]
pub struct SocialMedia {
    pub instagram: Option<String>,
    pub twitter: Option<String>,
    pub website: Option<String>,
}

fn default_min_client_age() -> i32 {
    18
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, AsExpression, FromSqlRow)]
#[diesel(sql_type = Jsonb)]
#[serde(rename_all = "camelCase")]
pub struct CompanionPreferences {
    #[serde(default = "default_min_client_age")]
    #[validate(range(min = 18, message = "minimum client age must be at least 18"))]
    pub min_client_age: i32,
    #[serde(default)]
    pub max_client_age: Option<i32>,
    #[serde(default)]
    pub gender_preference: Option<GenderPreference>,
    #[serde(default)]
    pub other_preferences: Vec<String>,
}

impl Default for CompanionPreferences {
    fn default() -> Self {
        Self {
            min_client_age: default_min_client_age(),
            max_client_age: None,
            gender_preference: None,
            other_preferences: Vec::new(),
        }
    }
}

jsonb_document!(
    Rates,
    Availability,
    CompanionLocation,
    Photos,
    Videos,
    AudioIntroduction,
    SocialMedia,
    CompanionPreferences,
);
always_truthy!(Rates, Availability, CompanionLocation, SocialMedia, CompanionPreferences);

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Insertable)]
#[diesel(table_name = companion_profiles)]
pub struct CompanionProfile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub display_name: String,
    pub age: Option<i32>,
    pub height: Option<i32>,
    pub body_type: Option<String>,
    pub ethnicity: Option<String>,
    pub languages: Vec<String>,
    pub about_me: Option<String>,
    pub services: Vec<String>,
    pub rates: Rates,
    pub availability: Availability,
    pub location: CompanionLocation,
    pub photos: Photos,
    pub videos: Videos,
    pub audio_introduction: Option<AudioIntroduction>,
    pub social_media: SocialMedia,
    pub preferences: CompanionPreferences,
    pub profile_views: i32,
    pub favorite_count: i32,
    pub last_active_at: DateTime<Utc>,
    pub rating: Option<f64>,
    pub is_featured: bool,
    pub featured_until: Option<DateTime<Utc>>,
    pub subscription_level: String,
    pub subscription_expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Incoming create/update body. Every field is optional; see [`crate::models::patch`].
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CompanionProfilePatch {
    #[validate(length(min = 1, message = "display name cannot be empty"))]
    pub display_name: Option<String>,
    #[validate(range(min = 18, max = 99, message = "age must be between 18 and 99"))]
    pub age: Option<i32>,
    #[validate(range(min = 140, max = 220, message = "height must be between 140 and 220 cm"))]
    pub height: Option<i32>,
    pub body_type: Option<BodyType>,
    pub ethnicity: Option<String>,
    pub languages: Option<Vec<String>>,
    #[validate(length(max = 2000, message = "about me cannot exceed 2000 characters"))]
    pub about_me: Option<String>,
    pub services: Option<Vec<String>>,
    #[validate]
    pub rates: Option<Rates>,
    pub availability: Option<Availability>,
    #[validate]
    pub location: Option<CompanionLocation>,
    pub social_media: Option<SocialMedia>,
    #[validate]
    pub preferences: Option<CompanionPreferences>,
}

impl CompanionProfile {
    /// Builds a first-time profile. A location with city and state is mandatory here.
    pub fn create(user_id: Uuid, first_name: &str, patch: CompanionProfilePatch, now: DateTime<Utc>) -> AppResult<Self> {
        let location = patch
            .location
            .ok_or_else(|| AppError::invalid_field("location.city", "city is required"))?;

        let display_name = patch
            .display_name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| first_name.to_string());

        Ok(Self {
            id: Uuid::now_v7(),
            user_id,
            display_name,
            age: patch.age,
            height: patch.height,
            body_type: patch.body_type.map(|b| b.as_str().to_string()),
            ethnicity: patch.ethnicity,
            languages: patch.languages.unwrap_or_default(),
            about_me: patch.about_me,
            services: patch.services.unwrap_or_default(),
            rates: patch.rates.unwrap_or_default(),
            availability: patch.availability.unwrap_or_default(),
            location,
            photos: Photos::default(),
            videos: Videos::default(),
            audio_introduction: None,
            social_media: patch.social_media.unwrap_or_default(),
            preferences: patch.preferences.unwrap_or_default(),
            profile_views: 0,
            favorite_count: 0,
            last_active_at: now,
            rating: None,
            is_featured: false,
            featured_until: None,
            subscription_level: "free".to_string(),
            subscription_expires_at: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn apply_patch(&mut self, patch: CompanionProfilePatch) {
        merge(&mut self.display_name, patch.display_name);
        merge_opt(&mut self.age, patch.age);
        merge_opt(&mut self.height, patch.height);
        merge_opt(&mut self.body_type, patch.body_type.map(|b| b.as_str().to_string()));
        merge_opt(&mut self.ethnicity, patch.ethnicity);
        merge(&mut self.languages, patch.languages);
        merge_opt(&mut self.about_me, patch.about_me);
        merge(&mut self.services, patch.services);
        merge(&mut self.rates, patch.rates);
        merge(&mut self.availability, patch.availability);
        merge(&mut self.location, patch.location);
        merge(&mut self.social_media, patch.social_media);
        merge(&mut self.preferences, patch.preferences);
    }

    pub fn before_save(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    /// Appends a photo. A main photo demotes every existing one first.
    pub fn add_photo(&mut self, url: String, is_main: bool, now: DateTime<Utc>) -> Photo {
        if is_main {
            for photo in self.photos.0.iter_mut() {
                photo.is_main = false;
            }
        }
        let photo = Photo { id: Uuid::now_v7(), url, is_main, is_verified: false, upload_date: now };
        self.photos.0.push(photo.clone());
        photo
    }

    pub fn set_main_photo(&mut self, photo_id: Uuid) -> AppResult<Photo> {
        if !self.photos.0.iter().any(|p| p.id == photo_id) {
            return Err(AppError::new(ErrorCode::PhotoNotFound, "Photo not found"));
        }
        let mut selected = None;
        for photo in self.photos.0.iter_mut() {
            photo.is_main = photo.id == photo_id;
            if photo.is_main {
                selected = Some(photo.clone());
            }
        }
        selected.ok_or_else(|| AppError::new(ErrorCode::PhotoNotFound, "Photo not found"))
    }

    pub fn delete_photo(&mut self, photo_id: Uuid) -> AppResult<()> {
        let index = self
            .photos
            .0
            .iter()
            .position(|p| p.id == photo_id)
            .ok_or_else(|| AppError::new(ErrorCode::PhotoNotFound, "Photo not found"))?;
        self.photos.0.remove(index);
        Ok(())
    }

    pub fn add_video(&mut self, url: String, thumbnail: Option<String>, now: DateTime<Utc>) -> Video {
        let video = Video {
            id: Uuid::now_v7(),
            url,
            thumbnail: thumbnail.unwrap_or_default(),
            is_verified: false,
            upload_date: now,
        };
        self.videos.0.push(video.clone());
        video
    }

    pub fn delete_video(&mut self, video_id: Uuid) -> AppResult<()> {
        let index = self
            .videos
            .0
            .iter()
            .position(|v| v.id == video_id)
            .ok_or_else(|| AppError::new(ErrorCode::VideoNotFound, "Video not found"))?;
        self.videos.0.remove(index);
        Ok(())
    }

    pub fn set_audio(&mut self, url: String, duration: Option<f64>, now: DateTime<Utc>) -> AudioIntroduction {
        let audio = AudioIntroduction { url, duration: duration.unwrap_or(0.0), upload_date: now };
        self.audio_introduction = Some(audio.clone());
        audio
    }

    pub fn clear_audio(&mut self) {
        self.audio_introduction = None;
    }

    /// Flags media whose URL was part of an approved comparison submission.
    pub fn mark_verified_media(&mut self, images: &[String], videos: &[String]) -> usize {
        let mut marked = 0;
        for photo in self.photos.0.iter_mut().filter(|p| images.contains(&p.url)) {
            photo.is_verified = true;
            marked += 1;
        }
        for video in self.videos.0.iter_mut().filter(|v| videos.contains(&v.url)) {
            video.is_verified = true;
            marked += 1;
        }
        marked
    }

    pub fn view<U: Serialize>(self, user: U) -> CompanionProfileView<U> {
        CompanionProfileView {
            id: self.id,
            user,
            display_name: self.display_name,
            age: self.age,
            height: self.height,
            body_type: self.body_type,
            ethnicity: self.ethnicity,
            languages: self.languages,
            about_me: self.about_me,
            services: self.services,
            rates: self.rates,
            availability: self.availability,
            location: self.location,
            photos: self.photos.0,
            videos: self.videos.0,
            audio_introduction: self.audio_introduction,
            social_media: self.social_media,
            preferences: self.preferences,
            stats: ProfileStats {
                profile_views: self.profile_views,
                favorite_count: self.favorite_count,
                last_active: self.last_active_at,
            },
            featured: FeaturedWindow { is_featured: self.is_featured, featured_until: self.featured_until },
            subscription: SubscriptionTier { level: self.subscription_level, expires_at: self.subscription_expires_at },
            rating: self.rating,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn summary(self) -> CompanionSummary {
        CompanionSummary {
            id: self.id,
            display_name: self.display_name,
            photos: self.photos.0,
            location: self.location,
            rates: self.rates,
            stats: ProfileStats {
                profile_views: self.profile_views,
                favorite_count: self.favorite_count,
                last_active: self.last_active_at,
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileStats {
    pub profile_views: i32,
    pub favorite_count: i32,
    pub last_active: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeaturedWindow {
    pub is_featured: bool,
    pub featured_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionTier {
    pub level: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Wire shape of a companion profile; `user` is an id or an embedded owner.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanionProfileView<U: Serialize> {
    pub id: Uuid,
    pub user: U,
    pub display_name: String,
    pub age: Option<i32>,
    pub height: Option<i32>,
    pub body_type: Option<String>,
    pub ethnicity: Option<String>,
    pub languages: Vec<String>,
    pub about_me: Option<String>,
    pub services: Vec<String>,
    pub rates: Rates,
    pub availability: Availability,
    pub location: CompanionLocation,
    pub photos: Vec<Photo>,
    pub videos: Vec<Video>,
    pub audio_introduction: Option<AudioIntroduction>,
    pub social_media: SocialMedia,
    pub preferences: CompanionPreferences,
    pub stats: ProfileStats,
    pub featured: FeaturedWindow,
    pub subscription: SubscriptionTier,
    pub rating: Option<f64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Compact projection embedded in favorites and recently-viewed lists.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanionSummary {
    pub id: Uuid,
    pub display_name: String,
    pub photos: Vec<Photo>,
    pub location: CompanionLocation,
    pub rates: Rates,
    pub stats: ProfileStats,
}

/// Owner reference embedded in search results.
#[derive(Debug, Clone, Copy, Serialize, Queryable)]
#[serde(rename_all = "camelCase")]
pub struct OwnerFlags {
    pub id: Uuid,
    pub is_verified: bool,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sydney() -> CompanionLocation {
        CompanionLocation {
            city: "Sydney".into(),
            state: "NSW".into(),
            country: default_country(),
            travel_availability: false,
            travel_locations: vec![],
        }
    }

    pub(crate) fn sample_profile() -> CompanionProfile {
        let patch = CompanionProfilePatch { location: Some(sydney()), ..Default::default() };
        CompanionProfile::create(Uuid::now_v7(), "Ava", patch, Utc::now()).unwrap()
    }

    fn main_count(profile: &CompanionProfile) -> usize {
        profile.photos.0.iter().filter(|p| p.is_main).count()
    }

    #[test]
    fn create_requires_location() {
        let err = CompanionProfile::create(Uuid::now_v7(), "Ava", CompanionProfilePatch::default(), Utc::now());
        assert!(err.is_err());
    }

    #[test]
    fn create_defaults_display_name_to_first_name() {
        let profile = sample_profile();
        assert_eq!(profile.display_name, "Ava");
        assert_eq!(profile.subscription_level, "free");
        assert_eq!(profile.location.country, "Australia");
    }

    #[test]
    fn at_most_one_main_photo() {
        let mut profile = sample_profile();
        let now = Utc::now();
        let first = profile.add_photo("a.jpg".into(), true, now);
        profile.add_photo("b.jpg".into(), false, now);
        assert_eq!(main_count(&profile), 1);

        let third = profile.add_photo("c.jpg".into(), true, now);
        assert_eq!(main_count(&profile), 1);
        assert!(profile.photos.0.iter().find(|p| p.id == third.id).unwrap().is_main);

        let selected = profile.set_main_photo(first.id).unwrap();
        assert_eq!(selected.id, first.id);
        assert_eq!(main_count(&profile), 1);
    }

    #[test]
    fn missing_media_is_not_found() {
        let mut profile = sample_profile();
        assert!(profile.set_main_photo(Uuid::now_v7()).is_err());
        assert!(profile.delete_photo(Uuid::now_v7()).is_err());
        assert!(profile.delete_video(Uuid::now_v7()).is_err());
    }

    #[test]
    fn audio_is_a_singleton() {
        let mut profile = sample_profile();
        let now = Utc::now();
        profile.set_audio("one.mp3".into(), Some(12.0), now);
        profile.set_audio("two.mp3".into(), None, now);
        assert_eq!(profile.audio_introduction.as_ref().unwrap().url, "two.mp3");
        assert_eq!(profile.audio_introduction.as_ref().unwrap().duration, 0.0);
        profile.clear_audio();
        assert!(profile.audio_introduction.is_none());
    }

    #[test]
    fn patch_merges_only_truthy_fields() {
        let mut profile = sample_profile();
        profile.age = Some(30);
        profile.apply_patch(CompanionProfilePatch {
            display_name: Some(String::new()),
            age: Some(0),
            body_type: Some(BodyType::PlusSize),
            ..Default::default()
        });
        assert_eq!(profile.display_name, "Ava");
        assert_eq!(profile.age, Some(30));
        assert_eq!(profile.body_type.as_deref(), Some("plus-size"));
    }

    #[test]
    fn patch_validation_bounds() {
        let patch = CompanionProfilePatch { age: Some(17), height: Some(230), ..Default::default() };
        let errors = patch.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("age"));
        assert!(fields.contains_key("height"));
    }

    #[test]
    fn verified_media_matches_by_url() {
        let mut profile = sample_profile();
        let now = Utc::now();
        profile.add_photo("a.jpg".into(), false, now);
        profile.add_photo("b.jpg".into(), false, now);
        profile.add_video("v.mp4".into(), None, now);

        let marked = profile.mark_verified_media(&["b.jpg".into()], &["v.mp4".into()]);
        assert_eq!(marked, 2);
        assert!(!profile.photos.0[0].is_verified);
        assert!(profile.photos.0[1].is_verified);
        assert!(profile.videos.0[0].is_verified);
    }

    #[test]
    fn view_nests_stats_and_featured() {
        let profile = sample_profile();
        let user_id = profile.user_id;
        let value = serde_json::to_value(profile.view(user_id)).unwrap();
        assert_eq!(value["stats"]["profileViews"], 0);
        assert_eq!(value["featured"]["isFeatured"], false);
        assert_eq!(value["subscription"]["level"], "free");
        assert_eq!(value["user"], serde_json::json!(user_id));
    }
}
