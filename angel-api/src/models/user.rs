use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use diesel::sql_types::Jsonb;
use diesel::{AsExpression, FromSqlRow};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use angel_shared::jsonb_document;
use angel_shared::types::auth::UserRole;

use crate::models::compliance::AgeVerification;
use crate::models::patch::{always_truthy, merge, merge_opt};
use crate::models::verification::VerificationChannel;
use crate::schema::users;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
        }
    }
}

fn default_country() -> Option<String> {
    Some("Australia".to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Jsonb)]
#[serde(rename_all = "camelCase")]
pub struct UserLocation {
    pub city: Option<String>,
    pub state: Option<String>,
    #[serde(default = "default_country")]
    pub country: Option<String>,
}

/// Per-channel verification state as shown on the account itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MirroredStatus {
    #[default]
    Pending,
    Verified,
    Rejected,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMirror {
    pub status: MirroredStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Jsonb)]
#[serde(rename_all = "camelCase", default)]
pub struct UserVerificationStatus {
    pub id_verification: ChannelMirror,
    pub selfie_verification: ChannelMirror,
    pub comparison_media: ChannelMirror,
}

impl UserVerificationStatus {
    pub fn channel_mut(&mut self, channel: VerificationChannel) -> &mut ChannelMirror {
        match channel {
            VerificationChannel::Id => &mut self.id_verification,
            VerificationChannel::Selfie => &mut self.selfie_verification,
            VerificationChannel::ComparisonMedia => &mut self.comparison_media,
        }
    }

    pub fn mark_submitted(&mut self, channel: VerificationChannel, at: DateTime<Utc>) {
        *self.channel_mut(channel) = ChannelMirror {
            status: MirroredStatus::Pending,
            submitted_at: Some(at),
            verified_at: None,
        };
    }

    pub fn mark_verified(&mut self, channel: VerificationChannel, at: DateTime<Utc>) {
        *self.channel_mut(channel) = ChannelMirror {
            status: MirroredStatus::Verified,
            submitted_at: None,
            verified_at: Some(at),
        };
    }

    pub fn mark_rejected(&mut self, channel: VerificationChannel, submitted_at: Option<DateTime<Utc>>) {
        *self.channel_mut(channel) = ChannelMirror {
            status: MirroredStatus::Rejected,
            submitted_at,
            verified_at: None,
        };
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Jsonb)]
#[serde(rename_all = "camelCase", default)]
pub struct AgreementStatus {
    pub terms_accepted: bool,
    pub privacy_accepted: bool,
    pub last_accepted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Jsonb)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionMirror {
    pub plan: String,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

jsonb_document!(UserLocation, UserVerificationStatus, AgreementStatus, SubscriptionMirror);
always_truthy!(UserLocation);

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub location: Option<UserLocation>,
    pub profile_picture: Option<String>,
    pub is_verified: bool,
    pub verification_status: UserVerificationStatus,
    pub agreement_status: AgreementStatus,
    pub age_verification: AgeVerification,
    pub subscription_status: Option<SubscriptionMirror>,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub reset_token_hash: Option<String>,
    pub reset_token_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub first_name: String,
    pub last_name: String,
    pub verification_status: UserVerificationStatus,
    pub agreement_status: AgreementStatus,
    pub age_verification: AgeVerification,
}

/// Editable account fields written back after a merge.
#[derive(Debug, AsChangeset)]
#[diesel(table_name = users, treat_none_as_null = true)]
pub struct UserProfileChanges {
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub location: Option<UserLocation>,
    pub profile_picture: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    #[validate(length(max = 100, message = "first name is too long"))]
    pub first_name: Option<String>,
    #[validate(length(max = 100, message = "last name is too long"))]
    pub last_name: Option<String>,
    #[validate(length(max = 40, message = "phone number is too long"))]
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub location: Option<UserLocation>,
    pub profile_picture: Option<String>,
}

impl User {
    pub fn role(&self) -> Option<UserRole> {
        self.role.parse().ok()
    }

    pub fn apply_patch(&mut self, patch: UserPatch) {
        merge(&mut self.first_name, patch.first_name);
        merge(&mut self.last_name, patch.last_name);
        merge_opt(&mut self.phone, patch.phone);
        if let Some(dob) = patch.date_of_birth {
            self.date_of_birth = Some(dob);
        }
        merge_opt(&mut self.gender, patch.gender.map(|g| g.as_str().to_string()));
        merge_opt(&mut self.location, patch.location);
        merge_opt(&mut self.profile_picture, patch.profile_picture);
    }

    pub fn profile_changes(&self, now: DateTime<Utc>) -> UserProfileChanges {
        UserProfileChanges {
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            phone: self.phone.clone(),
            date_of_birth: self.date_of_birth,
            gender: self.gender.clone(),
            location: self.location.clone(),
            profile_picture: self.profile_picture.clone(),
            updated_at: now,
        }
    }
}

/// Account projection returned to clients. Never carries credentials.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub role: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub location: Option<UserLocation>,
    pub profile_picture: Option<String>,
    pub is_verified: bool,
    pub verification_status: UserVerificationStatus,
    pub agreement_status: AgreementStatus,
    pub age_verification: AgeVerification,
    pub subscription_status: Option<SubscriptionMirror>,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            role: user.role,
            first_name: user.first_name,
            last_name: user.last_name,
            phone: user.phone,
            date_of_birth: user.date_of_birth,
            gender: user.gender,
            location: user.location,
            profile_picture: user.profile_picture,
            is_verified: user.is_verified,
            verification_status: user.verification_status,
            agreement_status: user.agreement_status,
            age_verification: user.age_verification,
            subscription_status: user.subscription_status,
            is_active: user.is_active,
            last_login: user.last_login_at,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// Embedded user reference (`email firstName lastName` populate).
#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = users)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

/// Conversation participant reference.
#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = users)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantSummary {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        let now = Utc::now();
        User {
            id: Uuid::now_v7(),
            email: "ava@example.com".into(),
            password_hash: "hash".into(),
            role: "companion".into(),
            first_name: "Ava".into(),
            last_name: "Stone".into(),
            phone: Some("0400 000 000".into()),
            date_of_birth: None,
            gender: Some("female".into()),
            location: None,
            profile_picture: None,
            is_verified: false,
            verification_status: UserVerificationStatus::default(),
            agreement_status: AgreementStatus::default(),
            age_verification: AgeVerification::default(),
            subscription_status: None,
            is_active: true,
            last_login_at: None,
            reset_token_hash: Some("secret".into()),
            reset_token_expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn patch_ignores_empty_strings() {
        let mut user = sample_user();
        user.apply_patch(UserPatch {
            first_name: Some(String::new()),
            phone: Some(String::new()),
            last_name: Some("Rivers".into()),
            ..Default::default()
        });

        assert_eq!(user.first_name, "Ava");
        assert_eq!(user.phone.as_deref(), Some("0400 000 000"));
        assert_eq!(user.last_name, "Rivers");
    }

    #[test]
    fn public_projection_has_no_credentials() {
        let value = serde_json::to_value(PublicUser::from(sample_user())).unwrap();
        let text = value.to_string();
        assert!(value.get("passwordHash").is_none());
        assert!(!text.contains("secret"));
        assert_eq!(value["firstName"], "Ava");
    }

    #[test]
    fn location_defaults_country() {
        let loc: UserLocation = serde_json::from_str(r#"{"city":"Sydney","state":"NSW"}"#).unwrap();
        assert_eq!(loc.country.as_deref(), Some("Australia"));
    }

    #[test]
    fn verification_mirror_transitions() {
        let mut status = UserVerificationStatus::default();
        let now = Utc::now();
        status.mark_submitted(VerificationChannel::Selfie, now);
        assert_eq!(status.selfie_verification.status, MirroredStatus::Pending);

        status.mark_verified(VerificationChannel::Selfie, now);
        assert_eq!(status.selfie_verification.status, MirroredStatus::Verified);
        assert_eq!(status.selfie_verification.verified_at, Some(now));

        status.mark_rejected(VerificationChannel::Id, Some(now));
        assert_eq!(status.id_verification.status, MirroredStatus::Rejected);
    }
}
