use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use diesel::sql_types::Jsonb;
use diesel::{AsExpression, FromSqlRow};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use angel_shared::errors::{AppError, AppResult, ErrorCode};
use angel_shared::jsonb_document;

use crate::models::user::UserSummary;
use crate::schema::verifications;

/// The three independently reviewed verification pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationChannel {
    Id,
    Selfie,
    ComparisonMedia,
}

impl VerificationChannel {
    pub fn label(&self) -> &'static str {
        match self {
            VerificationChannel::Id => "ID verification",
            VerificationChannel::Selfie => "selfie verification",
            VerificationChannel::ComparisonMedia => "comparison media",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Unverified,
    PartiallyVerified,
    FullyVerified,
    Rejected,
}

impl OverallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverallStatus::Unverified => "unverified",
            OverallStatus::PartiallyVerified => "partially_verified",
            OverallStatus::FullyVerified => "fully_verified",
            OverallStatus::Rejected => "rejected",
        }
    }
}

/// Aggregates the channels that have been submitted. Channels never
/// submitted are ignored; no submissions at all is `Unverified`.
pub fn overall_status(statuses: &[Option<ChannelStatus>]) -> OverallStatus {
    let present: Vec<ChannelStatus> = statuses.iter().flatten().copied().collect();

    if present.contains(&ChannelStatus::Rejected) {
        OverallStatus::Rejected
    } else if !present.is_empty() && present.iter().all(|s| *s == ChannelStatus::Approved) {
        OverallStatus::FullyVerified
    } else if present.contains(&ChannelStatus::Approved) {
        OverallStatus::PartiallyVerified
    } else {
        OverallStatus::Unverified
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentType {
    #[serde(rename = "passport")]
    Passport,
    #[serde(rename = "driverLicense")]
    DriverLicense,
    #[serde(rename = "nationalId")]
    NationalId,
    #[serde(rename = "other")]
    Other,
}

/// Review bookkeeping shared by every channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub status: ChannelStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_by: Option<Uuid>,
}

impl Review {
    pub fn submitted(at: DateTime<Utc>) -> Self {
        Self {
            status: ChannelStatus::Pending,
            submitted_at: Some(at),
            ..Default::default()
        }
    }

    pub fn approve(&mut self, admin_id: Uuid, at: DateTime<Utc>) {
        self.status = ChannelStatus::Approved;
        self.verified_at = Some(at);
        self.verified_by = Some(admin_id);
    }

    pub fn reject(&mut self, reason: String) {
        self.status = ChannelStatus::Rejected;
        self.rejection_reason = Some(reason);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Jsonb)]
#[serde(rename_all = "camelCase")]
pub struct IdVerification {
    pub front_image: String,
    pub back_image: Option<String>,
    pub document_type: DocumentType,
    pub document_number: String,
    pub expiry_date: Option<NaiveDate>,
    #[serde(flatten)]
    pub review: Review,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Jsonb)]
#[serde(rename_all = "camelCase")]
pub struct SelfieVerification {
    pub image: String,
    #[serde(flatten)]
    pub review: Review,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Jsonb)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonMedia {
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub videos: Vec<String>,
    #[serde(flatten)]
    pub review: Review,
}

jsonb_document!(IdVerification, SelfieVerification, ComparisonMedia);

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Insertable, AsChangeset, Serialize)]
#[diesel(table_name = verifications, treat_none_as_null = true)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    pub id: Uuid,
    #[serde(rename = "user")]
    pub user_id: Uuid,
    pub id_verification: Option<IdVerification>,
    pub selfie_verification: Option<SelfieVerification>,
    pub comparison_media: Option<ComparisonMedia>,
    pub overall_status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Verification {
    pub fn new(user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            id_verification: None,
            selfie_verification: None,
            comparison_media: None,
            overall_status: OverallStatus::Unverified.as_str().to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn review(&self, channel: VerificationChannel) -> Option<&Review> {
        match channel {
            VerificationChannel::Id => self.id_verification.as_ref().map(|v| &v.review),
            VerificationChannel::Selfie => self.selfie_verification.as_ref().map(|v| &v.review),
            VerificationChannel::ComparisonMedia => self.comparison_media.as_ref().map(|v| &v.review),
        }
    }

    fn review_mut(&mut self, channel: VerificationChannel) -> Option<&mut Review> {
        match channel {
            VerificationChannel::Id => self.id_verification.as_mut().map(|v| &mut v.review),
            VerificationChannel::Selfie => self.selfie_verification.as_mut().map(|v| &mut v.review),
            VerificationChannel::ComparisonMedia => self.comparison_media.as_mut().map(|v| &mut v.review),
        }
    }

    fn channel_missing(channel: VerificationChannel) -> AppError {
        let label = channel.label();
        let mut message = label.to_string();
        if let Some(first) = message.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        AppError::new(ErrorCode::VerificationNotFound, format!("{message} not found"))
    }

    pub fn status(&self) -> OverallStatus {
        overall_status(&[
            self.review(VerificationChannel::Id).map(|r| r.status),
            self.review(VerificationChannel::Selfie).map(|r| r.status),
            self.review(VerificationChannel::ComparisonMedia).map(|r| r.status),
        ])
    }

    /// Stamps `updated_at` and re-derives the overall status. Call before every write.
    pub fn before_save(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.overall_status = self.status().as_str().to_string();
    }

    pub fn approve(&mut self, channel: VerificationChannel, admin_id: Uuid, now: DateTime<Utc>) -> AppResult<&Review> {
        let review = self.review_mut(channel).ok_or_else(|| Self::channel_missing(channel))?;
        review.approve(admin_id, now);
        self.before_save(now);
        self.review(channel).ok_or_else(|| Self::channel_missing(channel))
    }

    pub fn reject(&mut self, channel: VerificationChannel, reason: String, now: DateTime<Utc>) -> AppResult<&Review> {
        let review = self.review_mut(channel).ok_or_else(|| Self::channel_missing(channel))?;
        review.reject(reason);
        self.before_save(now);
        self.review(channel).ok_or_else(|| Self::channel_missing(channel))
    }

    /// The submitted channel document, as echoed back after a submit/review.
    pub fn channel_json(&self, channel: VerificationChannel) -> serde_json::Value {
        let value = match channel {
            VerificationChannel::Id => serde_json::to_value(&self.id_verification),
            VerificationChannel::Selfie => serde_json::to_value(&self.selfie_verification),
            VerificationChannel::ComparisonMedia => serde_json::to_value(&self.comparison_media),
        };
        value.unwrap_or(serde_json::Value::Null)
    }
}

/// Per-channel status as reported to the account owner.
#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSummary {
    pub status: ChannelStatus,
    pub submitted_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
}

impl From<&Review> for ChannelSummary {
    fn from(review: &Review) -> Self {
        Self {
            status: review.status,
            submitted_at: review.submitted_at,
            verified_at: review.verified_at,
            rejection_reason: review.rejection_reason.clone(),
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationStatusView {
    pub overall_status: OverallStatus,
    pub id_verification: Option<ChannelSummary>,
    pub selfie_verification: Option<ChannelSummary>,
    pub comparison_media: Option<ChannelSummary>,
}

impl VerificationStatusView {
    pub fn unverified() -> Self {
        Self {
            overall_status: OverallStatus::Unverified,
            id_verification: None,
            selfie_verification: None,
            comparison_media: None,
        }
    }
}

impl From<&Verification> for VerificationStatusView {
    fn from(v: &Verification) -> Self {
        Self {
            overall_status: v.status(),
            id_verification: v.review(VerificationChannel::Id).map(ChannelSummary::from),
            selfie_verification: v.review(VerificationChannel::Selfie).map(ChannelSummary::from),
            comparison_media: v.review(VerificationChannel::ComparisonMedia).map(ChannelSummary::from),
        }
    }
}

/// Admin queue entry with the submitting user embedded.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingVerification {
    #[serde(flatten)]
    pub verification: Verification,
    pub user_info: UserSummary,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ChannelStatus::*;

    #[test]
    fn overall_status_table() {
        assert_eq!(overall_status(&[Some(Pending), Some(Pending), Some(Pending)]), OverallStatus::Unverified);
        assert_eq!(overall_status(&[Some(Approved), Some(Pending), Some(Pending)]), OverallStatus::PartiallyVerified);
        assert_eq!(overall_status(&[Some(Approved), Some(Approved), Some(Approved)]), OverallStatus::FullyVerified);
        assert_eq!(overall_status(&[Some(Rejected), Some(Approved), Some(Approved)]), OverallStatus::Rejected);
        assert_eq!(overall_status(&[Some(Approved), Some(Pending), Some(Rejected)]), OverallStatus::Rejected);
    }

    #[test]
    fn overall_status_only_counts_submitted_channels() {
        assert_eq!(overall_status(&[None, None, None]), OverallStatus::Unverified);
        assert_eq!(overall_status(&[Some(Approved), None, None]), OverallStatus::FullyVerified);
        assert_eq!(overall_status(&[Some(Approved), Some(Pending), None]), OverallStatus::PartiallyVerified);
    }

    fn with_all_channels() -> Verification {
        let now = Utc::now();
        let mut v = Verification::new(Uuid::now_v7(), now);
        v.id_verification = Some(IdVerification {
            front_image: "front.jpg".into(),
            back_image: None,
            document_type: DocumentType::Passport,
            document_number: "PA123".into(),
            expiry_date: None,
            review: Review::submitted(now),
        });
        v.selfie_verification = Some(SelfieVerification { image: "me.jpg".into(), review: Review::submitted(now) });
        v.comparison_media = Some(ComparisonMedia {
            images: vec!["a.jpg".into()],
            videos: vec![],
            review: Review::submitted(now),
        });
        v.before_save(now);
        v
    }

    #[test]
    fn approvals_recompute_overall_status() {
        let admin = Uuid::now_v7();
        let now = Utc::now();
        let mut v = with_all_channels();
        assert_eq!(v.overall_status, "unverified");

        v.approve(VerificationChannel::Id, admin, now).unwrap();
        assert_eq!(v.overall_status, "partially_verified");

        v.approve(VerificationChannel::Selfie, admin, now).unwrap();
        let review = v.approve(VerificationChannel::ComparisonMedia, admin, now).unwrap();
        assert_eq!(review.verified_by, Some(admin));
        assert_eq!(v.overall_status, "fully_verified");
    }

    #[test]
    fn rejection_wins_over_approvals() {
        let now = Utc::now();
        let mut v = with_all_channels();
        v.approve(VerificationChannel::Id, Uuid::now_v7(), now).unwrap();
        let review = v.reject(VerificationChannel::Selfie, "blurry".into(), now).unwrap();
        assert_eq!(review.rejection_reason.as_deref(), Some("blurry"));
        assert_eq!(v.overall_status, "rejected");
    }

    #[test]
    fn reviewing_an_unsubmitted_channel_is_not_found() {
        let mut v = Verification::new(Uuid::now_v7(), Utc::now());
        let err = v.approve(VerificationChannel::Selfie, Uuid::now_v7(), Utc::now()).unwrap_err();
        match err {
            AppError::Known { code, message, .. } => {
                assert_eq!(code, ErrorCode::VerificationNotFound);
                assert_eq!(message, "Selfie verification not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn channel_document_flattens_review_fields() {
        let v = with_all_channels();
        let value = v.channel_json(VerificationChannel::Id);
        assert_eq!(value["documentType"], "passport");
        assert_eq!(value["status"], "pending");
        assert!(value.get("review").is_none());
    }
}
