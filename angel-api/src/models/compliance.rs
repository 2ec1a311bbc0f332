use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::Jsonb;
use diesel::{AsExpression, FromSqlRow};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use angel_shared::errors::ErrorCode;
use angel_shared::jsonb_document;

use crate::models::user::UserSummary;
use crate::schema::{legal_documents, user_agreements};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeVerificationMethod {
    SelfDeclaration,
    IdVerification,
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Jsonb)]
#[serde(rename_all = "camelCase", default)]
pub struct AgeVerification {
    pub is_verified: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub method: Option<AgeVerificationMethod>,
}

impl AgeVerification {
    pub fn verified(method: AgeVerificationMethod, at: DateTime<Utc>) -> Self {
        Self { is_verified: true, verified_at: Some(at), method: Some(method) }
    }
}

/// Acceptance of one legal document version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Jsonb)]
#[serde(rename_all = "camelCase")]
pub struct AgreementRecord {
    pub version: String,
    pub agreed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

jsonb_document!(AgeVerification, AgreementRecord);

/// Terms of service and privacy policies share one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Terms,
    Privacy,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Terms => "terms",
            DocumentKind::Privacy => "privacy",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            DocumentKind::Terms => "Terms of service",
            DocumentKind::Privacy => "Privacy policy",
        }
    }

    pub fn not_found_code(&self) -> ErrorCode {
        match self {
            DocumentKind::Terms => ErrorCode::TermsNotFound,
            DocumentKind::Privacy => ErrorCode::PolicyNotFound,
        }
    }

    pub fn invalid_version_message(&self) -> &'static str {
        match self {
            DocumentKind::Terms => "Invalid terms of service version",
            DocumentKind::Privacy => "Invalid privacy policy version",
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = legal_documents)]
#[serde(rename_all = "camelCase")]
pub struct LegalDocument {
    pub id: Uuid,
    #[serde(skip)]
    pub kind: String,
    pub version: String,
    pub content: String,
    pub published_at: DateTime<Utc>,
    pub is_active: bool,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = legal_documents)]
pub struct NewLegalDocument {
    pub id: Uuid,
    pub kind: String,
    pub version: String,
    pub content: String,
    pub published_at: DateTime<Utc>,
    pub is_active: bool,
}

impl NewLegalDocument {
    pub fn new(kind: DocumentKind, version: String, content: String, is_active: bool) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind: kind.as_str().to_string(),
            version,
            content,
            published_at: Utc::now(),
            is_active,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Insertable, AsChangeset, Serialize)]
#[diesel(table_name = user_agreements)]
#[serde(rename_all = "camelCase")]
pub struct UserAgreement {
    pub id: Uuid,
    #[serde(rename = "user")]
    pub user_id: Uuid,
    pub terms_of_service: AgreementRecord,
    pub privacy_policy: AgreementRecord,
    pub age_verification: AgeVerification,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserAgreement {
    pub fn new(user_id: Uuid, terms: AgreementRecord, privacy: AgreementRecord, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            terms_of_service: terms,
            privacy_policy: privacy,
            age_verification: AgeVerification::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgreementStatusView {
    pub terms_accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terms_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terms_agreed_at: Option<DateTime<Utc>>,
    pub privacy_accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privacy_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privacy_agreed_at: Option<DateTime<Utc>>,
    pub age_verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_verification_method: Option<AgeVerificationMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_verified_at: Option<DateTime<Utc>>,
}

pub fn agreement_status_view(agreement: Option<&UserAgreement>) -> AgreementStatusView {
    match agreement {
        None => AgreementStatusView {
            terms_accepted: false,
            terms_version: None,
            terms_agreed_at: None,
            privacy_accepted: false,
            privacy_version: None,
            privacy_agreed_at: None,
            age_verified: false,
            age_verification_method: None,
            age_verified_at: None,
        },
        Some(a) => AgreementStatusView {
            terms_accepted: true,
            terms_version: Some(a.terms_of_service.version.clone()),
            terms_agreed_at: Some(a.terms_of_service.agreed_at),
            privacy_accepted: true,
            privacy_version: Some(a.privacy_policy.version.clone()),
            privacy_agreed_at: Some(a.privacy_policy.agreed_at),
            age_verified: a.age_verification.is_verified,
            age_verification_method: a.age_verification.method,
            age_verified_at: a.age_verification.verified_at,
        },
    }
}

/// Admin listing entry with the agreeing user embedded.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgreementWithUser {
    #[serde(flatten)]
    pub agreement: UserAgreement,
    pub user_info: UserSummary,
}
