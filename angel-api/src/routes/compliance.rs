use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use angel_shared::errors::{AppError, AppResult, ErrorCode};
use angel_shared::middleware::{AdminUser, ValidatedJson};
use angel_shared::types::auth::AuthUser;
use angel_shared::types::{ApiResponse, Created, Paginated, PaginationParams};

use crate::models::compliance::{
    agreement_status_view, AgeVerification, AgeVerificationMethod, AgreementRecord, AgreementStatusView,
    AgreementWithUser, DocumentKind, LegalDocument, NewLegalDocument, UserAgreement,
};
use crate::models::user::{AgreementStatus, UserSummary};
use crate::schema::{legal_documents, user_agreements, users};
use crate::AppState;

const DEFAULT_AGREEMENT_LIMIT: i64 = 20;

fn active_document(conn: &mut PgConnection, kind: DocumentKind) -> AppResult<LegalDocument> {
    legal_documents::table
        .filter(legal_documents::kind.eq(kind.as_str()))
        .filter(legal_documents::is_active.eq(true))
        .order(legal_documents::published_at.desc())
        .select(LegalDocument::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::new(kind.not_found_code(), format!("{} not found", kind.title())))
}

/// Accepting a version requires it to be the published, active one.
fn require_active_version(conn: &mut PgConnection, kind: DocumentKind, version: &str) -> AppResult<()> {
    let found: i64 = legal_documents::table
        .filter(legal_documents::kind.eq(kind.as_str()))
        .filter(legal_documents::version.eq(version))
        .filter(legal_documents::is_active.eq(true))
        .count()
        .get_result(conn)?;
    if found == 0 {
        return Err(AppError::new(ErrorCode::InvalidDocumentVersion, kind.invalid_version_message()));
    }
    Ok(())
}

fn agreement_for_user(conn: &mut PgConnection, user_id: Uuid) -> AppResult<Option<UserAgreement>> {
    Ok(user_agreements::table
        .filter(user_agreements::user_id.eq(user_id))
        .select(UserAgreement::as_select())
        .first(conn)
        .optional()?)
}

/// Explicit body value first, then the proxy headers.
fn client_ip(explicit: Option<String>, headers: &HeaderMap) -> Option<String> {
    explicit.filter(|ip| !ip.trim().is_empty()).or_else(|| {
        headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .or_else(|| {
                headers
                    .get("x-real-ip")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            })
    })
}

// --- GET /terms, GET /privacy ---

pub async fn current_terms(State(state): State<Arc<AppState>>) -> AppResult<Json<ApiResponse<LegalDocument>>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;
    Ok(Json(ApiResponse::ok(active_document(&mut conn, DocumentKind::Terms)?)))
}

pub async fn current_privacy(State(state): State<Arc<AppState>>) -> AppResult<Json<ApiResponse<LegalDocument>>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;
    Ok(Json(ApiResponse::ok(active_document(&mut conn, DocumentKind::Privacy)?)))
}

// --- POST /accept ---

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AcceptRequest {
    #[validate(length(min = 1, message = "Terms of service version is required"))]
    pub terms_version: String,
    #[validate(length(min = 1, message = "Privacy policy version is required"))]
    pub policy_version: String,
    pub ip_address: Option<String>,
}

pub async fn accept(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<AcceptRequest>,
) -> AppResult<Json<ApiResponse<UserAgreement>>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;

    require_active_version(&mut conn, DocumentKind::Terms, &req.terms_version)?;
    require_active_version(&mut conn, DocumentKind::Privacy, &req.policy_version)?;

    let now = Utc::now();
    let ip_address = client_ip(req.ip_address, &headers);
    let terms = AgreementRecord { version: req.terms_version, agreed_at: now, ip_address: ip_address.clone() };
    let privacy = AgreementRecord { version: req.policy_version, agreed_at: now, ip_address };

    let saved: UserAgreement = match agreement_for_user(&mut conn, user.id)? {
        Some(existing) => diesel::update(user_agreements::table.find(existing.id))
            .set((
                user_agreements::terms_of_service.eq(terms),
                user_agreements::privacy_policy.eq(privacy),
                user_agreements::updated_at.eq(now),
            ))
            .returning(UserAgreement::as_returning())
            .get_result(&mut conn)?,
        None => diesel::insert_into(user_agreements::table)
            .values(&UserAgreement::new(user.id, terms, privacy, now))
            .returning(UserAgreement::as_returning())
            .get_result(&mut conn)?,
    };

    let mirror = AgreementStatus {
        terms_accepted: true,
        privacy_accepted: true,
        last_accepted_at: Some(now),
    };
    diesel::update(users::table.find(user.id))
        .set((users::agreement_status.eq(mirror), users::updated_at.eq(now)))
        .execute(&mut conn)?;

    tracing::info!(
        user_id = %user.id,
        terms = %saved.terms_of_service.version,
        privacy = %saved.privacy_policy.version,
        "legal documents accepted"
    );

    Ok(Json(ApiResponse::ok_with_message(
        saved,
        "Terms of service and privacy policy accepted successfully",
    )))
}

// --- POST /verify-age ---

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VerifyAgeRequest {
    pub method: AgeVerificationMethod,
}

pub async fn verify_age(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<VerifyAgeRequest>,
) -> AppResult<Json<ApiResponse<AgeVerification>>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;
    let agreement = agreement_for_user(&mut conn, user.id)?.ok_or_else(|| {
        AppError::new(
            ErrorCode::AgreementRequired,
            "User must accept terms of service and privacy policy first",
        )
    })?;

    let now = Utc::now();
    let verification = AgeVerification::verified(req.method, now);

    diesel::update(user_agreements::table.find(agreement.id))
        .set((
            user_agreements::age_verification.eq(&verification),
            user_agreements::updated_at.eq(now),
        ))
        .execute(&mut conn)?;
    diesel::update(users::table.find(user.id))
        .set((users::age_verification.eq(&verification), users::updated_at.eq(now)))
        .execute(&mut conn)?;

    tracing::info!(user_id = %user.id, method = ?req.method, "age verified");

    Ok(Json(ApiResponse::ok_with_message(verification, "Age verification completed successfully")))
}

// --- GET /status ---

pub async fn status(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<AgreementStatusView>>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;
    let agreement = agreement_for_user(&mut conn, user.id)?;
    Ok(Json(ApiResponse::ok(agreement_status_view(agreement.as_ref()))))
}

// --- Admin: POST /terms, POST /privacy ---

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    #[validate(length(min = 1, message = "Version is required"))]
    pub version: String,
    #[validate(length(min = 1, message = "Content is required"))]
    pub content: String,
    pub is_active: bool,
}

fn publish(conn: &mut PgConnection, kind: DocumentKind, req: PublishRequest) -> AppResult<LegalDocument> {
    let existing: i64 = legal_documents::table
        .filter(legal_documents::kind.eq(kind.as_str()))
        .filter(legal_documents::version.eq(&req.version))
        .count()
        .get_result(conn)?;
    if existing > 0 {
        return Err(AppError::new(
            ErrorCode::DocumentVersionExists,
            format!("{} version already exists", kind.title()),
        ));
    }

    if req.is_active {
        let deactivated = diesel::update(legal_documents::table.filter(legal_documents::kind.eq(kind.as_str())))
            .set(legal_documents::is_active.eq(false))
            .execute(conn)?;
        tracing::debug!(kind = kind.as_str(), deactivated, "previous versions deactivated");
    }

    let doc: LegalDocument = diesel::insert_into(legal_documents::table)
        .values(&NewLegalDocument::new(kind, req.version, req.content, req.is_active))
        .returning(LegalDocument::as_returning())
        .get_result(conn)?;

    tracing::info!(kind = kind.as_str(), version = %doc.version, active = doc.is_active, "legal document published");
    Ok(doc)
}

pub async fn publish_terms(
    AdminUser(_admin): AdminUser,
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<PublishRequest>,
) -> AppResult<Created<LegalDocument>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;
    let doc = publish(&mut conn, DocumentKind::Terms, req)?;
    Ok(Created(ApiResponse::ok_with_message(doc, "Terms of service created successfully")))
}

pub async fn publish_privacy(
    AdminUser(_admin): AdminUser,
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<PublishRequest>,
) -> AppResult<Created<LegalDocument>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;
    let doc = publish(&mut conn, DocumentKind::Privacy, req)?;
    Ok(Created(ApiResponse::ok_with_message(doc, "Privacy policy created successfully")))
}

// --- Admin: GET /terms/all, GET /privacy/all ---

fn all_versions(conn: &mut PgConnection, kind: DocumentKind) -> AppResult<Vec<LegalDocument>> {
    Ok(legal_documents::table
        .filter(legal_documents::kind.eq(kind.as_str()))
        .order(legal_documents::published_at.desc())
        .select(LegalDocument::as_select())
        .load(conn)?)
}

pub async fn all_terms(
    AdminUser(_admin): AdminUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Vec<LegalDocument>>>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;
    Ok(Json(ApiResponse::ok(all_versions(&mut conn, DocumentKind::Terms)?)))
}

pub async fn all_privacy(
    AdminUser(_admin): AdminUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Vec<LegalDocument>>>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;
    Ok(Json(ApiResponse::ok(all_versions(&mut conn, DocumentKind::Privacy)?)))
}

// --- Admin: GET /agreements ---

pub async fn list_agreements(
    AdminUser(_admin): AdminUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> AppResult<Json<ApiResponse<Paginated<AgreementWithUser>>>> {
    let page = params.resolve(DEFAULT_AGREEMENT_LIMIT)?;
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;

    let total: i64 = user_agreements::table.count().get_result(&mut conn)?;
    let rows: Vec<(UserAgreement, UserSummary)> = user_agreements::table
        .inner_join(users::table)
        .order(user_agreements::updated_at.desc())
        .offset(page.offset())
        .limit(page.limit())
        .select((UserAgreement::as_select(), UserSummary::as_select()))
        .load(&mut conn)?;

    let items = rows
        .into_iter()
        .map(|(agreement, user_info)| AgreementWithUser { agreement, user_info })
        .collect();
    Ok(Json(ApiResponse::ok(Paginated::new(items, total, &page))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn explicit_ip_wins_over_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1, 10.0.0.2"));
        assert_eq!(client_ip(Some("203.0.113.9".into()), &headers).as_deref(), Some("203.0.113.9"));
        assert_eq!(client_ip(None, &headers).as_deref(), Some("10.0.0.1"));
        assert_eq!(client_ip(Some("  ".into()), &HeaderMap::new()), None);
    }

    #[test]
    fn real_ip_header_is_the_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("192.0.2.4"));
        assert_eq!(client_ip(None, &headers).as_deref(), Some("192.0.2.4"));
    }

    #[test]
    fn publish_requires_explicit_active_flag() {
        let missing = serde_json::from_str::<PublishRequest>(r#"{"version":"1.0","content":"..."}"#);
        assert!(missing.is_err());

        let blank: PublishRequest =
            serde_json::from_str(r#"{"version":"","content":"text","isActive":true}"#).unwrap();
        assert!(blank.validate().is_err());
    }

    #[test]
    fn age_method_must_be_known() {
        assert!(serde_json::from_str::<VerifyAgeRequest>(r#"{"method":"self_declaration"}"#).is_ok());
        assert!(serde_json::from_str::<VerifyAgeRequest>(r#"{"method":"guess"}"#).is_err());
    }

    #[test]
    fn accept_requires_both_versions() {
        let req: AcceptRequest = serde_json::from_str(r#"{"termsVersion":"1.0","policyVersion":""}"#).unwrap();
        assert!(req.validate().is_err());
    }
}
