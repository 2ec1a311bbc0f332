use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use validator::{ValidationErrors, ValidationErrorsKind};

use crate::types::ApiErrorResponse;

/// Application error codes following the pattern E{area}{sequence}
///
/// Ranges:
/// - E0xxx: Shared/infrastructure errors
/// - E1xxx: Account errors
/// - E2xxx: Profile errors
/// - E3xxx: Verification errors
/// - E4xxx: Messaging errors
/// - E5xxx: Payment errors
/// - E6xxx: Compliance errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Shared (E0xxx)
    InternalError,
    ValidationError,
    NotFound,
    Unauthorized,
    Forbidden,

    // Account (E1xxx)
    InvalidCredentials,
    EmailAlreadyExists,
    TokenExpired,
    TokenInvalid,
    AccountDisabled,
    ResetTokenInvalid,
    ResetTokenExpired,
    UserNotFound,

    // Profile (E2xxx)
    ProfileNotFound,
    ProfileRoleMismatch,
    PhotoNotFound,
    VideoNotFound,
    FavoriteAlreadyExists,
    FavoriteNotFound,
    CompanionNotFound,

    // Verification (E3xxx)
    VerificationNotFound,

    // Messaging (E4xxx)
    ConversationNotFound,
    ConversationExists,
    ConversationBlocked,
    RecipientNotFound,
    CannotMessageSelf,
    NotBlocker,

    // Payment (E5xxx)
    SubscriptionAlreadyActive,
    SubscriptionNotFound,
    PaymentFailed,
    CompanionProfileRequired,

    // Compliance (E6xxx)
    TermsNotFound,
    PolicyNotFound,
    DocumentVersionExists,
    InvalidDocumentVersion,
    AgreementRequired,
}

impl ErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            // Shared
            Self::InternalError => "E0001",
            Self::ValidationError => "E0002",
            Self::NotFound => "E0003",
            Self::Unauthorized => "E0004",
            Self::Forbidden => "E0005",

            // Account
            Self::InvalidCredentials => "E1001",
            Self::EmailAlreadyExists => "E1002",
            Self::TokenExpired => "E1003",
            Self::TokenInvalid => "E1004",
            Self::AccountDisabled => "E1005",
            Self::ResetTokenInvalid => "E1006",
            Self::ResetTokenExpired => "E1007",
            Self::UserNotFound => "E1008",

            // Profile
            Self::ProfileNotFound => "E2001",
            Self::ProfileRoleMismatch => "E2002",
            Self::PhotoNotFound => "E2003",
            Self::VideoNotFound => "E2004",
            Self::FavoriteAlreadyExists => "E2005",
            Self::FavoriteNotFound => "E2006",
            Self::CompanionNotFound => "E2007",

            // Verification
            Self::VerificationNotFound => "E3001",

            // Messaging
            Self::ConversationNotFound => "E4001",
            Self::ConversationExists => "E4002",
            Self::ConversationBlocked => "E4003",
            Self::RecipientNotFound => "E4004",
            Self::CannotMessageSelf => "E4005",
            Self::NotBlocker => "E4006",

            // Payment
            Self::SubscriptionAlreadyActive => "E5001",
            Self::SubscriptionNotFound => "E5002",
            Self::PaymentFailed => "E5003",
            Self::CompanionProfileRequired => "E5004",

            // Compliance
            Self::TermsNotFound => "E6001",
            Self::PolicyNotFound => "E6002",
            Self::DocumentVersionExists => "E6003",
            Self::InvalidDocumentVersion => "E6004",
            Self::AgreementRequired => "E6005",
        }
    }

    /// Duplicate-resource conflicts are reported as 400 rather than 409 so
    /// existing clients keep working.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ValidationError
            | Self::EmailAlreadyExists | Self::ResetTokenInvalid | Self::ResetTokenExpired
            | Self::FavoriteAlreadyExists | Self::ConversationExists | Self::CannotMessageSelf
            | Self::SubscriptionAlreadyActive | Self::PaymentFailed
            | Self::CompanionProfileRequired
            | Self::DocumentVersionExists | Self::InvalidDocumentVersion
            | Self::AgreementRequired => StatusCode::BAD_REQUEST,
            Self::NotFound | Self::UserNotFound | Self::ProfileNotFound | Self::PhotoNotFound
            | Self::VideoNotFound | Self::FavoriteNotFound | Self::CompanionNotFound
            | Self::VerificationNotFound | Self::ConversationNotFound | Self::RecipientNotFound
            | Self::SubscriptionNotFound | Self::TermsNotFound | Self::PolicyNotFound => StatusCode::NOT_FOUND,
            Self::Unauthorized | Self::InvalidCredentials | Self::TokenExpired
            | Self::TokenInvalid => StatusCode::UNAUTHORIZED,
            Self::Forbidden | Self::AccountDisabled | Self::ProfileRoleMismatch
            | Self::ConversationBlocked | Self::NotBlocker => StatusCode::FORBIDDEN,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{message}")]
    Known {
        code: ErrorCode,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(code: ErrorCode, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// Server-side failure. The message is logged when rendered, never sent to the caller.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(anyhow::anyhow!(message.into()))
    }

    /// A single-field validation failure, shaped like the derive-based ones.
    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::with_details(
            ErrorCode::ValidationError,
            "validation failed",
            serde_json::json!([{ "field": field, "message": message }]),
        )
    }
}

#[derive(Debug, Serialize, PartialEq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Flattens nested validator output into `{ field, message }` pairs with
/// dotted camelCase paths, sorted by field.
pub fn flatten_validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    let mut out = Vec::new();
    collect_field_errors(errors, "", &mut out);
    out.sort_by(|a, b| a.field.cmp(&b.field));
    out
}

fn collect_field_errors(errors: &ValidationErrors, prefix: &str, out: &mut Vec<FieldError>) {
    for (field, kind) in errors.errors() {
        let path = join_path(prefix, &camel_case(field));
        match kind {
            ValidationErrorsKind::Field(list) => {
                for err in list {
                    let message = err
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("{path} is invalid ({})", err.code));
                    out.push(FieldError { field: path.clone(), message });
                }
            }
            ValidationErrorsKind::Struct(nested) => collect_field_errors(nested, &path, out),
            ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    collect_field_errors(nested, &format!("{path}[{index}]"), out);
                }
            }
        }
    }
}

fn join_path(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{prefix}.{field}")
    }
}

fn camel_case(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut upper = false;
    for c in field.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

impl From<ValidationErrors> for AppError {
    fn from(errors: ValidationErrors) -> Self {
        let details = serde_json::to_value(flatten_validation_errors(&errors))
            .unwrap_or(serde_json::Value::Null);
        Self::with_details(ErrorCode::ValidationError, "validation failed", details)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            AppError::Known { code, message, details } => {
                let status = code.status_code();
                let mut resp = ApiErrorResponse::new(code.code(), message);
                if let Some(d) = details {
                    resp = resp.with_details(d.clone());
                }
                (status, resp)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiErrorResponse::new(ErrorCode::InternalError.code(), "internal server error"),
                )
            }
            AppError::Database(err) => {
                tracing::error!(error = %err, "database error");
                match err {
                    diesel::result::Error::NotFound => (
                        StatusCode::NOT_FOUND,
                        ApiErrorResponse::new(ErrorCode::NotFound.code(), "resource not found"),
                    ),
                    _ => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ApiErrorResponse::new(ErrorCode::InternalError.code(), "internal server error"),
                    ),
                }
            }
        };

        (status, Json(error_response)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use validator::Validate;

    async fn body_json(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[derive(Debug, Validate)]
    struct AgeRange {
        #[validate(range(min = 18, message = "minimum age must be at least 18"))]
        min: i32,
    }

    #[derive(Debug, Validate)]
    struct Preferences {
        #[validate]
        age_range: AgeRange,
    }

    #[derive(Debug, Validate)]
    struct ProfileInput {
        #[validate(length(min = 1, message = "display name cannot be empty"))]
        display_name: String,
        #[validate]
        preferences: Preferences,
    }

    #[tokio::test]
    async fn known_error_json_structure() {
        let (status, value) = body_json(AppError::new(ErrorCode::PhotoNotFound, "photo not found")).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["code"], "E2003");
        assert_eq!(value["error"]["message"], "photo not found");
        assert!(value["error"].get("details").is_none());
    }

    #[tokio::test]
    async fn conflicts_and_payment_failures_are_bad_requests() {
        for code in [
            ErrorCode::FavoriteAlreadyExists,
            ErrorCode::ConversationExists,
            ErrorCode::SubscriptionAlreadyActive,
            ErrorCode::PaymentFailed,
        ] {
            assert_eq!(code.status_code(), StatusCode::BAD_REQUEST, "{code:?}");
        }
        assert_eq!(ErrorCode::ConversationBlocked.status_code(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn internal_errors_hide_details() {
        let err = AppError::Internal(anyhow::anyhow!("connection refused on 10.0.0.3"));
        let (status, value) = body_json(err).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(value["error"]["message"], "internal server error");
        assert!(!value.to_string().contains("10.0.0.3"));
    }

    #[tokio::test]
    async fn pool_failures_are_logged_not_returned() {
        let err = AppError::internal("timed out waiting for connection: connection to server at \"127.0.0.1\", port 1 failed");
        let (status, value) = body_json(err).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(value["error"]["code"], "E0001");
        assert_eq!(value["error"]["message"], "internal server error");
        assert!(!value.to_string().contains("127.0.0.1"));
    }

    #[tokio::test]
    async fn database_errors_hide_details() {
        let err = AppError::Database(diesel::result::Error::BrokenTransactionManager);
        let (status, value) = body_json(err).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(value["error"]["code"], "E0001");
    }

    #[tokio::test]
    async fn validation_errors_use_dotted_field_paths() {
        let input = ProfileInput {
            display_name: String::new(),
            preferences: Preferences { age_range: AgeRange { min: 16 } },
        };
        let err = AppError::from(input.validate().unwrap_err());
        let (status, value) = body_json(err).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(value["error"]["code"], "E0002");
        let details = value["error"]["details"].as_array().unwrap();
        assert_eq!(details.len(), 2);
        assert_eq!(details[0]["field"], "displayName");
        assert_eq!(details[0]["message"], "display name cannot be empty");
        assert_eq!(details[1]["field"], "preferences.ageRange.min");
        assert_eq!(details[1]["message"], "minimum age must be at least 18");
    }

    #[tokio::test]
    async fn invalid_field_has_single_detail() {
        let (status, value) = body_json(AppError::invalid_field("rejectionReason", "rejection reason is required")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(value["error"]["details"][0]["field"], "rejectionReason");
    }

    #[test]
    fn camel_case_conversion() {
        assert_eq!(camel_case("min_client_age"), "minClientAge");
        assert_eq!(camel_case("url"), "url");
    }
}
