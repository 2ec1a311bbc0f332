pub mod clients;
pub mod companions;
pub mod compliance;
pub mod health;
pub mod messaging;
pub mod payments;
pub mod search;
pub mod users;
pub mod verification;

use uuid::Uuid;

use angel_shared::errors::{AppError, AppResult, ErrorCode};

/// Path ids that are not UUIDs cannot name an existing record.
pub(crate) fn parse_id(raw: &str, code: ErrorCode, message: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::new(code, message))
}
