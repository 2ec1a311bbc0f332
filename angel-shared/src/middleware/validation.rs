use axum::extract::{FromRequest, Request};
use axum::Json;
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::errors::{AppError, ErrorCode};

/// JSON body extractor that runs the payload's `validator` rules before the
/// handler sees it. Malformed bodies and rule failures both come back as
/// `ValidationError` with a `details` array.
pub struct ValidatedJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await.map_err(|rejection| {
            AppError::with_details(
                ErrorCode::ValidationError,
                "invalid request body",
                serde_json::json!([{ "field": "body", "message": rejection.body_text() }]),
            )
        })?;

        value.validate()?;
        Ok(Self(value))
    }
}
