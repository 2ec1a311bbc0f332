use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

use crate::errors::{AppError, AppResult, ErrorCode};
use crate::types::auth::{AuthUser, Claims, UserRole};

/// Application state that knows the HS256 signing secret.
pub trait JwtSecretProvider {
    fn jwt_secret(&self) -> &str;
}

impl<T: JwtSecretProvider> JwtSecretProvider for Arc<T> {
    fn jwt_secret(&self) -> &str {
        (**self).jwt_secret()
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: JwtSecretProvider + Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers)?;
        let claims = validate_jwt(&token, state.jwt_secret())?;

        if claims.is_expired() {
            return Err(AppError::new(ErrorCode::TokenExpired, "token has expired"));
        }

        Ok(AuthUser::from(claims))
    }
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<String, AppError> {
    let auth_header = headers
        .get("Authorization")
        .ok_or_else(|| AppError::new(ErrorCode::Unauthorized, "no token, authorization denied"))?
        .to_str()
        .map_err(|_| AppError::new(ErrorCode::Unauthorized, "invalid authorization header"))?;

    auth_header
        .strip_prefix("Bearer ")
        .map(str::to_string)
        .ok_or_else(|| AppError::new(ErrorCode::Unauthorized, "authorization header must use Bearer scheme"))
}

pub fn validate_jwt(token: &str, secret: &str) -> Result<Claims, AppError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
            AppError::new(ErrorCode::TokenExpired, "token has expired")
        }
        _ => AppError::new(ErrorCode::TokenInvalid, "token is not valid"),
    })?;

    Ok(token_data.claims)
}

/// Allow-list of roles evaluated against an authenticated principal.
#[derive(Debug, Clone, Copy)]
pub struct RolePolicy {
    allowed: &'static [UserRole],
    denial: &'static str,
}

impl RolePolicy {
    pub const ADMIN: RolePolicy = RolePolicy {
        allowed: &[UserRole::Admin],
        denial: "admin access required",
    };
    pub const COMPANION: RolePolicy = RolePolicy {
        allowed: &[UserRole::Companion],
        denial: "companion access required",
    };
    pub const CLIENT: RolePolicy = RolePolicy {
        allowed: &[UserRole::Client],
        denial: "client access required",
    };

    pub const fn new(allowed: &'static [UserRole], denial: &'static str) -> Self {
        Self { allowed, denial }
    }

    pub fn allows(&self, role: UserRole) -> bool {
        self.allowed.contains(&role)
    }

    pub fn authorize(&self, user: &AuthUser) -> AppResult<()> {
        if self.allows(user.role) {
            Ok(())
        } else {
            Err(AppError::new(ErrorCode::Forbidden, self.denial))
        }
    }
}

macro_rules! role_extractor {
    ($(#[$meta:meta])* $name:ident, $policy:expr) => {
        $(#[$meta])*
        pub struct $name(pub AuthUser);

        #[axum::async_trait]
        impl<S> FromRequestParts<S> for $name
        where
            S: JwtSecretProvider + Send + Sync,
        {
            type Rejection = AppError;

            async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
                let user = AuthUser::from_request_parts(parts, state).await?;
                $policy.authorize(&user)?;
                Ok(Self(user))
            }
        }
    };
}

role_extractor!(
    /// Require Admin role
    AdminUser,
    RolePolicy::ADMIN
);

role_extractor!(
    /// Require Companion role
    CompanionUser,
    RolePolicy::COMPANION
);

role_extractor!(
    /// Require Client role
    ClientUser,
    RolePolicy::CLIENT
);

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use uuid::Uuid;

    const SECRET: &str = "test-secret";

    struct TestState;

    impl JwtSecretProvider for TestState {
        fn jwt_secret(&self) -> &str {
            SECRET
        }
    }

    fn token_for(role: UserRole, ttl: i64, secret: &str) -> String {
        let claims = Claims::new(Uuid::now_v7(), role, ttl);
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    fn parts_with(header: Option<String>) -> Parts {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header("Authorization", value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    fn error_code(err: AppError) -> ErrorCode {
        match err {
            AppError::Known { code, .. } => code,
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn accepts_valid_bearer_token() {
        let token = token_for(UserRole::Companion, 60, SECRET);
        let mut parts = parts_with(Some(format!("Bearer {token}")));

        let user = AuthUser::from_request_parts(&mut parts, &TestState).await.unwrap();
        assert_eq!(user.role, UserRole::Companion);
    }

    #[tokio::test]
    async fn missing_header_is_unauthorized() {
        let mut parts = parts_with(None);
        let err = AuthUser::from_request_parts(&mut parts, &TestState).await.unwrap_err();
        assert_eq!(error_code(err), ErrorCode::Unauthorized);
    }

    #[tokio::test]
    async fn wrong_scheme_is_unauthorized() {
        let token = token_for(UserRole::Client, 60, SECRET);
        let mut parts = parts_with(Some(format!("Token {token}")));
        let err = AuthUser::from_request_parts(&mut parts, &TestState).await.unwrap_err();
        assert_eq!(error_code(err), ErrorCode::Unauthorized);
    }

    #[tokio::test]
    async fn foreign_signature_is_invalid() {
        let token = token_for(UserRole::Client, 60, "someone-else");
        let mut parts = parts_with(Some(format!("Bearer {token}")));
        let err = AuthUser::from_request_parts(&mut parts, &TestState).await.unwrap_err();
        assert_eq!(error_code(err), ErrorCode::TokenInvalid);
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let token = token_for(UserRole::Client, -3600, SECRET);
        let mut parts = parts_with(Some(format!("Bearer {token}")));
        let err = AuthUser::from_request_parts(&mut parts, &TestState).await.unwrap_err();
        assert_eq!(error_code(err), ErrorCode::TokenExpired);
    }

    #[tokio::test]
    async fn role_extractors_enforce_policy() {
        let token = token_for(UserRole::Client, 60, SECRET);

        let mut parts = parts_with(Some(format!("Bearer {token}")));
        assert!(ClientUser::from_request_parts(&mut parts, &TestState).await.is_ok());

        let mut parts = parts_with(Some(format!("Bearer {token}")));
        let err = AdminUser::from_request_parts(&mut parts, &TestState).await.err().unwrap();
        assert_eq!(error_code(err), ErrorCode::Forbidden);

        let mut parts = parts_with(Some(format!("Bearer {token}")));
        assert!(CompanionUser::from_request_parts(&mut parts, &TestState).await.is_err());
    }

    #[test]
    fn custom_policy_allow_list() {
        const STAFF_OR_COMPANION: RolePolicy =
            RolePolicy::new(&[UserRole::Admin, UserRole::Companion], "not allowed");
        assert!(STAFF_OR_COMPANION.allows(UserRole::Companion));
        assert!(!STAFF_OR_COMPANION.allows(UserRole::Client));
    }
}
