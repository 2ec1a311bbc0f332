use axum::{routing::{delete, get, post, put}, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

mod config;
mod models;
mod routes;
mod schema;
mod services;

#[cfg(test)]
mod db_tests;

use angel_shared::clients::db::{create_pool, DbPool};
use angel_shared::clients::email::EmailClient;
use angel_shared::middleware::{init_metrics, init_tracing, metrics_middleware, JwtSecretProvider};
use config::AppConfig;
use services::payment_gateway::{MockGateway, PaymentGateway};

pub struct AppState {
    pub db: DbPool,
    pub config: AppConfig,
    pub payments: Arc<dyn PaymentGateway>,
    pub email: EmailClient,
    pub metrics_handle: PrometheusHandle,
}

impl JwtSecretProvider for AppState {
    fn jwt_secret(&self) -> &str {
        &self.config.jwt_secret
    }
}

fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::health::metrics))
        // Accounts
        .route("/api/users/register", post(routes::users::register))
        .route("/api/users/login", post(routes::users::login))
        .route("/api/users/me", get(routes::users::me))
        .route("/api/users/profile", put(routes::users::update_profile))
        .route("/api/users/password-reset-request", post(routes::users::request_password_reset))
        .route("/api/users/password-reset", post(routes::users::reset_password))
        // Companion profiles
        .route("/api/companions/profile", post(routes::companions::upsert_profile).get(routes::companions::get_own_profile))
        .route("/api/companions/profile/:id", get(routes::companions::get_profile_by_id))
        .route("/api/companions/photos", post(routes::companions::add_photo))
        .route("/api/companions/photos/:photo_id", delete(routes::companions::delete_photo))
        .route("/api/companions/photos/:photo_id/main", put(routes::companions::set_main_photo))
        .route("/api/companions/videos", post(routes::companions::add_video))
        .route("/api/companions/videos/:video_id", delete(routes::companions::delete_video))
        .route("/api/companions/audio", post(routes::companions::set_audio).delete(routes::companions::delete_audio))
        // Client profiles
        .route("/api/clients/profile", post(routes::clients::upsert_profile).get(routes::clients::get_own_profile))
        .route("/api/clients/favorites", get(routes::clients::list_favorites))
        .route("/api/clients/favorites/:companion_id", post(routes::clients::add_favorite).delete(routes::clients::remove_favorite))
        .route("/api/clients/recently-viewed", get(routes::clients::list_recently_viewed))
        .route("/api/clients/recently-viewed/:companion_id", post(routes::clients::touch_recently_viewed))
        // Verification
        .route("/api/verification/id", post(routes::verification::submit_id))
        .route("/api/verification/selfie", post(routes::verification::submit_selfie))
        .route("/api/verification/comparison-media", post(routes::verification::submit_comparison_media))
        .route("/api/verification/status", get(routes::verification::get_status))
        .route("/api/verification/pending", get(routes::verification::list_pending))
        .route("/api/verification/:channel/:user_id/approve", put(routes::verification::approve))
        .route("/api/verification/:channel/:user_id/reject", put(routes::verification::reject))
        // Search (public)
        .route("/api/search/companions", get(routes::search::search_companions))
        .route("/api/search/featured", get(routes::search::featured))
        .route("/api/search/popular", get(routes::search::popular))
        .route("/api/search/new", get(routes::search::newest))
        .route("/api/search/location/:location", get(routes::search::by_location))
        .route("/api/search/locations", get(routes::search::locations))
        .route("/api/search/services", get(routes::search::services))
        // Messaging
        .route("/api/messaging/conversations", get(routes::messaging::list_conversations).post(routes::messaging::create_conversation))
        .route("/api/messaging/conversations/:id", get(routes::messaging::get_conversation).delete(routes::messaging::delete_conversation))
        .route("/api/messaging/conversations/:id/messages", get(routes::messaging::list_messages).post(routes::messaging::send_message))
        .route("/api/messaging/conversations/:id/read", put(routes::messaging::mark_read))
        .route("/api/messaging/conversations/:id/block", put(routes::messaging::block))
        .route("/api/messaging/conversations/:id/unblock", put(routes::messaging::unblock))
        .route("/api/messaging/unread-count", get(routes::messaging::unread_count))
        // Payments
        .route("/api/payments/subscriptions", post(routes::payments::create_subscription))
        .route("/api/payments/subscriptions/current", get(routes::payments::current_subscription))
        .route("/api/payments/subscriptions/cancel", put(routes::payments::cancel_subscription))
        .route("/api/payments/featured-listings", post(routes::payments::create_featured_listing))
        .route("/api/payments/history", get(routes::payments::history))
        .route("/api/payments/subscription-plans", get(routes::payments::subscription_plans))
        // Compliance
        .route("/api/compliance/terms", get(routes::compliance::current_terms).post(routes::compliance::publish_terms))
        .route("/api/compliance/privacy", get(routes::compliance::current_privacy).post(routes::compliance::publish_privacy))
        .route("/api/compliance/terms/all", get(routes::compliance::all_terms))
        .route("/api/compliance/privacy/all", get(routes::compliance::all_privacy))
        .route("/api/compliance/accept", post(routes::compliance::accept))
        .route("/api/compliance/verify-age", post(routes::compliance::verify_age))
        .route("/api/compliance/status", get(routes::compliance::status))
        .route("/api/compliance/agreements", get(routes::compliance::list_agreements))
        .layer(axum::middleware::from_fn(metrics_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("angel-api");

    let config = AppConfig::load()?;
    let port = config.port;

    let metrics_handle = init_metrics()?;
    let db = create_pool(&config.database_url)?;
    let payments: Arc<dyn PaymentGateway> =
        Arc::new(MockGateway::new(config.payment_success_rate, config.receipt_base_url.clone()));
    let email = EmailClient::new(&config.resend_api_key, &config.email_from, "Angelclass");
    if !email.is_enabled() {
        tracing::warn!("no email API key configured, password reset mail is disabled");
    }

    let state = Arc::new(AppState { db, config, payments, email, metrics_handle });

    let addr = format!("0.0.0.0:{port}");
    tracing::info!(addr = %addr, "angel-api starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app(state)).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use diesel::pg::PgConnection;
    use diesel::r2d2::{ConnectionManager, Pool};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    /// State whose pool never connects; only routes that stay off the database are exercised.
    fn test_state() -> Arc<AppState> {
        let config = AppConfig::default();
        let manager = ConnectionManager::<PgConnection>::new("postgres://nobody@127.0.0.1:1/none");
        let db = Pool::builder()
            .max_size(1)
            .connection_timeout(std::time::Duration::from_millis(300))
            .build_unchecked(manager);
        Arc::new(AppState {
            db,
            payments: Arc::new(MockGateway::new(1.0, config.receipt_base_url.clone())),
            email: EmailClient::new("", &config.email_from, "Angelclass"),
            metrics_handle: PrometheusBuilder::new().build_recorder().handle(),
            config,
        })
    }

    async fn send(request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app(test_state()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn plan_catalogue_needs_no_token() {
        let request = Request::get("/api/payments/subscription-plans").body(Body::empty()).unwrap();
        let (status, body) = send(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][2]["id"], "premium");
    }

    #[tokio::test]
    async fn protected_routes_reject_missing_token() {
        let request = Request::get("/api/users/me").body(Body::empty()).unwrap();
        let (status, body) = send(request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn unreachable_database_gives_opaque_500() {
        let token = services::token_service::create_access_token(
            uuid::Uuid::now_v7(),
            angel_shared::types::auth::UserRole::Client,
            &AppConfig::default().jwt_secret,
            3600,
        )
        .unwrap();
        let request = Request::get("/api/users/me")
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(request).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["code"], "E0001");
        assert_eq!(body["error"]["message"], "internal server error");
        assert!(!body.to_string().contains("127.0.0.1"));
    }

    #[tokio::test]
    async fn admin_routes_reject_other_roles() {
        let token = services::token_service::create_access_token(
            uuid::Uuid::now_v7(),
            angel_shared::types::auth::UserRole::Client,
            &AppConfig::default().jwt_secret,
            3600,
        )
        .unwrap();
        let request = Request::get("/api/compliance/terms/all")
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(request).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn malformed_bodies_are_validation_errors() {
        let request = Request::post("/api/users/register")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"email":"not-an-email","password":"123"}"#))
            .unwrap();
        let (status, body) = send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "E0002");
    }
}
