//! Router tests against a live Postgres. They run when `ANGEL_TEST_DATABASE_URL` is set
//! and are skipped otherwise. Each test migrates its own schema and drops it afterwards.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use diesel::connection::SimpleConnection;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use angel_shared::clients::email::EmailClient;

use crate::config::AppConfig;
use crate::schema::{companion_profiles, conversations, payments, subscriptions};
use crate::services::payment_gateway::{ChargeReceipt, ChargeRequest, GatewayError, PaymentGateway};
use crate::services::profile_service;
use crate::{app, AppState};

const INITIAL_SCHEMA: &str = include_str!("../migrations/2024-01-01-000000_initial_schema/up.sql");

#[derive(Debug)]
struct SearchPath(String);

impl CustomizeConnection<PgConnection, diesel::r2d2::Error> for SearchPath {
    fn on_acquire(&self, conn: &mut PgConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!("SET search_path TO {}", self.0))
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Approves every charge and counts them.
#[derive(Default)]
struct CountingGateway {
    charges: AtomicUsize,
}

#[async_trait]
impl PaymentGateway for CountingGateway {
    async fn charge(&self, _request: &ChargeRequest) -> Result<ChargeReceipt, GatewayError> {
        let n = self.charges.fetch_add(1, Ordering::SeqCst);
        Ok(ChargeReceipt {
            transaction_id: format!("txn_test{n:09}"),
            receipt_url: "https://receipts.test/receipt.pdf".into(),
        })
    }
}

struct Harness {
    state: Arc<AppState>,
    gateway: Arc<CountingGateway>,
    conn: PgConnection,
    schema: String,
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = self.conn.batch_execute(&format!("DROP SCHEMA IF EXISTS {} CASCADE", self.schema));
    }
}

fn harness() -> Option<Harness> {
    let Ok(url) = std::env::var("ANGEL_TEST_DATABASE_URL") else {
        eprintln!("ANGEL_TEST_DATABASE_URL not set, skipping");
        return None;
    };

    let schema = format!("angel_test_{}", Uuid::new_v4().simple());
    let mut conn = PgConnection::establish(&url).unwrap();
    conn.batch_execute(&format!("CREATE SCHEMA {schema}; SET search_path TO {schema};")).unwrap();
    conn.batch_execute(INITIAL_SCHEMA).unwrap();

    let db = Pool::builder()
        .max_size(2)
        .connection_customizer(Box::new(SearchPath(schema.clone())))
        .build(ConnectionManager::<PgConnection>::new(url))
        .unwrap();

    let config = AppConfig::default();
    let gateway = Arc::new(CountingGateway::default());
    let state = Arc::new(AppState {
        db,
        payments: gateway.clone(),
        email: EmailClient::new("", &config.email_from, "Angelclass"),
        metrics_handle: PrometheusBuilder::new().build_recorder().handle(),
        config,
    });
    Some(Harness { state, gateway, conn, schema })
}

impl Harness {
    async fn call(&self, method: Method, uri: &str, token: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if !token.is_empty() {
            request = request.header("authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = app(self.state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    /// Registers an account and returns `(token, user id)`.
    async fn register(&self, role: &str, first_name: &str) -> (String, Uuid) {
        let body = json!({
            "email": format!("{}@angelclass.test", Uuid::new_v4().simple()),
            "password": "secret123",
            "role": role,
            "firstName": first_name,
            "lastName": "Tester",
        });
        let (status, value) = self.call(Method::POST, "/api/users/register", "", Some(body)).await;
        assert_eq!(status, StatusCode::CREATED, "{value}");
        let token = value["data"]["token"].as_str().unwrap().to_string();
        let id = value["data"]["user"]["id"].as_str().unwrap().parse().unwrap();
        (token, id)
    }

    async fn companion_with_profile(&mut self) -> (String, Uuid) {
        let (token, user_id) = self.register("companion", "Ava").await;
        let body = json!({ "location": { "city": "Sydney", "state": "NSW" } });
        let (status, value) = self.call(Method::POST, "/api/companions/profile", &token, Some(body)).await;
        assert_eq!(status, StatusCode::CREATED, "{value}");

        let profile_id = companion_profiles::table
            .filter(companion_profiles::user_id.eq(user_id))
            .select(companion_profiles::id)
            .first(&mut self.conn)
            .unwrap();
        (token, profile_id)
    }

    fn favorite_count(&mut self, profile_id: Uuid) -> i32 {
        companion_profiles::table
            .find(profile_id)
            .select(companion_profiles::favorite_count)
            .first(&mut self.conn)
            .unwrap()
    }
}

#[tokio::test]
async fn second_subscription_is_rejected_before_charging() {
    let Some(mut h) = harness() else { return };
    let (token, user_id) = h.register("client", "Mia").await;

    let first = json!({ "plan": "basic", "paymentMethod": "credit_card" });
    let (status, value) = h.call(Method::POST, "/api/payments/subscriptions", &token, Some(first)).await;
    assert_eq!(status, StatusCode::CREATED, "{value}");
    assert_eq!(h.gateway.charges.load(Ordering::SeqCst), 1);

    let second = json!({ "plan": "premium", "paymentMethod": "paypal" });
    let (status, value) = h.call(Method::POST, "/api/payments/subscriptions", &token, Some(second)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(value["error"]["code"], "E5001");

    assert_eq!(h.gateway.charges.load(Ordering::SeqCst), 1);
    let recorded: i64 = payments::table
        .filter(payments::user_id.eq(user_id))
        .count()
        .get_result(&mut h.conn)
        .unwrap();
    assert_eq!(recorded, 1);
    let subs: i64 = subscriptions::table
        .filter(subscriptions::user_id.eq(user_id))
        .count()
        .get_result(&mut h.conn)
        .unwrap();
    assert_eq!(subs, 1);
}

#[tokio::test]
async fn favorite_counter_tracks_distinct_favorites() {
    let Some(mut h) = harness() else { return };
    let (_, profile_id) = h.companion_with_profile().await;
    let (client, _) = h.register("client", "Noah").await;
    let (status, _) = h.call(Method::POST, "/api/clients/profile", &client, Some(json!({}))).await;
    assert_eq!(status, StatusCode::CREATED);

    let uri = format!("/api/clients/favorites/{profile_id}");
    let (status, _) = h.call(Method::POST, &uri, &client, None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, value) = h.call(Method::POST, &uri, &client, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(value["error"]["code"], "E2005");
    assert_eq!(h.favorite_count(profile_id), 1);

    let (status, _) = h.call(Method::DELETE, &uri, &client, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.favorite_count(profile_id), 0);

    let (status, value) = h.call(Method::DELETE, &uri, &client, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(value["error"]["code"], "E2006");
    assert_eq!(h.favorite_count(profile_id), 0);

    profile_service::adjust_favorite_count(&mut h.conn, profile_id, -1).unwrap();
    assert_eq!(h.favorite_count(profile_id), 0);
}

#[tokio::test]
async fn profile_save_keeps_counters_written_meanwhile() {
    let Some(mut h) = harness() else { return };
    let (_, profile_id) = h.companion_with_profile().await;
    let mut stale = profile_service::find_companion(&mut h.conn, profile_id).unwrap();

    profile_service::adjust_favorite_count(&mut h.conn, profile_id, 1).unwrap();
    profile_service::record_profile_view(&mut h.conn, profile_id, chrono::Utc::now()).unwrap();

    stale.add_photo("https://cdn.test/a.jpg".into(), true, chrono::Utc::now());
    let saved = profile_service::save_companion(&mut h.conn, &mut stale, chrono::Utc::now()).unwrap();

    assert_eq!(saved.photos.0.len(), 1);
    assert_eq!(saved.favorite_count, 1);
    assert_eq!(saved.profile_views, 1);
}

#[tokio::test]
async fn reading_messages_resets_only_the_reader() {
    let Some(mut h) = harness() else { return };
    let (alice, _) = h.register("client", "Alice").await;
    let (bella, bella_id) = h.register("companion", "Bella").await;

    let body = json!({ "recipientId": bella_id, "initialMessage": "Hi Bella" });
    let (status, value) = h.call(Method::POST, "/api/messaging/conversations", &alice, Some(body)).await;
    assert_eq!(status, StatusCode::CREATED, "{value}");
    let conversation_id: Uuid = value["data"]["id"].as_str().unwrap().parse().unwrap();

    let uri = format!("/api/messaging/conversations/{conversation_id}/messages");
    let (status, _) = h.call(Method::POST, &uri, &bella, Some(json!({ "content": "Hello Alice" }))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, value) = h.call(Method::GET, "/api/messaging/unread-count", &alice, None).await;
    assert_eq!(value["data"]["unreadCount"], 1);
    let (_, value) = h.call(Method::GET, "/api/messaging/unread-count", &bella, None).await;
    assert_eq!(value["data"]["unreadCount"], 1);

    let (status, value) = h.call(Method::GET, &uri, &alice, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["data"]["items"].as_array().unwrap().len(), 2);

    let (_, value) = h.call(Method::GET, "/api/messaging/unread-count", &alice, None).await;
    assert_eq!(value["data"]["unreadCount"], 0);
    let (_, value) = h.call(Method::GET, "/api/messaging/unread-count", &bella, None).await;
    assert_eq!(value["data"]["unreadCount"], 1);

    let stored: i64 = conversations::table.count().get_result(&mut h.conn).unwrap();
    assert_eq!(stored, 1);
}
