#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{Method, Request, StatusCode},
    response::Response,
    Router,
};
use chrono::Utc;
use checkout_api::{
    auth::{AuthConfig, AuthService, Claims, ADMIN_ROLE},
    config::AppConfig,
    db,
    entities::{order, order_item, payment, product},
    events::{self, EventSender},
    handlers::AppServices,
    services::{
        checkout::{CheckoutService, OrderNumberGenerator},
        payment_gateway::{webhook, PaymentGateway, StripeGateway},
        pricing::FlatRateShipping,
    },
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const JWT_SECRET: &str =
    "integration-test-signing-key-Vq8Lw2Nx5Rb7Tc1Zm4Hj6Kp9Sd3Fg0YuEoIaWe";
pub const WEBHOOK_SECRET: &str = "whsec_integration_test";

/// Knobs a test can turn before the application is assembled.
#[derive(Clone)]
pub struct TestOptions {
    pub trust_client_payment_reports: bool,
    pub order_numbers: Option<OrderNumberGenerator>,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            trust_client_payment_reports: true,
            order_numbers: None,
        }
    }
}

/// Application wired as in production, backed by a throwaway SQLite file
/// and a mock payment processor.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub processor: MockServer,
    _db_dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_options(TestOptions::default()).await
    }

    pub async fn with_options(options: TestOptions) -> Self {
        let processor = MockServer::start().await;
        let db_dir = tempfile::tempdir().expect("temp dir");
        let db_url = format!(
            "sqlite://{}?mode=rwc",
            db_dir.path().join("checkout.db").display()
        );

        let mut cfg = AppConfig::new(
            db_url,
            JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            0,
            "test".to_string(),
        );
        cfg.cors_allow_any_origin = true;
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.trust_client_payment_reports = options.trust_client_payment_reports;
        cfg.payment.api_base = processor.uri();
        cfg.payment.secret_key = "sk_test_integration".to_string();
        cfg.payment.publishable_key = Some("pk_test_integration".to_string());
        cfg.payment.webhook_secret = Some(WEBHOOK_SECRET.to_string());

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let cfg = Arc::new(cfg);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway: Arc<dyn PaymentGateway> =
            Arc::new(StripeGateway::new(&cfg.payment).expect("gateway for tests"));

        let mut services = AppServices::new(
            db_arc.clone(),
            event_sender.clone(),
            cfg.clone(),
            gateway.clone(),
        );
        if let Some(generator) = options.order_numbers {
            let checkout = CheckoutService::new(
                db_arc.clone(),
                gateway,
                Arc::new(FlatRateShipping::new(cfg.shipping_flat_rate)),
                event_sender.clone(),
                cfg.clone(),
            )
            .with_order_numbers(generator);
            services = services.with_checkout(checkout);
        }

        let state = AppState {
            db: db_arc,
            config: cfg.clone(),
            event_sender,
            services,
        };

        let auth_service = Arc::new(AuthService::new(AuthConfig::from(cfg.as_ref())));
        let router = checkout_api::build_router(state.clone(), auth_service)
            .expect("router for tests");

        Self {
            router,
            state,
            processor,
            _db_dir: db_dir,
            _event_task: event_task,
        }
    }

    /// Bearer token for `user_id` carrying `roles`.
    pub fn token_for(&self, user_id: Uuid, roles: &[&str]) -> String {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + 3600,
            iss: self.state.config.auth_issuer.clone(),
            aud: self.state.config.auth_audience.clone(),
        };
        jsonwebtoken::encode(
            &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(JWT_SECRET.as_bytes()),
        )
        .expect("encode access token")
    }

    pub fn customer_token(&self, user_id: Uuid) -> String {
        self.token_for(user_id, &[])
    }

    pub fn admin_token(&self) -> String {
        self.token_for(Uuid::new_v4(), &[ADMIN_ROLE])
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Delivers a raw webhook body with an explicit signature header.
    pub async fn deliver_webhook(&self, payload: &[u8], signature: Option<&str>) -> Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payments/webhook")
            .header("content-type", "application/json");
        if let Some(sig) = signature {
            builder = builder.header(webhook::SIGNATURE_HEADER, sig);
        }
        let request = builder
            .body(Body::from(payload.to_vec()))
            .expect("failed to build webhook request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during webhook request")
    }

    /// Delivers `event` signed the way the processor signs it.
    pub async fn send_webhook(&self, event: &Value) -> (StatusCode, Value) {
        let payload = serde_json::to_vec(event).expect("serialize webhook");
        let signature = webhook::sign_payload(&payload, WEBHOOK_SECRET, Utc::now().timestamp());
        read_json(self.deliver_webhook(&payload, Some(&signature)).await).await
    }

    pub async fn seed_product(&self, name: &str, price: Decimal) -> Uuid {
        let id = Uuid::new_v4();
        product::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            price: Set(price),
            is_active: Set(true),
            created_at: Set(Utc::now()),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed product for tests");
        id
    }

    pub async fn set_product_price(&self, id: Uuid, price: Decimal) {
        product::ActiveModel {
            id: Set(id),
            price: Set(price),
            ..Default::default()
        }
        .update(self.state.db.as_ref())
        .await
        .expect("update product price");
    }

    /// Processor accepts every payment intent request with `intent_id`.
    pub async fn processor_accepts(&self, intent_id: &str) {
        self.processor.reset().await;
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": intent_id,
                "client_secret": format!("{}_secret_test", intent_id),
            })))
            .mount(&self.processor)
            .await;
    }

    /// Processor declines every payment intent request.
    pub async fn processor_declines(&self, message: &str) {
        self.processor.reset().await;
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .respond_with(ResponseTemplate::new(402).set_body_json(json!({
                "error": {"message": message, "code": "card_declined"}
            })))
            .mount(&self.processor)
            .await;
    }

    pub async fn add_to_cart(&self, token: &str, product_id: Uuid, quantity: i32) -> Value {
        let (status, body) = read_json(
            self.request(
                Method::POST,
                "/api/v1/cart/items",
                Some(json!({"product_id": product_id, "quantity": quantity})),
                Some(token),
            )
            .await,
        )
        .await;
        assert_eq!(status, StatusCode::OK, "add to cart failed: {}", body);
        body
    }

    pub async fn checkout(&self, token: &str) -> (StatusCode, Value) {
        read_json(
            self.request(
                Method::POST,
                "/api/v1/orders",
                Some(json!({
                    "shipping_address": "1 Main St, Springfield",
                    "phone": "+1-555-0100"
                })),
                Some(token),
            )
            .await,
        )
        .await
    }

    /// Seeds the reference cart (2 x 10.00 + 1 x 5.00) and checks it out.
    pub async fn place_reference_order(&self, token: &str, intent_id: &str) -> Value {
        let a = self.seed_product("Widget", Decimal::new(1000, 2)).await;
        let b = self.seed_product("Gadget", Decimal::new(500, 2)).await;
        self.add_to_cart(token, a, 2).await;
        self.add_to_cart(token, b, 1).await;
        self.processor_accepts(intent_id).await;

        let (status, body) = self.checkout(token).await;
        assert_eq!(status, StatusCode::CREATED, "checkout failed: {}", body);
        body["data"]["order"].clone()
    }

    pub async fn admin_order(&self, order_id: &str) -> Value {
        let token = self.admin_token();
        let (status, body) = read_json(
            self.request(
                Method::GET,
                &format!("/api/v1/admin/orders/{}", order_id),
                None,
                Some(&token),
            )
            .await,
        )
        .await;
        assert_eq!(status, StatusCode::OK, "admin get failed: {}", body);
        self.assert_totals_hold(order_id).await;
        body["data"].clone()
    }

    /// Checks `total_amount == sum(price * quantity) + shipping_cost` on the
    /// stored order, whatever transitions it has been through.
    pub async fn assert_totals_hold(&self, order_id: &str) {
        let id: Uuid = order_id.parse().expect("order id");
        let db = self.state.db.as_ref();
        let stored = order::Entity::find_by_id(id)
            .one(db)
            .await
            .expect("load order")
            .expect("order exists");
        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(id))
            .all(db)
            .await
            .expect("load order items");
        assert!(!items.is_empty(), "order {} has no items", order_id);
        assert!(
            stored.totals_match(&items),
            "order {} total {} does not match its items plus shipping {}",
            order_id,
            stored.total_amount,
            stored.shipping_cost
        );
    }

    /// Evidence rows stored for an order, read straight from the store.
    pub async fn payment_rows(&self, order_id: &str) -> Vec<payment::Model> {
        let id: Uuid = order_id.parse().expect("order id");
        payment::Entity::find()
            .filter(payment::Column::OrderId.eq(id))
            .all(self.state.db.as_ref())
            .await
            .expect("load payments")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn read_json(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json response")
    };
    (status, value)
}

/// Reads a decimal that may be serialized as a string or a number.
pub fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("decimal string"),
        Value::Number(n) => n.to_string().parse().expect("decimal number"),
        other => panic!("not a decimal: {}", other),
    }
}

/// A `payment_intent.*` event as the processor sends it.
pub fn intent_event(event_id: &str, event_type: &str, intent_id: &str, order_id: &str, amount: i64) -> Value {
    json!({
        "id": event_id,
        "type": event_type,
        "data": {
            "object": {
                "id": intent_id,
                "object": "payment_intent",
                "amount": amount,
                "amount_received": if event_type == "payment_intent.succeeded" { amount } else { 0 },
                "currency": "usd",
                "payment_method": "pm_card_visa",
                "metadata": {"order_id": order_id}
            }
        }
    })
}

/// A `charge.refunded` event; `order_id` may be omitted to force lookup by intent.
pub fn refund_event(event_id: &str, charge_id: &str, intent_id: &str, order_id: Option<&str>, amount: i64) -> Value {
    let metadata = match order_id {
        Some(id) => json!({"order_id": id}),
        None => json!({}),
    };
    json!({
        "id": event_id,
        "type": "charge.refunded",
        "data": {
            "object": {
                "id": charge_id,
                "object": "charge",
                "amount_refunded": amount,
                "currency": "usd",
                "payment_intent": intent_id,
                "metadata": metadata
            }
        }
    })
}
