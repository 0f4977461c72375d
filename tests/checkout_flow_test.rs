mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::http::{Method, StatusCode};
use checkout_api::services::checkout::OrderNumberGenerator;
use common::{decimal, read_json, TestApp, TestOptions};
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn checkout_snapshots_cart_and_creates_payment_intent() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let token = app.customer_token(user);

    let order = app.place_reference_order(&token, "pi_reference").await;

    assert_eq!(decimal(&order["total_amount"]), dec!(26.35));
    assert_eq!(decimal(&order["shipping_cost"]), dec!(1.35));
    assert_eq!(order["status"], "pending");
    assert_eq!(order["payment_status"], "unpaid");
    assert_eq!(order["transaction_id"], "pi_reference");
    assert_eq!(order["user_id"], json!(user));
    assert_eq!(order["shipping_address"], "1 Main St, Springfield");
    assert_eq!(order["items"].as_array().unwrap().len(), 2);

    let number = order["order_number"].as_str().unwrap();
    assert!(number.starts_with("ORD-"));
    assert_eq!(number.len(), 12);

    // The cart was emptied once payment was initiated.
    let (_, cart) = read_json(app.request(Method::GET, "/api/v1/cart", None, Some(&token)).await).await;
    assert!(cart["data"]["items"].as_array().unwrap().is_empty());

    // The processor was asked for the full total in minor units.
    let requests = app.processor.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let form = String::from_utf8_lossy(&requests[0].body).to_string();
    assert!(form.contains("amount=2635"), "unexpected intent request: {}", form);
}

#[tokio::test]
async fn checkout_response_carries_client_secret() {
    let app = TestApp::new().await;
    let token = app.customer_token(Uuid::new_v4());
    let product = app.seed_product("Widget", dec!(3.00)).await;
    app.add_to_cart(&token, product, 1).await;
    app.processor_accepts("pi_secret").await;

    let (status, body) = app.checkout(&token).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["payment"]["payment_intent_id"], "pi_secret");
    assert_eq!(body["data"]["payment"]["client_secret"], "pi_secret_secret_test");
    assert_eq!(body["data"]["payment"]["publishable_key"], "pk_test_integration");
}

#[tokio::test]
async fn later_price_changes_do_not_touch_placed_orders() {
    let app = TestApp::new().await;
    let token = app.customer_token(Uuid::new_v4());
    let product = app.seed_product("Widget", dec!(10.00)).await;
    app.add_to_cart(&token, product, 2).await;
    app.processor_accepts("pi_snapshot").await;

    let (status, body) = app.checkout(&token).await;
    assert_eq!(status, StatusCode::CREATED);
    let order_id = body["data"]["order"]["id"].as_str().unwrap().to_string();

    app.set_product_price(product, dec!(99.00)).await;

    let (status, body) = read_json(
        app.request(
            Method::GET,
            &format!("/api/v1/orders/{}", order_id),
            None,
            Some(&token),
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal(&body["data"]["total_amount"]), dec!(21.35));
    assert_eq!(decimal(&body["data"]["items"][0]["price"]), dec!(10.00));
    assert_eq!(body["data"]["items"][0]["product_name"], "Widget");
    // Customers do not see payment evidence rows.
    assert!(body["data"].get("payments").is_none());
}

#[tokio::test]
async fn empty_cart_cannot_be_checked_out() {
    let app = TestApp::new().await;
    let token = app.customer_token(Uuid::new_v4());
    app.processor_accepts("pi_unused").await;

    let (status, _) = app.checkout(&token).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(app.processor.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn blank_delivery_details_are_rejected() {
    let app = TestApp::new().await;
    let token = app.customer_token(Uuid::new_v4());
    let product = app.seed_product("Widget", dec!(10.00)).await;
    app.add_to_cart(&token, product, 1).await;

    let (status, body) = read_json(
        app.request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({"shipping_address": "   ", "phone": "+1-555-0100"})),
            Some(&token),
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["fields"]["shipping_address"].is_array());

    // Nothing was created and the cart can still be edited.
    let (_, orders) = read_json(app.request(Method::GET, "/api/v1/orders", None, Some(&token)).await).await;
    assert!(orders["data"].as_array().unwrap().is_empty());
    app.add_to_cart(&token, product, 1).await;
}

#[tokio::test]
async fn inactive_products_block_checkout() {
    use checkout_api::entities::product;
    use sea_orm::{ActiveModelTrait, Set};

    let app = TestApp::new().await;
    let token = app.customer_token(Uuid::new_v4());
    let id = app.seed_product("Discontinued", dec!(10.00)).await;
    app.add_to_cart(&token, id, 1).await;

    product::ActiveModel {
        id: Set(id),
        is_active: Set(false),
        ..Default::default()
    }
    .update(app.state.db.as_ref())
    .await
    .unwrap();
    app.processor_accepts("pi_unused").await;

    let (status, _) = app.checkout(&token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn declined_intent_keeps_order_and_cart_for_resume() {
    let app = TestApp::new().await;
    let token = app.customer_token(Uuid::new_v4());
    let product = app.seed_product("Widget", dec!(10.00)).await;
    app.add_to_cart(&token, product, 1).await;
    app.processor_declines("Your card was declined.").await;

    let (status, body) = app.checkout(&token).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("Your card was declined."));
    let order_id = body["order_id"].as_str().expect("order id in error body").to_string();
    assert!(body["order_number"].as_str().unwrap().starts_with("ORD-"));

    // The order exists and is awaiting payment.
    let (status, order) = read_json(
        app.request(
            Method::GET,
            &format!("/api/v1/orders/{}", order_id),
            None,
            Some(&token),
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["data"]["status"], "pending");
    assert_eq!(order["data"]["payment_status"], "unpaid");
    assert!(order["data"]["transaction_id"].is_null());

    // The cart was neither cleared nor left locked.
    let (_, cart) = read_json(app.request(Method::GET, "/api/v1/cart", None, Some(&token)).await).await;
    assert_eq!(cart["data"]["items"].as_array().unwrap().len(), 1);
    app.add_to_cart(&token, product, 1).await;

    // Resuming asks the processor again for the same order.
    app.processor_accepts("pi_resumed").await;
    let (status, body) = read_json(
        app.request(
            Method::GET,
            &format!("/api/v1/payments/intent/{}", order_id),
            None,
            Some(&token),
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["payment_intent_id"], "pi_resumed");

    let (_, order) = read_json(
        app.request(
            Method::GET,
            &format!("/api/v1/orders/{}", order_id),
            None,
            Some(&token),
        )
        .await,
    )
    .await;
    assert_eq!(order["data"]["transaction_id"], "pi_resumed");

    let (_, orders) = read_json(app.request(Method::GET, "/api/v1/orders", None, Some(&token)).await).await;
    assert_eq!(orders["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn resume_is_refused_for_paid_and_foreign_orders() {
    let app = TestApp::new().await;
    let owner = app.customer_token(Uuid::new_v4());
    let order = app.place_reference_order(&owner, "pi_paid").await;
    let order_id = order["id"].as_str().unwrap();

    let other = app.customer_token(Uuid::new_v4());
    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/payments/intent/{}", order_id),
            None,
            Some(&other),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let (status, _) = app
        .send_webhook(&common::intent_event(
            "evt_paid",
            "payment_intent.succeeded",
            "pi_paid",
            order_id,
            2635,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/payments/intent/{}", order_id),
            None,
            Some(&owner),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn colliding_order_numbers_are_redrawn() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let generator: OrderNumberGenerator = Arc::new(move || {
        // First two draws collide with each other, the third is fresh.
        match counter.fetch_add(1, Ordering::SeqCst) {
            0 | 1 => "ORD-AAAAAAAA".to_string(),
            _ => "ORD-BBBBBBBB".to_string(),
        }
    });
    let app = TestApp::with_options(TestOptions {
        order_numbers: Some(generator),
        ..TestOptions::default()
    })
    .await;

    let first = app.customer_token(Uuid::new_v4());
    let order = app.place_reference_order(&first, "pi_first").await;
    assert_eq!(order["order_number"], "ORD-AAAAAAAA");

    let second = app.customer_token(Uuid::new_v4());
    let product = app.seed_product("Widget", dec!(1.00)).await;
    app.add_to_cart(&second, product, 1).await;
    let (status, body) = app.checkout(&second).await;
    assert_eq!(status, StatusCode::CREATED, "checkout failed: {}", body);
    assert_eq!(body["data"]["order"]["order_number"], "ORD-BBBBBBBB");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn customers_only_see_their_own_orders() {
    let app = TestApp::new().await;
    let owner = app.customer_token(Uuid::new_v4());
    let order = app.place_reference_order(&owner, "pi_mine").await;

    let other = app.customer_token(Uuid::new_v4());
    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", order["id"].as_str().unwrap()),
            None,
            Some(&other),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let (_, orders) = read_json(app.request(Method::GET, "/api/v1/orders", None, Some(&other)).await).await;
    assert!(orders["data"].as_array().unwrap().is_empty());
}
