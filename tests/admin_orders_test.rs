mod common;

use axum::http::{Method, StatusCode};
use common::{intent_event, read_json, TestApp};
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn admin_routes_require_admin_role() {
    let app = TestApp::new().await;
    let customer = app.customer_token(Uuid::new_v4());

    let response = app
        .request(Method::GET, "/api/v1/admin/orders", None, Some(&customer))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.request(Method::GET, "/api/v1/admin/orders", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn list_filters_by_status_and_paginates() {
    let app = TestApp::new().await;
    let admin = app.admin_token();

    let first = app
        .place_reference_order(&app.customer_token(Uuid::new_v4()), "pi_one")
        .await;
    app.place_reference_order(&app.customer_token(Uuid::new_v4()), "pi_two")
        .await;
    let (status, _) = app
        .send_webhook(&intent_event(
            "evt_one",
            "payment_intent.succeeded",
            "pi_one",
            first["id"].as_str().unwrap(),
            2635,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = read_json(
        app.request(Method::GET, "/api/v1/admin/orders", None, Some(&admin))
            .await,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 2);

    let (_, body) = read_json(
        app.request(
            Method::GET,
            "/api/v1/admin/orders?status=processing",
            None,
            Some(&admin),
        )
        .await,
    )
    .await;
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["items"][0]["id"], first["id"]);

    let (_, body) = read_json(
        app.request(
            Method::GET,
            "/api/v1/admin/orders?status=all&page=2&per_page=1",
            None,
            Some(&admin),
        )
        .await,
    )
    .await;
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["total_pages"], 2);

    let response = app
        .request(
            Method::GET,
            "/api/v1/admin/orders?status=teleported",
            None,
            Some(&admin),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn fulfillment_follows_the_lifecycle() {
    let app = TestApp::new().await;
    let admin = app.admin_token();
    let order = app
        .place_reference_order(&app.customer_token(Uuid::new_v4()), "pi_life")
        .await;
    let order_id = order["id"].as_str().unwrap();
    let status_uri = format!("/api/v1/admin/orders/{}/status", order_id);

    // Unpaid orders cannot be shipped.
    let response = app
        .request(
            Method::PUT,
            &status_uri,
            Some(json!({"status": "shipped"})),
            Some(&admin),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    app.send_webhook(&intent_event(
        "evt_life",
        "payment_intent.succeeded",
        "pi_life",
        order_id,
        2635,
    ))
    .await;

    for next in ["shipped", "delivered"] {
        let (status, body) = read_json(
            app.request(
                Method::PUT,
                &status_uri,
                Some(json!({"status": next})),
                Some(&admin),
            )
            .await,
        )
        .await;
        assert_eq!(status, StatusCode::OK, "moving to {} failed: {}", next, body);
        assert_eq!(body["data"]["status"], next);
        app.assert_totals_hold(order_id).await;
    }

    // Setting the current status again is a no-op.
    let response = app
        .request(
            Method::PUT,
            &status_uri,
            Some(json!({"status": "delivered"})),
            Some(&admin),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    // Delivered orders cannot go back or be cancelled.
    for illegal in ["processing", "cancelled"] {
        let response = app
            .request(
                Method::PUT,
                &status_uri,
                Some(json!({"status": illegal})),
                Some(&admin),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
    app.assert_totals_hold(order_id).await;

    // Refunded is reached only through a processor refund.
    let response = app
        .request(
            Method::PUT,
            &status_uri,
            Some(json!({"status": "refunded"})),
            Some(&admin),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .request(
            Method::PUT,
            &status_uri,
            Some(json!({"status": "lost"})),
            Some(&admin),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn unknown_orders_are_not_found() {
    let app = TestApp::new().await;
    let admin = app.admin_token();
    let id = Uuid::new_v4();

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/admin/orders/{}", id),
            None,
            Some(&admin),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/admin/orders/{}/status", id),
            Some(json!({"status": "cancelled"})),
            Some(&admin),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
