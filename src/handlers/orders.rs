use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    routing::{get, patch},
    Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::common::OrderResponse;
use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::{
        checkout::CheckoutInput, payment_gateway::PaymentHandle,
        reconciler::ClientPaymentReport,
    },
    ApiResponse, ApiResult, AppState,
};

/// Creates the router for the caller's own orders
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", get(list_orders).post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/status", patch(report_payment_status))
}

/// Order created by checkout plus what the client pays with
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CheckoutResponse {
    pub order: OrderResponse,
    pub payment: PaymentHandle,
}

#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Checkout",
    description = "Converts the caller's cart into an order and requests a payment intent. \
                   If the processor rejects the intent the order is kept and its id is \
                   returned in the error body so payment can be resumed.",
    request_body = CheckoutInput,
    responses(
        (status = 201, description = "Order created", body = ApiResponse<CheckoutResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 409, description = "Checkout already in progress", body = crate::errors::ErrorResponse),
        (status = 422, description = "Validation error or empty cart", body = crate::errors::ErrorResponse),
        (status = 500, description = "Payment initiation failed; body carries order_id", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<CheckoutInput>,
) -> Result<(StatusCode, Json<ApiResponse<CheckoutResponse>>), ServiceError> {
    let result = state
        .services
        .checkout
        .checkout(auth_user.user_id, request)
        .await?;

    let response = CheckoutResponse {
        order: OrderResponse::with_items(result.order, result.items),
        payment: result.payment,
    };
    Ok((StatusCode::CREATED, Json(ApiResponse::success(response))))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List my orders",
    responses(
        (status = 200, description = "Orders, newest first", body = ApiResponse<Vec<OrderResponse>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> ApiResult<Vec<OrderResponse>> {
    let orders = state
        .services
        .orders
        .list_for_user(auth_user.user_id)
        .await?;
    Ok(Json(ApiResponse::success(
        orders.into_iter().map(OrderResponse::from).collect(),
    )))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get my order",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order with items", body = ApiResponse<OrderResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderResponse> {
    let details = state
        .services
        .orders
        .get_for_user(auth_user.user_id, id)
        .await?;
    Ok(Json(ApiResponse::success(OrderResponse::from_details(
        details, false,
    ))))
}

#[utoipa::path(
    patch,
    path = "/api/v1/orders/{id}/status",
    summary = "Report payment outcome",
    description = "Client-side report of a payment outcome for the caller's own order. \
                   Applied through the same reconciliation rules as processor webhooks.",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = ClientPaymentReport,
    responses(
        (status = 200, description = "Outcome applied or already recorded", body = ApiResponse<OrderResponse>),
        (status = 403, description = "Client payment reports are not accepted", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Illegal transition", body = crate::errors::ErrorResponse),
        (status = 422, description = "Unknown status value", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn report_payment_status(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
    Json(report): Json<ClientPaymentReport>,
) -> ApiResult<OrderResponse> {
    let reconciliation = state
        .services
        .reconciler
        .apply_client_report(auth_user.user_id, id, report)
        .await?;
    Ok(Json(ApiResponse::success(OrderResponse::from(
        reconciliation.order,
    ))))
}
