use axum::{
    extract::{Json, Path, Query, State},
    routing::{get, put},
    Router,
};
use serde::Deserialize;
use std::str::FromStr;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::common::OrderResponse;
use crate::{
    entities::OrderStatus, errors::ServiceError, ApiResponse, ApiResult, AppState,
    PaginatedResponse,
};

/// Administrator order routes; mounted behind the admin role
pub fn admin_order_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/orders", get(list_orders))
        .route("/admin/orders/:id", get(get_order))
        .route("/admin/orders/:id/status", put(update_status))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct AdminOrderQuery {
    /// Order status to filter by, or `all`
    pub status: Option<String>,
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    20
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateStatusRequest {
    /// One of pending, processing, shipped, delivered, cancelled
    #[schema(example = "shipped")]
    pub status: String,
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/orders",
    summary = "List orders",
    params(AdminOrderQuery),
    responses(
        (status = 200, description = "Orders", body = ApiResponse<PaginatedResponse<OrderResponse>>),
        (status = 403, description = "Admin role required"),
        (status = 422, description = "Unknown status filter", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Admin"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<AdminOrderQuery>,
) -> ApiResult<PaginatedResponse<OrderResponse>> {
    let page = state
        .services
        .orders
        .list(query.status.as_deref(), query.page, query.per_page)
        .await?;

    let total_pages = page.total.div_ceil(page.per_page);
    Ok(Json(ApiResponse::success(PaginatedResponse {
        items: page.orders.into_iter().map(OrderResponse::from).collect(),
        total: page.total,
        page: page.page,
        limit: page.per_page,
        total_pages,
    })))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/orders/{id}",
    summary = "Get order",
    description = "Order with items and every payment evidence row",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order detail", body = ApiResponse<OrderResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Admin"
)]
pub async fn get_order(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<OrderResponse> {
    let details = state.services.orders.get(id).await?;
    Ok(Json(ApiResponse::success(OrderResponse::from_details(
        details, true,
    ))))
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/orders/{id}/status",
    summary = "Update fulfillment status",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = ApiResponse<OrderResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Illegal transition", body = crate::errors::ErrorResponse),
        (status = 422, description = "Unknown status", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Admin"
)]
pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> ApiResult<OrderResponse> {
    let status = OrderStatus::from_str(request.status.trim()).map_err(|_| {
        ServiceError::ValidationError(format!("unknown order status '{}'", request.status))
    })?;

    let order = state.services.orders.update_status(id, status).await?;
    Ok(Json(ApiResponse::success(OrderResponse::from(order))))
}
