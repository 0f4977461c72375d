use axum::{
    body::Bytes,
    extract::{Json, Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    metrics::CHECKOUT_METRICS,
    services::payment_gateway::{webhook::SIGNATURE_HEADER, PaymentHandle, WebhookEvent},
    ApiResponse, ApiResult, AppState,
};

/// Payment routes for authenticated users
pub fn payment_routes() -> Router<AppState> {
    Router::new().route("/payments/intent/:order_id", get(resume_payment))
}

/// Processor webhook; authenticated by signature, not by bearer token
pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/payments/webhook", post(payment_webhook))
}

/// Acknowledgement returned to the payment processor
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub success: bool,
    pub message: String,
}

impl WebhookAck {
    fn reply(status: StatusCode, success: bool, message: impl Into<String>) -> (StatusCode, Json<Self>) {
        (
            status,
            Json(Self {
                success,
                message: message.into(),
            }),
        )
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/intent/{order_id}",
    summary = "Resume payment",
    description = "Requests a fresh payment intent for one of the caller's orders that is still awaiting payment",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Payment intent created", body = ApiResponse<PaymentHandle>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order is not awaiting payment", body = crate::errors::ErrorResponse),
        (status = 502, description = "Processor rejected the request", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Payments"
)]
pub async fn resume_payment(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> ApiResult<PaymentHandle> {
    let handle = state
        .services
        .checkout
        .resume_payment(auth_user.user_id, order_id)
        .await?;
    Ok(Json(ApiResponse::success(handle)))
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    summary = "Processor webhook",
    description = "Verifies the processor signature and reconciles the payment outcome. \
                   Unrecoverable events are acknowledged with success=false and HTTP 200.",
    request_body(content = String, description = "Raw processor event JSON"),
    params(("stripe-signature" = String, Header, description = "t=<unix>,v1=<hex hmac>")),
    responses(
        (status = 200, description = "Event processed, duplicate, ignored, or unrecoverable", body = WebhookAck),
        (status = 400, description = "Signature or payload rejected", body = WebhookAck),
        (status = 500, description = "Storage failure; the processor should retry", body = WebhookAck),
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<WebhookAck>) {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let event = match state.services.gateway.verify_and_parse(&body, signature) {
        Ok(WebhookEvent::Payment(event)) => event,
        Ok(WebhookEvent::Ignored {
            event_id,
            event_type,
        }) => {
            CHECKOUT_METRICS.webhooks_ignored.inc();
            info!(%event_id, %event_type, "webhook event type not handled");
            return WebhookAck::reply(StatusCode::OK, true, format!("ignored {}", event_type));
        }
        Err(err) => {
            CHECKOUT_METRICS.webhooks_rejected.inc();
            warn!(error = %err, "webhook rejected");
            return WebhookAck::reply(StatusCode::BAD_REQUEST, false, err.to_string());
        }
    };

    let event_id = event.event_id.clone();
    match state.services.reconciler.apply_webhook_event(event).await {
        Ok(result) if result.applied => {
            WebhookAck::reply(StatusCode::OK, true, format!("processed {}", event_id))
        }
        Ok(_) => WebhookAck::reply(StatusCode::OK, true, format!("duplicate {}", event_id)),
        Err(
            err @ (ServiceError::OrderNotFound(_)
            | ServiceError::NotFound(_)
            | ServiceError::NoPriorPayment(_)
            | ServiceError::InvalidStatus(_)
            | ServiceError::Conflict(_)),
        ) => {
            // Redelivery cannot fix these; acknowledge so the processor stops.
            error!(%event_id, error = %err, "webhook event could not be applied");
            WebhookAck::reply(StatusCode::OK, false, err.to_string())
        }
        Err(err) => {
            error!(%event_id, error = %err, "webhook processing failed");
            WebhookAck::reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                false,
                err.response_message(),
            )
        }
    }
}
