use utoipa::{
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Checkout API",
        version = "1.0.0",
        description = r#"
# Checkout API

Per-user shopping carts, checkout into immutable order snapshots, payment
intents with an external processor, and reconciliation of payment outcomes.

## Authentication

Customer and admin endpoints require a JWT bearer token:

```
Authorization: Bearer <your-jwt-token>
```

Admin endpoints additionally require the `admin` role. The processor webhook
is authenticated by its `stripe-signature` header instead.

## Amounts

Monetary amounts are decimal strings with two fractional digits, e.g. `"26.35"`.

## Error Handling

Errors share one body shape:

```json
{
  "error": "Conflict",
  "message": "Checkout already in progress",
  "timestamp": "2024-01-01T00:00:00Z"
}
```

A checkout whose order was created but whose payment intent failed carries
`order_id` and `order_number` so payment can be resumed.
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Cart", description = "Shopping cart endpoints"),
        (name = "Orders", description = "Checkout and order endpoints"),
        (name = "Payments", description = "Payment intents and processor webhooks"),
        (name = "Admin", description = "Administrative order endpoints")
    ),
    paths(
        // Cart
        crate::handlers::carts::get_cart,
        crate::handlers::carts::add_item,
        crate::handlers::carts::update_item,
        crate::handlers::carts::remove_item,
        crate::handlers::carts::clear_cart,

        // Orders
        crate::handlers::orders::create_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::report_payment_status,

        // Payments
        crate::handlers::payments::resume_payment,
        crate::handlers::payments::payment_webhook,

        // Admin
        crate::handlers::admin_orders::list_orders,
        crate::handlers::admin_orders::get_order,
        crate::handlers::admin_orders::update_status,
    ),
    components(
        schemas(
            // Common types
            crate::ApiResponse<serde_json::Value>,
            crate::PaginatedResponse<serde_json::Value>,

            // Cart types
            crate::services::cart::CartView,
            crate::services::cart::CartLineView,
            crate::handlers::carts::AddItemRequest,
            crate::handlers::carts::UpdateItemRequest,

            // Order types
            crate::handlers::common::OrderResponse,
            crate::handlers::common::OrderItemResponse,
            crate::handlers::common::PaymentRecordResponse,
            crate::handlers::orders::CheckoutResponse,
            crate::services::checkout::CheckoutInput,
            crate::services::reconciler::ClientPaymentReport,
            crate::handlers::admin_orders::UpdateStatusRequest,
            crate::entities::OrderStatus,
            crate::entities::PaymentStatus,
            crate::entities::PaymentRecordStatus,
            crate::entities::PaymentSource,

            // Payment types
            crate::services::payment_gateway::PaymentHandle,
            crate::handlers::payments::WebhookAck,

            // Error types
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&BearerSecurity)
)]
pub struct ApiDocV1;

/// Registers the `Bearer` scheme referenced by authenticated paths
struct BearerSecurity;

impl Modify for BearerSecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "Bearer",
            SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
        );
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
