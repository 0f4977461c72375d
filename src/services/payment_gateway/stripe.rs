use async_trait::async_trait;
use serde::Deserialize;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

use super::{to_minor_units, webhook, PaymentGateway, PaymentHandle, WebhookEvent};
use crate::config::PaymentConfig;
use crate::entities::order;
use crate::errors::ServiceError;
use crate::metrics::CHECKOUT_METRICS;

/// Processor client speaking the Stripe payment-intents REST dialect.
///
/// Credentials are carried by the instance; nothing is read from ambient state.
#[derive(Clone)]
pub struct StripeGateway {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
    publishable_key: Option<String>,
    webhook_secret: Option<String>,
    webhook_tolerance_secs: u64,
}

impl std::fmt::Debug for StripeGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeGateway")
            .field("api_base", &self.api_base)
            .field("webhook_tolerance_secs", &self.webhook_tolerance_secs)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct IntentResponse {
    id: String,
    client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

impl StripeGateway {
    pub fn new(config: &PaymentConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ServiceError::InternalError(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
            publishable_key: config.publishable_key.clone(),
            webhook_secret: config.webhook_secret.clone().filter(|s| !s.trim().is_empty()),
            webhook_tolerance_secs: config.webhook_tolerance_secs,
        })
    }

    async fn post_intent(&self, order: &order::Model) -> Result<PaymentHandle, ServiceError> {
        let amount = to_minor_units(order.total_amount)?;
        let params = [
            ("amount", amount.to_string()),
            ("currency", order.currency.to_lowercase()),
            ("metadata[order_id]", order.id.to_string()),
            ("metadata[order_number]", order.order_number.clone()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
        ];

        let response = self
            .client
            .post(format!("{}/v1/payment_intents", self.api_base))
            .basic_auth(&self.secret_key, Some(""))
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                // reqwest errors carry the URL only, never the credentials
                ServiceError::GatewayError(format!("processor unreachable: {}", e.without_url()))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .ok()
                .and_then(|env| env.error.message.or(env.error.code))
                .unwrap_or_else(|| format!("processor returned {}", status));
            return Err(ServiceError::GatewayError(message));
        }

        let intent: IntentResponse = response.json().await.map_err(|e| {
            ServiceError::GatewayError(format!("unreadable processor response: {}", e))
        })?;
        let client_secret = intent.client_secret.ok_or_else(|| {
            ServiceError::GatewayError("processor response has no client_secret".to_string())
        })?;

        Ok(PaymentHandle {
            client_secret,
            payment_intent_id: intent.id,
            publishable_key: self.publishable_key.clone(),
        })
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, order), fields(order_id = %order.id, order_number = %order.order_number))]
    async fn create_intent(&self, order: &order::Model) -> Result<PaymentHandle, ServiceError> {
        let started = Instant::now();
        let result = self.post_intent(order).await;
        CHECKOUT_METRICS
            .gateway_latency_ms
            .observe_duration(started.elapsed());

        match &result {
            Ok(handle) => info!(payment_intent_id = %handle.payment_intent_id, "payment intent created"),
            Err(e) => error!(error = %e, "payment intent creation failed"),
        }
        result
    }

    fn verify_and_parse(
        &self,
        payload: &[u8],
        signature_header: Option<&str>,
    ) -> Result<WebhookEvent, ServiceError> {
        let secret = self.webhook_secret.as_deref().ok_or_else(|| {
            warn!("webhook received but no signing secret is configured");
            ServiceError::InvalidSignature("webhook signing secret not configured".to_string())
        })?;
        let header = signature_header.ok_or_else(|| {
            ServiceError::InvalidSignature("missing signature header".to_string())
        })?;

        webhook::verify_signature(
            payload,
            header,
            secret,
            self.webhook_tolerance_secs,
            chrono::Utc::now().timestamp(),
        )?;
        webhook::parse_event(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn order() -> order::Model {
        order::Model {
            id: Uuid::new_v4(),
            order_number: "ORD-TEST1234".into(),
            user_id: Uuid::new_v4(),
            status: order::OrderStatus::Pending,
            payment_status: order::PaymentStatus::Unpaid,
            total_amount: dec!(26.35),
            shipping_cost: dec!(1.35),
            currency: "usd".into(),
            shipping_address: "1 Main St".into(),
            phone: "555-0100".into(),
            transaction_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn gateway(api_base: &str) -> StripeGateway {
        StripeGateway::new(&PaymentConfig {
            api_base: api_base.to_string(),
            secret_key: "sk_test_123".into(),
            publishable_key: Some("pk_test_123".into()),
            webhook_secret: Some("whsec_123".into()),
            ..PaymentConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn creates_intent_in_minor_units_with_order_metadata() {
        let server = MockServer::start().await;
        let order = order();
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .and(header_exists("authorization"))
            .and(body_string_contains("amount=2635"))
            .and(body_string_contains(order.id.to_string().as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "pi_123",
                "client_secret": "pi_123_secret_abc"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let handle = gateway(&server.uri()).create_intent(&order).await.unwrap();
        assert_eq!(handle.payment_intent_id, "pi_123");
        assert_eq!(handle.client_secret, "pi_123_secret_abc");
        assert_eq!(handle.publishable_key.as_deref(), Some("pk_test_123"));
    }

    #[tokio::test]
    async fn processor_rejection_carries_processor_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .respond_with(ResponseTemplate::new(402).set_body_json(serde_json::json!({
                "error": {"message": "Your card was declined.", "code": "card_declined"}
            })))
            .mount(&server)
            .await;

        let err = gateway(&server.uri())
            .create_intent(&order())
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::GatewayError(msg) if msg == "Your card was declined." );
    }

    #[test]
    fn missing_signature_header_is_rejected() {
        let gw = gateway("http://127.0.0.1:9");
        assert_matches!(
            gw.verify_and_parse(b"{}", None),
            Err(ServiceError::InvalidSignature(_))
        );
    }

    #[test]
    fn unconfigured_secret_rejects_everything() {
        let gw = StripeGateway::new(&PaymentConfig::default()).unwrap();
        let header = webhook::sign_payload(b"{}", "anything", Utc::now().timestamp());
        assert_matches!(
            gw.verify_and_parse(b"{}", Some(&header)),
            Err(ServiceError::InvalidSignature(_))
        );
    }
}
