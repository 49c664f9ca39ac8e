//! Payment gateway boundary.
//!
//! Gateways are ordinary values handed to the subscription service; each one
//! carries its own credentials and HTTP client.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument};
use uuid::Uuid;

use jobboard_core::CompanyId;

use crate::subscription::Plan;

pub const STRIPE_API_BASE: &str = "https://api.stripe.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    pub company_id: CompanyId,
    pub plan: Plan,
    pub amount_cents: i64,
    pub currency: String,
    /// Gateway-side payment method to charge, e.g. a Stripe `pm_...` id.
    pub payment_method: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReceipt {
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    #[error("payment declined: {0}")]
    Declined(String),

    #[error("payment gateway unavailable: {0}")]
    Unavailable(String),

    #[error("unexpected gateway response: {0}")]
    InvalidResponse(String),
}

#[async_trait::async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, request: &ChargeRequest) -> Result<PaymentReceipt, PaymentError>;
}

/// Stripe PaymentIntents client.
#[derive(Debug, Clone)]
pub struct StripeGateway {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    status: String,
}

impl StripeGateway {
    pub fn new(api_key: impl Into<String>) -> Result<Self, PaymentError> {
        Self::with_base_url(api_key, STRIPE_API_BASE)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self, PaymentError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PaymentError::Unavailable(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait::async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, request), fields(company_id = %request.company_id, plan = %request.plan))]
    async fn charge(&self, request: &ChargeRequest) -> Result<PaymentReceipt, PaymentError> {
        let url = format!("{}/v1/payment_intents", self.base_url);
        let form = intent_form(request)?;

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| PaymentError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if status.is_server_error() || status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(PaymentError::Unavailable(format!("gateway returned {status}")));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PaymentError::Declined(body));
        }

        let intent: PaymentIntent = resp
            .json()
            .await
            .map_err(|e| PaymentError::InvalidResponse(e.to_string()))?;
        debug!(intent_id = %intent.id, intent_status = %intent.status, "payment intent created");
        match intent.status.as_str() {
            "succeeded" | "processing" | "requires_capture" => Ok(PaymentReceipt { reference: intent.id }),
            other => Err(PaymentError::Declined(format!("payment intent {} is {other}", intent.id))),
        }
    }
}

/// Form for a confirmed PaymentIntent. Confirming needs a payment method, so
/// a request without one is declined before anything is sent.
fn intent_form(request: &ChargeRequest) -> Result<Vec<(&'static str, String)>, PaymentError> {
    let payment_method = request
        .payment_method
        .as_deref()
        .map(str::trim)
        .filter(|pm| !pm.is_empty())
        .ok_or_else(|| PaymentError::Declined("no payment method supplied".to_string()))?;
    Ok(vec![
        ("amount", request.amount_cents.to_string()),
        ("currency", request.currency.clone()),
        ("payment_method", payment_method.to_string()),
        ("confirm", "true".to_string()),
        ("automatic_payment_methods[enabled]", "true".to_string()),
        ("automatic_payment_methods[allow_redirects]", "never".to_string()),
        ("description", format!("{} subscription", request.plan)),
        ("metadata[company_id]", request.company_id.to_string()),
        ("metadata[plan]", request.plan.to_string()),
    ])
}

/// Gateway that records charges and approves them unless told otherwise.
#[derive(Debug, Default)]
pub struct FakePaymentGateway {
    charges: Mutex<Vec<ChargeRequest>>,
    decline_next: AtomicBool,
}

impl FakePaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decline_next(&self) {
        self.decline_next.store(true, Ordering::SeqCst);
    }

    pub fn charges(&self) -> Vec<ChargeRequest> {
        self.charges.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl PaymentGateway for FakePaymentGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<PaymentReceipt, PaymentError> {
        if self.decline_next.swap(false, Ordering::SeqCst) {
            return Err(PaymentError::Declined("card declined".to_string()));
        }
        if let Ok(mut charges) = self.charges.lock() {
            charges.push(request.clone());
        }
        Ok(PaymentReceipt {
            reference: format!("fake_{}", Uuid::new_v4().simple()),
        })
    }
}
