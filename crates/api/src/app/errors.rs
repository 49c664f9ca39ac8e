use std::str::FromStr;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use jobboard_auth::AuthError;
use jobboard_company::CompanyError;
use jobboard_core::{CompanyId, StoreError};
use jobboard_events::{BusError, PublishError};
use jobboard_subscription::{PaymentError, SubscriptionError};

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn parse_company_id(raw: &str) -> Result<CompanyId, Response> {
    CompanyId::from_str(raw).map_err(|e| json_error(StatusCode::BAD_REQUEST, "invalid_company_id", e.to_string()))
}

pub fn store_error_to_response(err: StoreError) -> Response {
    match err {
        StoreError::Unavailable(msg) => json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", msg),
        StoreError::Constraint(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        StoreError::Corrupt(msg) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg),
    }
}

pub fn auth_error_to_response(err: AuthError) -> Response {
    match err {
        AuthError::Validation(e) => json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
        AuthError::DuplicateEmail => json_error(StatusCode::CONFLICT, "duplicate_email", err.to_string()),
        AuthError::InvalidCredentials => json_error(StatusCode::UNAUTHORIZED, "invalid_credentials", err.to_string()),
        AuthError::InvalidActivationToken => {
            json_error(StatusCode::BAD_REQUEST, "invalid_activation_token", err.to_string())
        }
        AuthError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", err.to_string()),
        AuthError::Store(e) => store_error_to_response(e),
        AuthError::Hashing(msg) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "hashing_error", msg),
    }
}

pub fn company_error_to_response(err: CompanyError) -> Response {
    match err {
        CompanyError::Validation(e) => json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
        CompanyError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", err.to_string()),
        CompanyError::Conflict(_) => json_error(StatusCode::CONFLICT, "conflict", err.to_string()),
        CompanyError::Store(e) => store_error_to_response(e),
    }
}

pub fn subscription_error_to_response(err: SubscriptionError) -> Response {
    match err {
        SubscriptionError::Validation(e) => json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
        SubscriptionError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", err.to_string()),
        SubscriptionError::Payment(PaymentError::Declined(msg)) => {
            json_error(StatusCode::BAD_REQUEST, "payment_declined", msg)
        }
        SubscriptionError::Payment(e) => json_error(StatusCode::BAD_GATEWAY, "payment_gateway_error", e.to_string()),
        SubscriptionError::Store(e) => store_error_to_response(e),
    }
}

pub fn bus_error_to_response(err: BusError) -> Response {
    json_error(StatusCode::SERVICE_UNAVAILABLE, "bus_unavailable", err.to_string())
}

pub fn publish_error_to_response(err: PublishError) -> Response {
    json_error(StatusCode::SERVICE_UNAVAILABLE, "publish_error", err.to_string())
}
