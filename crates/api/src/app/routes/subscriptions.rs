use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};

use jobboard_subscription::SubscriptionService;

use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/company/:company_id", get(get_subscription))
        .route("/company/:company_id/is-premium", get(is_premium))
        .route("/company/:company_id/activate", post(activate))
        .route("/company/:company_id/cancel", post(cancel))
}

pub async fn get_subscription(
    Extension(subscriptions): Extension<SubscriptionService>,
    Path(company_id): Path<String>,
) -> Response {
    let company_id = match errors::parse_company_id(&company_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match subscriptions.find_by_company(company_id).await {
        Ok(sub) => (StatusCode::OK, Json(sub)).into_response(),
        Err(e) => errors::subscription_error_to_response(e),
    }
}

pub async fn is_premium(
    Extension(subscriptions): Extension<SubscriptionService>,
    Path(company_id): Path<String>,
) -> Response {
    let company_id = match errors::parse_company_id(&company_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match subscriptions.is_premium(company_id).await {
        Ok(premium) => (StatusCode::OK, Json(premium)).into_response(),
        Err(e) => errors::subscription_error_to_response(e),
    }
}

pub async fn activate(
    Extension(subscriptions): Extension<SubscriptionService>,
    Path(company_id): Path<String>,
    Json(body): Json<dto::ActivateSubscriptionRequest>,
) -> Response {
    let company_id = match errors::parse_company_id(&company_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match subscriptions
        .activate(company_id, &body.plan, body.months, body.payment_method.as_deref())
        .await {
        Ok(sub) => (StatusCode::OK, Json(sub)).into_response(),
        Err(e) => errors::subscription_error_to_response(e),
    }
}

pub async fn cancel(
    Extension(subscriptions): Extension<SubscriptionService>,
    Path(company_id): Path<String>,
) -> Response {
    let company_id = match errors::parse_company_id(&company_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match subscriptions.cancel(company_id).await {
        Ok(sub) => (StatusCode::OK, Json(sub)).into_response(),
        Err(e) => errors::subscription_error_to_response(e),
    }
}
