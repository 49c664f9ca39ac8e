use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;

use jobboard_company::CompanyService;

use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_companies))
        .route("/:company_id", get(get_company))
        .route("/:company_id/country", get(get_country).put(change_country))
}

pub async fn list_companies(Extension(company): Extension<CompanyService>) -> Response {
    match company.list().await {
        Ok(items) => (StatusCode::OK, Json(json!({ "items": items }))).into_response(),
        Err(e) => errors::company_error_to_response(e),
    }
}

pub async fn get_company(Extension(company): Extension<CompanyService>, Path(company_id): Path<String>) -> Response {
    let company_id = match errors::parse_company_id(&company_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match company.get(company_id).await {
        Ok(profile) => (StatusCode::OK, Json(profile)).into_response(),
        Err(e) => errors::company_error_to_response(e),
    }
}

/// Bare country code as `text/plain`, read by the job-post service.
pub async fn get_country(Extension(company): Extension<CompanyService>, Path(company_id): Path<String>) -> Response {
    let company_id = match errors::parse_company_id(&company_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match company.country(company_id).await {
        Ok(country) => (StatusCode::OK, country.to_string()).into_response(),
        Err(e) => errors::company_error_to_response(e),
    }
}

pub async fn change_country(
    Extension(company): Extension<CompanyService>,
    Path(company_id): Path<String>,
    Json(body): Json<dto::ChangeCountryRequest>,
) -> Response {
    let company_id = match errors::parse_company_id(&company_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match company.change_country(company_id, &body.country_code).await {
        Ok(profile) => (StatusCode::OK, Json(profile)).into_response(),
        Err(e) => errors::company_error_to_response(e),
    }
}
