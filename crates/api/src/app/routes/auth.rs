use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};

use jobboard_auth::{AuthService, RegisterCompany};

use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/activate", post(activate))
        .route("/credentials/:company_id", get(credential))
}

pub async fn register(Extension(auth): Extension<AuthService>, Json(body): Json<dto::RegisterRequest>) -> Response {
    let command = RegisterCompany {
        email: body.email,
        password: body.password,
        country_code: body.country_code,
    };
    match auth.register(command).await {
        Ok(record) => (StatusCode::CREATED, Json(dto::RegisteredCompany::from(&record))).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

pub async fn login(Extension(auth): Extension<AuthService>, Json(body): Json<dto::LoginRequest>) -> Response {
    match auth.login(&body.email, &body.password).await {
        Ok(token) => (StatusCode::OK, Json(token)).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

pub async fn activate(
    Extension(auth): Extension<AuthService>,
    Json(body): Json<dto::ActivateAccountRequest>,
) -> Response {
    let company_id = match errors::parse_company_id(&body.company_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match auth.activate(company_id, &body.token).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

pub async fn credential(Extension(auth): Extension<AuthService>, Path(company_id): Path<String>) -> Response {
    let company_id = match errors::parse_company_id(&company_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match auth.credential(company_id).await {
        Ok(record) => (StatusCode::OK, Json(dto::CredentialView::from(record))).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}
