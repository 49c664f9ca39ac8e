//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: backends, hosted services and consumer workers
//! - `routes/`: HTTP routes + handlers (one file per service)
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// Build the HTTP router. Only the hosted services get their routes mounted.
pub fn build_app(services: Arc<AppServices>) -> Router {
    let mut api = Router::new().nest("/admin", routes::admin::router());

    if let Some(auth) = &services.auth {
        api = api.nest("/auth", routes::auth::router().layer(Extension(auth.clone())));
    }
    if let Some(company) = &services.company {
        api = api.nest("/companies", routes::companies::router().layer(Extension(company.clone())));
    }
    if let Some(subscription) = &services.subscription {
        api = api.nest(
            "/subscriptions",
            routes::subscriptions::router().layer(Extension(subscription.clone())),
        );
    }

    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/api", api.layer(Extension(services)))
        .layer(ServiceBuilder::new().layer(axum::middleware::from_fn(middleware::request_log)))
}
