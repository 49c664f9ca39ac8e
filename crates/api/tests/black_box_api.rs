use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use reqwest::StatusCode;
use serde_json::{Value, json};

use jobboard_api::app::{
    build_app,
    services::{self, AppRuntime, Backends},
};
use jobboard_core::{CompanyId, CountryCode, FixedClock};
use jobboard_events::InMemoryEventBus;
use jobboard_infra::{AppConfig, CompanyDirectoryClient};

struct TestServer {
    base_url: String,
    clock: Arc<FixedClock>,
    bus: Arc<InMemoryEventBus>,
    _runtime: AppRuntime,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let bus = Arc::new(InMemoryEventBus::new());
        let backends = Backends {
            bus: bus.clone(),
            clock: clock.clone(),
            ..Backends::in_memory()
        };

        // Same router as prod, all services in one process, ephemeral port.
        let config = AppConfig {
            publish_max_attempts: 2,
            ..AppConfig::default()
        };
        let runtime = services::start(&config, backends)
            .await
            .expect("failed to start services");
        let app = build_app(runtime.services());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            clock,
            bus,
            _runtime: runtime,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn register(client: &reqwest::Client, server: &TestServer, email: &str, country: &str) -> Value {
    let resp = client
        .post(server.url("/api/auth/register"))
        .json(&json!({ "email": email, "password": "correct horse battery", "countryCode": country }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    resp.json().await.unwrap()
}

/// Poll until the Company service has materialized the profile.
async fn profile_eventually(client: &reqwest::Client, server: &TestServer, company_id: &str) -> Value {
    for _ in 0..100 {
        let resp = client
            .get(server.url(&format!("/api/companies/{company_id}")))
            .send()
            .await
            .unwrap();
        if resp.status() == StatusCode::OK {
            return resp.json().await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("profile for {company_id} never appeared");
}

async fn credential_country_eventually(
    client: &reqwest::Client,
    server: &TestServer,
    company_id: &str,
    expected: &str,
) -> Value {
    let mut last = Value::Null;
    for _ in 0..100 {
        last = client
            .get(server.url(&format!("/api/auth/credentials/{company_id}")))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if last["countryCode"] == expected {
            return last;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("credential never reached {expected}: {last}");
}

#[tokio::test]
async fn health_is_ok() {
    let server = TestServer::spawn().await;
    let resp = reqwest::get(server.url("/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn registration_flows_into_the_company_service() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let registered = register(&client, &server, "HR@Acme.io", "vn").await;
    assert_eq!(registered["email"], "hr@acme.io");
    assert_eq!(registered["countryCode"], "VN");
    assert_eq!(registered["shard"], "apac");
    let company_id = registered["companyId"].as_str().unwrap().to_string();

    let profile = profile_eventually(&client, &server, &company_id).await;
    assert_eq!(profile["countryCode"], "VN");
    assert_eq!(profile["email"], "hr@acme.io");

    let list: Value = client
        .get(server.url("/api/companies"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn country_change_reaches_auth_and_the_directory_client() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let registered = register(&client, &server, "hr@acme.io", "VN").await;
    let company_id = registered["companyId"].as_str().unwrap().to_string();
    profile_eventually(&client, &server, &company_id).await;

    let resp = client
        .put(server.url(&format!("/api/companies/{company_id}/country")))
        .json(&json!({ "countryCode": "DE" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let profile: Value = resp.json().await.unwrap();
    assert_eq!(profile["countryCode"], "DE");

    let credential = credential_country_eventually(&client, &server, &company_id, "DE").await;
    assert_eq!(credential["shard"], "emea");
    assert!(credential.get("passwordHash").is_none());

    let directory = CompanyDirectoryClient::new(&server.base_url).unwrap();
    let id: CompanyId = company_id.parse().unwrap();
    assert_eq!(directory.country_of(id).await.unwrap(), Some(CountryCode::parse("DE").unwrap()));
    assert_eq!(directory.country_of(CompanyId::new()).await.unwrap(), None);
}

#[tokio::test]
async fn duplicate_email_is_a_conflict() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    register(&client, &server, "hr@acme.io", "VN").await;

    let resp = client
        .post(server.url("/api/auth/register"))
        .json(&json!({ "email": "hr@acme.io", "password": "another password", "countryCode": "US" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "duplicate_email");
}

#[tokio::test]
async fn invalid_input_is_rejected() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(server.url("/api/auth/register"))
        .json(&json!({ "email": "not-an-email", "password": "correct horse battery", "countryCode": "VN" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client
        .get(server.url("/api/companies/not-a-uuid"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "invalid_company_id");

    let resp = client
        .get(server.url(&format!("/api/companies/{}", CompanyId::new())))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn login_and_activation() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let registered = register(&client, &server, "hr@acme.io", "VN").await;
    let company_id = registered["companyId"].as_str().unwrap().to_string();

    let resp = client
        .post(server.url("/api/auth/login"))
        .json(&json!({ "email": "hr@acme.io", "password": "correct horse battery" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let token: Value = resp.json().await.unwrap();
    assert_eq!(token["tokenType"], "Bearer");
    assert_eq!(token["companyId"], company_id.as_str());

    let resp = client
        .post(server.url("/api/auth/login"))
        .json(&json!({ "email": "hr@acme.io", "password": "wrong password" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = client
        .post(server.url("/api/auth/activate"))
        .json(&json!({ "companyId": company_id, "token": "nope" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn premium_follows_status_and_end_date() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let company_id = CompanyId::new();
    let base = format!("/api/subscriptions/company/{company_id}");

    let premium: bool = client
        .get(server.url(&format!("{base}/is-premium")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(!premium);

    let resp = client
        .post(server.url(&format!("{base}/activate")))
        .json(&json!({ "plan": "pro", "months": 1, "paymentMethod": "pm_card_visa" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let sub: Value = resp.json().await.unwrap();
    assert_eq!(sub["status"], "ACTIVE");

    let premium: bool = client
        .get(server.url(&format!("{base}/is-premium")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(premium);

    server.clock.advance(ChronoDuration::days(40));
    let premium: bool = client
        .get(server.url(&format!("{base}/is-premium")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(!premium, "expired subscription must not be premium");

    let resp = client
        .post(server.url(&format!("{base}/cancel")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let sub: Value = resp.json().await.unwrap();
    assert_eq!(sub["status"], "CANCELLED");
}

#[tokio::test]
async fn outage_parks_events_and_replay_delivers_them() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    server.bus.fail_next_publishes(100);

    // Registration still succeeds; the event is parked.
    let registered = register(&client, &server, "hr@acme.io", "VN").await;
    let company_id = registered["companyId"].as_str().unwrap().to_string();

    let parked: Value = client
        .get(server.url("/api/admin/undelivered-events"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let items = parked["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["eventType"], "company.registered");
    assert_eq!(items[0]["partitionKey"], company_id.as_str());

    server.bus.fail_next_publishes(0);
    let replay: Value = client
        .post(server.url("/api/admin/undelivered-events/replay"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(replay["delivered"], 1);
    assert_eq!(replay["remaining"], 0);

    profile_eventually(&client, &server, &company_id).await;
}

#[tokio::test]
async fn admin_lists_consumers_and_dead_letters() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let consumers: Value = client
        .get(server.url("/api/admin/consumers"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let handlers: Vec<&str> = consumers["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["handler"].as_str().unwrap())
        .collect();
    assert!(handlers.contains(&"auth.country-change"));
    assert!(handlers.contains(&"company.registration"));

    let dead: Value = client
        .get(server.url("/api/admin/dead-letters?topic=company.country.changed&limit=5"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(dead["items"].as_array().unwrap().is_empty());

    let resp = client
        .get(server.url("/api/admin/dead-letters?topic=company.deleted"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
