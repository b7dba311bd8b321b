// tests/api_tests.rs

use std::sync::Arc;

use coursehub::{
    config::Config,
    routes,
    state::AppState,
    store::{MemoryStore, Store},
    utils::hash::hash_password,
};

/// Helper function to spawn the app on a random port for testing.
/// Returns the base URL (e.g., "http://127.0.0.1:12345") and the store
/// behind it, so tests can seed data directly.
async fn spawn_app() -> (String, Arc<dyn Store>) {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());

    let config = Config {
        database_url: String::new(),
        jwt_secret: "test_secret_for_integration_tests".to_string(),
        jwt_expiration: 600, // 10 minutes for tests
        rust_log: "error".to_string(),
        admin_username: None,
        admin_password: None,
        port: 0,
        reaper_interval_secs: 60,
    };

    let app = routes::create_router(AppState::new(store.clone(), config));

    // Bind to port 0 to get a random available port
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");

    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (address, store)
}

fn unique_name() -> String {
    format!("u_{}", &uuid::Uuid::new_v4().to_string()[..8])
}

async fn login(client: &reqwest::Client, address: &str, username: &str, password: &str) -> String {
    let body = client
        .post(format!("{}/api/auth/login", address))
        .json(&serde_json::json!({ "username": username, "password": password }))
        .send()
        .await
        .expect("Login failed")
        .json::<serde_json::Value>()
        .await
        .expect("Failed to parse login json");

    body["token"].as_str().expect("Token not found").to_string()
}

#[tokio::test]
async fn health_check_404() {
    let (address, _) = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/random_path_that_does_not_exist", address))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn register_works() {
    let (address, _) = spawn_app().await;
    let client = reqwest::Client::new();
    let username = unique_name();

    let response = client
        .post(format!("{}/api/auth/register", address))
        .json(&serde_json::json!({
            "username": username,
            "password": "password123"
        }))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 201);
    let user: serde_json::Value = response.json().await.unwrap();
    assert_eq!(user["username"], username.as_str());
    assert_eq!(user["role"], "user");
    assert!(user.get("password").is_none(), "Password hash must not leak");
}

#[tokio::test]
async fn register_fails_validation() {
    let (address, _) = spawn_app().await;
    let client = reqwest::Client::new();

    // Username that is too short
    let response = client
        .post(format!("{}/api/auth/register", address))
        .json(&serde_json::json!({
            "username": "yo",
            "password": "password123"
        }))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn register_duplicate_is_conflict() {
    let (address, _) = spawn_app().await;
    let client = reqwest::Client::new();
    let body = serde_json::json!({ "username": unique_name(), "password": "password123" });

    let first = client
        .post(format!("{}/api/auth/register", address))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(first.status().as_u16(), 201);

    let second = client
        .post(format!("{}/api/auth/register", address))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(second.status().as_u16(), 409);
}

#[tokio::test]
async fn login_rejects_wrong_password() {
    let (address, _) = spawn_app().await;
    let client = reqwest::Client::new();
    let username = unique_name();

    client
        .post(format!("{}/api/auth/register", address))
        .json(&serde_json::json!({ "username": username, "password": "password123" }))
        .send()
        .await
        .unwrap();

    let response = client
        .post(format!("{}/api/auth/login", address))
        .json(&serde_json::json!({ "username": username, "password": "nope-nope" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn attempts_require_token() {
    let (address, _) = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/api/attempts", address))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn admin_routes_reject_regular_users() {
    let (address, _) = spawn_app().await;
    let client = reqwest::Client::new();
    let username = unique_name();

    client
        .post(format!("{}/api/auth/register", address))
        .json(&serde_json::json!({ "username": username, "password": "password123" }))
        .send()
        .await
        .unwrap();
    let token = login(&client, &address, &username, "password123").await;

    let response = client
        .post(format!("{}/api/admin/tests", address))
        .bearer_auth(&token)
        .json(&serde_json::json!({ "title": "Sneaky", "duration_minutes": 10 }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 403);
}

#[tokio::test]
async fn admin_creates_test_with_questions() {
    let (address, store) = spawn_app().await;
    let client = reqwest::Client::new();

    let admin = unique_name();
    store
        .create_user(&admin, &hash_password("adminpass").unwrap(), "admin")
        .await
        .unwrap();
    let token = login(&client, &address, &admin, "adminpass").await;

    let test: serde_json::Value = client
        .post(format!("{}/api/admin/tests", address))
        .bearer_auth(&token)
        .json(&serde_json::json!({
            "title": "<b>Rust</b> basics<script>alert(1)</script>",
            "duration_minutes": 15
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(test["passing_score"], 40.0);
    assert!(!test["title"].as_str().unwrap().contains("<script>"));
    let test_id = test["id"].as_str().unwrap();

    // Three options only
    let bad = client
        .post(format!("{}/api/admin/tests/{}/questions", address, test_id))
        .bearer_auth(&token)
        .json(&serde_json::json!({
            "prompt": "Which keyword declares a constant?",
            "options": ["let", "const", "static"],
            "correct_option": "B"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status().as_u16(), 400);

    let created = client
        .post(format!("{}/api/admin/tests/{}/questions", address, test_id))
        .bearer_auth(&token)
        .json(&serde_json::json!({
            "prompt": "Which keyword declares a constant?",
            "options": ["let", "const", "static", "mut"],
            "correct_option": "B",
            "explanation": "`const` items are inlined."
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status().as_u16(), 201);

    // The public view hides answers
    let detail: serde_json::Value = client
        .get(format!("{}/api/tests/{}", address, test_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let questions = detail["questions"].as_array().unwrap();
    assert_eq!(questions.len(), 1);
    assert_eq!(questions[0]["position"], 1);
    assert!(questions[0].get("correct_option").is_none());
    assert!(questions[0].get("explanation").is_none());

    let listed: Vec<serde_json::Value> = client
        .get(format!("{}/api/tests", address))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn unknown_test_is_404() {
    let (address, _) = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/api/tests/{}", address, uuid::Uuid::new_v4()))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn openapi_document_is_served() {
    let (address, _) = spawn_app().await;
    let client = reqwest::Client::new();

    let doc: serde_json::Value = client
        .get(format!("{}/api/openapi.json", address))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert!(doc["paths"].get("/api/attempts/{id}/submit").is_some());
    assert!(doc["components"]["securitySchemes"].get("bearer").is_some());
}
