// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{get, post, put},
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{admin, attempts, auth, docs, practice_tests},
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware},
};

/// Assembles the main application router.
///
/// * Merges all sub-routers (auth, tests, attempts, admin).
/// * Applies global middleware (Trace, CORS).
/// * Injects global state (store, attempt service, config).
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
        ])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login));

    let test_routes = Router::new()
        .route("/", get(practice_tests::list_tests))
        .route("/{id}", get(practice_tests::get_test))
        // Starting an attempt needs a user
        .merge(
            Router::new()
                .route("/{id}/attempts", post(practice_tests::start_attempt))
                .layer(middleware::from_fn_with_state(state.clone(), auth_middleware)),
        );

    let attempt_routes = Router::new()
        .route("/", get(attempts::list_attempts))
        .route("/{id}", get(attempts::get_attempt))
        .route("/{id}/responses/{question_id}", put(attempts::record_answer))
        .route("/{id}/submit", post(attempts::submit_attempt))
        .route("/{id}/results", get(attempts::get_results))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let admin_routes = Router::new()
        .route("/tests", post(admin::create_test))
        .route("/tests/{id}/questions", post(admin::add_question))
        // Double middleware protection: Auth first, then Admin check
        .layer(middleware::from_fn(admin_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/tests", test_routes)
        .nest("/api/attempts", attempt_routes)
        .nest("/api/admin", admin_routes)
        .route("/api/openapi.json", get(docs::openapi_json))
        // Global Middleware (applied from outside in)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
