// src/handlers/docs.rs

use axum::Json;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use super::{attempts, practice_tests};

#[derive(OpenApi)]
#[openapi(
    paths(
        practice_tests::list_tests,
        practice_tests::get_test,
        practice_tests::start_attempt,
        attempts::list_attempts,
        attempts::get_attempt,
        attempts::record_answer,
        attempts::submit_attempt,
        attempts::get_results,
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "tests", description = "Practice test catalogue"),
        (name = "attempts", description = "Timed attempts, answers and results")
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

/// Serves the OpenAPI document.
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
