//! Axum Router Configuration
//!
//! Defines the broker's HTTP surface: the token and session endpoints, the
//! OpenAPI documentation, and static asset serving for everything else.

use crate::{
    handlers::{self, ErrorResponse, TokenResponse},
    state::AppState,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::services::ServeDir;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(handlers::mint_token, handlers::exchange_session),
    components(schemas(ErrorResponse, TokenResponse)),
    tags(
        (name = "Prattle Broker", description = "Credential minting and SDP relay for the prattle voice buddy")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the broker.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let public_dir = app_state.config.public_dir.clone();

    // Group the routes that require AppState into their own router.
    let api_router = Router::new()
        .route("/token", get(handlers::mint_token))
        .route("/session", post(handlers::exchange_session))
        .with_state(app_state);

    // Everything unmatched falls through to the static client assets.
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
        .fallback_service(ServeDir::new(public_dir))
}
