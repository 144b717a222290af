//! REST API for the peer provisioning orchestrator
//!
//! Exposes provisioning, job polling, config download, disconnect, and
//! server status over HTTP, with OpenAPI documentation and Swagger UI.
//! Authentication of dashboard users is out of scope; deploy behind a
//! trusted frontend.

pub mod handlers;
pub mod models;

use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use wgprov_control::Provisioner;

/// Application state shared across handlers
pub struct AppState {
    pub provisioner: Provisioner,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "WireGuard Provisioning API",
        version = "0.1.0",
        description = "REST API for provisioning WireGuard peers on a remote VPN host",
        contact(name = "Provisioning Team", email = "team@wgprov.dev")
    ),
    paths(
        handlers::provision_peer,
        handlers::job_status,
        handlers::peer_config,
        handlers::disconnect_peer,
        handlers::server_status,
        handlers::test_connection,
        handlers::health_check,
    ),
    components(
        schemas(
            models::ApiJobState,
            models::JobResponse,
            models::ConfigResponse,
            models::DisconnectResponse,
            models::ServerStatusResponse,
            models::TestConnectionResponse,
            models::HealthResponse,
            models::ErrorResponse,
        )
    ),
    tags(
        (name = "peers", description = "Peer provisioning and lifecycle endpoints"),
        (name = "system", description = "System health and status endpoints")
    )
)]
struct ApiDoc;

/// API server configuration
pub struct ApiServerConfig {
    /// Address to bind the API server
    pub bind_addr: SocketAddr,
    /// Enable CORS for browser dashboards
    pub enable_cors: bool,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".parse().unwrap(),
            enable_cors: true,
        }
    }
}

/// API Server
pub struct ApiServer {
    config: ApiServerConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, provisioner: Provisioner) -> Self {
        Self {
            config,
            state: Arc::new(AppState { provisioner }),
        }
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let api_doc = ApiDoc::openapi();

        let api_router = Router::new()
            .route(
                "/api/peers/{username}/provision",
                post(handlers::provision_peer),
            )
            .route("/api/peers/{username}/job", get(handlers::job_status))
            .route("/api/peers/{username}/config", get(handlers::peer_config))
            .route(
                "/api/peers/{username}/disconnect",
                post(handlers::disconnect_peer),
            )
            .route("/api/status", get(handlers::server_status))
            .route("/api/test-connection", get(handlers::test_connection))
            .route("/api/health", get(handlers::health_check))
            .with_state(self.state.clone());

        let router = Router::new()
            .merge(SwaggerUi::new("/swagger-ui").url("/api/openapi.json", api_doc))
            .merge(api_router)
            .layer(TraceLayer::new_for_http());

        if self.config.enable_cors {
            // Dashboards run on development hosts; credentials are not
            // used, so origins can stay permissive for localhost.
            use tower_http::cors::AllowOrigin;
            let cors = CorsLayer::new()
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE])
                .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _| {
                    let origin = origin.to_str().unwrap_or("");
                    origin.starts_with("http://localhost:")
                        || origin.starts_with("http://127.0.0.1:")
                }));
            router.layer(cors)
        } else {
            router
        }
    }

    /// Start the API server
    pub async fn start(self) -> Result<(), anyhow::Error> {
        let router = self.build_router();

        info!("Starting API server on {}", self.config.bind_addr);
        info!(
            "OpenAPI spec: http://{}/api/openapi.json",
            self.config.bind_addr
        );

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        axum::serve(listener, router)
            .await
            .map_err(|e| anyhow::anyhow!("API server error: {e}"))?;

        Ok(())
    }
}
