use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use canvas_api::auth::jwks::JwksClient;
use canvas_api::canvas::registry::RoomRegistry;
use canvas_api::canvas::relay::BroadcastRelay;
use canvas_api::canvas::saver::SaveScheduler;
use canvas_api::config::Config;
use canvas_api::store::access::{AccessPolicy, AllowAllAccess};
use canvas_api::store::documents::{DocumentStore, MemoryDocumentStore};
use canvas_api::AppState;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing — env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    // JWKS client for validating identity-signed bearer tokens.
    let jwks = JwksClient::new(&config.identity_url);

    // In-memory collaborators for single-process deployments. The platform
    // wires database-backed implementations here.
    let documents: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
    let access: Arc<dyn AccessPolicy> = Arc::new(AllowAllAccess);

    let registry = Arc::new(RoomRegistry::new());
    let relay = Arc::new(BroadcastRelay::new(registry.clone()));
    let saver = SaveScheduler::new(
        documents.clone(),
        registry.clone(),
        relay.clone(),
        Duration::from_millis(config.save_quiet_ms),
    );

    tracing::info!(
        identity_url = %config.identity_url,
        save_quiet_ms = config.save_quiet_ms,
        "canvas-api configured"
    );

    let state = AppState {
        config: Arc::new(config),
        jwks,
        documents,
        access,
        registry,
        relay,
        saver,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(canvas_api::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "canvas-api listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app).await.expect("server error");
}
