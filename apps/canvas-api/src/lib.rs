pub mod auth;
pub mod canvas;
pub mod config;
pub mod error;
pub mod routes;
pub mod store;

use std::sync::Arc;

use auth::jwks::JwksClient;
use canvas::registry::RoomRegistry;
use canvas::relay::BroadcastRelay;
use canvas::saver::SaveScheduler;
use config::Config;
use store::access::AccessPolicy;
use store::documents::DocumentStore;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub jwks: JwksClient,
    pub documents: Arc<dyn DocumentStore>,
    pub access: Arc<dyn AccessPolicy>,
    pub registry: Arc<RoomRegistry>,
    pub relay: Arc<BroadcastRelay>,
    pub saver: SaveScheduler,
}
