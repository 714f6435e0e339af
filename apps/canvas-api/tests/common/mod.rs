use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ed25519_dalek::{SigningKey, VerifyingKey};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::time;

use canvas_api::auth::jwks::JwksClient;
use canvas_api::canvas::registry::RoomRegistry;
use canvas_api::canvas::relay::BroadcastRelay;
use canvas_api::canvas::saver::SaveScheduler;
use canvas_api::config::Config;
use canvas_api::error::ApiError;
use canvas_api::store::access::{AccessLevel, AccessPolicy, AllowAllAccess};
use canvas_api::store::documents::{CanvasDocument, DocumentStore, MemoryDocumentStore};
use canvas_api::AppState;

pub const TEST_ISSUER: &str = "http://identity.test";
pub const TEST_AUDIENCE: &str = "atelier-canvas";

/// Quiet window used by test states, kept short so debounce tests run fast.
pub const TEST_QUIET_MS: u64 = 400;

/// Test signing keys (mirrors the identity service's key derivation from a seed).
pub struct TestSigningKeys {
    pub kid: String,
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
}

impl TestSigningKeys {
    pub fn from_seed(seed: &str) -> Self {
        let hash = Sha256::digest(seed.as_bytes());
        let mut secret_bytes = [0u8; 32];
        secret_bytes.copy_from_slice(&hash);

        let signing_key = SigningKey::from_bytes(&secret_bytes);
        let verifying_key: VerifyingKey = (&signing_key).into();

        let secret = signing_key.to_bytes();
        let public_bytes = verifying_key.to_bytes();

        let pkcs8_der = wrap_ed25519_private_pkcs8(&secret);
        let encoding = EncodingKey::from_ed_der(&pkcs8_der);
        let decoding = DecodingKey::from_ed_der(&public_bytes);

        let kid_hash = Sha256::digest(public_bytes);
        let kid = format!(
            "idp-{}",
            kid_hash
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect::<String>()[..8]
                .to_string()
        );

        Self {
            kid,
            encoding,
            decoding,
        }
    }
}

fn wrap_ed25519_private_pkcs8(secret: &[u8; 32]) -> Vec<u8> {
    let mut der = Vec::with_capacity(48);
    der.extend_from_slice(&[0x30, 0x2e]);
    der.extend_from_slice(&[0x02, 0x01, 0x00]);
    der.extend_from_slice(&[0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70]);
    der.extend_from_slice(&[0x04, 0x22, 0x04, 0x20]);
    der.extend_from_slice(secret);
    der
}

/// Identity claims for minting test tokens.
#[derive(Debug, Serialize, Deserialize)]
pub struct TestClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Mint a valid bearer token for a test user.
pub fn mint_test_token(keys: &TestSigningKeys, user_id: &str, name: &str) -> String {
    let now = chrono::Utc::now();
    let claims = TestClaims {
        iss: TEST_ISSUER.to_string(),
        sub: user_id.to_string(),
        aud: TEST_AUDIENCE.to_string(),
        iat: now.timestamp(),
        exp: (now + chrono::Duration::seconds(300)).timestamp(),
        name: Some(name.to_string()),
        email: None,
    };
    sign(keys, &claims)
}

/// Mint an already-expired bearer token.
pub fn mint_expired_token(keys: &TestSigningKeys, user_id: &str) -> String {
    let now = chrono::Utc::now();
    let claims = TestClaims {
        iss: TEST_ISSUER.to_string(),
        sub: user_id.to_string(),
        aud: TEST_AUDIENCE.to_string(),
        iat: (now - chrono::Duration::seconds(600)).timestamp(),
        exp: (now - chrono::Duration::seconds(300)).timestamp(),
        name: Some("Expired User".to_string()),
        email: None,
    };
    sign(keys, &claims)
}

fn sign(keys: &TestSigningKeys, claims: &TestClaims) -> String {
    let mut header = Header::new(Algorithm::EdDSA);
    header.kid = Some(keys.kid.clone());
    jsonwebtoken::encode(&header, claims, &keys.encoding).expect("mint test token")
}

// ---------------------------------------------------------------------------
// Test collaborators
// ---------------------------------------------------------------------------

/// Document store that counts writes, for debounce assertions.
pub struct CountingDocumentStore {
    inner: MemoryDocumentStore,
    writes: AtomicUsize,
}

impl CountingDocumentStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryDocumentStore::new(),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn saved_by(&self, canvas_id: &str) -> Option<String> {
        self.inner.saved_by(canvas_id)
    }
}

#[async_trait]
impl DocumentStore for CountingDocumentStore {
    async fn get(&self, canvas_id: &str) -> Result<Option<CanvasDocument>, ApiError> {
        self.inner.get(canvas_id).await
    }

    async fn replace(
        &self,
        canvas_id: &str,
        document: &CanvasDocument,
        saved_by: &str,
    ) -> Result<(), ApiError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.replace(canvas_id, document, saved_by).await
    }
}

/// Access policy that denies one canvas id and grants edit everywhere else.
pub struct DenyOneCanvas {
    pub denied: String,
}

#[async_trait]
impl AccessPolicy for DenyOneCanvas {
    async fn access_level(&self, _user_id: &str, canvas_id: &str) -> Result<AccessLevel, ApiError> {
        if canvas_id == self.denied {
            Ok(AccessLevel::None)
        } else {
            Ok(AccessLevel::Edit)
        }
    }
}

// ---------------------------------------------------------------------------
// Test state / server
// ---------------------------------------------------------------------------

/// Build a test AppState with in-memory collaborators and a static JWKS key.
pub fn test_state_with_access(
    access: Arc<dyn AccessPolicy>,
) -> (AppState, Arc<CountingDocumentStore>, TestSigningKeys) {
    let signing_keys = TestSigningKeys::from_seed("dev-seed-do-not-use-in-production");

    // Pre-load the JWKS client with the test key so it doesn't hit the network.
    let jwks = JwksClient::with_static_key(&signing_keys.kid, signing_keys.decoding.clone());

    let config = Config {
        identity_url: TEST_ISSUER.to_string(),
        service_audience: TEST_AUDIENCE.to_string(),
        port: 0,
        save_quiet_ms: TEST_QUIET_MS,
    };

    let documents = Arc::new(CountingDocumentStore::new());
    let registry = Arc::new(RoomRegistry::new());
    let relay = Arc::new(BroadcastRelay::new(registry.clone()));
    let saver = SaveScheduler::new(
        documents.clone() as Arc<dyn DocumentStore>,
        registry.clone(),
        relay.clone(),
        Duration::from_millis(TEST_QUIET_MS),
    );

    let state = AppState {
        config: Arc::new(config),
        jwks,
        documents: documents.clone(),
        access,
        registry,
        relay,
        saver,
    };

    (state, documents, signing_keys)
}

pub fn test_state() -> (AppState, Arc<CountingDocumentStore>, TestSigningKeys) {
    test_state_with_access(Arc::new(AllowAllAccess))
}

/// Start an actual TCP server for WebSocket testing. The server runs in the
/// background; returns the bound address.
pub async fn start_server(state: AppState) -> SocketAddr {
    let app = canvas_api::routes::router().with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

// ---------------------------------------------------------------------------
// WebSocket client helpers
// ---------------------------------------------------------------------------

pub type WsClient =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Connect with the token in the query string.
pub async fn connect_with_query_token(addr: SocketAddr, token: &str) -> WsClient {
    let url = format!("ws://{addr}/canvas?token={token}");
    let (ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");
    ws
}

/// Connect with no token at all (header/query both empty).
pub async fn connect_bare(addr: SocketAddr) -> WsClient {
    let url = format!("ws://{addr}/canvas");
    let (ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");
    ws
}

/// Read the next text frame as JSON, with a timeout.
pub async fn recv_json(ws: &mut WsClient) -> serde_json::Value {
    use futures_util::StreamExt;

    let msg = time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timeout waiting for message")
        .expect("stream ended")
        .expect("ws read error");
    let text = msg.into_text().expect("not a text frame");
    serde_json::from_str(&text).expect("parse message")
}

/// Send a JSON value as a text frame.
pub async fn send_json(ws: &mut WsClient, value: &serde_json::Value) {
    use futures_util::SinkExt;

    ws.send(tokio_tungstenite::tungstenite::Message::Text(
        value.to_string().into(),
    ))
    .await
    .expect("ws send");
}

/// Connect via query token and consume the `connected` acknowledgement.
pub async fn connect_and_ack(addr: SocketAddr, token: &str) -> WsClient {
    let mut ws = connect_with_query_token(addr, token).await;
    let connected = recv_json(&mut ws).await;
    assert_eq!(connected["type"], "connected");
    ws
}

/// Join a canvas and consume the `canvas:load` and `canvas:users` replies.
/// Returns the load message.
pub async fn join_canvas(ws: &mut WsClient, canvas_id: &str) -> serde_json::Value {
    send_json(
        ws,
        &serde_json::json!({ "type": "canvas:join", "canvasId": canvas_id }),
    )
    .await;
    let load = recv_json(ws).await;
    assert_eq!(load["type"], "canvas:load");
    let users = recv_json(ws).await;
    assert_eq!(users["type"], "canvas:users");
    load
}
