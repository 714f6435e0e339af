/// Canvas API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// The identity service origin (e.g. `http://localhost:4001`) that signs
    /// bearer tokens and serves the JWKS document.
    pub identity_url: String,
    /// The audience this service expects in verified tokens.
    pub service_audience: String,
    /// Port the HTTP/WebSocket server binds to.
    pub port: u16,
    /// Quiet window for debounced canvas saves, in milliseconds.
    pub save_quiet_ms: u64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            identity_url: required_var("IDENTITY_URL"),
            service_audience: required_var("CANVAS_AUDIENCE"),
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4004),
            save_quiet_ms: std::env::var("SAVE_QUIET_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5000),
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}
