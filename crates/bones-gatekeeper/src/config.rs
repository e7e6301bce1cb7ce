use std::net::SocketAddr;

/// Largest request body accepted by the HTTP surface.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1_000_000;

#[derive(Debug, Clone)]
pub struct GatekeeperConfig {
    pub listen: SocketAddr,
    pub max_body_bytes: usize,
}

impl Default for GatekeeperConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 800)),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}
