//! Server configuration loaded from environment variables.
//!
//! Every setting has a default so the server starts with zero
//! configuration for local development.

use std::net::SocketAddr;

use chrono::Duration;

use duet_core::CoreConfig;
use duet_shared::constants::{
    DEFAULT_IDENTITY_A, DEFAULT_IDENTITY_B, DEFAULT_PORT, DEFAULT_RING_TIMEOUT_SECS,
    MAX_ATTACHMENT_SIZE, MAX_PROFILE_IMAGE_SIZE,
};
use duet_shared::Roster;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP/WebSocket server.
    /// Env: `BIND_ADDR`
    /// Default: `0.0.0.0:3000`
    pub bind_addr: SocketAddr,

    /// The two identity names, comma-separated.
    /// Env: `IDENTITIES` (e.g. `Rav,Mon`)
    pub identity_a: String,
    pub identity_b: String,

    /// Seconds a call may stay ringing before teardown.
    /// Env: `RING_TIMEOUT_SECS`
    /// Default: `60`
    pub ring_timeout_secs: u64,

    /// Maximum message attachment size in bytes (5 MiB).
    pub max_attachment_bytes: usize,

    /// Maximum profile image size in bytes (2 MiB).
    pub max_profile_image_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], DEFAULT_PORT).into(),
            identity_a: DEFAULT_IDENTITY_A.to_string(),
            identity_b: DEFAULT_IDENTITY_B.to_string(),
            ring_timeout_secs: DEFAULT_RING_TIMEOUT_SECS,
            max_attachment_bytes: MAX_ATTACHMENT_SIZE,
            max_profile_image_bytes: MAX_PROFILE_IMAGE_SIZE,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults (with a warning) on anything invalid.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("BIND_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.bind_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid BIND_ADDR, using default");
            }
        }

        if let Ok(names) = std::env::var("IDENTITIES") {
            match parse_identities(&names) {
                Some((a, b)) => {
                    config.identity_a = a;
                    config.identity_b = b;
                }
                None => {
                    tracing::warn!(
                        value = %names,
                        "IDENTITIES must be two distinct comma-separated names, using default"
                    );
                }
            }
        }

        if let Ok(val) = std::env::var("RING_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.ring_timeout_secs = secs,
                _ => tracing::warn!(value = %val, "Invalid RING_TIMEOUT_SECS, using default"),
            }
        }

        config
    }

    pub fn roster(&self) -> Roster {
        // from_env only accepts distinct non-empty names, so this can
        // fall back to the defaults only if constructed by hand.
        Roster::new(self.identity_a.clone(), self.identity_b.clone())
            .unwrap_or_default()
    }

    pub fn core_config(&self) -> CoreConfig {
        CoreConfig {
            roster: self.roster(),
            max_attachment_bytes: self.max_attachment_bytes,
            max_profile_image_bytes: self.max_profile_image_bytes,
            ring_timeout: Duration::seconds(self.ring_timeout_secs as i64),
        }
    }
}

fn parse_identities(names: &str) -> Option<(String, String)> {
    let mut parts = names.splitn(2, ',');
    let a = parts.next()?.trim();
    let b = parts.next()?.trim();
    if a.is_empty() || b.is_empty() || a == b {
        return None;
    }
    Some((a.to_string(), b.to_string()))
}
