use std::time::Duration;

use vrcast_common::helpers::{env_parse, split_list};
use vrcast_common::{is_valid_session_id, Error, Result};

use crate::session::{SessionOptions, DEFAULT_NEGOTIATION_TIMEOUT};

pub const DEFAULT_SIGNALING_URL: &str = "ws://127.0.0.1:5000/ws";
pub const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub signaling_url: String,
    /// Paired session to join under the signaling url. `None` uses the global scope.
    pub session: Option<String>,
    /// STUN/TURN urls handed to the media engine.
    pub ice_servers: Vec<String>,
    pub negotiation_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            session: None,
            ice_servers: vec![DEFAULT_ICE_SERVER.to_string()],
            negotiation_timeout: DEFAULT_NEGOTIATION_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Reads `VRCAST_SIGNALING_URL`, `VRCAST_SESSION`, `VRCAST_ICE_SERVERS` and
    /// `VRCAST_NEGOTIATION_TIMEOUT_SECS`, keeping defaults for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let ice_servers = std::env::var("VRCAST_ICE_SERVERS")
            .map(|value| split_list(&value))
            .ok()
            .filter(|servers| !servers.is_empty())
            .unwrap_or(defaults.ice_servers);

        Self {
            signaling_url: std::env::var("VRCAST_SIGNALING_URL")
                .ok()
                .filter(|url| !url.trim().is_empty())
                .unwrap_or(defaults.signaling_url),
            session: std::env::var("VRCAST_SESSION")
                .ok()
                .map(|session| session.trim().to_string())
                .filter(|session| !session.is_empty()),
            ice_servers,
            negotiation_timeout: Duration::from_secs(env_parse(
                "VRCAST_NEGOTIATION_TIMEOUT_SECS",
                defaults.negotiation_timeout.as_secs(),
            )),
        }
    }

    /// The url actually dialed: the signaling url, plus `/{session}` when paired.
    pub fn endpoint(&self) -> String {
        let base = self.signaling_url.trim().trim_end_matches('/');
        match &self.session {
            Some(session) => format!("{base}/{session}"),
            None => base.to_string(),
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            negotiation_timeout: self.negotiation_timeout,
            wait_for_peer: self.session.is_some(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.signaling_url.trim();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(Error::config(format!(
                "signaling url must start with ws:// or wss://, got {url}"
            )));
        }
        if let Some(session) = &self.session {
            if !is_valid_session_id(session) {
                return Err(Error::config(format!("invalid session id {session:?}")));
            }
        }
        if self.ice_servers.is_empty() {
            return Err(Error::config("at least one ICE server is required"));
        }
        if self.negotiation_timeout.is_zero() {
            return Err(Error::config("negotiation timeout must be positive"));
        }
        Ok(())
    }
}
