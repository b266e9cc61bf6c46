use std::net::SocketAddr;

use vrcast_common::helpers::{env_bool, env_parse, split_list};

use crate::security::OriginPolicy;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5000";
pub const DEFAULT_OUTBOX_CAPACITY: usize = 128;
pub const DEFAULT_MAX_TEXT_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_addr: SocketAddr,
    pub allow_public_bind: bool,
    pub origins: OriginPolicy,
    /// Frames queued per socket before forwards to it start being dropped.
    pub outbox_capacity: usize,
    pub max_text_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
            allow_public_bind: false,
            origins: OriginPolicy::default(),
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            max_text_bytes: DEFAULT_MAX_TEXT_BYTES,
        }
    }
}

impl RelayConfig {
    /// Reads the tunables that have no command line flag.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let origins = match std::env::var("VRCAST_ALLOWED_ORIGINS") {
            Ok(value) if !value.trim().is_empty() => {
                let values = split_list(&value);
                OriginPolicy::from_values(
                    values.iter().map(String::as_str),
                    env_bool("VRCAST_WS_ALLOW_MISSING_ORIGIN", true),
                )
            }
            _ => defaults.origins,
        };

        Self {
            bind_addr: env_parse("VRCAST_RELAY_BIND_ADDR", defaults.bind_addr),
            allow_public_bind: env_bool("VRCAST_ALLOW_PUBLIC_BIND", false),
            origins,
            outbox_capacity: env_parse("VRCAST_WS_OUTBOX_CAPACITY", defaults.outbox_capacity)
                .max(1),
            max_text_bytes: env_parse("VRCAST_WS_MAX_TEXT_BYTES", defaults.max_text_bytes)
                .max(1024),
        }
    }
}
