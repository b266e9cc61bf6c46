use std::collections::HashSet;
use std::net::SocketAddr;

use axum::http::{header, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};
use vrcast_common::{Error, Result};

const DEFAULT_ALLOWED_ORIGINS: [&str; 2] = ["http://localhost:3000", "http://127.0.0.1:3000"];

/// Which browser origins may open a signaling socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginPolicy {
    Any,
    List {
        allowed: HashSet<String>,
        /// Native clients send no `Origin` header.
        allow_missing: bool,
    },
}

impl Default for OriginPolicy {
    fn default() -> Self {
        Self::from_values(DEFAULT_ALLOWED_ORIGINS.iter().copied(), true)
    }
}

impl OriginPolicy {
    /// Builds a policy from configured values. A lone `*` means any origin.
    pub fn from_values<'a>(values: impl IntoIterator<Item = &'a str>, allow_missing: bool) -> Self {
        let mut allowed = HashSet::new();
        for value in values {
            let normalized = normalize_origin(value);
            if normalized == "*" {
                return OriginPolicy::Any;
            }
            if !normalized.is_empty() {
                allowed.insert(normalized);
            }
        }
        OriginPolicy::List {
            allowed,
            allow_missing,
        }
    }

    pub fn allows(&self, origin: Option<&str>) -> bool {
        match self {
            OriginPolicy::Any => true,
            OriginPolicy::List {
                allowed,
                allow_missing,
            } => match origin {
                Some(origin) => allowed.contains(&normalize_origin(origin)),
                None => *allow_missing,
            },
        }
    }

    pub fn cors_layer(&self) -> CorsLayer {
        let base = CorsLayer::new()
            .allow_methods([Method::GET, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE]);

        match self {
            OriginPolicy::Any => base.allow_origin(AllowOrigin::any()),
            OriginPolicy::List { allowed, .. } => {
                let values: Vec<HeaderValue> = allowed
                    .iter()
                    .filter_map(|origin| HeaderValue::from_str(origin).ok())
                    .collect();
                if values.is_empty() {
                    tracing::warn!(
                        "no valid CORS origins configured; cross-origin browser access will be blocked"
                    );
                    return base;
                }
                base.allow_origin(AllowOrigin::list(values))
            }
        }
    }
}

fn normalize_origin(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_ascii_lowercase()
}

/// Refuses to listen beyond loopback unless explicitly allowed.
pub fn check_public_bind_allowed(addr: SocketAddr, allow_public_bind: bool) -> Result<()> {
    if addr.ip().is_loopback() || allow_public_bind {
        return Ok(());
    }
    Err(Error::config(
        "refusing non-loopback bind without VRCAST_ALLOW_PUBLIC_BIND=1",
    ))
}
