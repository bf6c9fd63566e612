//! Header names and hop-by-hop handling.

use axum::http::{header, HeaderMap, HeaderName};

use crate::config::HeadersConfig;

/// Headers that describe one connection and are never forwarded.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Parsed header names from configuration.
#[derive(Debug, Clone)]
pub struct HeaderNames {
    pub origin_id: HeaderName,
    pub request_id: HeaderName,
}

impl HeaderNames {
    /// Fails only on names that validation already rejects.
    pub fn from_config(config: &HeadersConfig) -> Result<Self, header::InvalidHeaderName> {
        Ok(Self {
            origin_id: HeaderName::from_bytes(config.origin_id.as_bytes())?,
            request_id: HeaderName::from_bytes(config.request_id.as_bytes())?,
        })
    }
}

impl Default for HeaderNames {
    fn default() -> Self {
        Self {
            origin_id: HeaderName::from_static("x-origin-id"),
            request_id: HeaderName::from_static("x-request-id"),
        }
    }
}

/// Remove hop-by-hop headers, including any named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}
