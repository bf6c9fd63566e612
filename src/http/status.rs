//! Map dispatch failures to HTTP status codes.
//!
//! Rules are tried in order; each rule is checked against every error in the
//! cause chain before the next rule is considered, so a specific cause wrapped
//! in a generic handler error still finds its status.

use std::error::Error;

use axum::http::StatusCode;

use crate::error::{causes, BadRequestKind, ProxyError};

type Predicate = fn(&ProxyError) -> bool;

const RULES: &[(Predicate, StatusCode)] = &[
    (
        |e| matches!(e, ProxyError::RequestTimeout),
        StatusCode::REQUEST_TIMEOUT,
    ),
    (
        |e| {
            matches!(
                e,
                ProxyError::OriginUnreachable { .. }
                    | ProxyError::NoAvailableHosts { .. }
                    | ProxyError::NoServiceConfigured { .. }
                    | ProxyError::BadHttpResponse { .. }
                    | ProxyError::ContentOverflow { .. }
            )
        },
        StatusCode::BAD_GATEWAY,
    ),
    (
        |e| matches!(e, ProxyError::ResourceExhausted { .. }),
        StatusCode::SERVICE_UNAVAILABLE,
    ),
    (
        |e| matches!(e, ProxyError::ResponseTimeout { .. }),
        StatusCode::GATEWAY_TIMEOUT,
    ),
    (
        |e| {
            matches!(
                e,
                ProxyError::BadRequest {
                    kind: BadRequestKind::HeadersTooLarge,
                    ..
                }
            )
        },
        StatusCode::PAYLOAD_TOO_LARGE,
    ),
    (
        |e| {
            matches!(
                e,
                ProxyError::BadRequest {
                    kind: BadRequestKind::Malformed,
                    ..
                }
            )
        },
        StatusCode::BAD_REQUEST,
    ),
    (
        |e| matches!(e, ProxyError::TransportLost { .. }),
        StatusCode::BAD_GATEWAY,
    ),
];

/// Status for a failure anywhere in the chain, 500 when nothing matches.
pub fn status_for(error: &ProxyError) -> StatusCode {
    status_for_chain(error)
}

pub fn status_for_chain(error: &(dyn Error + 'static)) -> StatusCode {
    let chain: Vec<&ProxyError> = causes(error)
        .filter_map(|e| e.downcast_ref::<ProxyError>())
        .collect();

    RULES
        .iter()
        .find(|(rule, _)| chain.iter().any(|e| rule(e)))
        .map(|(_, status)| *status)
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}
