// CORS for the relay's HTTP surface and the WebSocket upgrade.
//
// Origins come from `COWATCH_RELAY_CORS_ORIGINS` (comma-separated, `*` for
// any). Without it, browser clients served from local dev servers are allowed.

use std::time::Duration;

use axum::http::{header, HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

const DEFAULT_DEV_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://localhost:5173",
    "http://127.0.0.1:3000",
    "http://127.0.0.1:5173",
];

/// Builds the CORS layer for the configured origin list.
///
/// Credentials are allowed for explicit origins only; a wildcard origin
/// disables them.
pub fn cors_layer(origins: Option<&str>) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-request-id"),
        ])
        .expose_headers([HeaderName::from_static("x-request-id")])
        .max_age(Duration::from_secs(3600));

    match origins.map(str::trim) {
        Some("*") => base.allow_origin(AllowOrigin::any()),
        Some(list) => base.allow_origin(parse_origins(list)).allow_credentials(true),
        None => base
            .allow_origin(parse_origins(&DEFAULT_DEV_ORIGINS.join(",")))
            .allow_credentials(true),
    }
}

fn parse_origins(comma_separated: &str) -> Vec<HeaderValue> {
    comma_separated
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect()
}
