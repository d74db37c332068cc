use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::CorsLayer;

use crate::auth::USER_SUB_HEADER;

/// CORS from `WALKWORTHY_CORS_ORIGINS` (comma-separated, default
/// `http://localhost:3000`). GET and POST only.
pub fn build_cors_layer() -> CorsLayer {
    let configured = std::env::var("WALKWORTHY_CORS_ORIGINS")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "http://localhost:3000".to_string());

    CorsLayer::new()
        .allow_origin(parse_origins(&configured))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("authorization"),
            HeaderName::from_static("content-type"),
            HeaderName::from_static(USER_SUB_HEADER),
        ])
        .max_age(std::time::Duration::from_secs(3600))
}

fn parse_origins(raw: &str) -> Vec<HeaderValue> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origins_are_split_and_blank_entries_dropped() {
        let origins = parse_origins("https://app.walkworthy.example, ,http://localhost:5173");
        assert_eq!(origins.len(), 2);
        assert_eq!(origins[1], "http://localhost:5173");
    }
}
