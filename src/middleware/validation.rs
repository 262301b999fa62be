use axum::{
    extract::{Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::config::AppConfig;

/// Size allowed for ordinary JSON bodies.
pub const JSON_BODY_LIMIT: usize = 1024 * 1024;
/// Headroom for multipart boundaries and part headers around an upload.
pub const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Largest body accepted for any request.
pub fn max_body_size(cfg: &AppConfig) -> usize {
    cfg.storage.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD).max(JSON_BODY_LIMIT)
}

/// Rejects path traversal in the URI and oversized `Content-Length` before
/// routing, and flags known scanner user agents.
pub async fn validate_request_middleware(
    State(cfg): State<Arc<AppConfig>>,
    req: Request,
    next: Next,
) -> Response {
    if contains_path_traversal(req.uri().path()) {
        tracing::warn!(path = %sanitize_for_logging(req.uri().path()), "Path traversal rejected");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": {
                    "code": "INVALID_PATH",
                    "message": "Path traversal detected in request",
                },
                "status": 400,
            })),
        )
            .into_response();
    }

    if let Some(ua) = req.headers().get("user-agent").and_then(|v| v.to_str().ok()) {
        if is_suspicious_user_agent(ua) {
            tracing::warn!("Suspicious user agent detected: {}", sanitize_for_logging(ua));
        }
    }

    if matches!(req.method(), &Method::POST | &Method::PUT | &Method::PATCH) {
        let length = req
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        let limit = max_body_size(&cfg);
        if let Some(length) = length.filter(|l| *l > limit) {
            tracing::warn!(length, limit, "Request body too large");
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(json!({
                    "error": {
                        "code": "PAYLOAD_TOO_LARGE",
                        "message": format!("Request body exceeds maximum size of {} bytes", limit),
                    },
                    "status": 413,
                })),
            )
                .into_response();
        }
    }

    next.run(req).await
}

fn contains_path_traversal(path: &str) -> bool {
    let lower = path.to_lowercase();

    if path.contains("/..") || path.contains("\\..") || path.starts_with("..") {
        return true;
    }
    if path.contains("/./") || path.contains("\\.\\") || path.contains("....") {
        return true;
    }

    // Variantes encodées, simples et doubles
    const ENCODED: &[&str] = &[
        "%2e%2e", "%252e%252e", "%2e/", "%252e%2f", "/%2e", "%2f%2e", "%2e\\", "%2e%5c", "%5c%2e", "%5c%5c", "%00",
    ];
    if ENCODED.iter().any(|p| lower.contains(p)) {
        return true;
    }

    path.contains('\0')
}

fn is_suspicious_user_agent(ua: &str) -> bool {
    let ua_lower = ua.to_lowercase();
    ua_lower.contains("scanner")
        || (ua_lower.contains("crawler") && !ua_lower.contains("googlebot") && !ua_lower.contains("bingbot"))
        || ["nikto", "sqlmap", "havij", "acunetix"].iter().any(|t| ua_lower.contains(t))
}

/// Strips control characters and quotes from user-supplied text before logging.
pub fn sanitize_for_logging(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .take(200)
        .collect::<String>()
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\'', "\\\'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_traversal_detection() {
        assert!(contains_path_traversal("../etc/passwd"));
        assert!(contains_path_traversal("/documents/../etc"));
        assert!(contains_path_traversal("/documents/%2e%2e/etc"));
        assert!(contains_path_traversal("/books\0"));

        assert!(!contains_path_traversal("/books/12"));
        assert!(!contains_path_traversal("/documents/3/file"));
        assert!(!contains_path_traversal("/catalog/search"));
    }

    #[test]
    fn test_suspicious_user_agents() {
        assert!(is_suspicious_user_agent("nikto/2.1.5"));
        assert!(is_suspicious_user_agent("sqlmap/1.0"));
        assert!(!is_suspicious_user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64)"));
        assert!(!is_suspicious_user_agent("Googlebot/2.1"));
    }

    #[test]
    fn test_max_body_size() {
        let mut cfg = AppConfig::default();
        cfg.storage.max_upload_bytes = 10;
        assert_eq!(max_body_size(&cfg), JSON_BODY_LIMIT);
        cfg.storage.max_upload_bytes = 50 * 1024 * 1024;
        assert_eq!(max_body_size(&cfg), 50 * 1024 * 1024 + MULTIPART_OVERHEAD);
    }

    #[test]
    fn test_sanitize_for_logging() {
        assert_eq!(sanitize_for_logging("jdupont"), "jdupont");
        let sanitized = sanitize_for_logging("a\x00b\x01c");
        assert!(!sanitized.contains('\x00'));
        assert_eq!(sanitize_for_logging(&"a".repeat(300)).len(), 200);
    }
}
