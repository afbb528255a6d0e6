//! Gateway authentication — single shared-secret token gate

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use tracing::warn;

/// Validate a provided token against the configured secret.
///
/// Returns `false` when no secret is configured, when the provided token is
/// empty, or when they differ.
pub fn validate_token(configured_token: &str, provided_token: &str) -> bool {
    if configured_token.is_empty() {
        warn!("Gateway auth: no token configured, refusing request");
        return false;
    }
    if provided_token.is_empty() {
        warn!("Gateway auth: no token provided");
        return false;
    }
    // Constant-time comparison to prevent timing attacks
    if constant_time_eq(configured_token.as_bytes(), provided_token.as_bytes()) {
        true
    } else {
        warn!("Gateway auth: token mismatch");
        false
    }
}

/// Extract bearer token from an Authorization header value.
///
/// Expects format: `Bearer <token>`
pub fn extract_bearer_token(header_value: &str) -> Option<&str> {
    let trimmed = header_value.trim();
    if let Some(token) = trimmed.strip_prefix("Bearer ") {
        let token = token.trim();
        if token.is_empty() {
            None
        } else {
            Some(token)
        }
    } else {
        None
    }
}

/// Pick the request's token: the bearer header first, then `?token=`
pub fn request_token<'a>(headers: &'a HeaderMap, query_token: Option<&'a str>) -> Option<&'a str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer_token)
        .or(query_token.filter(|t| !t.is_empty()))
}

/// Check a request against the configured secret
pub fn check_auth(configured_token: &str, headers: &HeaderMap, query_token: Option<&str>) -> bool {
    let provided = request_token(headers, query_token).unwrap_or_default();
    validate_token(configured_token, provided)
}

/// Constant-time byte comparison (prevents timing side-channels)
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_token_unconfigured_refuses() {
        assert!(!validate_token("", "anything"));
        assert!(!validate_token("", ""));
    }

    #[test]
    fn test_validate_token_match() {
        assert!(validate_token("secret123", "secret123"));
    }

    #[test]
    fn test_validate_token_mismatch() {
        assert!(!validate_token("secret123", "wrong"));
        assert!(!validate_token("secret123", ""));
        assert!(!validate_token("secret123", "secret1234"));
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token("Bearer abc123"), Some("abc123"));
        assert_eq!(extract_bearer_token("Bearer  spaced "), Some("spaced"));
        assert_eq!(extract_bearer_token("Bearer "), None);
        assert_eq!(extract_bearer_token("Basic abc123"), None);
        assert_eq!(extract_bearer_token(""), None);
    }

    #[test]
    fn test_request_token_prefers_header() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer from-header".parse().unwrap());
        assert_eq!(request_token(&headers, Some("from-query")), Some("from-header"));
    }

    #[test]
    fn test_request_token_falls_back_to_query() {
        let headers = HeaderMap::new();
        assert_eq!(request_token(&headers, Some("from-query")), Some("from-query"));
        assert_eq!(request_token(&headers, Some("")), None);
        assert_eq!(request_token(&headers, None), None);
    }

    #[test]
    fn test_check_auth() {
        let mut headers = HeaderMap::new();
        assert!(!check_auth("secret123", &headers, None));
        assert!(check_auth("secret123", &headers, Some("secret123")));
        headers.insert(AUTHORIZATION, "Bearer wrong".parse().unwrap());
        assert!(!check_auth("secret123", &headers, None));
        assert!(!check_auth("", &headers, Some("")));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"short", b"longer"));
    }
}
