//! Shared-secret origination check
//!
//! Callers identify themselves with the `Tt-I2ap-Id` and `Tt-I2ap-Sec`
//! headers. Both must match the configured client id and secret.

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::config::AuthConfig;
use crate::error::{AppError, INVALID_ORIGINATION};

pub const CLIENT_ID_HEADER: &str = "Tt-I2ap-Id";
pub const CLIENT_SECRET_HEADER: &str = "Tt-I2ap-Sec";

fn header_matches(headers: &HeaderMap, name: &str, expected: &str) -> bool {
    match headers.get(name) {
        Some(value) => bool::from(value.as_bytes().ct_eq(expected.as_bytes())),
        None => false,
    }
}

/// True when both origination headers carry the configured values
pub fn is_valid_origination(headers: &HeaderMap, auth: &AuthConfig) -> bool {
    let id_ok = header_matches(headers, CLIENT_ID_HEADER, &auth.client_id);
    let secret_ok = header_matches(headers, CLIENT_SECRET_HEADER, &auth.client_secret);
    id_ok & secret_ok
}

/// Reject requests without a valid origination
pub async fn require_origination(
    State(auth): State<AuthConfig>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !is_valid_origination(request.headers(), &auth) {
        tracing::warn!(
            path = %request.uri().path(),
            "Rejected request with invalid origination"
        );
        return Err(AppError::Unauthorized(INVALID_ORIGINATION.to_string()));
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn auth() -> AuthConfig {
        AuthConfig {
            client_id: "client".into(),
            client_secret: "s3cret".into(),
        }
    }

    fn headers(id: Option<&str>, secret: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(id) = id {
            headers.insert(CLIENT_ID_HEADER, HeaderValue::from_str(id).unwrap());
        }
        if let Some(secret) = secret {
            headers.insert(CLIENT_SECRET_HEADER, HeaderValue::from_str(secret).unwrap());
        }
        headers
    }

    #[test]
    fn test_matching_headers() {
        assert!(is_valid_origination(&headers(Some("client"), Some("s3cret")), &auth()));
    }

    #[test]
    fn test_mismatch_or_missing_headers() {
        assert!(!is_valid_origination(&headers(Some("client"), Some("wrong")), &auth()));
        assert!(!is_valid_origination(&headers(Some("other"), Some("s3cret")), &auth()));
        assert!(!is_valid_origination(&headers(Some("client"), None), &auth()));
        assert!(!is_valid_origination(&headers(None, None), &auth()));
        assert!(!is_valid_origination(&headers(Some("client"), Some("s3cret-longer")), &auth()));
    }
}
