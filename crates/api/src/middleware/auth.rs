use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use walletd_auth::TokenVerifier;

use crate::app::errors::json_error;
use crate::context::PrincipalContext;

#[derive(Clone)]
pub struct AuthState {
    pub tokens: Arc<dyn TokenVerifier>,
}

pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Response {
    let token = match extract_bearer(req.headers()) {
        Ok(token) => token,
        Err(message) => return unauthorized(message),
    };

    let claims = match state.tokens.verify(token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::debug!(error = %e, "token rejected");
            return unauthorized("invalid token");
        }
    };

    let subject = claims.sub.trim();
    if subject.is_empty() {
        return unauthorized("invalid token");
    }

    req.extensions_mut().insert(PrincipalContext::new(subject));
    next.run(req).await
}

fn unauthorized(message: &'static str) -> Response {
    json_error(StatusCode::UNAUTHORIZED, "unauthorized", message)
}

/// `Authorization: Bearer <token>`, scheme matched case-insensitively.
fn extract_bearer(headers: &HeaderMap) -> Result<&str, &'static str> {
    const MALFORMED: &str = "missing or invalid authorization header";

    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(MALFORMED)?;

    let (scheme, token) = header.trim().split_once(' ').unwrap_or((header.trim(), ""));
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(MALFORMED);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err("missing bearer token");
    }

    Ok(token)
}

#[cfg(test)]
mod tests {
    use axum::http::{header::AUTHORIZATION, HeaderValue};

    use super::*;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        assert_eq!(extract_bearer(&headers("Bearer abc")), Ok("abc"));
        assert_eq!(extract_bearer(&headers("bearer abc")), Ok("abc"));
        assert_eq!(extract_bearer(&headers("BEARER  abc ")), Ok("abc"));
    }

    #[test]
    fn malformed_headers_are_rejected() {
        assert_eq!(
            extract_bearer(&HeaderMap::new()),
            Err("missing or invalid authorization header")
        );
        assert_eq!(
            extract_bearer(&headers("Basic dXNlcjpwYXNz")),
            Err("missing or invalid authorization header")
        );
        assert_eq!(extract_bearer(&headers("Bearer")), Err("missing bearer token"));
        assert_eq!(extract_bearer(&headers("Bearer   ")), Err("missing bearer token"));
    }
}
