//! Security gate for the webhook ingress: shared-secret header and
//! source-IP allowlist checks.
//!
//! A failed check is the one case where the provider's blind retry behavior
//! is acceptable - a persistent 401 needs operator attention, not silence.

use axum::http::HeaderMap;
use subtle::ConstantTimeEq;

/// Header the provider sends the shared secret in.
pub const TOKEN_HEADER: &str = "x-webhook-token";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    MissingToken,
    InvalidToken,
    IpNotAllowed,
}

/// Check the configured gates. Both are optional: a None token disables the
/// secret check, an empty allowlist disables the IP check.
pub fn authorize(
    headers: &HeaderMap,
    expected_token: Option<&str>,
    ip_allowlist: &[String],
) -> Result<(), Denial> {
    if let Some(expected) = expected_token {
        match headers.get(TOKEN_HEADER).and_then(|v| v.to_str().ok()) {
            None => return Err(Denial::MissingToken),
            Some(provided) => {
                if !token_matches(expected, provided) {
                    return Err(Denial::InvalidToken);
                }
            }
        }
    }

    if !ip_allowlist.is_empty() {
        match client_ip(headers) {
            Some(ip) if ip_allowlist.iter().any(|allowed| allowed == &ip) => {}
            _ => return Err(Denial::IpNotAllowed),
        }
    }

    Ok(())
}

fn token_matches(expected: &str, provided: &str) -> bool {
    let expected = expected.as_bytes();
    let provided = provided.as_bytes();
    // Length check is not constant-time, but the length is not secret.
    if expected.len() != provided.len() {
        return false;
    }
    expected.ct_eq(provided).into()
}

/// Extract the client IP: first hop of `x-forwarded-for` (the service sits
/// behind a proxy), then `x-real-ip`.
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        })
}
