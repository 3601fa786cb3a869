//! Shared-secret gate.
//!
//! The key may arrive in the `x-api-key` header, the `key` query parameter,
//! or the `Authorization` header (with or without a `Bearer ` prefix),
//! checked in that order. Empty values count as absent.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use serde::Deserialize;
use subtle::ConstantTimeEq;

use crate::error::ApiError;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Query string carrying an optional `key` parameter.
#[derive(Debug, Default, Deserialize)]
pub struct CredentialQuery {
    pub key: Option<String>,
}

/// Result of checking a request against the configured key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCheck {
    /// No key configured.
    Open,
    Accepted,
    Missing,
    Mismatch,
}

/// The credential a request presents, before any prefix stripping.
pub fn presented_key<'a>(headers: &'a HeaderMap, query_key: Option<&'a str>) -> Option<&'a str> {
    header_value(headers, API_KEY_HEADER)
        .or(query_key.filter(|k| !k.is_empty()))
        .or_else(|| header_value(headers, AUTHORIZATION.as_str()))
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

pub fn check_api_key(
    expected: Option<&str>,
    headers: &HeaderMap,
    query_key: Option<&str>,
) -> KeyCheck {
    let Some(expected) = expected else {
        return KeyCheck::Open;
    };
    let Some(raw) = presented_key(headers, query_key) else {
        return KeyCheck::Missing;
    };
    let candidate = raw.strip_prefix("Bearer ").unwrap_or(raw);
    if bool::from(candidate.as_bytes().ct_eq(expected.as_bytes())) {
        KeyCheck::Accepted
    } else {
        KeyCheck::Mismatch
    }
}

/// `/control` gate: 401 when absent, 403 when wrong.
pub fn require_api_key(
    expected: Option<&str>,
    headers: &HeaderMap,
    query_key: Option<&str>,
) -> Result<(), ApiError> {
    match check_api_key(expected, headers, query_key) {
        KeyCheck::Open | KeyCheck::Accepted => Ok(()),
        KeyCheck::Missing => Err(ApiError::MissingApiKey),
        KeyCheck::Mismatch => Err(ApiError::InvalidApiKey),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn no_configured_key_is_open() {
        assert_eq!(check_api_key(None, &HeaderMap::new(), None), KeyCheck::Open);
    }

    #[test]
    fn header_query_and_authorization_are_accepted() {
        let key = Some("s3cret");
        assert_eq!(
            check_api_key(key, &headers(&[("x-api-key", "s3cret")]), None),
            KeyCheck::Accepted
        );
        assert_eq!(check_api_key(key, &HeaderMap::new(), Some("s3cret")), KeyCheck::Accepted);
        assert_eq!(
            check_api_key(key, &headers(&[("authorization", "Bearer s3cret")]), None),
            KeyCheck::Accepted
        );
        assert_eq!(
            check_api_key(key, &headers(&[("authorization", "s3cret")]), None),
            KeyCheck::Accepted
        );
    }

    #[test]
    fn header_takes_precedence_over_query() {
        let found = check_api_key(
            Some("s3cret"),
            &headers(&[("x-api-key", "wrong")]),
            Some("s3cret"),
        );
        assert_eq!(found, KeyCheck::Mismatch);
    }

    #[test]
    fn empty_header_falls_through_to_query() {
        let found = check_api_key(Some("s3cret"), &headers(&[("x-api-key", "")]), Some("s3cret"));
        assert_eq!(found, KeyCheck::Accepted);
    }

    #[test]
    fn missing_and_wrong_keys_map_to_distinct_errors() {
        assert_eq!(
            require_api_key(Some("k"), &HeaderMap::new(), None),
            Err(ApiError::MissingApiKey)
        );
        assert_eq!(
            require_api_key(Some("k"), &HeaderMap::new(), Some("nope")),
            Err(ApiError::InvalidApiKey)
        );
        assert_eq!(require_api_key(None, &HeaderMap::new(), Some("anything")), Ok(()));
    }
}
