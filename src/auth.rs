use std::collections::HashMap;

use http::{HeaderMap, header};

use crate::error::{ArenaError, ArenaResult};

/// Maps a request credential to a stable participant identity.
pub trait IdentityProvider: Send + Sync {
    fn identify(&self, credential: &str) -> ArenaResult<String>;
}

/// Identities backed by a fixed token table from configuration.
pub struct StaticTokenAuth {
    tokens: Vec<(Vec<u8>, String)>,
}

impl StaticTokenAuth {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self {
            tokens: tokens
                .into_iter()
                .map(|(token, identity)| (token.into_bytes(), identity))
                .collect(),
        }
    }
}

impl IdentityProvider for StaticTokenAuth {
    fn identify(&self, credential: &str) -> ArenaResult<String> {
        let provided = credential.as_bytes();
        self.tokens
            .iter()
            .find(|(expected, _)| timing_safe_eq(expected, provided))
            .map(|(_, identity)| identity.clone())
            .ok_or(ArenaError::Unauthorized)
    }
}

/// Pulls a credential from `Authorization: Bearer`, the `access_token` cookie, or the
/// `token` query parameter, in that order. Browsers cannot set headers on websocket
/// upgrades, hence the fallbacks.
pub fn extract_credential(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    if let Some(bearer) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return Some(bearer.to_string());
    }

    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == "access_token" && !value.is_empty())
        .map(|(_, value)| value.to_string());
    if from_cookie.is_some() {
        return from_cookie;
    }

    query_token
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

fn timing_safe_eq(a: &[u8], b: &[u8]) -> bool {
    let max = a.len().max(b.len());
    let mut diff = (a.len() != b.len()) as u8;

    for idx in 0..max {
        let av = *a.get(idx).unwrap_or(&0);
        let bv = *b.get(idx).unwrap_or(&0);
        diff |= av ^ bv;
    }

    diff == 0
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use http::{HeaderMap, HeaderValue, header};

    use super::{IdentityProvider, StaticTokenAuth, extract_credential, timing_safe_eq};

    #[test]
    fn resolves_known_tokens_only() {
        let auth = StaticTokenAuth::new(HashMap::from([(
            "secret".to_string(),
            "alice".to_string(),
        )]));
        assert_eq!(auth.identify("secret").unwrap(), "alice");
        assert!(auth.identify("secret2").is_err());
        assert!(auth.identify("").is_err());
    }

    #[test]
    fn credential_sources_in_priority_order() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; access_token=from-cookie"),
        );
        assert_eq!(
            extract_credential(&headers, Some("from-query")).as_deref(),
            Some("from-cookie")
        );

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer from-header"),
        );
        assert_eq!(
            extract_credential(&headers, None).as_deref(),
            Some("from-header")
        );

        assert_eq!(
            extract_credential(&HeaderMap::new(), Some("from-query")).as_deref(),
            Some("from-query")
        );
        assert_eq!(extract_credential(&HeaderMap::new(), None), None);
    }

    #[test]
    fn length_mismatch_is_never_equal() {
        assert!(timing_safe_eq(b"abc", b"abc"));
        assert!(!timing_safe_eq(b"abc", b"abc\0"));
        assert!(!timing_safe_eq(b"", b"a"));
    }
}
