//! Caller identity extraction
//!
//! The API key comes from the route path; the session id from (in priority
//! order) the `sessionId` query parameter, the `mcp-session-id` header, then
//! the `x-mcp-session-id` header.

use std::fmt;

use hyper::HeaderMap;
use serde::Serialize;

/// Separator between API key and session id in the rendered composite key
pub const KEY_SEPARATOR: char = '-';

/// Query parameter carrying the session id
pub const SESSION_QUERY_PARAM: &str = "sessionId";

/// Primary session header
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Secondary session header accepted from older clients
pub const ALT_SESSION_HEADER: &str = "x-mcp-session-id";

/// Registry key: API key plus session id.
///
/// Equality and hashing use both parts structurally, so two API keys that are
/// handed the same session id never collide, and an API key that itself
/// contains the separator cannot alias another key's sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompositeKey {
    api_key: String,
    session_id: String,
}

impl CompositeKey {
    pub fn new(api_key: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            session_id: session_id.into(),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Whether this key belongs to `api_key`
    pub fn is_owned_by(&self, api_key: &str) -> bool {
        self.api_key == api_key
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.api_key, KEY_SEPARATOR, self.session_id)
    }
}

impl Serialize for CompositeKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

/// Where a candidate session id was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionIdSource {
    Query,
    Header,
    AltHeader,
}

/// `sessionId` from a raw query string
pub fn session_id_from_query(query: Option<&str>) -> Option<String> {
    let query = query?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(name, _)| name == SESSION_QUERY_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Resolve the candidate session id using query, then primary header, then
/// secondary header.
pub fn extract_session_id(
    query: Option<&str>,
    headers: &HeaderMap,
) -> Option<(String, SessionIdSource)> {
    if let Some(id) = session_id_from_query(query) {
        return Some((id, SessionIdSource::Query));
    }
    if let Some(id) = header_value(headers, SESSION_HEADER) {
        return Some((id, SessionIdSource::Header));
    }
    header_value(headers, ALT_SESSION_HEADER).map(|id| (id, SessionIdSource::AltHeader))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_composite_key_rendering() {
        let key = CompositeKey::new("abc123", "s-1");
        assert_eq!(key.to_string(), "abc123-s-1");
        assert_eq!(serde_json::to_value(&key).unwrap(), "abc123-s-1");
    }

    #[test]
    fn test_same_session_id_under_two_keys_does_not_collide() {
        let mut keys = HashSet::new();
        keys.insert(CompositeKey::new("alice", "same"));
        keys.insert(CompositeKey::new("bob", "same"));
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_separator_in_api_key_does_not_alias() {
        // "a-b" + "c" and "a" + "b-c" render identically but are distinct keys
        let left = CompositeKey::new("a-b", "c");
        let right = CompositeKey::new("a", "b-c");
        assert_eq!(left.to_string(), right.to_string());
        assert_ne!(left, right);
        assert!(!right.is_owned_by("a-b"));
    }

    #[test]
    fn test_query_takes_priority() {
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_HEADER, "from-header".parse().unwrap());
        headers.insert(ALT_SESSION_HEADER, "from-alt".parse().unwrap());

        assert_eq!(
            extract_session_id(Some("sessionId=from-query"), &headers),
            Some(("from-query".to_string(), SessionIdSource::Query))
        );
        assert_eq!(
            extract_session_id(Some("other=1"), &headers),
            Some(("from-header".to_string(), SessionIdSource::Header))
        );

        headers.remove(SESSION_HEADER);
        assert_eq!(
            extract_session_id(None, &headers),
            Some(("from-alt".to_string(), SessionIdSource::AltHeader))
        );
    }

    #[test]
    fn test_empty_values_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_HEADER, "".parse().unwrap());
        assert_eq!(extract_session_id(Some("sessionId="), &headers), None);
    }

    #[test]
    fn test_query_value_is_percent_decoded() {
        assert_eq!(
            session_id_from_query(Some("sessionId=a%20b&x=1")),
            Some("a b".to_string())
        );
    }
}
