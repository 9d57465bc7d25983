//! Fallback Resolver for the legacy SSE message path
//!
//! Some older SSE clients do not echo their session id on every message. When
//! the exact lookup misses, the resolver accepts the caller's single open v1
//! SSE session as the target. Zero or several candidates is a failure.

use std::sync::Arc;

use tracing::{info, warn};

use crate::identity::CompositeKey;
use crate::registry::{SessionEntry, SessionRegistry};
use crate::transport::TransportKind;
use crate::version::ApiVersion;

/// Outcome of resolving a message target
#[derive(Debug)]
pub enum Resolution {
    /// The composite key matched directly
    Exact(SessionEntry),
    /// The key missed but the caller had exactly one candidate
    Fallback(SessionEntry),
    /// Nothing usable. `candidates` are the caller's own SSE keys.
    Unresolved { candidates: Vec<CompositeKey> },
}

impl Resolution {
    pub fn entry(&self) -> Option<&SessionEntry> {
        match self {
            Resolution::Exact(entry) | Resolution::Fallback(entry) => Some(entry),
            Resolution::Unresolved { .. } => None,
        }
    }
}

fn is_legacy_sse(entry: &SessionEntry) -> bool {
    entry.version == ApiVersion::V1 && entry.kind() == TransportKind::Sse
}

#[derive(Debug, Clone)]
pub struct FallbackResolver {
    registry: Arc<SessionRegistry>,
}

impl FallbackResolver {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Resolve `key` among v1 SSE sessions. An empty session id in `key`
    /// stands for "not supplied".
    pub fn resolve(&self, key: &CompositeKey) -> Resolution {
        if let Some(entry) = self.registry.lookup(key) {
            if is_legacy_sse(&entry) {
                return Resolution::Exact(entry);
            }
            warn!(
                "Session {} is a {} {:?} session; not eligible for the v1 SSE message path",
                key, entry.version, entry.kind()
            );
        }

        let mut candidates: Vec<SessionEntry> = self
            .registry
            .list_by_version_and_api_key(ApiVersion::V1, key.api_key())
            .into_iter()
            .filter(is_legacy_sse)
            .collect();

        if candidates.len() == 1
            && let Some(entry) = candidates.pop()
        {
            info!("Fallback: routing message for {} to session {}", key, entry.key);
            return Resolution::Fallback(entry);
        }

        warn!(
            "No transport for {}; {} candidate session(s) for this API key",
            key,
            candidates.len()
        );
        Resolution::Unresolved {
            candidates: candidates.into_iter().map(|entry| entry.key).collect(),
        }
    }
}
