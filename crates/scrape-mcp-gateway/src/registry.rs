//! Session Registry
//!
//! Single source of truth mapping composite key to live transport and
//! version. The lock is held only for the map operation itself; callers close
//! transports or await I/O after it has been released.

use std::collections::HashMap;
use std::time::SystemTime;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::identity::CompositeKey;
use crate::transport::{TransportHandle, TransportKind};
use crate::version::ApiVersion;

/// One indexed session
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub key: CompositeKey,
    pub version: ApiVersion,
    pub transport: TransportHandle,
    pub created_at: SystemTime,
}

impl SessionEntry {
    pub fn kind(&self) -> TransportKind {
        self.transport.kind()
    }
}

/// Counts of live sessions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total: usize,
    pub v1_sse: usize,
    pub v1_streamable_http: usize,
    pub v2_sse: usize,
    pub v2_streamable_http: usize,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    entries: RwLock<HashMap<CompositeKey, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unconditionally. An existing entry under the same key is
    /// replaced and returned.
    pub fn register(
        &self,
        key: CompositeKey,
        transport: impl Into<TransportHandle>,
        version: ApiVersion,
    ) -> Option<SessionEntry> {
        let entry = SessionEntry {
            key: key.clone(),
            version,
            transport: transport.into(),
            created_at: SystemTime::now(),
        };
        let previous = self.entries.write().insert(key, entry);
        if let Some(previous) = &previous {
            debug!("Registry entry {} replaced (last writer wins)", previous.key);
        }
        previous
    }

    pub fn lookup(&self, key: &CompositeKey) -> Option<SessionEntry> {
        self.entries.read().get(key).cloned()
    }

    /// Remove `key`. Removing an absent key is a no-op.
    pub fn remove(&self, key: &CompositeKey) -> Option<SessionEntry> {
        self.entries.write().remove(key)
    }

    /// Remove `key` only while it still maps to `transport`, so a stale close
    /// notification cannot evict a newer session registered under the same
    /// key.
    pub fn remove_if_same(&self, key: &CompositeKey, transport: &TransportHandle) -> bool {
        let mut entries = self.entries.write();
        match entries.get(key) {
            Some(entry) if entry.transport.same_transport(transport) => {
                entries.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Entries for `api_key` under `version`, sorted by key
    pub fn list_by_version_and_api_key(
        &self,
        version: ApiVersion,
        api_key: &str,
    ) -> Vec<SessionEntry> {
        let mut found: Vec<SessionEntry> = self
            .entries
            .read()
            .values()
            .filter(|entry| entry.version == version && entry.key.is_owned_by(api_key))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.key.cmp(&b.key));
        found
    }

    /// Snapshot of every entry
    pub fn entries(&self) -> Vec<SessionEntry> {
        self.entries.read().values().cloned().collect()
    }

    /// Remove and return every entry
    pub fn drain(&self) -> Vec<SessionEntry> {
        self.entries.write().drain().map(|(_, entry)| entry).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        let entries = self.entries.read();
        let mut stats = RegistryStats {
            total: entries.len(),
            ..Default::default()
        };
        for entry in entries.values() {
            let slot = match (entry.version, entry.kind()) {
                (ApiVersion::V1, TransportKind::Sse) => &mut stats.v1_sse,
                (ApiVersion::V1, TransportKind::StreamableHttp) => &mut stats.v1_streamable_http,
                (ApiVersion::V2, TransportKind::Sse) => &mut stats.v2_sse,
                (ApiVersion::V2, TransportKind::StreamableHttp) => &mut stats.v2_streamable_http,
            };
            *slot += 1;
        }
        stats
    }
}
