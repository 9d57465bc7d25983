//! Lifecycle Controller
//!
//! Session teardown in one place: per-session close tracking, idle expiry of
//! Streamable-HTTP sessions, and process-wide shutdown. Shutdown is
//! drain-and-exit; in-flight requests are not awaited.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::identity::CompositeKey;
use crate::registry::{RegistryStats, SessionRegistry};
use crate::transport::TransportHandle;

/// Remove `key` from the registry once `transport` closes, however the close
/// was triggered. A newer transport registered under the same key is left
/// alone.
pub(crate) fn watch_close(registry: Arc<SessionRegistry>, key: CompositeKey, transport: TransportHandle) {
    let closed = transport.as_transport().close_token();
    tokio::spawn(async move {
        closed.cancelled().await;
        if registry.remove_if_same(&key, &transport) {
            info!("Session {} closed and removed", key);
        } else {
            debug!("Session {} closed; entry already gone", key);
        }
    });
}

/// A session registered while its `initialize` answer is still being
/// produced. Dropping it before [`PendingAnswer::answered`] (request timed out,
/// client went away) removes the entry and closes the transport, since the
/// client never learned the session id.
pub(crate) struct PendingAnswer {
    registry: Arc<SessionRegistry>,
    key: CompositeKey,
    transport: Option<TransportHandle>,
}

impl PendingAnswer {
    pub(crate) fn new(registry: Arc<SessionRegistry>, key: CompositeKey, transport: TransportHandle) -> Self {
        Self {
            registry,
            key,
            transport: Some(transport),
        }
    }

    pub(crate) fn answered(mut self) {
        self.transport = None;
    }
}

impl Drop for PendingAnswer {
    fn drop(&mut self) {
        let Some(transport) = self.transport.take() else {
            return;
        };
        warn!("Initialize for session {} was abandoned; discarding it", self.key);
        self.registry.remove_if_same(&self.key, &transport);
        if let Err(err) = transport.close() {
            debug!("Abandoned session {} already closed: {}", self.key, err);
        }
    }
}

/// Result of a shutdown pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub closed: usize,
    pub failed: usize,
    pub stats: RegistryStats,
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    registry: Arc<SessionRegistry>,
    shutdown: CancellationToken,
}

impl Lifecycle {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            shutdown: CancellationToken::new(),
        }
    }

    /// Fires once [`Lifecycle::shutdown`] has run
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Close every tracked session and clear the registry. A failing close is
    /// logged and skipped.
    pub fn shutdown(&self) -> ShutdownReport {
        self.shutdown.cancel();

        let stats = self.registry.stats();
        let entries = self.registry.drain();
        info!("Shutting down: closing {} session(s)", entries.len());

        let mut report = ShutdownReport {
            stats,
            ..Default::default()
        };
        for entry in entries {
            match entry.transport.close() {
                Ok(()) => {
                    debug!("Closed session {}", entry.key);
                    report.closed += 1;
                }
                Err(err) => {
                    warn!("Error closing session {}: {}", entry.key, err);
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Close Streamable-HTTP sessions idle for longer than `max_idle`.
    /// Returns how many were closed; their registry entries go away through
    /// the normal close path.
    pub fn expire_idle(&self, max_idle: Duration) -> usize {
        let mut expired = 0;
        for entry in self.registry.entries() {
            let Some(transport) = entry.transport.as_streamable() else {
                continue;
            };
            if transport.idle_for() > max_idle && entry.transport.close().is_ok() {
                debug!("Expired idle session {}", entry.key);
                expired += 1;
            }
        }
        expired
    }

    /// Periodically expire idle sessions until shutdown
    pub fn start_idle_sweeper(
        &self,
        max_idle: Duration,
        period: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let lifecycle = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = lifecycle.shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let expired = lifecycle.expire_idle(max_idle);
                        if expired > 0 {
                            info!("Expired {} idle session(s)", expired);
                        }
                    }
                }
            }
        })
    }
}
