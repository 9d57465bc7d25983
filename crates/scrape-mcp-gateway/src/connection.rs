//! Per-connection activity tracking
//!
//! hyper's HTTP/1 builder can only switch keep-alive on or off. The idle
//! limit is enforced here: a connection with no request in flight and no
//! bytes moving for the configured time is shut down gracefully.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Instant;

#[derive(Debug)]
struct ActivityState {
    last_active: Mutex<Instant>,
    in_flight: AtomicUsize,
}

/// Shared clock for one connection, updated by its I/O and its requests
#[derive(Debug, Clone)]
pub(crate) struct Activity {
    state: Arc<ActivityState>,
}

impl Activity {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(ActivityState {
                last_active: Mutex::new(Instant::now()),
                in_flight: AtomicUsize::new(0),
            }),
        }
    }

    pub(crate) fn touch(&self) {
        *self.state.last_active.lock() = Instant::now();
    }

    /// Mark a request as in flight until the guard drops
    pub(crate) fn busy(&self) -> BusyGuard {
        self.state.in_flight.fetch_add(1, Ordering::SeqCst);
        self.touch();
        BusyGuard {
            activity: self.clone(),
        }
    }

    pub(crate) fn is_idle_for(&self, limit: Duration) -> bool {
        self.state.in_flight.load(Ordering::SeqCst) == 0
            && self.state.last_active.lock().elapsed() >= limit
    }

    /// Earliest instant at which the connection could have been idle for
    /// `limit`
    pub(crate) fn next_check(&self, limit: Duration) -> Instant {
        if self.state.in_flight.load(Ordering::SeqCst) > 0 {
            Instant::now() + limit
        } else {
            *self.state.last_active.lock() + limit
        }
    }

    pub(crate) fn track<T>(&self, io: T) -> Tracked<T> {
        Tracked {
            inner: io,
            activity: self.clone(),
        }
    }
}

pub(crate) struct BusyGuard {
    activity: Activity,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.activity.touch();
        self.activity.state.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// I/O wrapper that records every read or written byte as activity
pub(crate) struct Tracked<T> {
    inner: T,
    activity: Activity,
}

impl<T: AsyncRead + Unpin> AsyncRead for Tracked<T> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if matches!(poll, Poll::Ready(Ok(()))) && buf.filled().len() > before {
            self.activity.touch();
        }
        poll
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for Tracked<T> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let poll = Pin::new(&mut self.inner).poll_write(cx, buf);
        if matches!(poll, Poll::Ready(Ok(n)) if n > 0) {
            self.activity.touch();
        }
        poll
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let poll = Pin::new(&mut self.inner).poll_write_vectored(cx, bufs);
        if matches!(poll, Poll::Ready(Ok(n)) if n > 0) {
            self.activity.touch();
        }
        poll
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
