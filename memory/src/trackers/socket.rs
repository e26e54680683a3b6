use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use host::{DuplexSocket, HostError, Page, ReadyState, SocketConnector};
use scheduler::Timestamp;
use tracing::debug;

use crate::tracker::{ResourceTracker, SweepContext, SweepError};
use crate::ResourceKind;

/// The live list is pruned of closed entries once it grows past this.
const PRUNE_THRESHOLD: usize = 20;

struct TrackedSocket {
    socket: Box<dyn DuplexSocket>,
    url: String,
    opened_at: Timestamp,
    closed: bool,
}

impl TrackedSocket {
    fn ready_state(&self) -> ReadyState {
        if self.closed {
            ReadyState::Closed
        } else {
            self.socket.ready_state()
        }
    }

    fn close(&mut self) -> Result<(), HostError> {
        if self.closed {
            return Ok(());
        }
        self.socket.close()?;
        self.closed = true;
        Ok(())
    }
}

/// Socket handed to application code by [`SocketTracker::open`].
///
/// Cloning shares the same underlying socket.
#[derive(Clone)]
pub struct SocketHandle {
    inner: Rc<RefCell<TrackedSocket>>,
}

impl SocketHandle {
    pub fn url(&self) -> String {
        self.inner.borrow().url.clone()
    }

    pub fn opened_at(&self) -> Timestamp {
        self.inner.borrow().opened_at
    }

    pub fn ready_state(&self) -> ReadyState {
        self.inner.borrow().ready_state()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.borrow().closed
    }

    /// Closes the socket and marks it closed in the tracker.
    pub fn close(&self) -> Result<(), HostError> {
        self.inner.borrow_mut().close()
    }
}

impl fmt::Debug for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("SocketHandle")
            .field("url", &inner.url)
            .field("opened_at", &inner.opened_at)
            .field("closed", &inner.closed)
            .finish()
    }
}

/// Registry of every duplex socket opened through the governor.
pub struct SocketTracker {
    connector: Box<dyn SocketConnector>,
    live: Vec<Rc<RefCell<TrackedSocket>>>,
}

impl SocketTracker {
    pub fn new(connector: Box<dyn SocketConnector>) -> Self {
        Self {
            connector,
            live: Vec::new(),
        }
    }

    /// Opens a socket and registers it. The host's refusal is returned
    /// unchanged.
    pub fn open(
        &mut self,
        url: &str,
        protocols: &[String],
        now: Timestamp,
    ) -> Result<SocketHandle, HostError> {
        let socket = self.connector.connect(url, protocols)?;
        let inner = Rc::new(RefCell::new(TrackedSocket {
            socket,
            url: url.to_string(),
            opened_at: now,
            closed: false,
        }));
        self.live.push(inner.clone());
        if self.live.len() > PRUNE_THRESHOLD {
            self.prune();
        }
        Ok(SocketHandle { inner })
    }

    /// Sockets still connecting or open.
    pub fn active_count(&self) -> usize {
        self.live
            .iter()
            .filter(|socket| {
                matches!(
                    socket.borrow().ready_state(),
                    ReadyState::Connecting | ReadyState::Open
                )
            })
            .count()
    }

    /// Length of the live list, including entries not yet pruned.
    pub fn tracked_len(&self) -> usize {
        self.live.len()
    }

    fn prune(&mut self) {
        self.live.retain(|socket| !socket.borrow().closed);
    }
}

impl ResourceTracker for SocketTracker {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Socket
    }

    /// Force-closes open sockets older than the tier's max age, or every
    /// open socket while the page is hidden.
    fn sweep(&mut self, _page: &mut dyn Page, ctx: &SweepContext) -> Result<usize, SweepError> {
        let max_age = ctx.tier.socket_max_age();
        let mut closed = 0;
        let mut failure = None;

        for entry in &self.live {
            let mut socket = entry.borrow_mut();
            if socket.closed {
                continue;
            }
            let state = socket.socket.ready_state();
            match state {
                ReadyState::Closed => {
                    socket.closed = true;
                }
                ReadyState::Open => {
                    let stale = ctx.now.saturating_since(socket.opened_at) > max_age;
                    if ctx.hidden || stale {
                        match socket.close() {
                            Ok(()) => closed += 1,
                            Err(err) => {
                                debug!(url = %socket.url, error = %err, "socket refused to close");
                                failure.get_or_insert(err);
                            }
                        }
                    }
                }
                ReadyState::Connecting | ReadyState::Closing => {}
            }
        }

        self.prune();
        if closed > 0 {
            debug!(closed, hidden = ctx.hidden, "closed stale sockets");
        }
        match failure {
            Some(err) if closed == 0 => Err(err.into()),
            _ => Ok(closed),
        }
    }

    fn tracked(&self) -> usize {
        self.live.len()
    }
}

impl fmt::Debug for SocketTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketTracker")
            .field("live", &self.live.len())
            .finish_non_exhaustive()
    }
}
