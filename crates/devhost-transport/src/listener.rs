//! TCP listener whose socket can be closed from outside the accept loop.
//!
//! `axum::serve` owns its listener until the graceful-shutdown future fires,
//! which happens on whatever task next polls it. [`ListenerCloser::close`]
//! drops the socket immediately instead, so a connection attempt made after it
//! returns is refused by the OS.

use std::future::poll_fn;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error};

type Slot = Arc<Mutex<Option<TcpListener>>>;

/// Listener handed to `axum::serve`. Once closed, `accept` never resolves.
pub(crate) struct ClosableListener {
    slot: Slot,
    local_addr: SocketAddr,
}

/// Cloneable handle that closes the listening socket.
#[derive(Clone)]
pub struct ListenerCloser {
    slot: Slot,
}

impl ClosableListener {
    pub(crate) fn new(listener: TcpListener, local_addr: SocketAddr) -> (Self, ListenerCloser) {
        let slot = Arc::new(Mutex::new(Some(listener)));
        let closer = ListenerCloser { slot: slot.clone() };
        (Self { slot, local_addr }, closer)
    }
}

impl axum::serve::Listener for ClosableListener {
    type Io = TcpStream;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            // The lock is only held inside a single poll.
            let next = poll_fn(|cx| match self.slot.lock().as_ref() {
                Some(listener) => listener.poll_accept(cx),
                None => Poll::Pending,
            })
            .await;
            match next {
                Ok(conn) => return conn,
                Err(e) => handle_accept_error(e).await,
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

impl ListenerCloser {
    /// Drop the listening socket. Idempotent.
    pub fn close(&self) {
        if self.slot.lock().take().is_some() {
            debug!("Listening socket closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.slot.lock().is_none()
    }

    /// Whether both handles close the same socket.
    pub fn same_listener(&self, other: &ListenerCloser) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl std::fmt::Debug for ListenerCloser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerCloser")
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn handle_accept_error(e: io::Error) {
    if matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    ) {
        return;
    }
    // Typically EMFILE; back off before retrying.
    error!("accept error: {e}");
    tokio::time::sleep(Duration::from_secs(1)).await;
}
