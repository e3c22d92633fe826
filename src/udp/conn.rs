use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::Instant;

use log::debug;

use super::ListenerInner;
use crate::Error;

/// One side of a pseudo-connection to a single remote address, multiplexed
/// over the listener's shared socket.
///
/// Reads rendezvous with the listener's dispatch loop and return exactly one
/// inbound datagram each. Writes go straight to the socket. Clones share the
/// same underlying connection.
#[derive(Clone)]
pub struct Conn {
    inner: Arc<ConnInner>,
}

impl Conn {
    pub(super) fn from_inner(inner: Arc<ConnInner>) -> Conn {
        Conn { inner }
    }

    /// Receive the next datagram from this remote.
    ///
    /// Blocks until the dispatch loop hands one over, copies up to
    /// `buf.len()` bytes and returns the copied length. Excess bytes of a
    /// larger datagram are discarded. Fails with [`Error::Eof`] once the
    /// connection is closed; the buffer is never touched in that case, even
    /// when a datagram was already waiting.
    pub fn recv(&self, buf: &mut [u8]) -> Result<usize, Error> {
        self.inner.handoff.recv(buf)
    }

    /// Send one datagram to this remote.
    ///
    /// Goes directly to the shared socket, so it cannot be blocked by other
    /// connections' traffic. Fails with [`Error::Eof`] after close.
    pub fn send(&self, buf: &[u8]) -> Result<usize, Error> {
        self.inner.send(buf)
    }

    /// Close the connection.
    ///
    /// Unblocks any pending read with EOF and deregisters from the
    /// listener, after which a datagram from the same remote address is
    /// treated as a brand-new connection. Idempotent, and safe to call
    /// while a read or a dispatch delivery is in flight.
    pub fn close(&self) -> Result<(), Error> {
        self.inner.close()
    }

    /// The remote address this connection receives from and sends to.
    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.remote_addr()
    }

    /// Local address of the listener's socket, or `None` once closed.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr()
    }

    /// Accepted for interface compatibility; deadlines are not implemented
    /// and reads/writes block indefinitely.
    pub fn set_deadline(&self, _deadline: Option<Instant>) -> Result<(), Error> {
        Ok(())
    }

    /// Accepted for interface compatibility; see [`Conn::set_deadline`].
    pub fn set_read_deadline(&self, _deadline: Option<Instant>) -> Result<(), Error> {
        Ok(())
    }

    /// Accepted for interface compatibility; see [`Conn::set_deadline`].
    pub fn set_write_deadline(&self, _deadline: Option<Instant>) -> Result<(), Error> {
        Ok(())
    }
}

impl io::Read for &Conn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.recv(buf) {
            Ok(n) => Ok(n),
            Err(Error::Eof) => Ok(0),
            Err(Error::Io(e)) => Err(e),
            Err(e) => Err(io::Error::other(e.to_string())),
        }
    }
}

impl io::Read for Conn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (&*self).read(buf)
    }
}

impl io::Write for &Conn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.send(buf) {
            Ok(n) => Ok(n),
            Err(Error::Eof) => Err(io::ErrorKind::NotConnected.into()),
            Err(Error::Io(e)) => Err(e),
            Err(e) => Err(io::Error::other(e.to_string())),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Write for Conn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&*self).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub(super) struct ConnInner {
    remote: SocketAddr,

    /// Non-owning handle to the listener. `None` once closed, which is the
    /// close-once guard: whoever takes it runs the close sequence.
    owner: Mutex<Option<Weak<ListenerInner>>>,

    handoff: Handoff,
}

impl ConnInner {
    pub(super) fn new(remote: SocketAddr, owner: Weak<ListenerInner>) -> ConnInner {
        ConnInner {
            remote,
            owner: Mutex::new(Some(owner)),
            handoff: Handoff::new(),
        }
    }

    pub(super) fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// Called by the dispatch loop. Blocks until a reader consumes the
    /// datagram or the connection closes; returns false when it was dropped
    /// because the connection closed first.
    pub(super) fn deliver(&self, datagram: &[u8]) -> bool {
        self.handoff.deliver(datagram)
    }

    /// Fail pending and future reads with EOF without deregistering. Used
    /// when the listener force-closes the socket out from under us.
    pub(super) fn shutdown_read(&self) {
        self.handoff.close();
    }

    fn send(&self, buf: &[u8]) -> Result<usize, Error> {
        let listener = {
            let owner = self.owner.lock().unwrap();
            owner.as_ref().and_then(Weak::upgrade)
        };

        let Some(listener) = listener else {
            return Err(Error::Eof);
        };

        // The listener may have force-closed the socket out from under us.
        let Some(socket) = listener.socket() else {
            return Err(Error::Eof);
        };

        Ok(socket.send_to(buf, self.remote)?)
    }

    fn close(&self) -> Result<(), Error> {
        let owner = {
            let mut owner = self.owner.lock().unwrap();
            match owner.take() {
                Some(owner) => owner,
                // Already closed.
                None => return Ok(()),
            }
        };

        self.handoff.close();

        if let Some(listener) = owner.upgrade() {
            listener.remove_conn(&self.remote);
        }

        debug!("Closed connection {}", self.remote);
        Ok(())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        let listener = {
            let owner = self.owner.lock().unwrap();
            owner.as_ref().and_then(Weak::upgrade)
        }?;

        listener.socket()?.local_addr().ok()
    }
}

/// Single-slot rendezvous between the dispatch loop and readers.
///
/// The closed flag lives under the same lock as the slot so a close always
/// wins the race against a stalled delivery or a concurrent read.
struct Handoff {
    state: Mutex<HandoffState>,
    cond: Condvar,
}

struct HandoffState {
    datagram: Option<Vec<u8>>,
    closed: bool,
}

impl Handoff {
    fn new() -> Handoff {
        Handoff {
            state: Mutex::new(HandoffState {
                datagram: None,
                closed: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Park the datagram in the slot and wait until a reader consumes it.
    /// Returns false when the connection closed before a reader showed up.
    fn deliver(&self, payload: &[u8]) -> bool {
        let mut state = self.state.lock().unwrap();

        if state.closed {
            return false;
        }

        // The single dispatch thread is the only caller and it blocks until
        // the slot drains, so the slot is always empty here.
        state.datagram = Some(payload.to_vec());
        self.cond.notify_all();

        while state.datagram.is_some() && !state.closed {
            state = self.cond.wait(state).unwrap();
        }

        // An empty slot means a reader consumed the datagram; otherwise
        // closed fired first and the datagram is lost.
        state.datagram.take().is_none()
    }

    fn recv(&self, buf: &mut [u8]) -> Result<usize, Error> {
        let mut state = self.state.lock().unwrap();
        loop {
            // Closed wins over a parked datagram: read-after-close is
            // deterministically EOF.
            if state.closed {
                return Err(Error::Eof);
            }

            if let Some(datagram) = state.datagram.take() {
                let n = datagram.len().min(buf.len());
                buf[..n].copy_from_slice(&datagram[..n]);
                self.cond.notify_all();
                return Ok(n);
            }

            state = self.cond.wait(state).unwrap();
        }
    }

    fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        self.cond.notify_all();
    }
}
