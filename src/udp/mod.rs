//! Connection multiplexer over a single UDP socket.
//!
//! A [`Listener`] owns one UDP socket and fans incoming datagrams out to one
//! [`Conn`] per remote address. New remotes are discovered from inbound
//! traffic and handed to [`Listener::accept`]. Writes go straight to the
//! socket; all reads from the socket happen on a single dispatch thread.

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::Error;

mod conn;
pub use conn::Conn;
use conn::ConnInner;

/// Largest datagram the dispatch loop will receive. Anything bigger is
/// truncated by the OS.
const RECEIVE_MTU: usize = 8192;

/// Poll interval while a graceful close waits for connections to drain.
const CLOSE_RECHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Read timeout on the socket. std offers no way to interrupt a blocked
/// `recv_from` from another thread, so an idle dispatch loop notices the
/// socket has been released at most this long after close.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A connection-oriented listener over a single UDP socket.
///
/// Dropping the listener force-closes it with no grace period; call
/// [`Listener::close`] for a graceful shutdown.
pub struct Listener {
    inner: Arc<ListenerInner>,
}

impl Listener {
    /// Bind a UDP socket and start dispatching.
    ///
    /// The dispatch thread starts immediately; connections are discovered
    /// as soon as datagrams arrive, whether or not anyone is accepting yet.
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Listener, Error> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(SHUTDOWN_POLL_INTERVAL))?;

        let inner = Arc::new(ListenerInner {
            socket: Mutex::new(Some(Arc::new(socket))),
            close_started: AtomicBool::new(false),
            registry: Mutex::new(Registry {
                accepting: true,
                conns: HashMap::new(),
            }),
            accept_queue: AcceptQueue::new(),
        });

        let dispatch = Arc::clone(&inner);
        thread::Builder::new()
            .name("udp-dispatch".into())
            .spawn(move || dispatch.dispatch_loop())?;

        Ok(Listener { inner })
    }

    /// Wait for the next connection.
    ///
    /// Blocks until the dispatch loop discovers a new remote address, or
    /// fails with [`Error::ListenerClosed`] once [`Listener::close`] has
    /// been called. Every connection returned here must eventually be read
    /// from or closed, otherwise the dispatch loop stalls on it.
    pub fn accept(&self) -> Result<Conn, Error> {
        let inner = self.inner.accept_queue.take()?;
        Ok(Conn::from_inner(inner))
    }

    /// Shut the listener down, waiting up to `timeout` for open connections
    /// to close themselves.
    ///
    /// Accepting stops immediately and pending `accept` calls fail. If the
    /// registry is already empty the socket is released at once; otherwise
    /// the registry is polled until it drains or the timeout expires, at
    /// which point the socket is released regardless and reads and writes
    /// on the remaining connections fail.
    ///
    /// Idempotent: subsequent calls return `Ok` without waiting.
    pub fn close(&self, timeout: Duration) -> Result<(), Error> {
        self.inner.close(timeout)
    }

    /// Local address of the shared socket. Fails once the listener has
    /// been closed and the socket released.
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        let socket = self.inner.socket().ok_or(Error::ListenerClosed)?;
        Ok(socket.local_addr()?)
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let _ = self.inner.close(Duration::ZERO);
    }
}

struct Registry {
    /// False once shutdown has begun. Datagrams from unknown remotes are
    /// silently dropped while false.
    accepting: bool,

    /// All connections not yet closed, keyed by remote address.
    conns: HashMap<SocketAddr, Arc<ConnInner>>,
}

struct ListenerInner {
    /// The shared socket. `None` once released (end of graceful or forced
    /// close); the dispatch loop and senders clone the `Arc` per operation
    /// so the fd is freed as soon as the last in-flight operation ends.
    socket: Mutex<Option<Arc<UdpSocket>>>,

    /// Guard so only the first close() runs the shutdown sequence.
    close_started: AtomicBool,

    registry: Mutex<Registry>,

    accept_queue: AcceptQueue,
}

impl ListenerInner {
    /// Clone of the shared socket, or `None` once it has been released.
    fn socket(&self) -> Option<Arc<UdpSocket>> {
        self.socket.lock().unwrap().clone()
    }

    fn close(&self, timeout: Duration) -> Result<(), Error> {
        if self.close_started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        debug!("Listener shutting down");

        self.registry.lock().unwrap().accepting = false;
        self.accept_queue.close();

        // Graceful phase: wait for connections to close themselves, up to
        // the timeout. The dispatch loop keeps serving existing connections
        // during this window.
        let deadline = Instant::now() + timeout;
        loop {
            if self.registry.lock().unwrap().conns.is_empty() {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(CLOSE_RECHECK_INTERVAL.min(deadline - now));
        }

        self.release_socket();
        Ok(())
    }

    /// Release the socket and unblock whatever is still waiting on it.
    fn release_socket(&self) {
        // Dropping the handle here frees the fd as soon as the dispatch
        // loop finishes its current iteration; subsequent sends fail.
        self.socket.lock().unwrap().take();

        let remaining: Vec<Arc<ConnInner>> = {
            let mut registry = self.registry.lock().unwrap();
            registry.conns.drain().map(|(_, conn)| conn).collect()
        };

        if !remaining.is_empty() {
            debug!(
                "Force closing socket with {} connections remaining",
                remaining.len()
            );
        }

        // Pending reads on connections that never closed would otherwise
        // block forever now that no more datagrams can arrive.
        for conn in remaining {
            conn.shutdown_read();
        }
    }

    /// Dispatch loop. The only reader of the socket.
    ///
    /// Reads one datagram at a time, resolves the source address to a
    /// connection (discovering new ones while accepting), and hands the
    /// datagram to that connection's pending read. The handoff blocks until
    /// the connection reads or closes, so one connection that is never read
    /// stalls delivery for all others.
    fn dispatch_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; RECEIVE_MTU];

        loop {
            // Re-acquired every iteration so a released socket is dropped
            // promptly even under continuous inbound traffic.
            let Some(socket) = self.socket() else {
                break;
            };
            let received = socket.recv_from(&mut buf);
            drop(socket);

            let (n, source) = match received {
                Ok(v) => v,
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => {
                    // Terminal. No restart at this layer.
                    debug!("Dispatch loop ending on socket error: {}", e);
                    break;
                }
            };

            let Some(conn) = self.conn_for(source) else {
                continue;
            };

            if !conn.deliver(&buf[..n]) {
                trace!("Dropped {} byte datagram for closed conn {}", n, source);
            }
        }

        debug!("Dispatch loop exited");
    }

    /// Resolve a source address to its connection, creating and announcing
    /// a new one for unknown remotes while the listener is accepting.
    ///
    /// Returns `None` when the datagram should be dropped: unknown remote
    /// after shutdown began, or the listener closed before anyone accepted
    /// the new connection.
    fn conn_for(self: &Arc<Self>, remote: SocketAddr) -> Option<Arc<ConnInner>> {
        let conn = {
            let mut registry = self.registry.lock().unwrap();

            if let Some(conn) = registry.conns.get(&remote) {
                return Some(Arc::clone(conn));
            }

            if !registry.accepting {
                trace!("Dropping datagram from unknown remote {}", remote);
                return None;
            }

            let conn = Arc::new(ConnInner::new(remote, Arc::downgrade(self)));
            registry.conns.insert(remote, Arc::clone(&conn));
            conn
        };

        debug!("New connection from {}", remote);

        // Rendezvous with accept(). The registry lock is not held here:
        // this blocks until an acceptor shows up.
        if self.accept_queue.offer(Arc::clone(&conn)) {
            Some(conn)
        } else {
            // Listener closed while waiting for an acceptor.
            self.registry.lock().unwrap().conns.remove(&remote);
            conn.shutdown_read();
            None
        }
    }

    fn remove_conn(&self, remote: &SocketAddr) {
        self.registry.lock().unwrap().conns.remove(remote);
    }
}

/// Rendezvous queue between the dispatch loop and accept().
///
/// Single slot: the dispatch loop parks in `offer` until an acceptor takes
/// the connection, which keeps discovery ordered and applies back-pressure
/// on reading further datagrams until the current discovery is accepted.
struct AcceptQueue {
    state: Mutex<AcceptState>,
    cond: Condvar,
}

struct AcceptState {
    slot: Option<Arc<ConnInner>>,
    closed: bool,
}

impl AcceptQueue {
    fn new() -> AcceptQueue {
        AcceptQueue {
            state: Mutex::new(AcceptState {
                slot: None,
                closed: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Hand a new connection to an acceptor. Blocks until one takes it.
    /// Returns false if the queue closed first, in which case the caller
    /// still owns the connection.
    fn offer(&self, conn: Arc<ConnInner>) -> bool {
        let mut state = self.state.lock().unwrap();

        while state.slot.is_some() && !state.closed {
            state = self.cond.wait(state).unwrap();
        }
        if state.closed {
            return false;
        }

        state.slot = Some(conn);
        self.cond.notify_all();

        while state.slot.is_some() && !state.closed {
            state = self.cond.wait(state).unwrap();
        }

        // Closed before anyone accepted; reclaim the slot.
        if state.slot.take().is_some() {
            return false;
        }
        true
    }

    /// Wait for the next connection. A connection already in the slot is
    /// returned even if the queue has closed.
    fn take(&self) -> Result<Arc<ConnInner>, Error> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(conn) = state.slot.take() {
                self.cond.notify_all();
                return Ok(conn);
            }
            if state.closed {
                return Err(Error::ListenerClosed);
            }
            state = self.cond.wait(state).unwrap();
        }
    }

    fn close(&self) {
        self.state.lock().unwrap().closed = true;
        self.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Weak;
    use std::thread;
    use std::time::Duration;

    use super::*;

    fn test_conn() -> Arc<ConnInner> {
        let remote: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        Arc::new(ConnInner::new(remote, Weak::new()))
    }

    #[test]
    fn offer_blocks_until_taken() {
        let queue = Arc::new(AcceptQueue::new());

        let q = Arc::clone(&queue);
        let offerer = thread::spawn(move || q.offer(test_conn()));

        let conn = queue.take().unwrap();
        assert_eq!(conn.remote_addr().port(), 5000);
        assert!(offerer.join().unwrap());
    }

    #[test]
    fn close_unblocks_take() {
        let queue = Arc::new(AcceptQueue::new());

        let q = Arc::clone(&queue);
        let closer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            q.close();
        });

        assert!(matches!(queue.take(), Err(Error::ListenerClosed)));
        closer.join().unwrap();
    }

    #[test]
    fn close_unblocks_offer() {
        let queue = Arc::new(AcceptQueue::new());

        let q = Arc::clone(&queue);
        let closer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            q.close();
        });

        assert!(!queue.offer(test_conn()));
        closer.join().unwrap();
    }

    #[test]
    fn offer_after_close_is_rejected() {
        let queue = AcceptQueue::new();
        queue.close();
        assert!(!queue.offer(test_conn()));
    }

    #[test]
    fn close_reclaims_unaccepted_offer() {
        let queue = Arc::new(AcceptQueue::new());

        let q = Arc::clone(&queue);
        let offerer = thread::spawn(move || q.offer(test_conn()));

        // Let the offer land in the slot, then close before anyone accepts.
        thread::sleep(Duration::from_millis(50));
        queue.close();

        assert!(!offerer.join().unwrap());
        assert!(matches!(queue.take(), Err(Error::ListenerClosed)));
    }
}
