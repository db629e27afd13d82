//! `WebSocketServer`: the start/stop state machine around the event loop.
//!
//! ```text
//! Stopped ──start()──► Starting ──bind ok──► Running ──stop()──► Stopping ──joined──► Stopped
//!                          └──bind fails──► Stopped (error returned to the caller)
//! ```
//!
//! There is at most one I/O thread per server.  `start()` on a running server
//! is a no-op, and `stop()` on a stopped server is a no-op.  `stop()` is
//! synchronous: when it returns, the listener is closed, every connection has
//! been closed, and the registry is empty.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use statedeck_server::domain::ServerConfig;
//! use statedeck_server::infrastructure::{Connection, ServerHandler, WebSocketServer};
//!
//! struct Echo;
//!
//! impl ServerHandler for Echo {
//!     fn on_message(&self, conn: &Arc<Connection>, text: &str) {
//!         let _ = conn.send(text);
//!     }
//! }
//!
//! let server = WebSocketServer::new(ServerConfig::default(), Arc::new(Echo));
//! let addr = server.start()?;
//! println!("listening on ws://{addr}/");
//! server.broadcast("hello");
//! server.stop()?;
//! # Ok::<(), statedeck_server::infrastructure::ServerError>(())
//! ```

use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use polling::{Event, Poller};
use tracing::{error, info, warn};

use super::connection::Connection;
use super::error::ServerError;
use super::event_loop::{EventLoop, LISTENER_KEY};
use super::handler::ServerHandler;
use super::registry::ConnectionRegistry;
use crate::domain::ServerConfig;

/// Lifecycle state of a [`WebSocketServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Resources that exist only while the server runs.
struct Lifecycle {
    state: ServerState,
    running: Option<Arc<AtomicBool>>,
    poller: Option<Arc<Poller>>,
    thread: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl Lifecycle {
    fn stopped() -> Self {
        Self {
            state: ServerState::Stopped,
            running: None,
            poller: None,
            thread: None,
            local_addr: None,
        }
    }
}

/// A WebSocket server with one readiness-driven I/O thread.
pub struct WebSocketServer {
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
    handler: Arc<dyn ServerHandler>,
    lifecycle: Mutex<Lifecycle>,
}

impl WebSocketServer {
    /// Creates a stopped server with its own empty registry.
    pub fn new(config: ServerConfig, handler: Arc<dyn ServerHandler>) -> Self {
        Self::with_registry(config, Arc::new(ConnectionRegistry::new()), handler)
    }

    /// Creates a stopped server that tracks connections in `registry`.
    ///
    /// Use this when the handler itself needs to broadcast: build the
    /// registry first, hand it to the handler, then to the server.
    pub fn with_registry(
        config: ServerConfig,
        registry: Arc<ConnectionRegistry>,
        handler: Arc<dyn ServerHandler>,
    ) -> Self {
        Self {
            config,
            registry,
            handler,
            lifecycle: Mutex::new(Lifecycle::stopped()),
        }
    }

    /// Binds the listener, launches the I/O thread, and fires `on_start`.
    ///
    /// Returns the bound address, which differs from the configured one when
    /// the configured port is 0.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Bind`] when the port is unavailable.  Nothing is left
    ///   running, so the caller may retry on another port.
    /// - [`ServerError::Poller`] / [`ServerError::Spawn`] on OS resource
    ///   failures.
    /// - [`ServerError::InTransition`] while a `stop()` is still in progress.
    pub fn start(&self) -> Result<SocketAddr, ServerError> {
        let local_addr = {
            let mut lifecycle = self.lifecycle.lock();
            match lifecycle.state {
                ServerState::Stopped => {}
                ServerState::Running => {
                    if let Some(addr) = lifecycle.local_addr {
                        info!("server already running on {addr}");
                        return Ok(addr);
                    }
                }
                other => return Err(ServerError::InTransition(other)),
            }

            lifecycle.state = ServerState::Starting;
            match self.launch(&mut lifecycle) {
                Ok(addr) => {
                    lifecycle.state = ServerState::Running;
                    addr
                }
                Err(e) => {
                    *lifecycle = Lifecycle::stopped();
                    return Err(e);
                }
            }
        };

        info!("WebSocket server listening on {local_addr}");
        self.handler.on_start(local_addr);
        Ok(local_addr)
    }

    fn launch(&self, lifecycle: &mut Lifecycle) -> Result<SocketAddr, ServerError> {
        let addr = self.config.socket_addr();
        let bind_error = |source| ServerError::Bind { addr, source };

        let listener = TcpListener::bind(addr).map_err(bind_error)?;
        listener.set_nonblocking(true).map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        let poller = Arc::new(Poller::new().map_err(ServerError::Poller)?);
        poller
            .add(&listener, Event::readable(LISTENER_KEY))
            .map_err(ServerError::Poller)?;

        let running = Arc::new(AtomicBool::new(true));
        let event_loop = EventLoop::new(
            listener,
            Arc::clone(&poller),
            Arc::clone(&self.registry),
            Arc::clone(&self.handler),
            Arc::clone(&running),
            self.config.clone(),
        );
        let thread = thread::Builder::new()
            .name(format!("statedeck-io-{}", local_addr.port()))
            .spawn(move || event_loop.run())
            .map_err(ServerError::Spawn)?;

        lifecycle.running = Some(running);
        lifecycle.poller = Some(poller);
        lifecycle.thread = Some(thread);
        lifecycle.local_addr = Some(local_addr);
        Ok(local_addr)
    }

    /// Stops the I/O thread and waits for it to finish.
    ///
    /// Every open connection is sent a close frame and reported through
    /// `on_close` (on the I/O thread) before this returns.
    ///
    /// # Errors
    ///
    /// - [`ServerError::StopFromLoopThread`] when called from a handler
    ///   callback.  The server keeps running.
    /// - [`ServerError::LoopPanicked`] when the I/O thread had panicked.  The
    ///   server is stopped and its connections closed regardless.
    pub fn stop(&self) -> Result<(), ServerError> {
        let (thread, running, poller) = {
            let mut lifecycle = self.lifecycle.lock();
            if let Some(thread) = &lifecycle.thread {
                if thread.thread().id() == thread::current().id() {
                    return Err(ServerError::StopFromLoopThread);
                }
            }
            if lifecycle.state != ServerState::Running {
                return Ok(());
            }
            lifecycle.state = ServerState::Stopping;
            (
                lifecycle.thread.take(),
                lifecycle.running.take(),
                lifecycle.poller.take(),
            )
        };

        if let Some(running) = running {
            running.store(false, Ordering::Release);
        }
        if let Some(poller) = poller {
            if let Err(e) = poller.notify() {
                warn!("failed to wake the I/O thread, it will stop at the next poll timeout: {e}");
            }
        }

        // Join without holding the lifecycle lock so callbacks running during
        // teardown may still query the server.
        let outcome = match thread.map(JoinHandle::join) {
            Some(Err(_)) => {
                error!("the I/O thread panicked");
                Err(ServerError::LoopPanicked)
            }
            _ => Ok(()),
        };

        // Only non-empty if the loop died before its own teardown.
        for conn in self.registry.drain() {
            conn.close();
        }

        *self.lifecycle.lock() = Lifecycle::stopped();
        info!("WebSocket server stopped");
        outcome
    }

    /// Sends `text` to every upgraded connection.  Callable from any thread.
    pub fn broadcast(&self, text: &str) -> usize {
        self.registry.broadcast(text)
    }

    /// Snapshot of the registered connections.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.registry.snapshot()
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lifecycle.lock().local_addr
    }

    pub fn state(&self) -> ServerState {
        self.lifecycle.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServerState::Running
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

impl Drop for WebSocketServer {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("server did not stop cleanly on drop: {e}");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
