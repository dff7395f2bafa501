//! TCP listener, accept loop and shutdown cascade.

use crate::connection::ConnectionHandler;
use crate::context::AuctionContext;
use crate::defs::ACCEPT_POLL_PERIOD_MSEC;
use crate::errors::{RegisterError, TcpServerError};
use crate::shutdown::ShutdownReason;

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// TCP front of the auction: accepts clients, hands each one to a
/// [`ConnectionHandler`] thread and runs the shutdown cascade at the end.
pub struct AuctionServer {
    /// `None` once the cascade has released it.
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    context: Arc<AuctionContext>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    cascade_started: AtomicBool,
}

impl AuctionServer {
    /// Binds the listening socket. Failing here aborts startup before any
    /// client is accepted.
    pub fn new(addr: &str, context: Arc<AuctionContext>) -> Result<Self, TcpServerError> {
        log::info!("Binding TCP server to address: {}", addr);
        let listener =
            TcpListener::bind(addr).map_err(|e| TcpServerError::BindError(e.to_string()))?;
        // Non-blocking accept lets the loop poll the shutdown signal.
        listener
            .set_nonblocking(true)
            .map_err(|e| TcpServerError::BindError(e.to_string()))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| TcpServerError::BindError(e.to_string()))?;
        log::info!("TCP server successfully bound to: {}", local_addr);

        Ok(Self {
            listener: Mutex::new(Some(listener)),
            local_addr,
            context,
            workers: Mutex::new(Vec::new()),
            cascade_started: AtomicBool::new(false),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared auction context served by this listener.
    pub fn context(&self) -> &Arc<AuctionContext> {
        &self.context
    }

    /// Arms the countdown, then accepts clients until shutdown is
    /// requested. Runs the shutdown cascade and joins every connection
    /// worker before returning.
    pub fn run(&self) -> Result<(), TcpServerError> {
        self.context.timer.spawn()?;

        log::info!("TCP server starting main loop");
        let result = self.accept_loop();

        self.shutdown();
        self.join_workers();
        log::info!("Server stopped");
        result
    }

    fn accept_loop(&self) -> Result<(), TcpServerError> {
        let poll = Duration::from_millis(ACCEPT_POLL_PERIOD_MSEC);
        let shutdown = &self.context.shutdown;

        while !shutdown.is_triggered() {
            let accepted = {
                let guard = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
                match guard.as_ref() {
                    Some(listener) => listener.accept(),
                    None => break,
                }
            };

            match accepted {
                Ok((stream, addr)) => {
                    if shutdown.is_triggered() {
                        log::debug!("Refusing {} during shutdown", addr);
                        break;
                    }
                    self.spawn_handler(stream, addr);
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                    shutdown.wait_timeout(poll);
                }
                Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    log::error!("Failed to accept TCP connection: {}", e);
                    shutdown.trigger(ShutdownReason::ListenerFault);
                    return Err(TcpServerError::AcceptError(e.to_string()));
                }
            }
        }

        log::info!(
            "Accept loop finished ({})",
            shutdown
                .reason()
                .map(|r| r.to_string())
                .unwrap_or_else(|| "listener closed".to_string())
        );
        Ok(())
    }

    fn spawn_handler(&self, stream: TcpStream, addr: SocketAddr) {
        let hub = &self.context.hub;
        let id = hub.next_client_id();
        let label = format!("Client-{}", id);
        log::info!("New TCP connection from {} as {}", addr, label);

        let handler = match ConnectionHandler::new(stream, id, &label, &self.context) {
            Ok(handler) => handler,
            Err(e) => {
                log::warn!("Could not set up {}: {}", label, e);
                return;
            }
        };

        match handler.join_hub() {
            Ok(_) => {}
            Err(RegisterError::ShuttingDown) => {
                log::debug!("{} arrived during shutdown, not serving it", label);
                return;
            }
            Err(e) => {
                log::warn!("Could not register {}: {}", label, e);
                return;
            }
        }

        let spawned = thread::Builder::new()
            .name(label.clone())
            .spawn(move || {
                handler.run();
            });

        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        match spawned {
            Ok(handle) => workers.push(handle),
            Err(e) => {
                log::error!("Failed to spawn worker for {}: {}", label, e);
                hub.unregister(id);
            }
        }
        workers.retain(|w| !w.is_finished());
        log::info!("Connected clients: {}", hub.count());
    }

    /// Shutdown cascade: notify clients, close them, stop the countdown and
    /// release the listener. Each step is best-effort; repeated calls are
    /// no-ops. Clients that race in after the notice are refused by the hub.
    fn shutdown(&self) {
        if self.cascade_started.swap(true, Ordering::SeqCst) {
            log::debug!("Shutdown cascade already ran");
            return;
        }
        log::info!("Shutting down server");

        // Stops the accept loop if the cascade was not started by it.
        self.context.shutdown.trigger(ShutdownReason::Interrupt);

        self.context.hub.announce_shutdown();
        self.context.hub.close_all();
        self.context.timer.stop();

        if self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            log::info!("Listening socket closed");
        }
    }

    fn join_workers(&self) {
        let workers: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        log::debug!("Waiting for {} connection workers", workers.len());
        for worker in workers {
            if worker.join().is_err() {
                log::error!("Connection worker panicked");
            }
        }
    }
}
