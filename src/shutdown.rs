//! Process-wide one-shot shutdown signal.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

/// What asked the process to shut down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C or another operator interrupt.
    Interrupt,
    /// The operator cancelled the round from the console.
    Cancelled,
    /// The countdown expired and the outcome was announced.
    RoundEnded,
    /// The listening socket failed.
    ListenerFault,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ShutdownReason::Interrupt => "operator interrupt",
            ShutdownReason::Cancelled => "round cancelled",
            ShutdownReason::RoundEnded => "round ended",
            ShutdownReason::ListenerFault => "listener fault",
        };
        f.write_str(text)
    }
}

/// Process-wide, one-shot shutdown request.
///
/// Cloning shares the same flag. The first `trigger` wins and records
/// its reason; later calls are ignored.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<(Mutex<Option<ShutdownReason>>, Condvar)>,
}

impl ShutdownSignal {
    /// Creates an untriggered signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown. Returns `true` if this call was the first.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        let (lock, cvar) = &*self.inner;
        let mut slot = lock.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return false;
        }
        log::info!("Shutdown requested: {}", reason);
        *slot = Some(reason);
        cvar.notify_all();
        true
    }

    /// Whether shutdown has been requested.
    pub fn is_triggered(&self) -> bool {
        self.reason().is_some()
    }

    /// Reason recorded by the first `trigger`, if any.
    pub fn reason(&self) -> Option<ShutdownReason> {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until shutdown is requested or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ShutdownReason> {
        let (lock, cvar) = &*self.inner;
        let slot = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (slot, _) = cvar
            .wait_timeout_while(slot, timeout, |reason| reason.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        *slot
    }
}

impl fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("reason", &self.reason())
            .finish()
    }
}
