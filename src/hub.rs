//! Client registry and ordered broadcast fan-out.

use crate::errors::{DeliveryError, RegisterError};
use crate::message::{ServerMessage, encode_line};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Opaque per-connection identifier.
pub type ClientId = u64;

/// Outbound half of a client connection.
///
/// `deliver` must return within a bounded time; implementations backed
/// by sockets enforce this with a write timeout.
pub trait PeerSink: Send + Sync {
    /// Writes one already-encoded record to the peer.
    fn deliver(&self, record: &str) -> Result<(), DeliveryError>;

    /// Closes the peer. Must be safe to call more than once.
    fn close(&self) {}
}

/// Channel-backed sink, mostly useful in tests and in-process consumers.
/// A dropped receiver reads as a closed peer.
impl PeerSink for Sender<String> {
    fn deliver(&self, record: &str) -> Result<(), DeliveryError> {
        self.send(record.to_string())
            .map_err(|_| DeliveryError::Closed)
    }
}

struct Registrant {
    label: String,
    sink: Arc<dyn PeerSink>,
}

/// Registry of connected clients and the fan-out point for broadcasts.
///
/// Registry mutation and snapshots share one mutex. Per-peer writes
/// happen outside it, so a slow peer never blocks unregistration.
/// A second mutex, the ordering lock, serializes whole fan-outs so every
/// peer sees broadcasts in the same order. [`register_with`] and
/// [`broadcast_with`] hold the ordering lock around caller work, which
/// makes a greeting or a state change atomic with respect to broadcasts.
///
/// [`register_with`]: AuctionHub::register_with
/// [`broadcast_with`]: AuctionHub::broadcast_with
pub struct AuctionHub {
    registrants: Mutex<HashMap<ClientId, Registrant>>,
    fanout: Mutex<()>,
    next_id: AtomicU64,
    shutdown_announced: AtomicBool,
}

impl Default for AuctionHub {
    fn default() -> Self {
        Self::new()
    }
}

impl AuctionHub {
    /// Creates an empty hub. Client ids start at 1.
    pub fn new() -> Self {
        log::info!("Auction hub ready");
        Self {
            registrants: Mutex::new(HashMap::new()),
            fanout: Mutex::new(()),
            next_id: AtomicU64::new(1),
            shutdown_announced: AtomicBool::new(false),
        }
    }

    /// Hands out a fresh identifier for a new connection.
    pub fn next_client_id(&self) -> ClientId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Adds a registrant. A duplicate id replaces the old entry, which is
    /// closed; returns `true` in that case.
    pub fn register(&self, id: ClientId, sink: Arc<dyn PeerSink>, label: &str) -> bool {
        let _order = self.lock_order();
        self.insert(id, sink, label)
    }

    /// Runs `greet`, then adds the registrant, with no broadcast able to
    /// slip in between.
    ///
    /// `greet` typically snapshots the auction and sends `WELCOME` to the
    /// new peer itself. Because broadcasts wait on the same ordering lock,
    /// the first broadcast the peer receives is the first one issued after
    /// its snapshot. If `greet` fails the peer is not registered.
    ///
    /// Once the `SHUTDOWN` notice has gone out, new peers are refused:
    /// `greet` is skipped, the peer gets the notice and is closed, and
    /// [`RegisterError::ShuttingDown`] is returned.
    pub fn register_with<F>(
        &self,
        id: ClientId,
        sink: Arc<dyn PeerSink>,
        label: &str,
        greet: F,
    ) -> Result<bool, RegisterError>
    where
        F: FnOnce() -> Result<(), DeliveryError>,
    {
        let _order = self.lock_order();

        if self.shutdown_announced.load(Ordering::SeqCst) {
            log::info!("Refusing {}: server is shutting down", label);
            if let Ok(record) = encode_line(&ServerMessage::shutdown()) {
                let _ = sink.deliver(&record);
            }
            sink.close();
            return Err(RegisterError::ShuttingDown);
        }

        greet().map_err(RegisterError::Greeting)?;
        Ok(self.insert(id, sink, label))
    }

    /// Removes a registrant. Removing an unknown id is a no-op.
    ///
    /// Returns `true` if something was removed.
    pub fn unregister(&self, id: ClientId) -> bool {
        let (removed, count) = {
            let mut registrants = self.lock_registrants();
            let removed = registrants.remove(&id);
            (removed, registrants.len())
        };

        match removed {
            Some(registrant) => {
                log::info!("Unregistered {} (remaining: {})", registrant.label, count);
                true
            }
            None => false,
        }
    }

    /// Number of currently registered clients.
    pub fn count(&self) -> usize {
        self.lock_registrants().len()
    }

    /// Labels of every registrant, for diagnostics.
    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self
            .lock_registrants()
            .values()
            .map(|r| r.label.clone())
            .collect();
        labels.sort();
        labels
    }

    /// Sends `message` to every registrant.
    ///
    /// Failures are contained: the failing registrant is closed and
    /// unregistered, the others still receive the record. Returns how many
    /// registrants the record reached.
    pub fn broadcast(&self, message: &ServerMessage) -> usize {
        let _order = self.lock_order();
        self.fan_out(message)
    }

    /// Runs `produce` under the ordering lock and broadcasts the message it
    /// returns before releasing the lock.
    ///
    /// Two callers racing on shared state therefore publish in the order
    /// their changes were made. `produce` must not call back into the
    /// broadcast methods of this hub. An `Err` from `produce` is handed
    /// back untouched and nothing is sent.
    pub fn broadcast_with<T, E, F>(&self, produce: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<(ServerMessage, T), E>,
    {
        let _order = self.lock_order();
        let (message, value) = produce()?;
        self.fan_out(&message);
        Ok(value)
    }

    /// Broadcasts the `SHUTDOWN` notice once per hub lifetime.
    ///
    /// Returns `false` if it was already sent. Registrations attempted
    /// afterwards are refused.
    pub fn announce_shutdown(&self) -> bool {
        let _order = self.lock_order();
        if self.shutdown_announced.swap(true, Ordering::SeqCst) {
            log::debug!("Shutdown notice already sent, skipping");
            return false;
        }

        log::info!("Broadcasting SHUTDOWN to {} clients", self.count());
        self.fan_out(&ServerMessage::shutdown());
        true
    }

    /// Closes and forgets every registrant. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let drained: Vec<Registrant> = self
            .lock_registrants()
            .drain()
            .map(|(_, registrant)| registrant)
            .collect();

        for registrant in &drained {
            registrant.sink.close();
            log::debug!("Closed {}", registrant.label);
        }

        if !drained.is_empty() {
            log::info!("Closed all {} client connections", drained.len());
        }
        drained.len()
    }

    fn insert(&self, id: ClientId, sink: Arc<dyn PeerSink>, label: &str) -> bool {
        let (replaced, count) = {
            let mut registrants = self.lock_registrants();
            let replaced = registrants.insert(
                id,
                Registrant {
                    label: label.to_string(),
                    sink,
                },
            );
            (replaced, registrants.len())
        };

        match replaced {
            Some(old) => {
                log::warn!(
                    "Client id {} re-registered ({} -> {}), closing the previous channel",
                    id,
                    old.label,
                    label
                );
                old.sink.close();
                true
            }
            None => {
                log::info!("Registered {} (total: {})", label, count);
                false
            }
        }
    }

    // Callers hold the ordering lock.
    fn fan_out(&self, message: &ServerMessage) -> usize {
        let record = match encode_line(message) {
            Ok(record) => record,
            Err(e) => {
                log::error!("Dropping {} broadcast: {}", message.kind(), e);
                return 0;
            }
        };

        log::trace!("Broadcasting {}", message.kind());
        self.deliver_all(&record)
    }

    fn deliver_all(&self, record: &str) -> usize {
        let snapshot: Vec<(ClientId, String, Arc<dyn PeerSink>)> = self
            .lock_registrants()
            .iter()
            .map(|(id, r)| (*id, r.label.clone(), r.sink.clone()))
            .collect();

        let mut delivered = 0;
        let mut failed = Vec::new();

        for (id, label, sink) in snapshot {
            match sink.deliver(record) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    log::warn!("Failed to deliver to {}: {}", label, e);
                    sink.close();
                    failed.push(id);
                }
            }
        }

        for id in failed {
            self.unregister(id);
        }

        delivered
    }

    fn lock_order(&self) -> MutexGuard<'_, ()> {
        self.fanout.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_registrants(&self) -> MutexGuard<'_, HashMap<ClientId, Registrant>> {
        self.registrants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
