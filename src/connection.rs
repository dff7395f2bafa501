//! Per-client connection worker and its socket-backed peer sink.

use crate::auction_state::AuctionState;
use crate::context::AuctionContext;
use crate::defs::{CONNECTION_TICK_PERIOD_MSEC, MAX_RECORD_BYTES, PEER_SEND_TIMEOUT_MSEC};
use crate::errors::{DeliveryError, ProtocolError, RegisterError, TcpServerError};
use crate::hub::{AuctionHub, ClientId, PeerSink};
use crate::message::{ClientMessage, ServerMessage, decode_client_line, encode_line};

use std::io::{self, BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Per-connection timing.
#[derive(Clone, Debug)]
pub struct ConnectionSettings {
    /// Drop the connection after this long without an inbound record.
    pub idle_timeout: Option<Duration>,
    /// Upper bound on one write to the peer.
    pub send_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            idle_timeout: None,
            send_timeout: Duration::from_millis(PEER_SEND_TIMEOUT_MSEC),
        }
    }
}

/// Outbound side of a TCP client.
///
/// Writes are serialized by a mutex so a direct reply and a broadcast
/// never interleave on the wire.
pub struct TcpPeer {
    writer: Mutex<TcpStream>,
    control: TcpStream,
    addr: SocketAddr,
    closed: AtomicBool,
}

impl TcpPeer {
    /// Wraps clones of `stream`; writes give up after `send_timeout`.
    pub fn new(stream: &TcpStream, send_timeout: Duration) -> io::Result<Self> {
        let writer = stream.try_clone()?;
        writer.set_write_timeout(Some(send_timeout))?;
        let control = stream.try_clone()?;
        let addr = stream.peer_addr()?;

        Ok(Self {
            writer: Mutex::new(writer),
            control,
            addr,
            closed: AtomicBool::new(false),
        })
    }

    /// Encodes and sends one message to this peer only.
    pub fn send(&self, message: &ServerMessage) -> Result<(), DeliveryError> {
        let record = encode_line(message).map_err(|e| DeliveryError::Io(e.to_string()))?;
        self.deliver(&record)
    }

    /// Remote address of the peer.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Whether [`close`](PeerSink::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl PeerSink for TcpPeer {
    fn deliver(&self, record: &str) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }

        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer
            .write_all(record.as_bytes())
            .and_then(|_| writer.flush())
            .map_err(|e| match e.kind() {
                ErrorKind::WouldBlock | ErrorKind::TimedOut => DeliveryError::TimedOut,
                _ => DeliveryError::Io(e.to_string()),
            })
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Pending writes are already in the kernel buffer; shutdown sends
        // them before the FIN and wakes the reader.
        if let Err(e) = self.control.shutdown(Shutdown::Both) {
            log::debug!("Shutdown of {} failed: {}", self.addr, e);
        }
    }
}

/// Why a connection worker stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed its side.
    PeerClosed,
    /// Reading or writing failed, or the server closed the socket.
    IoError,
    /// No inbound record within the idle timeout.
    IdleTimeout,
    /// The peer sent a record longer than the allowed maximum.
    Oversized,
}

/// Translates one client's wire records into auction operations.
///
/// Owns the read half of the connection; the write half is shared with
/// the hub through [`TcpPeer`].
pub struct ConnectionHandler {
    id: ClientId,
    label: String,
    reader: BufReader<TcpStream>,
    peer: Arc<TcpPeer>,
    state: Arc<AuctionState>,
    hub: Arc<AuctionHub>,
    idle_timeout: Option<Duration>,
}

impl ConnectionHandler {
    /// Prepares a handler for an accepted stream. The stream is switched
    /// to blocking reads with a short timeout.
    pub fn new(
        stream: TcpStream,
        id: ClientId,
        label: &str,
        context: &AuctionContext,
    ) -> Result<Self, TcpServerError> {
        let settings = &context.connection;

        // Blocking reads with a short timeout so the worker can check
        // the idle deadline.
        stream
            .set_nonblocking(false)
            .and_then(|_| {
                stream.set_read_timeout(Some(Duration::from_millis(CONNECTION_TICK_PERIOD_MSEC)))
            })
            .map_err(|e| TcpServerError::ClientIoError(e.to_string()))?;

        let peer = TcpPeer::new(&stream, settings.send_timeout)
            .map_err(|e| TcpServerError::ClientIoError(e.to_string()))?;

        Ok(Self {
            id,
            label: label.to_string(),
            reader: BufReader::new(stream),
            peer: Arc::new(peer),
            state: context.state.clone(),
            hub: context.hub.clone(),
            idle_timeout: settings.idle_timeout,
        })
    }

    /// Label used in logs and the `WELCOME` greeting.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Outbound side, for registration with the hub.
    pub fn peer(&self) -> Arc<TcpPeer> {
        self.peer.clone()
    }

    /// Sends the `WELCOME` record with the current auction state.
    pub fn greet(&self) -> Result<(), DeliveryError> {
        let snapshot = self.state.snapshot();
        self.peer.send(&ServerMessage::welcome(&snapshot, &self.label))
    }

    /// Greets the peer and registers it with the hub as one step, so the
    /// peer misses no broadcast issued after its `WELCOME` snapshot.
    pub fn join_hub(&self) -> Result<bool, RegisterError> {
        self.hub
            .register_with(self.id, self.peer.clone(), &self.label, || self.greet())
    }

    /// Reads records until the connection ends, then unregisters and
    /// closes it.
    pub fn run(mut self) -> CloseReason {
        log::info!("{} connected from {}", self.label, self.peer.addr());

        let reason = self.read_loop();

        self.hub.unregister(self.id);
        self.peer.close();
        log::info!("{} disconnected ({:?})", self.label, reason);
        reason
    }

    fn read_loop(&mut self) -> CloseReason {
        let mut pending: Vec<u8> = Vec::new();
        let mut last_activity = Instant::now();

        loop {
            // One byte past the maximum is enough to tell an oversized
            // record apart; the rest stays unread.
            let budget = (MAX_RECORD_BYTES + 1).saturating_sub(pending.len()) as u64;
            let read = (&mut self.reader).take(budget).read_until(b'\n', &mut pending);

            match read {
                Ok(0) => return CloseReason::PeerClosed,
                Ok(_) if pending.len() > MAX_RECORD_BYTES => {
                    log::warn!(
                        "{} sent a record over {} bytes, disconnecting",
                        self.label,
                        MAX_RECORD_BYTES
                    );
                    return CloseReason::Oversized;
                }
                Ok(_) if pending.ends_with(b"\n") => {
                    last_activity = Instant::now();
                    let record = std::mem::take(&mut pending);
                    if let Err(reason) = self.handle_record(&record) {
                        return reason;
                    }
                }
                // Partial record; the next read continues it or reports EOF.
                Ok(_) => {}
                Err(ref e)
                    if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut =>
                {
                    if let Some(limit) = self.idle_timeout {
                        if last_activity.elapsed() > limit {
                            log::warn!(
                                "{} idle for more than {:?}, disconnecting",
                                self.label,
                                limit
                            );
                            return CloseReason::IdleTimeout;
                        }
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    if !self.peer.is_closed() {
                        log::warn!("Connection failed for {}: {}", self.label, e);
                    }
                    return CloseReason::IoError;
                }
            }
        }
    }

    /// Handles one complete record. Protocol errors are logged and
    /// swallowed; only a failed reply ends the connection.
    fn handle_record(&self, record: &[u8]) -> Result<(), CloseReason> {
        let line = match std::str::from_utf8(record) {
            Ok(line) => line.trim(),
            Err(e) => {
                log::warn!("Non UTF-8 record from {}: {}", self.label, e);
                return Ok(());
            }
        };

        if line.is_empty() {
            return Ok(());
        }

        log::debug!("Received from {}: '{}'", self.label, line);

        match decode_client_line(line) {
            Ok(ClientMessage::Bid { user, value }) => self.handle_bid(&user, value),
            Err(ProtocolError::UnknownKind(kind)) => {
                log::warn!("Unsupported message kind from {}: {}", self.label, kind);
                Ok(())
            }
            Err(e) => {
                log::warn!("Invalid record from {}: {}", self.label, e);
                Ok(())
            }
        }
    }

    fn handle_bid(&self, user: &str, value: f64) -> Result<(), CloseReason> {
        // Acceptance and its NEW_PRICE share the hub's ordering lock, so
        // NEW_PRICE records go out in acceptance order.
        let published = self.hub.broadcast_with(|| {
            self.state
                .try_bid(user, value)
                .map(|accepted| (ServerMessage::new_price(&accepted), accepted))
        });

        match published {
            Ok(accepted) => {
                log::debug!("{} raised the price to ${}", accepted.user, accepted.value);
                Ok(())
            }
            Err(rejection) => {
                log::info!("{} bid rejected: {}", self.label, rejection);
                self.peer
                    .send(&ServerMessage::rejected(&rejection))
                    .map_err(|e| {
                        log::warn!("Failed to reply to {}: {}", self.label, e);
                        CloseReason::IoError
                    })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuctionConfig, ServerConfig};
    use crate::message::decode_server_line;
    use crate::timer::TimerSettings;
    use std::net::TcpListener;
    use std::thread;

    struct Client {
        stream: TcpStream,
        reader: BufReader<TcpStream>,
    }

    impl Client {
        fn send(&mut self, line: &str) {
            self.stream.write_all(line.as_bytes()).unwrap();
            self.stream.write_all(b"\n").unwrap();
        }

        fn recv(&mut self) -> ServerMessage {
            let mut line = String::new();
            self.reader.read_line(&mut line).unwrap();
            decode_server_line(&line).unwrap()
        }
    }

    fn context() -> Arc<AuctionContext> {
        let auction = AuctionConfig {
            item_name: "Lamp".into(),
            starting_price: 1000.0,
            ..Default::default()
        };
        AuctionContext::new(&auction, &ServerConfig::default(), TimerSettings::default())
    }

    fn accept_handler(
        listener: &TcpListener,
        ctx: &Arc<AuctionContext>,
    ) -> (Client, ConnectionHandler) {
        let addr = listener.local_addr().unwrap();
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let (server_side, _) = listener.accept().unwrap();

        let id = ctx.hub.next_client_id();
        let handler =
            ConnectionHandler::new(server_side, id, &format!("Client-{}", id), ctx).unwrap();
        let reader = BufReader::new(stream.try_clone().unwrap());
        (Client { stream, reader }, handler)
    }

    /// Accepts one connection, greets, registers and runs a handler for it.
    fn connect(
        listener: &TcpListener,
        ctx: &Arc<AuctionContext>,
    ) -> (Client, thread::JoinHandle<CloseReason>) {
        let (client, handler) = accept_handler(listener, ctx);
        handler.join_hub().unwrap();
        let worker = thread::spawn(move || handler.run());
        (client, worker)
    }

    fn bid_line(user: &str, value: f64) -> String {
        format!(r#"{{"type":"BID","user":"{}","value":{}}}"#, user, value)
    }

    #[test]
    fn test_welcome_then_accepted_bid_is_broadcast() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let ctx = context();
        let (mut alice, _w1) = connect(&listener, &ctx);
        let (mut bob, _w2) = connect(&listener, &ctx);

        assert_eq!(alice.recv().kind(), "WELCOME");
        assert_eq!(bob.recv().kind(), "WELCOME");

        alice.send(r#"{"type":"BID","user":"alice","value":1500}"#);

        for client in [&mut alice, &mut bob] {
            match client.recv() {
                ServerMessage::NewPrice { user, value, .. } => {
                    assert_eq!(user, "alice");
                    assert_eq!(value, 1500.0);
                }
                other => panic!("unexpected message: {:?}", other),
            }
        }
    }

    #[test]
    fn test_rejection_goes_to_submitter_only() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let ctx = context();
        let (mut alice, _w1) = connect(&listener, &ctx);
        let (mut bob, _w2) = connect(&listener, &ctx);
        alice.recv();
        bob.recv();

        bob.send(r#"{"type":"BID","user":"bob","value":900}"#);
        match bob.recv() {
            ServerMessage::Error { message } => assert!(message.contains("$1000")),
            other => panic!("unexpected message: {:?}", other),
        }

        // Alice sees the next broadcast, not Bob's error.
        ctx.hub.broadcast(&ServerMessage::update_timer(3));
        assert_eq!(alice.recv(), ServerMessage::update_timer(3));
        assert_eq!(ctx.state.snapshot().current_winner, None);
    }

    #[test]
    fn test_malformed_record_keeps_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let ctx = context();
        let (mut alice, _w) = connect(&listener, &ctx);
        alice.recv();

        alice.send("this is not json");
        alice.send(r#"{"type":"PING"}"#);
        alice.send("");
        alice.send(r#"{"type":"BID","user":"alice","value":1001}"#);

        assert!(matches!(alice.recv(), ServerMessage::NewPrice { .. }));
        assert_eq!(ctx.hub.count(), 1);
    }

    #[test]
    fn test_disconnect_unregisters() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let ctx = context();
        let (mut alice, worker) = connect(&listener, &ctx);
        alice.recv();
        assert_eq!(ctx.hub.count(), 1);

        drop(alice);
        assert_eq!(worker.join().unwrap(), CloseReason::PeerClosed);
        assert_eq!(ctx.hub.count(), 0);
    }

    #[test]
    fn test_server_close_flushes_then_ends_worker() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let ctx = context();
        let (mut alice, worker) = connect(&listener, &ctx);
        alice.recv();

        ctx.hub.announce_shutdown();
        ctx.hub.close_all();

        assert_eq!(alice.recv().kind(), "SHUTDOWN");
        let mut rest = String::new();
        assert_eq!(alice.reader.read_line(&mut rest).unwrap(), 0);
        assert_eq!(worker.join().unwrap(), CloseReason::PeerClosed);
    }

    #[test]
    fn test_idle_timeout_disconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let auction = AuctionConfig::default();
        let server = ServerConfig {
            idle_timeout: Some(Duration::from_millis(300)),
            ..Default::default()
        };
        let ctx = AuctionContext::new(&auction, &server, TimerSettings::default());
        let (mut alice, worker) = connect(&listener, &ctx);
        alice.recv();

        assert_eq!(worker.join().unwrap(), CloseReason::IdleTimeout);
        assert_eq!(ctx.hub.count(), 0);
    }

    #[test]
    fn test_oversized_record_closes_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let ctx = context();
        let (mut alice, worker) = connect(&listener, &ctx);
        alice.recv();

        // A well-formed bid, just far too long.
        let huge = bid_line(&"a".repeat(200 * 1024), 5000.0);
        let mut stream = alice.stream.try_clone().unwrap();
        let writer = thread::spawn(move || {
            // The server may reset the connection mid-write.
            let _ = stream.write_all(huge.as_bytes());
            let _ = stream.write_all(b"\n");
        });

        assert_eq!(worker.join().unwrap(), CloseReason::Oversized);
        writer.join().unwrap();
        assert_eq!(ctx.state.snapshot().current_winner, None);
        assert_eq!(ctx.hub.count(), 0);
    }

    #[test]
    fn test_unterminated_stream_closes_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let ctx = context();
        let (mut alice, worker) = connect(&listener, &ctx);
        alice.recv();

        let mut stream = alice.stream.try_clone().unwrap();
        let writer = thread::spawn(move || {
            let chunk = [b'x'; 4096];
            for _ in 0..64 {
                if stream.write_all(&chunk).is_err() {
                    break;
                }
            }
        });

        assert_eq!(worker.join().unwrap(), CloseReason::Oversized);
        writer.join().unwrap();
    }

    #[test]
    fn test_record_at_size_limit_is_accepted() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let ctx = context();
        let (mut alice, _w) = connect(&listener, &ctx);
        alice.recv();

        // Pad with spaces up to the limit, newline included.
        let mut line = bid_line("alice", 1200.0);
        line.push_str(&" ".repeat(MAX_RECORD_BYTES - line.len() - 1));
        alice.send(&line);

        match alice.recv() {
            ServerMessage::NewPrice { value, .. } => assert_eq!(value, 1200.0),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_join_after_shutdown_notice_is_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let ctx = context();
        ctx.hub.announce_shutdown();

        let (mut late, handler) = accept_handler(&listener, &ctx);
        assert!(matches!(
            handler.join_hub(),
            Err(RegisterError::ShuttingDown)
        ));
        assert_eq!(ctx.hub.count(), 0);

        assert_eq!(late.recv().kind(), "SHUTDOWN");
        let mut rest = String::new();
        assert_eq!(late.reader.read_line(&mut rest).unwrap(), 0);
    }

    #[test]
    fn test_late_joiner_misses_no_price_after_welcome() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let ctx = context();
        let (mut bidder, _w) = connect(&listener, &ctx);
        bidder.recv();

        const LAST: u64 = 1300;
        let mut stream = bidder.stream.try_clone().unwrap();
        let feeder = thread::spawn(move || {
            for value in 1001..=LAST {
                stream
                    .write_all(format!("{}\n", bid_line("feeder", value as f64)).as_bytes())
                    .unwrap();
                thread::sleep(Duration::from_millis(1));
            }
        });

        let mut joiners = Vec::new();
        for _ in 0..20 {
            joiners.push(connect(&listener, &ctx));
            thread::sleep(Duration::from_millis(10));
        }
        feeder.join().unwrap();

        for (joiner, _worker) in &mut joiners {
            let mut expected = match joiner.recv() {
                ServerMessage::Welcome { current_price, .. } => current_price as u64 + 1,
                other => panic!("unexpected message: {:?}", other),
            };
            while expected <= LAST {
                match joiner.recv() {
                    ServerMessage::NewPrice { value, .. } => assert_eq!(value as u64, expected),
                    other => panic!("unexpected message: {:?}", other),
                }
                expected += 1;
            }
        }
    }

    #[test]
    fn test_new_prices_arrive_in_acceptance_order() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let ctx = context();
        let (mut observer, _w) = connect(&listener, &ctx);
        observer.recv();

        const BIDDERS: u64 = 4;
        const ROUNDS: u64 = 100;
        let top = (1000 + (ROUNDS - 1) * BIDDERS + BIDDERS) as f64;

        let feeders: Vec<_> = (1..=BIDDERS)
            .map(|b| {
                let (mut client, worker) = connect(&listener, &ctx);
                client.recv();
                thread::spawn(move || {
                    for k in 0..ROUNDS {
                        let value = (1000 + k * BIDDERS + b) as f64;
                        client.send(&bid_line(&format!("bidder-{}", b), value));
                    }
                    (client, worker)
                })
            })
            .collect();
        // Keep the bidders' sockets open until the observer is done.
        let _bidders: Vec<_> = feeders.into_iter().map(|f| f.join().unwrap()).collect();

        let mut last = 1000.0;
        loop {
            match observer.recv() {
                ServerMessage::NewPrice { value, .. } => {
                    assert!(value > last, "price went from {} to {}", last, value);
                    last = value;
                    if value == top {
                        break;
                    }
                }
                other => panic!("unexpected message: {:?}", other),
            }
        }
    }
}
