//! Shared constants and timing parameters.

/// Default TCP port the auction server listens on.
pub const DEFAULT_PORT: u16 = 9999;

/// Default listen host (all interfaces).
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Shortest round the server accepts, in ticks (seconds).
///
/// Anything shorter leaves no room for the 10-tick warning.
pub const MIN_AUCTION_DURATION: u64 = 10;

/// Length of one countdown tick in milliseconds.
pub const TICK_PERIOD_MSEC: u64 = 1000;

/// Remaining-time values at which a distinct `WARNING` is broadcast.
///
/// Each threshold fires at most once per round.
pub const WARNING_THRESHOLDS: [u64; 2] = [10, 5];

/// Ticks to wait after announcing the outcome so clients can render it.
pub const RESULT_GRACE_TICKS: u32 = 5;

/// Ticks to wait after the `SHUTDOWN` notice before signalling shutdown.
pub const SHUTDOWN_GRACE_TICKS: u32 = 1;

/// Polling interval (in milliseconds) of the accept loop.
///
/// Bounds how long the listener takes to notice a shutdown request.
pub const ACCEPT_POLL_PERIOD_MSEC: u64 = 200;

/// Polling interval (in milliseconds) of a connection worker's reads.
///
/// Lets workers notice shutdown and enforce the idle timeout.
pub const CONNECTION_TICK_PERIOD_MSEC: u64 = 200;

/// Upper bound (in milliseconds) on a single write to one peer.
///
/// A peer that cannot take a record within this window is dropped
/// instead of stalling the whole fan-out.
pub const PEER_SEND_TIMEOUT_MSEC: u64 = 2000;

/// Default idle-read timeout in seconds; `0` disables it.
pub const DEFAULT_IDLE_TIMEOUT_SEC: u64 = 0;

/// Longest inbound record (in bytes) a client may send before it is dropped.
pub const MAX_RECORD_BYTES: usize = 64 * 1024;
