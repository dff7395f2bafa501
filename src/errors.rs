//! Error types shared across the crate.

use thiserror::Error;

/// Errors raised while loading or validating the auction configuration.
///
/// All of them are fatal at startup: the core never runs with an
/// invalid configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file exists but could not be read.
    #[error("Failed to read auction config: {0}")]
    Io(String),

    /// The configuration file is not valid JSON or has wrongly typed fields.
    #[error("Failed to parse auction config: {0}")]
    Parse(String),

    /// The configuration was read but violates a business rule
    /// (blank item name, non-positive price, too short duration).
    #[error("Invalid auction config: {0}")]
    Invalid(String),
}

/// Errors produced while decoding or encoding wire records.
#[derive(Error, Debug, PartialEq)]
pub enum ProtocolError {
    /// The record is not a well-formed message of a known kind.
    #[error("Malformed record: {0}")]
    Malformed(String),

    /// The record is well formed but its `type` is not accepted inbound.
    #[error("Unknown message kind: {0}")]
    UnknownKind(String),

    /// An outbound message could not be serialized.
    #[error("Failed to encode message: {0}")]
    Encode(String),
}

/// Errors reported by a single peer sink during delivery.
///
/// These never leave the hub: a failing peer is simply unregistered.
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// The peer has already gone away.
    #[error("Peer channel closed")]
    Closed,

    /// The write to the peer failed.
    #[error("Peer I/O error: {0}")]
    Io(String),

    /// The peer did not accept the record within the send timeout.
    #[error("Peer send timed out")]
    TimedOut,
}

/// Reasons a new peer could not join the hub.
#[derive(Error, Debug)]
pub enum RegisterError {
    /// The `SHUTDOWN` notice has already been broadcast.
    #[error("Server is shutting down")]
    ShuttingDown,

    /// The greeting could not be delivered to the new peer.
    #[error("Failed to greet peer: {0}")]
    Greeting(DeliveryError),
}

/// Errors returned by the [`CountdownTimer`](crate::timer::CountdownTimer).
#[derive(Error, Debug)]
pub enum TimerError {
    /// `spawn` was called on a timer that already owns a worker thread.
    #[error("Countdown timer is already running")]
    AlreadySpawned,

    /// The OS refused to create the timer thread.
    #[error("Failed to spawn countdown timer: {0}")]
    Spawn(String),
}

/// Errors produced by the TCP server subsystem.
#[derive(Error, Debug)]
pub enum TcpServerError {
    /// The TCP listener failed to bind to the specified address/port.
    #[error("Failed to bind TCP listener: {0}")]
    BindError(String),

    /// Error while accepting an incoming TCP client connection.
    #[error("Failed to accept TCP connection: {0}")]
    AcceptError(String),

    /// I/O error during communication with a specific client.
    #[error("Client IO error: {0}")]
    ClientIoError(String),

    /// The countdown timer could not be started.
    #[error("Timer error: {0}")]
    Timer(#[from] TimerError),
}

/// High-level errors returned by the server and client binaries.
#[derive(Error, Debug)]
pub enum CliError {
    /// General wrapper around any textual failure.
    #[error("Cli failed with error: {0}")]
    GeneralError(String),
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        CliError::GeneralError(err.to_string())
    }
}

impl From<TcpServerError> for CliError {
    fn from(err: TcpServerError) -> Self {
        CliError::GeneralError(err.to_string())
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::GeneralError(err.to_string())
    }
}
