//! Wire records exchanged between clients and the server.
//!
//! Every record is one JSON object on one line, tagged by its `"type"`
//! field. Framing is strictly "read a line, then decode it": a record
//! never spans lines and a line never holds more than one record.

use crate::auction_state::{AcceptedBid, AuctionSnapshot, BidRejection};
use crate::errors::ProtocolError;

use serde::{Deserialize, Serialize};

/// Record delimiter on the wire.
pub const RECORD_DELIMITER: char = '\n';

/// Records sent by clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Bid submission.
    Bid {
        /// Bidder identity.
        user: String,
        /// Offered amount.
        value: f64,
    },
}

/// Records sent by the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    /// Greeting sent once to a freshly accepted connection.
    Welcome {
        /// Item being auctioned.
        item_name: String,
        /// Free-text item description.
        description: String,
        /// Floor price of the round.
        starting_price: f64,
        /// Highest accepted bid so far, or the starting price.
        current_price: f64,
        /// Owner of the current price, if any bid was accepted.
        current_winner: Option<String>,
        /// Greeting text.
        message: String,
    },
    /// The round moved from armed to running.
    GameStart {
        /// Human-readable announcement.
        message: String,
        /// Round length in ticks.
        duration: u64,
    },
    /// A bid was accepted.
    NewPrice {
        /// Bidder who now holds the price.
        user: String,
        /// The new current price.
        value: f64,
        /// Human-readable announcement.
        message: String,
    },
    /// A bid was rejected; sent to the submitter only.
    Error {
        /// Why the bid was rejected, naming the price to beat.
        message: String,
    },
    /// Countdown progress.
    UpdateTimer {
        /// Ticks left in the round.
        remaining: u64,
    },
    /// One of the warning thresholds was reached.
    Warning {
        /// Human-readable warning.
        message: String,
        /// Ticks left in the round.
        remaining: u64,
    },
    /// The round ended with a qualifying bid.
    Winner {
        /// Winning bidder.
        user: String,
        /// Winning price.
        value: f64,
        /// Human-readable announcement.
        message: String,
    },
    /// The round ended without a qualifying bid.
    NoWinner {
        /// Human-readable announcement.
        message: String,
    },
    /// The server is about to close every connection.
    Shutdown {
        /// Farewell text.
        message: String,
    },
}

impl ServerMessage {
    /// Builds the greeting from a state snapshot.
    pub fn welcome(snapshot: &AuctionSnapshot, label: &str) -> Self {
        ServerMessage::Welcome {
            item_name: snapshot.item_name.clone(),
            description: snapshot.description.clone(),
            starting_price: snapshot.starting_price,
            current_price: snapshot.current_price,
            current_winner: snapshot.current_winner.clone(),
            message: format!("Welcome {}!", label),
        }
    }

    /// Announcement of an accepted bid.
    pub fn new_price(bid: &AcceptedBid) -> Self {
        ServerMessage::NewPrice {
            user: bid.user.clone(),
            value: bid.value,
            message: format!("{} bid ${}", bid.user, bid.value),
        }
    }

    /// Private reply to a rejected bid.
    pub fn rejected(rejection: &BidRejection) -> Self {
        ServerMessage::Error {
            message: rejection.to_string(),
        }
    }

    /// Announcement that the round is running for `duration` ticks.
    pub fn game_start(duration: u64) -> Self {
        ServerMessage::GameStart {
            message: "The auction has started!".to_string(),
            duration,
        }
    }

    /// Countdown progress after one tick.
    pub fn update_timer(remaining: u64) -> Self {
        ServerMessage::UpdateTimer { remaining }
    }

    /// Warning sent when a threshold is reached.
    pub fn warning(remaining: u64) -> Self {
        ServerMessage::Warning {
            message: format!("Warning: {} seconds left!", remaining),
            remaining,
        }
    }

    /// Outcome of a round, derived from the final snapshot.
    pub fn outcome(snapshot: &AuctionSnapshot) -> Self {
        match snapshot.winner() {
            Some((user, value)) => ServerMessage::Winner {
                user: user.to_string(),
                value,
                message: format!("Congratulations {}, you won with ${}!", user, value),
            },
            None => ServerMessage::NoWinner {
                message: "The auction ended without any bids.".to_string(),
            },
        }
    }

    /// Notice sent once before connections are closed.
    pub fn shutdown() -> Self {
        ServerMessage::Shutdown {
            message: "Server is shutting down. Thanks for taking part!".to_string(),
        }
    }

    /// Wire name of this record's kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Welcome { .. } => "WELCOME",
            ServerMessage::GameStart { .. } => "GAME_START",
            ServerMessage::NewPrice { .. } => "NEW_PRICE",
            ServerMessage::Error { .. } => "ERROR",
            ServerMessage::UpdateTimer { .. } => "UPDATE_TIMER",
            ServerMessage::Warning { .. } => "WARNING",
            ServerMessage::Winner { .. } => "WINNER",
            ServerMessage::NoWinner { .. } => "NO_WINNER",
            ServerMessage::Shutdown { .. } => "SHUTDOWN",
        }
    }
}

/// Serializes a message into one newline-terminated record.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    let mut line =
        serde_json::to_string(message).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    line.push(RECORD_DELIMITER);
    Ok(line)
}

/// Decodes one inbound record. Surrounding whitespace is ignored.
pub fn decode_client_line(line: &str) -> Result<ClientMessage, ProtocolError> {
    let value: serde_json::Value = serde_json::from_str(line.trim())
        .map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| ProtocolError::Malformed("missing \"type\" field".into()))?
        .to_string();

    if kind != "BID" {
        return Err(ProtocolError::UnknownKind(kind));
    }

    let message: ClientMessage =
        serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    match &message {
        ClientMessage::Bid { user, .. } if user.trim().is_empty() => {
            Err(ProtocolError::Malformed("empty bidder identity".into()))
        }
        _ => Ok(message),
    }
}

/// Decodes one outbound record; used by clients.
pub fn decode_server_line(line: &str) -> Result<ServerMessage, ProtocolError> {
    serde_json::from_str(line.trim()).map_err(|e| ProtocolError::Malformed(e.to_string()))
}
