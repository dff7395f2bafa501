//! Shared auction register and the bid-acceptance rule.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// The mutable half of the auction: high bid and its owner.
///
/// Kept behind a single mutex so price and winner can never be observed
/// half-updated.
#[derive(Debug)]
struct Register {
    current_price: f64,
    current_winner: Option<String>,
}

/// Consistent point-in-time copy of the whole auction state.
#[derive(Clone, Debug, PartialEq)]
pub struct AuctionSnapshot {
    /// Name of the item being auctioned.
    pub item_name: String,
    /// Free-text description of the item.
    pub description: String,
    /// Floor price; a winning bid must exceed it.
    pub starting_price: f64,
    /// Highest accepted bid, or the starting price before any bid.
    pub current_price: f64,
    /// Owner of the highest bid, `None` until the first accepted bid.
    pub current_winner: Option<String>,
}

impl AuctionSnapshot {
    /// Returns the winning bidder and price if the round has a qualifying bid.
    ///
    /// A winner qualifies only if the price strictly exceeds the starting price.
    pub fn winner(&self) -> Option<(&str, f64)> {
        match &self.current_winner {
            Some(user) if self.current_price > self.starting_price => {
                Some((user.as_str(), self.current_price))
            }
            _ => None,
        }
    }
}

/// A bid that became the new high bid.
#[derive(Clone, Debug, PartialEq)]
pub struct AcceptedBid {
    /// Identity of the bidder.
    pub user: String,
    /// The new current price.
    pub value: f64,
}

/// A bid that did not beat the current price.
///
/// Carries the price that beat it so the bidder can retry meaningfully.
#[derive(Clone, Debug, PartialEq)]
pub struct BidRejection {
    /// Current price at the moment the bid was evaluated.
    pub current_price: f64,
    /// Amount that was offered.
    pub offered: f64,
}

impl fmt::Display for BidRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.offered.is_finite() {
            write!(
                f,
                "Bid of ${} rejected: it must be higher than the current price ${}",
                self.offered, self.current_price
            )
        } else {
            write!(
                f,
                "Bid rejected: amount must be a finite number higher than the current price ${}",
                self.current_price
            )
        }
    }
}

/// Shared auction register for a single round.
///
/// Item name, description and starting price are fixed at construction.
/// Current price and winner change only through [`AuctionState::try_bid`].
#[derive(Debug)]
pub struct AuctionState {
    item_name: String,
    description: String,
    starting_price: f64,
    register: Mutex<Register>,
}

impl AuctionState {
    /// Creates a fresh round with no bids.
    pub fn new(item_name: &str, description: &str, starting_price: f64) -> Self {
        log::info!(
            "Auction initialized: '{}' starting at ${} ({})",
            item_name,
            starting_price,
            description
        );

        Self {
            item_name: item_name.to_string(),
            description: description.to_string(),
            starting_price,
            register: Mutex::new(Register {
                current_price: starting_price,
                current_winner: None,
            }),
        }
    }

    /// Evaluates a bid against the current price and applies it if it wins.
    ///
    /// The compare-and-assign runs in one critical section, so concurrent
    /// bids serialize and the first higher bid to take the lock wins.
    /// A bid equal to the current price is rejected. Non-finite amounts are
    /// rejected without touching the state.
    pub fn try_bid(&self, user: &str, value: f64) -> Result<AcceptedBid, BidRejection> {
        let mut register = self.lock();

        if !value.is_finite() || value <= register.current_price {
            log::debug!(
                "Rejected bid from {}: ${} (current ${})",
                user,
                value,
                register.current_price
            );
            return Err(BidRejection {
                current_price: register.current_price,
                offered: value,
            });
        }

        register.current_price = value;
        register.current_winner = Some(user.to_string());
        drop(register);

        log::info!("Accepted bid: {} = ${}", user, value);
        Ok(AcceptedBid {
            user: user.to_string(),
            value,
        })
    }

    /// Returns all fields taken under one lock acquisition.
    pub fn snapshot(&self) -> AuctionSnapshot {
        let register = self.lock();
        AuctionSnapshot {
            item_name: self.item_name.clone(),
            description: self.description.clone(),
            starting_price: self.starting_price,
            current_price: register.current_price,
            current_winner: register.current_winner.clone(),
        }
    }

    /// Clears the round back to the starting price with no winner.
    pub fn reset(&self) {
        let mut register = self.lock();
        register.current_price = self.starting_price;
        register.current_winner = None;
        log::info!("Auction reset to ${}", self.starting_price);
    }

    // Critical sections never panic, so a poisoned lock still holds a
    // consistent register.
    fn lock(&self) -> MutexGuard<'_, Register> {
        self.register.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
