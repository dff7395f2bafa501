//! Process-scoped owner of the auction state, hub, timer and shutdown signal.

use crate::auction_state::AuctionState;
use crate::config::{AuctionConfig, ServerConfig};
use crate::connection::ConnectionSettings;
use crate::hub::AuctionHub;
use crate::shutdown::ShutdownSignal;
use crate::timer::{CountdownTimer, TimerSettings};

use std::sync::Arc;

/// Everything one round shares between the acceptor, the connection
/// workers and the countdown.
///
/// Built once per process and handed to each worker explicitly.
pub struct AuctionContext {
    /// The auction register.
    pub state: Arc<AuctionState>,
    /// Connected clients and broadcast fan-out.
    pub hub: Arc<AuctionHub>,
    /// Round countdown.
    pub timer: Arc<CountdownTimer>,
    /// Process-wide shutdown request.
    pub shutdown: ShutdownSignal,
    /// Timeouts applied to every connection.
    pub connection: ConnectionSettings,
}

impl AuctionContext {
    /// Wires state, hub and timer together for the given round.
    pub fn new(
        auction: &AuctionConfig,
        server: &ServerConfig,
        timer_settings: TimerSettings,
    ) -> Arc<Self> {
        let state = Arc::new(AuctionState::new(
            &auction.item_name,
            &auction.description,
            auction.starting_price,
        ));
        let hub = Arc::new(AuctionHub::new());
        let shutdown = ShutdownSignal::new();
        let timer = Arc::new(CountdownTimer::new(
            auction.auction_duration,
            timer_settings,
            hub.clone(),
            state.clone(),
            shutdown.clone(),
        ));

        Arc::new(Self {
            state,
            hub,
            timer,
            shutdown,
            connection: ConnectionSettings {
                idle_timeout: server.idle_timeout,
                send_timeout: server.send_timeout,
            },
        })
    }
}
