//! Round countdown driving GAME_START, timer updates, warnings and the outcome.

use crate::auction_state::AuctionState;
use crate::defs::{
    RESULT_GRACE_TICKS, SHUTDOWN_GRACE_TICKS, TICK_PERIOD_MSEC, WARNING_THRESHOLDS,
};
use crate::errors::TimerError;
use crate::hub::AuctionHub;
use crate::message::ServerMessage;
use crate::shutdown::{ShutdownReason, ShutdownSignal};

use std::convert::Infallible;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Lifecycle of a round as seen by the countdown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundPhase {
    /// Accepting connections, countdown not started.
    Armed,
    /// Countdown active.
    Running,
    /// Outcome decided, shutdown in progress.
    Ended,
    /// Stopped externally before the round could end.
    Stopped,
}

/// Timing knobs of the countdown.
#[derive(Clone, Debug)]
pub struct TimerSettings {
    /// Length of one time unit.
    pub tick: Duration,
    /// Remaining-time values that trigger a `WARNING`.
    pub warning_thresholds: Vec<u64>,
    /// Ticks between the outcome and the `SHUTDOWN` notice.
    pub result_grace_ticks: u32,
    /// Ticks between the `SHUTDOWN` notice and the shutdown request.
    pub shutdown_grace_ticks: u32,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(TICK_PERIOD_MSEC),
            warning_thresholds: WARNING_THRESHOLDS.to_vec(),
            result_grace_ticks: RESULT_GRACE_TICKS,
            shutdown_grace_ticks: SHUTDOWN_GRACE_TICKS,
        }
    }
}

#[derive(Debug)]
struct Control {
    phase: RoundPhase,
    remaining: u64,
    start_requested: bool,
    stop_requested: bool,
}

/// Background clock that drives the round from armed to ended.
///
/// The worker thread is the only writer of the phase. `start_round` and
/// `stop` hand their requests over through the same mutex and condvar the
/// worker waits on between ticks, so both take effect within one wakeup.
pub struct CountdownTimer {
    duration: u64,
    settings: TimerSettings,
    hub: Arc<AuctionHub>,
    state: Arc<AuctionState>,
    shutdown: ShutdownSignal,
    control: Mutex<Control>,
    wake: Condvar,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CountdownTimer {
    /// Creates an armed timer for a round of `duration` ticks. Nothing
    /// runs until [`spawn`](Self::spawn).
    pub fn new(
        duration: u64,
        settings: TimerSettings,
        hub: Arc<AuctionHub>,
        state: Arc<AuctionState>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            duration,
            settings,
            hub,
            state,
            shutdown,
            control: Mutex::new(Control {
                phase: RoundPhase::Armed,
                remaining: duration,
                start_requested: false,
                stop_requested: false,
            }),
            wake: Condvar::new(),
            worker: Mutex::new(None),
        }
    }

    /// Spawns the worker thread. The round stays armed until `start_round`.
    pub fn spawn(self: &Arc<Self>) -> Result<(), TimerError> {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.is_some() {
            return Err(TimerError::AlreadySpawned);
        }

        let timer = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("countdown".into())
            .spawn(move || timer.run())
            .map_err(|e| TimerError::Spawn(e.to_string()))?;

        log::info!("Countdown armed ({} ticks), waiting for start", self.duration);
        *worker = Some(handle);
        Ok(())
    }

    /// Delivers the external start signal.
    ///
    /// Returns `false` if the round was already started or stopped.
    pub fn start_round(&self) -> bool {
        let mut control = self.lock_control();
        if control.phase != RoundPhase::Armed || control.start_requested || control.stop_requested
        {
            log::warn!("Ignoring start request in phase {:?}", control.phase);
            return false;
        }
        control.start_requested = true;
        self.wake.notify_all();
        log::info!("Start signal received");
        true
    }

    /// Stops the countdown without running end-of-round logic, then joins
    /// the worker. Safe to call repeatedly and from the worker itself.
    pub fn stop(&self) {
        {
            let mut control = self.lock_control();
            if !control.stop_requested {
                log::info!("Stopping countdown in phase {:?}", control.phase);
            }
            control.stop_requested = true;
            self.wake.notify_all();
        }

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::error!("Countdown thread panicked");
            }
            log::debug!("Countdown thread joined");
        }
    }

    /// Current phase of the round.
    pub fn phase(&self) -> RoundPhase {
        self.lock_control().phase
    }

    /// Remaining time units of the round.
    pub fn remaining(&self) -> u64 {
        self.lock_control().remaining
    }

    /// Remaining time as `MM:SS`.
    pub fn format_remaining(&self) -> String {
        let remaining = self.remaining();
        format!("{:02}:{:02}", remaining / 60, remaining % 60)
    }

    fn run(&self) {
        if !self.wait_for_start() {
            self.set_phase(RoundPhase::Stopped);
            log::info!("Countdown stopped before the round started");
            return;
        }

        self.set_phase(RoundPhase::Running);
        log::info!("Round started, counting down {} ticks", self.duration);
        self.hub.broadcast(&ServerMessage::game_start(self.duration));

        let mut fired: Vec<u64> = Vec::new();
        let started = Instant::now();
        let mut ticks: u32 = 0;

        loop {
            if self.remaining() == 0 {
                break;
            }

            ticks += 1;
            if self.wait_until(started + self.settings.tick * ticks) {
                self.set_phase(RoundPhase::Stopped);
                log::info!("Countdown stopped with {} ticks left", self.remaining());
                return;
            }

            let remaining = {
                let mut control = self.lock_control();
                control.remaining -= 1;
                control.remaining
            };

            self.hub.broadcast(&ServerMessage::update_timer(remaining));

            if self.settings.warning_thresholds.contains(&remaining) && !fired.contains(&remaining)
            {
                fired.push(remaining);
                log::warn!("{} ticks left", remaining);
                self.hub.broadcast(&ServerMessage::warning(remaining));
            }

            if remaining % 10 == 0 {
                log::info!("{} ticks left ({} clients)", remaining, self.hub.count());
            }
        }

        self.finish_round();
    }

    fn finish_round(&self) {
        self.set_phase(RoundPhase::Ended);

        // Read the register under the hub's ordering lock so the outcome
        // follows every NEW_PRICE it accounts for.
        let published = self.hub.broadcast_with(|| {
            let snapshot = self.state.snapshot();
            Ok::<_, Infallible>((ServerMessage::outcome(&snapshot), snapshot))
        });
        let snapshot = match published {
            Ok(snapshot) => snapshot,
            Err(never) => match never {},
        };

        match snapshot.winner() {
            Some((user, value)) => log::info!("Round over, winner: {} at ${}", user, value),
            None => log::info!("Round over, no winner"),
        }

        if self.sleep_ticks(self.settings.result_grace_ticks) {
            log::info!("Countdown stopped during result grace period");
            return;
        }

        self.hub.announce_shutdown();

        if self.sleep_ticks(self.settings.shutdown_grace_ticks) {
            log::info!("Countdown stopped during shutdown grace period");
            return;
        }

        self.shutdown.trigger(ShutdownReason::RoundEnded);
    }

    /// Blocks until started or stopped; `true` means started.
    fn wait_for_start(&self) -> bool {
        let control = self.lock_control();
        let control = self
            .wake
            .wait_while(control, |c| !c.start_requested && !c.stop_requested)
            .unwrap_or_else(PoisonError::into_inner);
        !control.stop_requested
    }

    /// Sleeps until `deadline`; `true` means a stop arrived first.
    fn wait_until(&self, deadline: Instant) -> bool {
        let mut control = self.lock_control();
        loop {
            if control.stop_requested {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .wake
                .wait_timeout(control, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            control = guard;
        }
    }

    fn sleep_ticks(&self, ticks: u32) -> bool {
        self.wait_until(Instant::now() + self.settings.tick * ticks)
    }

    fn set_phase(&self, phase: RoundPhase) {
        self.lock_control().phase = phase;
    }

    fn lock_control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
