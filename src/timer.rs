//! Countdown timer state machine.
//!
//! [`Timer`] is pure state plus transitions. [`TimerHandle`] wraps one in a
//! mutex for shared use and broadcasts every observable transition, so view
//! layers render from events instead of polling. Wall-clock time enters only
//! through [`TimerHandle::run_ticker`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

/// Configuration for the countdown and its wall-clock driver.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimerConfig {
    /// Seconds on the clock after a reset.
    pub initial_secs: u32,
    /// Milliseconds between countdown ticks.
    pub tick_ms: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            initial_secs: 60, // one-minute countdown
            tick_ms: 1_000,   // tick on wall-clock seconds
        }
    }
}

impl TimerConfig {
    pub fn with_initial_secs(mut self, secs: u32) -> Self {
        self.initial_secs = secs;
        self
    }

    pub fn with_tick_ms(mut self, ms: u64) -> Self {
        self.tick_ms = ms.max(1); // zero would spin the ticker
        self
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/// Phase of the countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerPhase {
    /// Not counting. Remaining time holds whatever a pause left behind.
    Idle,
    /// Counting down once per tick.
    Running,
    /// Reached zero. Only a reset leaves this phase.
    Expired,
}

impl std::fmt::Display for TimerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimerPhase::Idle => write!(f, "idle"),
            TimerPhase::Running => write!(f, "running"),
            TimerPhase::Expired => write!(f, "expired"),
        }
    }
}

/// Broadcast on every transition that changed the timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    Started { remaining_secs: u32 },
    Paused { remaining_secs: u32 },
    Tick { remaining_secs: u32 },
    Expired,
    Reset { remaining_secs: u32 },
}

/// Point-in-time view of the timer for polling consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerSnapshot {
    pub phase: TimerPhase,
    pub remaining_secs: u32,
    pub display: String,
}

/// Pure countdown state machine.
///
/// `stop` pauses and keeps the remaining time; `reset` is the explicit way
/// back to the configured duration. Transitions return the event they caused,
/// or `None` when the call was a no-op.
#[derive(Debug, Clone)]
pub struct Timer {
    initial_secs: u32,
    remaining_secs: u32,
    phase: TimerPhase,
}

impl Timer {
    pub fn new(initial_secs: u32) -> Self {
        Self {
            initial_secs,
            remaining_secs: initial_secs,
            phase: if initial_secs == 0 {
                TimerPhase::Expired
            } else {
                TimerPhase::Idle
            },
        }
    }

    pub fn phase(&self) -> TimerPhase {
        self.phase
    }

    pub fn remaining_secs(&self) -> u32 {
        self.remaining_secs
    }

    pub fn is_running(&self) -> bool {
        self.phase == TimerPhase::Running
    }

    /// Begin (or resume) the countdown. No-op while already running or when
    /// nothing remains to count.
    pub fn start(&mut self) -> Option<TimerEvent> {
        if self.is_running() || self.remaining_secs == 0 {
            return None;
        }
        self.phase = TimerPhase::Running;
        Some(TimerEvent::Started {
            remaining_secs: self.remaining_secs,
        })
    }

    /// Pause the countdown, keeping the remaining time for a later start.
    pub fn stop(&mut self) -> Option<TimerEvent> {
        if !self.is_running() {
            return None;
        }
        self.phase = TimerPhase::Idle;
        Some(TimerEvent::Paused {
            remaining_secs: self.remaining_secs,
        })
    }

    /// Advance one second of wall-clock time.
    ///
    /// Only acts while running, so a tick that raced a pause applies nothing.
    /// Running implies `remaining_secs > 0`, hence no underflow.
    pub fn tick(&mut self) -> Option<TimerEvent> {
        if !self.is_running() {
            return None;
        }
        self.remaining_secs -= 1;
        if self.remaining_secs == 0 {
            self.phase = TimerPhase::Expired;
            Some(TimerEvent::Expired)
        } else {
            Some(TimerEvent::Tick {
                remaining_secs: self.remaining_secs,
            })
        }
    }

    /// Return to the configured duration from any phase.
    pub fn reset(&mut self) -> TimerEvent {
        self.remaining_secs = self.initial_secs;
        self.phase = if self.initial_secs == 0 {
            TimerPhase::Expired
        } else {
            TimerPhase::Idle
        };
        TimerEvent::Reset {
            remaining_secs: self.remaining_secs,
        }
    }

    /// Clock-style rendering of the remaining time.
    pub fn display(&self) -> String {
        format_clock(self.remaining_secs)
    }
}

/// Format seconds as `M:SS`: minutes unpadded, seconds always two digits.
/// 0 renders as "0:00", 65 as "1:05".
pub fn format_clock(secs: u32) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}

/// Shared, cloneable handle around a [`Timer`].
///
/// The mutex serializes ticks against start/stop, so a tick can never land
/// after a pause that logically preceded it. Events are published while the
/// lock is still held, so subscribers see transitions in the order they
/// applied.
#[derive(Clone)]
pub struct TimerHandle {
    inner: Arc<Mutex<Timer>>,
    events: broadcast::Sender<TimerEvent>,
}

impl TimerHandle {
    pub fn new(initial_secs: u32) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Mutex::new(Timer::new(initial_secs))),
            events,
        }
    }

    /// Subscribe to transition events.
    pub fn subscribe(&self) -> broadcast::Receiver<TimerEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        let timer = self.inner.lock();
        TimerSnapshot {
            phase: timer.phase(),
            remaining_secs: timer.remaining_secs(),
            display: timer.display(),
        }
    }

    pub fn start(&self) {
        let mut timer = self.inner.lock();
        let event = timer.start();
        self.publish(event);
    }

    pub fn stop(&self) {
        let mut timer = self.inner.lock();
        let event = timer.stop();
        self.publish(event);
    }

    pub fn tick(&self) {
        let mut timer = self.inner.lock();
        let event = timer.tick();
        self.publish(event);
    }

    pub fn reset(&self) {
        let mut timer = self.inner.lock();
        let event = timer.reset();
        self.publish(Some(event));
    }

    /// Callers still hold the state lock here; `publish` must never lock
    /// `inner` or the handle deadlocks.
    fn publish(&self, event: Option<TimerEvent>) {
        if let Some(event) = event {
            debug!(?event, "timer transition");
            // Send fails only when nobody is subscribed; that is fine.
            let _ = self.events.send(event);
        }
    }

    /// Drive `tick` once per `period` until the stop signal flips to true or
    /// its sender goes away.
    ///
    /// The ticker runs regardless of phase. Ticks while idle or expired apply
    /// nothing, which keeps pause exact under concurrency.
    pub async fn run_ticker(self, period: Duration, mut stop_rx: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first interval tick completes immediately; consume it so the
        // first countdown step lands one full period in.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick();
                }
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }
        info!("timer ticker stopped");
    }
}
