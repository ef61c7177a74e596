//! Idle/activity state machine.
//!
//! The monitor tracks the time of the last accepted activity signal and
//! keeps two timers armed relative to it: a pre-timeout warning and the idle
//! timeout itself. Events are delivered synchronously through an
//! [`EventDispatcher`].
//!
//! ```text
//!            start()                      timeout elapsed
//!  STOPPED ─────────▶ RUNNING-ACTIVE ───────────────────────▶ RUNNING-IDLE
//!     ▲                  │     ▲                                  │
//!     └──── stop() ──────┘     └──── activity / reset() ──────────┘
//! ```
//!
//! The idle flag survives `stop()`; only activity or `reset()` clears it.
//! Timers run on the ambient tokio runtime.

use crate::collector::{ActivitySignal, SignalKind};
use crate::core::events::{EventDispatcher, EventKind, GuardianEvent, HandlerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// How long before the timeout the warning fires.
pub const WARNING_LEAD: Duration = Duration::from_secs(60);

/// Monitor settings.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub idle_timeout_minutes: u32,
    /// Signal kinds treated as user activity
    pub activity_events: Vec<SignalKind>,
    /// Activity closer than this to the last accepted activity is ignored
    pub activity_throttle: Duration,
}

impl MonitorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.idle_timeout_minutes) * 60)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            idle_timeout_minutes: 15,
            activity_events: SignalKind::DEFAULT_ACTIVITY.to_vec(),
            activity_throttle: Duration::from_millis(1000),
        }
    }
}

/// Coarse monitor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MonitorStatus {
    Stopped,
    Active,
    Idle,
}

/// Snapshot of the monitor's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardianState {
    pub last_activity: DateTime<Utc>,
    pub is_idle: bool,
    pub is_running: bool,
}

impl GuardianState {
    pub fn status(&self) -> MonitorStatus {
        match (self.is_running, self.is_idle) {
            (false, _) => MonitorStatus::Stopped,
            (true, false) => MonitorStatus::Active,
            (true, true) => MonitorStatus::Idle,
        }
    }
}

struct MonitorState {
    last_activity: Instant,
    last_activity_at: DateTime<Utc>,
    is_idle: bool,
    is_running: bool,
    listeners: BTreeSet<SignalKind>,
    timeout_task: Option<JoinHandle<()>>,
    warning_tasks: Vec<JoinHandle<()>>,
    /// Bumped whenever the timeout is re-armed or cancelled. A timeout task
    /// only acts if the epoch it was spawned with is still current, since
    /// `abort()` cannot stop a task that already woke up.
    timeout_epoch: u64,
    /// Bumped by `stop()`; warnings from an earlier run stay silent.
    cancel_epoch: u64,
}

impl MonitorState {
    fn cancel_timers(&mut self) {
        self.timeout_epoch = self.timeout_epoch.wrapping_add(1);
        self.cancel_epoch = self.cancel_epoch.wrapping_add(1);
        if let Some(task) = self.timeout_task.take() {
            task.abort();
        }
        for task in self.warning_tasks.drain(..) {
            task.abort();
        }
    }
}

struct Inner {
    config: MonitorConfig,
    state: Mutex<MonitorState>,
    events: EventDispatcher,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.state().cancel_timers();
    }
}

/// Idle/activity monitor. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct IdleMonitor {
    inner: Arc<Inner>,
}

/// Non-owning monitor handle for use inside event handlers.
#[derive(Clone)]
pub struct WeakIdleMonitor {
    inner: Weak<Inner>,
}

impl WeakIdleMonitor {
    pub fn upgrade(&self) -> Option<IdleMonitor> {
        IdleMonitor::upgrade(&self.inner)
    }
}

impl IdleMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(MonitorState {
                    last_activity: Instant::now(),
                    last_activity_at: Utc::now(),
                    is_idle: false,
                    is_running: false,
                    listeners: BTreeSet::new(),
                    timeout_task: None,
                    warning_tasks: Vec::new(),
                    timeout_epoch: 0,
                    cancel_epoch: 0,
                }),
                events: EventDispatcher::new(),
            }),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    /// Handle that does not keep the monitor alive.
    pub fn downgrade(&self) -> WeakIdleMonitor {
        WeakIdleMonitor {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Register an event handler.
    ///
    /// Handlers that need the monitor should capture [`IdleMonitor::downgrade`]
    /// rather than a clone; a clone held by a handler keeps the monitor and
    /// its timers alive for as long as the handler stays registered.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&GuardianEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, handler)
    }

    /// Remove an event handler.
    pub fn off(&self, kind: EventKind, id: HandlerId) -> bool {
        self.inner.events.off(kind, id)
    }

    /// Begin monitoring. No-op if already running.
    ///
    /// The idle flag and last-activity time are left as they are.
    pub fn start(&self) {
        {
            let mut state = self.inner.state();
            if state.is_running {
                return;
            }
            state.is_running = true;
            state.listeners = self
                .inner
                .config
                .activity_events
                .iter()
                .copied()
                .chain(std::iter::once(SignalKind::VisibilityChange))
                .collect();
            debug!(listeners = state.listeners.len(), "Idle monitor started");
        }
        self.arm_timers();
    }

    /// Pause monitoring. No-op if already stopped.
    ///
    /// Removes all listeners and cancels pending timers; idle state and the
    /// last-activity time are kept.
    pub fn stop(&self) {
        let mut state = self.inner.state();
        if !state.is_running {
            return;
        }
        state.is_running = false;
        state.listeners.clear();
        state.cancel_timers();
        debug!("Idle monitor stopped");
    }

    /// Record activity now, clearing idle state, and re-arm the timers.
    ///
    /// Works whether or not the monitor is running, so callers can use it as
    /// a manual "still here" override.
    pub fn reset(&self) {
        let was_idle = {
            let mut state = self.inner.state();
            state.last_activity = Instant::now();
            state.last_activity_at = Utc::now();
            std::mem::replace(&mut state.is_idle, false)
        };
        if was_idle {
            self.inner.events.emit(&GuardianEvent::Active);
        }
        self.arm_timers();
    }

    /// Entry point for signals from the host.
    ///
    /// Signals of a kind with no registered listener (including every signal
    /// while stopped) are dropped.
    pub fn handle_signal(&self, signal: ActivitySignal) {
        if !self.inner.state().listeners.contains(&signal.kind()) {
            return;
        }
        match signal {
            ActivitySignal::VisibilityChange { hidden } => self.on_visibility_change(hidden),
            _ => self.on_activity(false),
        }
    }

    fn on_activity(&self, bypass_throttle: bool) {
        let was_idle = {
            let mut state = self.inner.state();
            let now = Instant::now();
            if !bypass_throttle
                && now.duration_since(state.last_activity) < self.inner.config.activity_throttle
            {
                return;
            }
            state.last_activity = now;
            state.last_activity_at = Utc::now();
            std::mem::replace(&mut state.is_idle, false)
        };
        if was_idle {
            debug!("Activity resumed");
            self.inner.events.emit(&GuardianEvent::Active);
        }
        self.arm_timers();
    }

    fn on_visibility_change(&self, hidden: bool) {
        self.inner
            .events
            .emit(&GuardianEvent::VisibilityChange { hidden });
        if hidden {
            return;
        }

        let overdue = {
            let state = self.inner.state();
            state.last_activity.elapsed() > self.inner.config.timeout() && !state.is_idle
        };
        if overdue {
            // The timer could not fire while the host was suspended.
            self.trigger_idle();
        } else {
            self.on_activity(true);
        }
    }

    /// Mark the session idle and emit `Idle`. No-op if already idle.
    pub fn trigger_idle(&self) {
        self.go_idle(None);
    }

    /// Timeout expiry for the timer armed at `epoch`. Ignored if the timer
    /// has since been re-armed or cancelled.
    fn expire_timeout(&self, epoch: u64) {
        self.go_idle(Some(epoch));
    }

    fn go_idle(&self, epoch: Option<u64>) {
        let event = {
            let mut state = self.inner.state();
            if epoch.is_some_and(|epoch| epoch != state.timeout_epoch) {
                debug!("Ignoring superseded idle timeout");
                return;
            }
            if state.is_idle {
                return;
            }
            state.is_idle = true;
            GuardianEvent::Idle {
                idle_since: state.last_activity_at,
                timeout_minutes: self.inner.config.idle_timeout_minutes,
            }
        };
        debug!("Session idle");
        self.inner.events.emit(&event);
    }

    /// Schedule the warning and the idle timeout relative to now.
    ///
    /// Only the previous timeout is cancelled. Warnings armed earlier stay
    /// scheduled and still fire.
    fn arm_timers(&self) {
        if tokio::runtime::Handle::try_current().is_err() {
            warn!("No tokio runtime; idle timers not armed");
            return;
        }

        let timeout = self.inner.config.timeout();
        let now = Instant::now();
        let mut state = self.inner.state();

        if let Some(task) = state.timeout_task.take() {
            task.abort();
        }
        state.timeout_epoch = state.timeout_epoch.wrapping_add(1);
        let timeout_epoch = state.timeout_epoch;
        let cancel_epoch = state.cancel_epoch;
        state.warning_tasks.retain(|task| !task.is_finished());

        if let Some(delay) = timeout.checked_sub(WARNING_LEAD).filter(|d| !d.is_zero()) {
            let inner = Arc::downgrade(&self.inner);
            state.warning_tasks.push(tokio::spawn(async move {
                tokio::time::sleep_until(now + delay).await;
                if let Some(monitor) = Self::upgrade(&inner) {
                    if monitor.inner.state().cancel_epoch != cancel_epoch {
                        return;
                    }
                    monitor.inner.events.emit(&GuardianEvent::Warning {
                        seconds_remaining: WARNING_LEAD.as_secs(),
                    });
                }
            }));
        }

        let inner = Arc::downgrade(&self.inner);
        state.timeout_task = Some(tokio::spawn(async move {
            tokio::time::sleep_until(now + timeout).await;
            if let Some(monitor) = Self::upgrade(&inner) {
                monitor.expire_timeout(timeout_epoch);
            }
        }));
    }

    fn upgrade(inner: &Weak<Inner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    pub fn is_idle(&self) -> bool {
        self.inner.state().is_idle
    }

    pub fn is_running(&self) -> bool {
        self.inner.state().is_running
    }

    /// Time left before the idle timeout, never negative.
    pub fn time_remaining(&self) -> Duration {
        let elapsed = self.inner.state().last_activity.elapsed();
        self.inner.config.timeout().saturating_sub(elapsed)
    }

    pub fn state(&self) -> GuardianState {
        let state = self.inner.state();
        GuardianState {
            last_activity: state.last_activity_at,
            is_idle: state.is_idle,
            is_running: state.is_running,
        }
    }

    pub fn status(&self) -> MonitorStatus {
        self.state().status()
    }
}

impl std::fmt::Debug for IdleMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdleMonitor")
            .field("config", &self.inner.config)
            .field("state", &self.state())
            .field("events", &self.inner.events)
            .finish()
    }
}
