//! Session observer.
//!
//! Mirrors monitor events into a `watch` channel so UI-style consumers can
//! read the latest session state, keeps transition counters, and optionally
//! forwards transitions to the incident reporter.

use crate::core::{EventKind, GuardianEvent, HandlerId, IdleMonitor, WeakIdleMonitor, WARNING_LEAD};
use crate::reporter::IncidentReporter;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::debug;

/// Latest observed session state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub is_idle: bool,
    pub hidden: bool,
    /// Set by a warning, cleared by the next idle or active transition
    pub warning_seconds: Option<u64>,
    pub last_event_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct ObserverState {
    snapshot: watch::Sender<SessionSnapshot>,
    idle_transitions: AtomicU64,
    active_transitions: AtomicU64,
    warnings: AtomicU64,
    visibility_changes: AtomicU64,
    started_at: DateTime<Utc>,
}

impl ObserverState {
    fn record(&self, event: &GuardianEvent) {
        let now = Utc::now();
        match event {
            GuardianEvent::Idle { .. } => {
                self.idle_transitions.fetch_add(1, Ordering::Relaxed);
                self.snapshot.send_modify(|s| {
                    s.is_idle = true;
                    s.warning_seconds = None;
                    s.last_event_at = Some(now);
                });
            }
            GuardianEvent::Active => {
                self.active_transitions.fetch_add(1, Ordering::Relaxed);
                self.snapshot.send_modify(|s| {
                    s.is_idle = false;
                    s.warning_seconds = None;
                    s.last_event_at = Some(now);
                });
            }
            GuardianEvent::VisibilityChange { hidden } => {
                self.visibility_changes.fetch_add(1, Ordering::Relaxed);
                self.snapshot.send_modify(|s| {
                    s.hidden = *hidden;
                    s.last_event_at = Some(now);
                });
            }
            GuardianEvent::Warning { seconds_remaining } => {
                self.warnings.fetch_add(1, Ordering::Relaxed);
                self.snapshot.send_modify(|s| {
                    s.warning_seconds = Some(*seconds_remaining);
                    s.last_event_at = Some(now);
                });
            }
        }
    }
}

/// Whether a warning still reflects the current timeout.
///
/// The monitor does not cancel warnings armed before later activity, so a
/// warning can fire while most of the timeout is still ahead.
fn is_current_warning(monitor: &WeakIdleMonitor) -> bool {
    monitor
        .upgrade()
        .map_or(true, |monitor| monitor.time_remaining() <= WARNING_LEAD)
}

/// Forward a transition to the reporter on the ambient runtime.
fn forward(reporter: &IncidentReporter, event: &GuardianEvent) {
    let mut payload = Map::new();
    let level = match event {
        GuardianEvent::Idle {
            idle_since,
            timeout_minutes,
        } => {
            payload.insert("idleSince".to_string(), Value::from(idle_since.to_rfc3339()));
            payload.insert("timeoutMinutes".to_string(), Value::from(*timeout_minutes));
            Some(("session.idle", true))
        }
        GuardianEvent::Active => Some(("session.active", false)),
        GuardianEvent::Warning { seconds_remaining } => {
            payload.insert(
                "secondsRemaining".to_string(),
                Value::from(*seconds_remaining),
            );
            Some(("session.warning", false))
        }
        GuardianEvent::VisibilityChange { .. } => None,
    };
    let Some((name, elevated)) = level else {
        return;
    };

    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        debug!(event = name, "No tokio runtime; transition not reported");
        return;
    };
    let reporter = reporter.clone();
    runtime.spawn(async move {
        if elevated {
            reporter.warning(name, payload).await;
        } else {
            reporter.info(name, payload).await;
        }
    });
}

/// Session statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub idle_transitions: u64,
    pub active_transitions: u64,
    pub warnings: u64,
    pub visibility_changes: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    idle_transitions: u64,
    active_transitions: u64,
    warnings: u64,
    visibility_changes: u64,
    last_updated: DateTime<Utc>,
}

/// Handle for an attached observer. Dropping it detaches the handlers.
pub struct SessionObserver {
    monitor: IdleMonitor,
    state: Arc<ObserverState>,
    registrations: Mutex<Vec<(EventKind, HandlerId)>>,
    persist_path: Option<PathBuf>,
}

impl SessionObserver {
    /// Register handlers for every event kind on `monitor`.
    pub fn attach(monitor: &IdleMonitor, reporter: Option<IncidentReporter>) -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot {
            is_idle: monitor.is_idle(),
            ..SessionSnapshot::default()
        });
        let state = Arc::new(ObserverState {
            snapshot,
            idle_transitions: AtomicU64::new(0),
            active_transitions: AtomicU64::new(0),
            warnings: AtomicU64::new(0),
            visibility_changes: AtomicU64::new(0),
            started_at: Utc::now(),
        });

        let registrations = EventKind::ALL
            .into_iter()
            .map(|kind| {
                let state = state.clone();
                let reporter = reporter.clone();
                let handle = monitor.downgrade();
                let id = monitor.on(kind, move |event| {
                    if matches!(event, GuardianEvent::Warning { .. })
                        && !is_current_warning(&handle)
                    {
                        debug!("Ignoring stale timeout warning");
                        return;
                    }
                    state.record(event);
                    if let Some(reporter) = &reporter {
                        forward(reporter, event);
                    }
                });
                (kind, id)
            })
            .collect();

        Self {
            monitor: monitor.clone(),
            state,
            registrations: Mutex::new(registrations),
            persist_path: None,
        }
    }

    /// Persist counters to `path`, continuing from any totals saved there.
    pub fn with_persistence(mut self, path: PathBuf) -> Self {
        self.persist_path = Some(path);
        if let Err(e) = self.load() {
            debug!("Could not load previous session stats: {e}");
        }
        self
    }

    /// Receiver for snapshot updates.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.snapshot.borrow().clone()
    }

    /// Deregister all handlers. Idempotent.
    pub fn detach(&self) {
        let registrations = std::mem::take(
            &mut *self
                .registrations
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for (kind, id) in registrations {
            self.monitor.off(kind, id);
        }
    }

    pub fn is_attached(&self) -> bool {
        !self
            .registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            idle_transitions: self.state.idle_transitions.load(Ordering::Relaxed),
            active_transitions: self.state.active_transitions.load(Ordering::Relaxed),
            warnings: self.state.warnings.load(Ordering::Relaxed),
            visibility_changes: self.state.visibility_changes.load(Ordering::Relaxed),
            session_start: self.state.started_at,
            session_duration_secs: (Utc::now() - self.state.started_at)
                .num_seconds()
                .max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Session Statistics:\n\
             - Idle transitions: {}\n\
             - Active transitions: {}\n\
             - Timeout warnings: {}\n\
             - Visibility changes: {}\n\
             - Session duration: {} seconds\n\
             \n\
             {}",
            stats.idle_transitions,
            stats.active_transitions,
            stats.warnings,
            stats.visibility_changes,
            stats.session_duration_secs,
            crate::PRIVACY_NOTICE
        )
    }

    /// Save counters to disk. No-op without a persistence path.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let stats = self.stats();
        let persisted = PersistedStats {
            idle_transitions: stats.idle_transitions,
            active_transitions: stats.active_transitions,
            warnings: stats.warnings,
            visibility_changes: stats.visibility_changes,
            last_updated: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    fn load(&self) -> Result<(), std::io::Error> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }

        let content = std::fs::read_to_string(path)?;
        let persisted: PersistedStats =
            serde_json::from_str(&content).map_err(std::io::Error::other)?;

        self.state
            .idle_transitions
            .fetch_add(persisted.idle_transitions, Ordering::Relaxed);
        self.state
            .active_transitions
            .fetch_add(persisted.active_transitions, Ordering::Relaxed);
        self.state
            .warnings
            .fetch_add(persisted.warnings, Ordering::Relaxed);
        self.state
            .visibility_changes
            .fetch_add(persisted.visibility_changes, Ordering::Relaxed);
        Ok(())
    }
}

impl Drop for SessionObserver {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for SessionObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionObserver")
            .field("attached", &self.is_attached())
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::ActivitySignal;
    use crate::core::MonitorConfig;
    use std::time::Duration;

    fn monitor(minutes: u32) -> IdleMonitor {
        IdleMonitor::new(MonitorConfig {
            idle_timeout_minutes: minutes,
            ..MonitorConfig::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_follows_monitor() {
        let monitor = monitor(2);
        let observer = SessionObserver::attach(&monitor, None);
        let mut rx = observer.subscribe();
        monitor.start();

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(rx.has_changed().unwrap());
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.warning_seconds, Some(60));
        assert!(!snapshot.is_idle);

        tokio::time::sleep(Duration::from_secs(60)).await;
        let snapshot = observer.snapshot();
        assert!(snapshot.is_idle);
        assert_eq!(snapshot.warning_seconds, None);
        assert!(snapshot.last_event_at.is_some());

        monitor.handle_signal(ActivitySignal::KeyDown);
        assert!(!observer.snapshot().is_idle);

        let stats = observer.stats();
        assert_eq!(stats.warnings, 1);
        assert_eq!(stats.idle_transitions, 1);
        assert_eq!(stats.active_transitions, 1);
        monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_activity_reports_no_warnings() {
        let monitor = monitor(2);
        let observer = SessionObserver::attach(&monitor, None);
        monitor.start();

        for _ in 0..90 {
            tokio::time::sleep(Duration::from_secs(2)).await;
            monitor.handle_signal(ActivitySignal::KeyDown);
        }

        assert_eq!(observer.stats().warnings, 0);
        assert_eq!(observer.snapshot().warning_seconds, None);
        assert!(!observer.snapshot().is_idle);

        // Once activity stops, the real warning still comes through.
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(observer.stats().warnings, 1);
        assert_eq!(observer.snapshot().warning_seconds, Some(60));
        monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_visibility_updates_hidden_flag() {
        let monitor = monitor(5);
        let observer = SessionObserver::attach(&monitor, None);
        monitor.start();

        monitor.handle_signal(ActivitySignal::VisibilityChange { hidden: true });
        assert!(observer.snapshot().hidden);
        monitor.handle_signal(ActivitySignal::VisibilityChange { hidden: false });
        assert!(!observer.snapshot().hidden);
        assert_eq!(observer.stats().visibility_changes, 2);
        monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_stops_observing() {
        let monitor = monitor(5);
        let observer = SessionObserver::attach(&monitor, None);
        assert!(observer.is_attached());

        observer.detach();
        observer.detach();
        assert!(!observer.is_attached());

        monitor.trigger_idle();
        assert!(!observer.snapshot().is_idle);
        assert_eq!(observer.stats().idle_transitions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_detaches() {
        let monitor = monitor(5);
        let observer = SessionObserver::attach(&monitor, None);
        let rx = observer.subscribe();
        drop(observer);

        // Handlers own the sender; it closes once they are all gone
        assert!(rx.has_changed().is_err());
        monitor.trigger_idle();
        assert!(monitor.is_idle());
    }

    #[test]
    fn test_persisted_stats_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");

        let monitor = monitor(5);
        let observer = SessionObserver::attach(&monitor, None).with_persistence(path.clone());
        monitor.trigger_idle();
        observer.save().unwrap();
        drop(observer);

        let observer = SessionObserver::attach(&monitor, None).with_persistence(path);
        assert_eq!(observer.stats().idle_transitions, 1);
    }

    #[test]
    fn test_summary_format() {
        let observer = SessionObserver::attach(&monitor(5), None);
        let summary = observer.summary();

        assert!(summary.contains("Idle transitions"));
        assert!(summary.contains("Timeout warnings"));
        assert!(summary.contains(crate::PRIVACY_NOTICE));
    }
}
