//! Monitor lifecycle events and their synchronous dispatcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// The closed set of event kinds a monitor emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Idle,
    Active,
    VisibilityChange,
    Warning,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Idle,
        EventKind::Active,
        EventKind::VisibilityChange,
        EventKind::Warning,
    ];
}

/// An emitted event with its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum GuardianEvent {
    /// No activity for the configured timeout
    #[serde(rename_all = "camelCase")]
    Idle {
        idle_since: DateTime<Utc>,
        timeout_minutes: u32,
    },
    /// Activity resumed after an idle period
    Active,
    VisibilityChange { hidden: bool },
    /// The idle timeout is about to elapse
    #[serde(rename_all = "camelCase")]
    Warning { seconds_remaining: u64 },
}

impl GuardianEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            GuardianEvent::Idle { .. } => EventKind::Idle,
            GuardianEvent::Active => EventKind::Active,
            GuardianEvent::VisibilityChange { .. } => EventKind::VisibilityChange,
            GuardianEvent::Warning { .. } => EventKind::Warning,
        }
    }
}

/// Registered event callback.
pub type Handler = Arc<dyn Fn(&GuardianEvent) + Send + Sync>;

/// Identifies a registration for later removal with [`EventDispatcher::off`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Maps each event kind to its handlers in registration order.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Mutex<HashMap<EventKind, Vec<(HandlerId, Handler)>>>,
    next_id: AtomicU64,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn handlers(&self) -> MutexGuard<'_, HashMap<EventKind, Vec<(HandlerId, Handler)>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn on<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&GuardianEvent) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns whether it was registered for `kind`.
    pub fn off(&self, kind: EventKind, id: HandlerId) -> bool {
        let mut handlers = self.handlers();
        let Some(list) = handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(registered, _)| *registered != id);
        before != list.len()
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers().get(&kind).map_or(0, Vec::len)
    }

    /// Invoke every handler registered for the event's kind, in order.
    ///
    /// The registry lock is released before handlers run, so handlers may
    /// register or remove handlers. A panicking handler unwinds into the
    /// caller and skips the handlers after it.
    pub fn emit(&self, event: &GuardianEvent) {
        let snapshot: Vec<Handler> = self
            .handlers()
            .get(&event.kind())
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        for handler in snapshot {
            handler(event);
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers();
        let mut map = f.debug_map();
        for kind in EventKind::ALL {
            map.entry(&kind, &handlers.get(&kind).map_or(0, Vec::len));
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Handler) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let log = log.clone();
            move |name: &str| -> Handler {
                let log = log.clone();
                let name = name.to_string();
                Arc::new(move |_: &GuardianEvent| log.lock().unwrap().push(name.clone()))
            }
        };
        (log, make)
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let dispatcher = EventDispatcher::new();
        let (log, make) = recorder();

        let first = make("first");
        let second = make("second");
        dispatcher.on(EventKind::Active, move |e| first(e));
        dispatcher.on(EventKind::Active, move |e| second(e));

        dispatcher.emit(&GuardianEvent::Active);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_emit_only_reaches_matching_kind() {
        let dispatcher = EventDispatcher::new();
        let (log, make) = recorder();

        let handler = make("warning");
        dispatcher.on(EventKind::Warning, move |e| handler(e));
        dispatcher.emit(&GuardianEvent::Active);
        dispatcher.emit(&GuardianEvent::VisibilityChange { hidden: true });

        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_off_removes_handler() {
        let dispatcher = EventDispatcher::new();
        let (log, make) = recorder();

        let handler = make("idle");
        let id = dispatcher.on(EventKind::Idle, move |e| handler(e));
        assert_eq!(dispatcher.handler_count(EventKind::Idle), 1);

        assert!(!dispatcher.off(EventKind::Active, id));
        assert!(dispatcher.off(EventKind::Idle, id));
        assert!(!dispatcher.off(EventKind::Idle, id));

        dispatcher.emit(&GuardianEvent::Idle {
            idle_since: Utc::now(),
            timeout_minutes: 1,
        });
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_handler_may_deregister_itself() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let id_slot = Arc::new(Mutex::new(None));

        let d = dispatcher.clone();
        let slot = id_slot.clone();
        let id = dispatcher.on(EventKind::Active, move |_| {
            if let Some(id) = *slot.lock().unwrap() {
                d.off(EventKind::Active, id);
            }
        });
        *id_slot.lock().unwrap() = Some(id);

        dispatcher.emit(&GuardianEvent::Active);
        assert_eq!(dispatcher.handler_count(EventKind::Active), 0);
    }

    #[test]
    #[should_panic(expected = "handler bug")]
    fn test_handler_panic_propagates() {
        let dispatcher = EventDispatcher::new();
        dispatcher.on(EventKind::Active, |_| panic!("handler bug"));
        dispatcher.emit(&GuardianEvent::Active);
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_value(GuardianEvent::Warning {
            seconds_remaining: 60,
        })
        .unwrap();
        assert_eq!(json["type"], "warning");
        assert_eq!(json["secondsRemaining"], 60);

        let json = serde_json::to_value(GuardianEvent::VisibilityChange { hidden: true }).unwrap();
        assert_eq!(json["type"], "visibility-change");
    }
}
