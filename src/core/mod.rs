//! Core functionality for the session guardian.
//!
//! This module contains:
//! - The idle/activity monitor and its timers
//! - Lifecycle events and the dispatcher that delivers them

pub mod events;
pub mod monitor;

// Re-export commonly used types
pub use events::{EventDispatcher, EventKind, GuardianEvent, Handler, HandlerId};
pub use monitor::{
    GuardianState, IdleMonitor, MonitorConfig, MonitorStatus, WeakIdleMonitor, WARNING_LEAD,
};
