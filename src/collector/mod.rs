//! Activity signal collection.
//!
//! Hosts translate whatever input they observe (terminal input, platform
//! hooks, UI events) into [`ActivitySignal`]s and push them through a
//! [`SignalHub`]. The hub never inspects signal content.

pub mod hub;
pub mod types;

// Re-export commonly used types
pub use hub::{HubError, SignalHub, SignalSender};
pub use types::{ActivitySignal, SignalKind, TimedSignal};
