//! Transparency module for the session guardian.
//!
//! Exposes what the guardian observed during a session: the latest state
//! on a watch channel plus transition counters, without recording any
//! activity content.

pub mod observer;

pub use observer::{SessionObserver, SessionSnapshot, SessionStats};
