//! Device fingerprinting for session-hijack detection.
//!
//! A fingerprint taken at login is compared against later snapshots; a low
//! similarity suggests the session moved to another device.

pub mod probe;
pub mod types;

// Re-export commonly used types
pub use probe::{DeviceProbe, FingerprintCollector, SystemProbe};
pub use types::{compare, DeviceFingerprint, FingerprintComparison, COMPARED_FIELDS};
