//! Session Guardian - client-side session security toolkit.
//!
//! This library detects user inactivity, stores session data encrypted at
//! rest, fingerprints the device to spot session hijacking, and reports
//! security incidents to an audit endpoint.
//!
//! # Privacy Guarantees
//!
//! - **No activity content**: Signals carry only their kind, never keys or coordinates
//! - **Ephemeral keys**: The encryption key lives in memory and is never exported
//! - **Hashed rendering**: Only a SHA-256 of the rendering sample is kept
//! - **Transparency**: Session transitions are counted and viewable
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Session Guardian                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌──────────────┐        │
//! │  │  Collector  │──▶│    Idle     │──▶│   Session    │        │
//! │  │ (SignalHub) │   │   Monitor   │   │   Observer   │        │
//! │  └─────────────┘   └─────────────┘   └──────────────┘        │
//! │                                             │                │
//! │                                             ▼                │
//! │  ┌─────────────┐   ┌─────────────┐   ┌──────────────┐        │
//! │  │ Fingerprint │──▶│   Cipher    │◀──│   Incident   │        │
//! │  │  Collector  │   │   Service   │   │   Reporter   │        │
//! │  └─────────────┘   └─────────────┘   └──────────────┘        │
//! │                           ▲                                  │
//! │                    ┌─────────────┐                           │
//! │                    │  Encrypted  │                           │
//! │                    │    Store    │                           │
//! │                    └─────────────┘                           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use session_guardian::{collector::ActivitySignal, IdleMonitor, MonitorConfig};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let monitor = IdleMonitor::new(MonitorConfig::default());
//! monitor.on(session_guardian::EventKind::Idle, |event| {
//!     println!("session went idle: {event:?}");
//! });
//! monitor.start();
//!
//! // Feed activity from the host
//! monitor.handle_signal(ActivitySignal::KeyDown);
//! # }
//! ```

pub mod collector;
pub mod config;
pub mod core;
pub mod crypto;
pub mod fingerprint;
pub mod reporter;
pub mod storage;
pub mod transparency;

// Re-export key types at crate root for convenience
pub use collector::{ActivitySignal, SignalHub, SignalKind};
pub use config::{ConfigError, GuardianConfig};
pub use core::{EventKind, GuardianEvent, GuardianState, IdleMonitor, MonitorConfig};
pub use crypto::{create_shared_cipher, CipherService, EncryptedPayload, SharedCipher};
pub use fingerprint::{compare, DeviceFingerprint, FingerprintCollector, FingerprintComparison};
pub use reporter::{IncidentReporter, ReporterConfig, ReporterUpdate, SecurityIncident};
pub use storage::{EncryptedStore, StorageBackend};
pub use transparency::{SessionObserver, SessionSnapshot};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Similarity at or above which two fingerprints count as the same device.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.8;

/// Privacy notice shown by the CLI and in session summaries.
pub const PRIVACY_NOTICE: &str = "Privacy Guarantee:\n\
     - No key content or cursor positions captured\n\
     - Encryption keys never leave process memory\n\
     - Only transition counts are retained";
