//! Device fingerprint snapshot and the hijack-detection comparator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable snapshot of device and runtime attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceFingerprint {
    /// Screen size as "WxH"
    pub screen_resolution: String,
    pub color_depth: u32,
    /// Minutes behind UTC (UTC - local), positive west of Greenwich
    pub timezone_offset: i32,
    /// IANA timezone name
    pub timezone: String,
    pub language: String,
    pub languages: Vec<String>,
    pub platform: String,
    /// Logical CPU count
    pub hardware_concurrency: u32,
    /// Approximate memory in GB, when known
    pub device_memory: Option<u32>,
    pub touch_support: bool,
    /// SHA-256 of the rendering sample, if rendering was available
    pub canvas_hash: Option<String>,
    pub webgl_renderer: Option<String>,
    pub webgl_vendor: Option<String>,
    pub collected_at: DateTime<Utc>,
}

/// Fields that take part in [`compare`], in comparison order.
///
/// Timestamp, language list, memory, touch support, offset and WebGL vendor
/// are left out: they drift or carry too little signal.
pub const COMPARED_FIELDS: [&str; 8] = [
    "screenResolution",
    "colorDepth",
    "timezone",
    "language",
    "platform",
    "hardwareConcurrency",
    "canvasHash",
    "webglRenderer",
];

/// Result of comparing two fingerprints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintComparison {
    /// Fraction of compared fields that match, in `[0, 1]`
    pub similarity: f64,
    /// Names of non-matching fields, in comparison order
    pub mismatches: Vec<String>,
}

impl FingerprintComparison {
    /// Whether the snapshots are similar enough to be the same device.
    pub fn is_match(&self, threshold: f64) -> bool {
        self.similarity >= threshold
    }
}

/// Compare two snapshots field by field.
pub fn compare(current: &DeviceFingerprint, previous: &DeviceFingerprint) -> FingerprintComparison {
    let matches: [bool; 8] = [
        current.screen_resolution == previous.screen_resolution,
        current.color_depth == previous.color_depth,
        current.timezone == previous.timezone,
        current.language == previous.language,
        current.platform == previous.platform,
        current.hardware_concurrency == previous.hardware_concurrency,
        current.canvas_hash == previous.canvas_hash,
        current.webgl_renderer == previous.webgl_renderer,
    ];

    let mismatches: Vec<String> = COMPARED_FIELDS
        .iter()
        .zip(matches)
        .filter(|(_, matched)| !matched)
        .map(|(name, _)| name.to_string())
        .collect();

    let matched = COMPARED_FIELDS.len() - mismatches.len();
    FingerprintComparison {
        similarity: matched as f64 / COMPARED_FIELDS.len() as f64,
        mismatches,
    }
}
