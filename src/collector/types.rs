//! Activity signal types.
//!
//! Signals carry only their kind and arrival time. No key codes, cursor
//! positions or scroll amounts are ever recorded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kinds of signal the idle monitor can listen for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SignalKind {
    /// Primary button press
    #[serde(rename = "mousedown")]
    PointerDown,
    #[serde(rename = "mousemove")]
    PointerMove,
    #[serde(rename = "keydown")]
    KeyDown,
    #[serde(rename = "scroll")]
    Scroll,
    #[serde(rename = "touchstart")]
    TouchStart,
    #[serde(rename = "visibilitychange")]
    VisibilityChange,
}

impl SignalKind {
    /// Activity kinds listened for when none are configured.
    pub const DEFAULT_ACTIVITY: [SignalKind; 5] = [
        SignalKind::PointerDown,
        SignalKind::PointerMove,
        SignalKind::KeyDown,
        SignalKind::Scroll,
        SignalKind::TouchStart,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::PointerDown => "mousedown",
            SignalKind::PointerMove => "mousemove",
            SignalKind::KeyDown => "keydown",
            SignalKind::Scroll => "scroll",
            SignalKind::TouchStart => "touchstart",
            SignalKind::VisibilityChange => "visibilitychange",
        }
    }

    /// Parse a DOM-style event name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "mousedown" | "click" => Some(SignalKind::PointerDown),
            "mousemove" | "pointermove" => Some(SignalKind::PointerMove),
            "keydown" | "keypress" => Some(SignalKind::KeyDown),
            "scroll" | "wheel" => Some(SignalKind::Scroll),
            "touchstart" => Some(SignalKind::TouchStart),
            "visibilitychange" => Some(SignalKind::VisibilityChange),
            _ => None,
        }
    }

    /// Parse a comma-separated list, skipping unknown names.
    pub fn from_csv(s: &str) -> Vec<Self> {
        let mut kinds: Vec<Self> = s.split(',').filter_map(Self::parse).collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single activity or visibility signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivitySignal {
    PointerDown,
    PointerMove,
    KeyDown,
    Scroll,
    TouchStart,
    /// The host surface was hidden or shown again
    VisibilityChange { hidden: bool },
}

impl ActivitySignal {
    pub fn kind(&self) -> SignalKind {
        match self {
            ActivitySignal::PointerDown => SignalKind::PointerDown,
            ActivitySignal::PointerMove => SignalKind::PointerMove,
            ActivitySignal::KeyDown => SignalKind::KeyDown,
            ActivitySignal::Scroll => SignalKind::Scroll,
            ActivitySignal::TouchStart => SignalKind::TouchStart,
            ActivitySignal::VisibilityChange { .. } => SignalKind::VisibilityChange,
        }
    }
}

/// A signal stamped with its arrival time, as carried over the hub channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimedSignal {
    pub timestamp: DateTime<Utc>,
    pub signal: ActivitySignal,
}

impl TimedSignal {
    pub fn new(signal: ActivitySignal) -> Self {
        Self {
            timestamp: Utc::now(),
            signal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_kind_parsing() {
        assert_eq!(SignalKind::parse("keydown"), Some(SignalKind::KeyDown));
        assert_eq!(SignalKind::parse(" MouseMove "), Some(SignalKind::PointerMove));
        assert_eq!(SignalKind::parse("resize"), None);

        let kinds = SignalKind::from_csv("scroll,keydown,bogus,scroll");
        assert_eq!(kinds, vec![SignalKind::KeyDown, SignalKind::Scroll]);
    }

    #[test]
    fn test_signal_kind_serde_names() {
        let json = serde_json::to_string(&SignalKind::DEFAULT_ACTIVITY).unwrap();
        assert_eq!(
            json,
            r#"["mousedown","mousemove","keydown","scroll","touchstart"]"#
        );
        let kind: SignalKind = serde_json::from_str("\"visibilitychange\"").unwrap();
        assert_eq!(kind, SignalKind::VisibilityChange);
    }

    #[test]
    fn test_signal_kind_of_visibility() {
        let signal = ActivitySignal::VisibilityChange { hidden: true };
        assert_eq!(signal.kind(), SignalKind::VisibilityChange);
        assert_eq!(ActivitySignal::Scroll.kind().to_string(), "scroll");
    }
}
