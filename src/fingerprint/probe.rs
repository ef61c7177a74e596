//! Attribute probes and the fingerprint collector.
//!
//! A [`DeviceProbe`] is a thin read-only view of the runtime environment.
//! Every method is infallible: a missing capability reads as a default or
//! `None`, never as an error.

use crate::crypto::SharedCipher;
use crate::fingerprint::types::DeviceFingerprint;
use chrono::{Local, Utc};
use chrono_tz::Tz;
use tracing::debug;

/// Source of device attributes.
pub trait DeviceProbe: Send + Sync {
    /// Screen width and height in pixels.
    fn screen_size(&self) -> (u32, u32) {
        (0, 0)
    }

    fn color_depth(&self) -> u32 {
        24
    }

    /// Minutes behind UTC (UTC - local).
    fn timezone_offset_minutes(&self) -> i32 {
        0
    }

    fn timezone(&self) -> String {
        "UTC".to_string()
    }

    /// Preferred languages, most preferred first.
    fn languages(&self) -> Vec<String> {
        Vec::new()
    }

    fn platform(&self) -> String {
        String::new()
    }

    fn hardware_concurrency(&self) -> u32 {
        1
    }

    fn device_memory_gb(&self) -> Option<u32> {
        None
    }

    fn touch_support(&self) -> bool {
        false
    }

    /// Encoded output of a small deterministic drawing, if rendering is
    /// available.
    fn render_sample(&self) -> Option<String> {
        None
    }

    fn webgl_renderer(&self) -> Option<String> {
        None
    }

    fn webgl_vendor(&self) -> Option<String> {
        None
    }
}

/// Probe reading the host operating system.
///
/// There is no rendering surface, so the canvas and WebGL attributes are
/// always absent.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl DeviceProbe for SystemProbe {
    fn timezone_offset_minutes(&self) -> i32 {
        -(Local::now().offset().local_minus_utc() / 60)
    }

    fn timezone(&self) -> String {
        std::env::var("TZ")
            .ok()
            .and_then(|tz| tz.trim_start_matches(':').parse::<Tz>().ok())
            .map(|tz| tz.name().to_string())
            .unwrap_or_else(|| "UTC".to_string())
    }

    fn languages(&self) -> Vec<String> {
        let mut languages: Vec<String> = std::env::var("LANGUAGE")
            .unwrap_or_default()
            .split(':')
            .filter_map(normalize_locale)
            .collect();

        for var in ["LC_ALL", "LANG"] {
            if let Some(lang) = std::env::var(var).ok().as_deref().and_then(normalize_locale) {
                if !languages.contains(&lang) {
                    languages.insert(0, lang);
                }
                break;
            }
        }
        languages
    }

    fn platform(&self) -> String {
        format!("{} {}", std::env::consts::OS, std::env::consts::ARCH)
    }

    fn hardware_concurrency(&self) -> u32 {
        std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1)
    }

    fn device_memory_gb(&self) -> Option<u32> {
        #[cfg(target_os = "linux")]
        {
            let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
            let kb: u64 = meminfo
                .lines()
                .find(|line| line.starts_with("MemTotal:"))?
                .split_whitespace()
                .nth(1)?
                .parse()
                .ok()?;
            Some(((kb as f64) / (1024.0 * 1024.0)).round() as u32)
        }

        #[cfg(not(target_os = "linux"))]
        {
            None
        }
    }
}

/// Turn a POSIX locale such as `en_US.UTF-8` into a BCP 47 tag (`en-US`).
fn normalize_locale(raw: &str) -> Option<String> {
    let base = raw.split(['.', '@']).next()?.trim();
    if base.is_empty() || base == "C" || base == "POSIX" {
        return None;
    }
    Some(base.replace('_', "-"))
}

/// Collects [`DeviceFingerprint`] snapshots.
pub struct FingerprintCollector {
    probe: Box<dyn DeviceProbe>,
    cipher: SharedCipher,
}

impl FingerprintCollector {
    pub fn new(probe: Box<dyn DeviceProbe>, cipher: SharedCipher) -> Self {
        Self { probe, cipher }
    }

    /// Collector over the host system.
    pub fn system(cipher: SharedCipher) -> Self {
        Self::new(Box::new(SystemProbe), cipher)
    }

    /// Take a fresh snapshot.
    pub fn collect(&self) -> DeviceFingerprint {
        let (width, height) = self.probe.screen_size();
        let languages = self.probe.languages();
        let language = languages
            .first()
            .cloned()
            .unwrap_or_else(|| "en-US".to_string());

        let canvas_hash = self.probe.render_sample().map(|sample| self.cipher.hash(&sample));
        if canvas_hash.is_none() {
            debug!("Rendering sample unavailable; canvas hash omitted");
        }

        DeviceFingerprint {
            screen_resolution: format!("{width}x{height}"),
            color_depth: self.probe.color_depth(),
            timezone_offset: self.probe.timezone_offset_minutes(),
            timezone: self.probe.timezone(),
            language,
            languages,
            platform: self.probe.platform(),
            hardware_concurrency: self.probe.hardware_concurrency(),
            device_memory: self.probe.device_memory_gb(),
            touch_support: self.probe.touch_support(),
            canvas_hash,
            webgl_renderer: self.probe.webgl_renderer(),
            webgl_vendor: self.probe.webgl_vendor(),
            collected_at: Utc::now(),
        }
    }
}
