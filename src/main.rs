//! Session Guardian CLI
//!
//! Client-side session security: idle detection, device fingerprinting and
//! incident reporting.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use session_guardian::{
    collector::{ActivitySignal, SignalHub, SignalKind},
    compare,
    config::GuardianConfig,
    create_shared_cipher,
    reporter::DeliveryOutcome,
    storage::{EncryptedStore, FileBackend},
    DeviceFingerprint, FingerprintCollector, IdleMonitor, IncidentReporter, SessionObserver,
    DEFAULT_MATCH_THRESHOLD, PRIVACY_NOTICE, VERSION,
};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Store key of the fingerprint taken when `watch` starts.
const BASELINE_KEY: &str = "baseline_fingerprint";

#[derive(Parser)]
#[command(name = "session-guardian")]
#[command(version = VERSION)]
#[command(about = "Client-side session security toolkit", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch terminal input for activity and track idle transitions
    Watch {
        /// Idle timeout in minutes (overrides config)
        #[arg(long)]
        timeout: Option<u32>,

        /// Activity kinds to listen for, comma separated
        #[arg(long)]
        events: Option<String>,

        /// Do not forward transitions to the audit endpoint
        #[arg(long)]
        no_report: bool,
    },

    /// Collect a device fingerprint
    Fingerprint {
        /// Write the fingerprint as JSON to this file
        #[arg(long)]
        save: Option<PathBuf>,

        /// Compare against a fingerprint previously saved with --save
        #[arg(long)]
        compare: Option<PathBuf>,

        /// Minimum similarity for a match
        #[arg(long, default_value_t = DEFAULT_MATCH_THRESHOLD)]
        threshold: f64,
    },

    /// Send a security incident to the audit endpoint
    Report {
        /// Incident type, or the event name when --level is given
        incident_type: String,

        /// JSON object payload
        #[arg(long, default_value = "{}")]
        payload: String,

        /// Report at a severity level (info, warning or critical)
        #[arg(long)]
        level: Option<String>,
    },

    /// Print the SHA-256 digest of a string
    Hash { input: String },

    /// Show configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = GuardianConfig::load().context("Failed to load configuration")?;
    init_logging(config.debug);

    match cli.command {
        Commands::Watch {
            timeout,
            events,
            no_report,
        } => cmd_watch(config, timeout, events, no_report),
        Commands::Fingerprint {
            save,
            compare,
            threshold,
        } => cmd_fingerprint(save, compare, threshold),
        Commands::Report {
            incident_type,
            payload,
            level,
        } => cmd_report(&config, &incident_type, &payload, level.as_deref()),
        Commands::Hash { input } => {
            println!("{}", create_shared_cipher().hash(&input));
            Ok(())
        }
        Commands::Config => {
            cmd_config(&config);
            Ok(())
        }
    }
}

/// `RUST_LOG` wins; otherwise `debug` when enabled in config, else `info`.
fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("session_guardian={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_watch(
    mut config: GuardianConfig,
    timeout: Option<u32>,
    events: Option<String>,
    no_report: bool,
) -> Result<()> {
    if let Some(minutes) = timeout {
        config.idle_timeout_minutes = minutes;
    }
    if let Some(events) = events {
        config.activity_events = SignalKind::from_csv(&events);
    }
    config.validate()?;
    if let Err(e) = config.ensure_directories() {
        warn!("Could not create data directory: {e}");
    }

    println!("Session Guardian v{VERSION}");
    println!();
    println!("Watching terminal input...");
    println!("  Idle timeout: {} min", config.idle_timeout_minutes);
    println!(
        "  Activity kinds: {}",
        config
            .activity_events
            .iter()
            .map(SignalKind::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    );

    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    let _guard = runtime.enter();

    let reporter = if no_report || config.audit_endpoint.is_none() {
        println!("  Incident reporting: disabled");
        None
    } else {
        let reporter = IncidentReporter::new(config.reporter_config()?)?;
        println!("  Incident reporting: {}", reporter.config().endpoint);
        Some(reporter)
    };

    println!();
    println!("Each line typed counts as a key press. Type :hidden or :visible");
    println!("to simulate the session moving to the background.");
    println!("Press Ctrl+C to stop");
    println!();

    // Fingerprint baseline, kept encrypted for the lifetime of this session
    let cipher = create_shared_cipher();
    let backend = FileBackend::open(config.store_path())?;
    let store = EncryptedStore::new(Arc::new(backend), cipher.clone(), &config.storage_prefix);
    let fingerprints = FingerprintCollector::system(cipher);
    store.set(BASELINE_KEY, &fingerprints.collect())?;

    let monitor = IdleMonitor::new(config.monitor_config());
    let observer = SessionObserver::attach(&monitor, reporter.clone())
        .with_persistence(config.data_path.join("session_stats.json"));
    let mut snapshots = observer.subscribe();

    let mut hub = SignalHub::new();
    hub.start()?;
    spawn_stdin_reader(&hub);

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    monitor.start();
    let mut was_idle = monitor.is_idle();

    while running.load(Ordering::SeqCst) {
        match hub.recv_timeout(Duration::from_millis(100)) {
            Ok(Some(timed)) => monitor.handle_signal(timed.signal),
            Ok(None) => {}
            Err(e) => {
                warn!("{e}");
                break;
            }
        }

        if !snapshots.has_changed().unwrap_or(false) {
            continue;
        }
        let snapshot = snapshots.borrow_and_update().clone();
        if let Some(seconds) = snapshot.warning_seconds {
            println!("Session goes idle in {seconds}s");
        }
        if snapshot.is_idle != was_idle {
            if snapshot.is_idle {
                println!("Session idle");
            } else {
                println!("Session active again");
                verify_fingerprint(&fingerprints, &store, reporter.as_ref());
            }
            was_idle = snapshot.is_idle;
        }
    }

    println!();
    println!("Stopping...");
    monitor.stop();
    hub.stop();
    observer.detach();

    if let Err(e) = store.clear() {
        warn!("Could not clear session store: {e}");
    }
    if let Err(e) = observer.save() {
        warn!("Could not save session stats: {e}");
    }

    println!();
    println!("{}", observer.summary());
    Ok(())
}

/// Forward each stdin line to the hub as activity.
fn spawn_stdin_reader(hub: &SignalHub) {
    let sender = hub.sender();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            let signal = match line.trim() {
                ":hidden" => ActivitySignal::VisibilityChange { hidden: true },
                ":visible" => ActivitySignal::VisibilityChange { hidden: false },
                _ => ActivitySignal::KeyDown,
            };
            sender.send(signal);
        }
    });
}

/// Compare the device against the session's baseline fingerprint.
fn verify_fingerprint(
    fingerprints: &FingerprintCollector,
    store: &EncryptedStore,
    reporter: Option<&IncidentReporter>,
) {
    let Some(baseline) = store.get::<DeviceFingerprint>(BASELINE_KEY) else {
        warn!("Baseline fingerprint unavailable; skipping device check");
        return;
    };

    let result = compare(&fingerprints.collect(), &baseline);
    if result.is_match(DEFAULT_MATCH_THRESHOLD) {
        info!(similarity = result.similarity, "Device fingerprint matches");
        return;
    }

    println!(
        "Device changed while idle (similarity {:.2}, mismatched: {})",
        result.similarity,
        result.mismatches.join(", ")
    );
    if let Some(reporter) = reporter {
        let reporter = reporter.clone();
        let mut payload = Map::new();
        payload.insert("similarity".to_string(), Value::from(result.similarity));
        payload.insert("mismatches".to_string(), Value::from(result.mismatches));
        tokio::spawn(async move {
            reporter.critical("fingerprint_mismatch", payload).await;
        });
    }
}

fn cmd_fingerprint(save: Option<PathBuf>, against: Option<PathBuf>, threshold: f64) -> Result<()> {
    let fingerprint = FingerprintCollector::system(create_shared_cipher()).collect();
    println!("{}", serde_json::to_string_pretty(&fingerprint)?);

    if let Some(path) = save {
        std::fs::write(&path, serde_json::to_string_pretty(&fingerprint)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!();
        println!("Saved to {}", path.display());
    }

    if let Some(path) = against {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let previous: DeviceFingerprint =
            serde_json::from_str(&content).context("Not a saved fingerprint")?;
        let result = compare(&fingerprint, &previous);

        println!();
        println!("Similarity: {:.2}", result.similarity);
        if !result.mismatches.is_empty() {
            println!("Mismatched: {}", result.mismatches.join(", "));
        }
        println!(
            "Verdict: {}",
            if result.is_match(threshold) {
                "same device"
            } else {
                "different device"
            }
        );
    }
    Ok(())
}

fn cmd_report(
    config: &GuardianConfig,
    incident_type: &str,
    payload: &str,
    level: Option<&str>,
) -> Result<()> {
    let payload: Map<String, Value> =
        serde_json::from_str(payload).context("Payload must be a JSON object")?;
    let reporter = IncidentReporter::new(config.reporter_config()?)?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    let outcome = runtime.block_on(async {
        match level {
            None => reporter.report(incident_type, payload).await,
            Some("info") => reporter.info(incident_type, payload).await,
            Some("warning") => reporter.warning(incident_type, payload).await,
            Some("critical") => reporter.critical(incident_type, payload).await,
            Some(other) => {
                warn!("Unknown level '{other}', sending as plain incident");
                reporter.report(incident_type, payload).await
            }
        }
    });

    match outcome {
        DeliveryOutcome::Delivered => {
            println!("Incident delivered to {}", reporter.config().endpoint);
            Ok(())
        }
        DeliveryOutcome::Rejected { status } => bail!("Audit endpoint rejected incident ({status})"),
        DeliveryOutcome::Failed(e) => bail!("Incident not delivered: {e}"),
    }
}

fn cmd_config(config: &GuardianConfig) {
    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", GuardianConfig::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(config).unwrap_or_else(|_| "Error".to_string())
    );
    println!();
    println!("{PRIVACY_NOTICE}");
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("Error setting Ctrl+C handler")
}
