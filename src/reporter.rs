//! Incident reporter for security-relevant events.
//!
//! Incidents are POSTed as JSON to the configured audit endpoint. Delivery
//! is best-effort: transport failures are retried with exponential backoff,
//! then parked in an in-memory backlog drained by one background task.
//! Nothing here ever returns an error to the caller of `report`.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Header carrying the client version on every request.
pub const CLIENT_VERSION_HEADER: &str = "X-Session-Guardian-Client-Version";

/// Spacing between backlog delivery attempts.
pub const DRAIN_INTERVAL: Duration = Duration::from_secs(1);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Reporter configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReporterConfig {
    /// POST target for incidents
    pub endpoint: String,
    /// Extra headers sent with every request
    pub headers: BTreeMap<String, String>,
    /// Retry transport failures with exponential backoff
    pub retry: bool,
    /// Total attempts per delivery, including the first
    pub max_retries: u32,
    /// Reported as the incident `url`
    pub source_url: Option<String>,
}

impl ReporterConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            headers: BTreeMap::new(),
            retry: true,
            max_retries: 3,
            source_url: None,
        }
    }

    /// Apply the fields set in `update`.
    pub fn merge(&mut self, update: ReporterUpdate) {
        if let Some(endpoint) = update.endpoint {
            self.endpoint = endpoint;
        }
        if let Some(headers) = update.headers {
            self.headers.extend(headers);
        }
        if let Some(retry) = update.retry {
            self.retry = retry;
        }
        if let Some(max_retries) = update.max_retries {
            self.max_retries = max_retries;
        }
        if let Some(source_url) = update.source_url {
            self.source_url = source_url;
        }
    }
}

/// Partial configuration for [`IncidentReporter::configure`].
#[derive(Debug, Clone, Default)]
pub struct ReporterUpdate {
    pub endpoint: Option<String>,
    /// Merged into the existing headers
    pub headers: Option<BTreeMap<String, String>>,
    pub retry: Option<bool>,
    pub max_retries: Option<u32>,
    /// `Some(None)` clears the source URL
    pub source_url: Option<Option<String>>,
}

/// Severity levels used as incident types by the convenience reporters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

/// A single reported incident, as sent on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityIncident {
    #[serde(rename = "type")]
    pub incident_type: String,
    pub payload: Map<String, Value>,
    /// ISO-8601 with millisecond precision
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl SecurityIncident {
    pub fn new(
        incident_type: impl Into<String>,
        payload: Map<String, Value>,
        url: Option<String>,
    ) -> Self {
        Self {
            incident_type: incident_type.into(),
            payload,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            url,
        }
    }
}

/// Reporter error types.
#[derive(Debug)]
pub enum ReporterError {
    /// Configuration error
    Config(String),
    /// Network/HTTP error
    Network(String),
    /// Server returned an error response
    Server { status: u16, message: String },
}

impl std::fmt::Display for ReporterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReporterError::Config(msg) => write!(f, "Reporter config error: {msg}"),
            ReporterError::Network(msg) => write!(f, "Reporter network error: {msg}"),
            ReporterError::Server { status, message } => {
                write!(f, "Audit endpoint error ({status}): {message}")
            }
        }
    }
}

impl std::error::Error for ReporterError {}

/// How a delivery ended.
#[derive(Debug)]
pub enum DeliveryOutcome {
    Delivered,
    /// The endpoint answered with a non-success status. Not retried.
    Rejected { status: u16 },
    /// Every allowed attempt failed at the transport level.
    Failed(ReporterError),
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }
}

/// Backoff before retrying after failed attempt number `attempt` (1-based).
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(100 * 2u64.pow(attempt.min(16)))
}

struct ReporterInner {
    config: RwLock<ReporterConfig>,
    client: reqwest::Client,
    backlog: Mutex<VecDeque<SecurityIncident>>,
    draining: AtomicBool,
}

/// Reporter for security incidents. Cheap to clone; clones share the
/// configuration and the backlog.
#[derive(Clone)]
pub struct IncidentReporter {
    inner: Arc<ReporterInner>,
}

impl IncidentReporter {
    /// Create a new reporter.
    pub fn new(config: ReporterConfig) -> Result<Self, ReporterError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ReporterError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            inner: Arc::new(ReporterInner {
                config: RwLock::new(config),
                client,
                backlog: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
            }),
        })
    }

    /// Current configuration.
    pub fn config(&self) -> ReporterConfig {
        self.inner
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Merge new settings into the live configuration. Takes effect on the
    /// next delivery attempt, including backlog retries.
    pub fn configure(&self, update: ReporterUpdate) {
        self.inner
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .merge(update);
    }

    fn backlog(&self) -> MutexGuard<'_, VecDeque<SecurityIncident>> {
        self.inner
            .backlog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of incidents waiting for redelivery.
    pub fn backlog_len(&self) -> usize {
        self.backlog().len()
    }

    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::SeqCst)
    }

    /// Build an incident and try to deliver it.
    ///
    /// Incidents whose delivery failed at the transport level are queued for
    /// background redelivery.
    pub async fn report(&self, incident_type: &str, payload: Map<String, Value>) -> DeliveryOutcome {
        let incident = SecurityIncident::new(incident_type, payload, self.config().source_url);
        let outcome = self.send(&incident, 1).await;
        if let DeliveryOutcome::Failed(ref e) = outcome {
            debug!(incident_type, "Queueing incident after failed delivery: {e}");
            self.enqueue(incident);
        }
        outcome
    }

    pub async fn info(&self, event: &str, payload: Map<String, Value>) -> DeliveryOutcome {
        self.report_level(Severity::Info, event, payload).await
    }

    pub async fn warning(&self, event: &str, payload: Map<String, Value>) -> DeliveryOutcome {
        self.report_level(Severity::Warning, event, payload).await
    }

    pub async fn critical(&self, event: &str, payload: Map<String, Value>) -> DeliveryOutcome {
        self.report_level(Severity::Critical, event, payload).await
    }

    async fn report_level(
        &self,
        level: Severity,
        event: &str,
        mut payload: Map<String, Value>,
    ) -> DeliveryOutcome {
        payload.insert("event".to_string(), Value::String(event.to_string()));
        self.report(level.as_str(), payload).await
    }

    /// Deliver one incident, starting at attempt number `attempt`.
    ///
    /// Transport failures are retried while `attempt < max_retries`, waiting
    /// [`backoff_delay`] between attempts. A non-success response ends the
    /// delivery immediately.
    pub async fn send(&self, incident: &SecurityIncident, attempt: u32) -> DeliveryOutcome {
        let mut attempt = attempt.max(1);
        loop {
            let config = self.config();
            match self.post(&config, incident).await {
                Ok(()) => return DeliveryOutcome::Delivered,
                Err(ReporterError::Server { status, message }) => {
                    warn!(status, "Audit endpoint rejected incident: {message}");
                    return DeliveryOutcome::Rejected { status };
                }
                Err(e) if config.retry && attempt < config.max_retries => {
                    let delay = backoff_delay(attempt);
                    debug!(attempt, ?delay, "Incident delivery failed, retrying: {e}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(attempt, "Incident delivery failed: {e}");
                    return DeliveryOutcome::Failed(e);
                }
            }
        }
    }

    async fn post(
        &self,
        config: &ReporterConfig,
        incident: &SecurityIncident,
    ) -> Result<(), ReporterError> {
        let mut request = self
            .inner
            .client
            .post(&config.endpoint)
            .header(CLIENT_VERSION_HEADER, crate::VERSION);
        for (name, value) in &config.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .json(incident)
            .send()
            .await
            .map_err(|e| ReporterError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ReporterError::Server {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }

    fn enqueue(&self, incident: SecurityIncident) {
        self.backlog().push_back(incident);
        self.start_drain();
    }

    /// Spawn the drain task unless one is already running.
    ///
    /// Outside a tokio runtime the incident stays queued until a later
    /// failure on a runtime starts the drain.
    fn start_drain(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime; backlog drain not started");
            return;
        };
        if self
            .inner
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let reporter = self.clone();
        runtime.spawn(async move {
            reporter.drain().await;
        });
    }

    async fn drain(&self) {
        loop {
            tokio::time::sleep(DRAIN_INTERVAL).await;
            let next = self.backlog().pop_front();
            let Some(incident) = next else {
                break;
            };
            if !self.send(&incident, 1).await.is_delivered() {
                debug!(
                    incident_type = %incident.incident_type,
                    "Dropping incident after backlog retry"
                );
            }
        }

        self.inner.draining.store(false, Ordering::SeqCst);
        // An incident may have been queued between the last pop and the flag reset.
        if self.backlog_len() > 0 {
            self.start_drain();
        }
    }
}

impl std::fmt::Debug for IncidentReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncidentReporter")
            .field("config", &self.config())
            .field("backlog", &self.backlog_len())
            .field("draining", &self.is_draining())
            .finish()
    }
}
