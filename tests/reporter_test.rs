//! Integration tests for incident delivery against an in-process audit sink

mod reporter_tests {
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Map, Value};
    use session_guardian::core::{IdleMonitor, MonitorConfig};
    use session_guardian::reporter::{
        DeliveryOutcome, IncidentReporter, ReporterConfig, ReporterUpdate, CLIENT_VERSION_HEADER,
    };
    use session_guardian::transparency::SessionObserver;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};
    use tokio::net::TcpListener;

    #[derive(Debug, Clone)]
    struct Received {
        headers: HeaderMap,
        body: Value,
    }

    type Inbox = Arc<Mutex<Vec<Received>>>;

    async fn record(
        State((inbox, status)): State<(Inbox, StatusCode)>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> StatusCode {
        inbox.lock().unwrap().push(Received { headers, body });
        status
    }

    /// Start an audit sink answering every POST to /audit with `status`.
    async fn audit_sink(status: StatusCode) -> (SocketAddr, Inbox, tokio::sync::oneshot::Sender<()>) {
        let inbox: Inbox = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/audit", post(record))
            .with_state((inbox.clone(), status));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .unwrap();
        });

        (addr, inbox, shutdown_tx)
    }

    /// An address nothing is listening on.
    async fn closed_endpoint() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}/audit")
    }

    async fn wait_for(inbox: &Inbox, count: usize, limit: Duration) {
        let deadline = Instant::now() + limit;
        while inbox.lock().unwrap().len() < count && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_delivers_incident_with_headers() {
        let (addr, inbox, shutdown_tx) = audit_sink(StatusCode::OK).await;

        let mut config = ReporterConfig::new(format!("http://{addr}/audit"));
        config
            .headers
            .insert("X-Tenant".to_string(), "acme".to_string());
        config.source_url = Some("app://session".to_string());
        let reporter = IncidentReporter::new(config).unwrap();

        let outcome = reporter
            .report("login", payload(json!({"user": "ada"})))
            .await;
        assert!(outcome.is_delivered());

        let received = inbox.lock().unwrap().clone();
        assert_eq!(received.len(), 1);

        let body = &received[0].body;
        assert_eq!(body["type"], "login");
        assert_eq!(body["payload"]["user"], "ada");
        assert_eq!(body["url"], "app://session");
        let timestamp = body["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());

        let headers = &received[0].headers;
        assert_eq!(headers["content-type"], "application/json");
        assert_eq!(
            headers[CLIENT_VERSION_HEADER.to_ascii_lowercase().as_str()],
            session_guardian::VERSION
        );
        assert_eq!(headers["x-tenant"], "acme");

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_severity_levels_fold_event_into_payload() {
        let (addr, inbox, shutdown_tx) = audit_sink(StatusCode::OK).await;
        let reporter = IncidentReporter::new(ReporterConfig::new(format!("http://{addr}/audit"))).unwrap();

        reporter
            .critical("fingerprint_mismatch", payload(json!({"similarity": 0.5})))
            .await;
        reporter.info("heartbeat", Map::new()).await;

        let received = inbox.lock().unwrap().clone();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].body["type"], "critical");
        assert_eq!(received[0].body["payload"]["event"], "fingerprint_mismatch");
        assert_eq!(received[0].body["payload"]["similarity"], 0.5);
        assert_eq!(received[1].body["type"], "info");
        assert_eq!(received[1].body["payload"]["event"], "heartbeat");
        assert!(received[1].body.get("url").is_none());

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_error_status_is_not_retried_or_queued() {
        let (addr, inbox, shutdown_tx) = audit_sink(StatusCode::INTERNAL_SERVER_ERROR).await;
        let reporter = IncidentReporter::new(ReporterConfig::new(format!("http://{addr}/audit"))).unwrap();

        let outcome = reporter.report("login", Map::new()).await;
        assert!(matches!(outcome, DeliveryOutcome::Rejected { status: 500 }));
        assert_eq!(inbox.lock().unwrap().len(), 1);
        assert_eq!(reporter.backlog_len(), 0);
        assert!(!reporter.is_draining());

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_transport_failure_retries_with_backoff() {
        let mut config = ReporterConfig::new(closed_endpoint().await);
        config.max_retries = 3;
        let reporter = IncidentReporter::new(config).unwrap();

        let started = Instant::now();
        let outcome = reporter.report("login", Map::new()).await;

        assert!(matches!(outcome, DeliveryOutcome::Failed(_)));
        // 200ms after the first attempt, 400ms after the second
        assert!(started.elapsed() >= Duration::from_millis(600));
        assert_eq!(reporter.backlog_len(), 1);
    }

    #[tokio::test]
    async fn test_backlog_drains_after_endpoint_recovers() {
        let mut config = ReporterConfig::new(closed_endpoint().await);
        config.retry = false;
        let reporter = IncidentReporter::new(config).unwrap();

        reporter.report("first", Map::new()).await;
        reporter.report("second", Map::new()).await;
        assert_eq!(reporter.backlog_len(), 2);
        assert!(reporter.is_draining());

        let (addr, inbox, shutdown_tx) = audit_sink(StatusCode::OK).await;
        reporter.configure(ReporterUpdate {
            endpoint: Some(format!("http://{addr}/audit")),
            ..ReporterUpdate::default()
        });

        wait_for(&inbox, 2, Duration::from_secs(5)).await;
        let types: Vec<Value> = inbox
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.body["type"].clone())
            .collect();
        assert_eq!(types, vec![json!("first"), json!("second")]);
        assert_eq!(reporter.backlog_len(), 0);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_backlog_is_dropped_when_endpoint_stays_down() {
        let mut config = ReporterConfig::new(closed_endpoint().await);
        config.retry = false;
        let reporter = IncidentReporter::new(config).unwrap();

        reporter.report("login", Map::new()).await;
        assert_eq!(reporter.backlog_len(), 1);
        assert!(reporter.is_draining());

        let deadline = Instant::now() + Duration::from_secs(5);
        while reporter.is_draining() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        assert!(!reporter.is_draining());
        assert_eq!(reporter.backlog_len(), 0);
    }

    #[derive(Default)]
    struct Tally {
        arrivals: Mutex<Vec<(String, Instant)>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    async fn count(State(tally): State<Arc<Tally>>, Json(body): Json<Value>) -> StatusCode {
        let now = tally.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        tally.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let incident_type = body["type"].as_str().unwrap_or_default().to_string();
        tally
            .arrivals
            .lock()
            .unwrap()
            .push((incident_type, Instant::now()));
        tally.in_flight.fetch_sub(1, Ordering::SeqCst);
        StatusCode::OK
    }

    #[tokio::test]
    async fn test_incident_queued_during_drain_joins_same_backlog() {
        let tally = Arc::new(Tally::default());
        let app = Router::new()
            .route("/audit", post(count))
            .with_state(tally.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let sink = format!("http://{}/audit", listener.local_addr().unwrap());
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .unwrap();
        });

        let closed = closed_endpoint().await;
        let mut config = ReporterConfig::new(closed.clone());
        config.retry = false;
        let reporter = IncidentReporter::new(config).unwrap();
        let point_at = |endpoint: &str| {
            reporter.configure(ReporterUpdate {
                endpoint: Some(endpoint.to_string()),
                ..ReporterUpdate::default()
            })
        };
        let delivered = || tally.arrivals.lock().unwrap().len();

        reporter.report("a", Map::new()).await;
        reporter.report("b", Map::new()).await;
        point_at(&sink);

        let deadline = Instant::now() + Duration::from_secs(3);
        while delivered() < 1 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(delivered(), 1);

        // Fails straight into the backlog behind "b" while the drain is running
        point_at(&closed);
        reporter.report("c", Map::new()).await;
        assert!(reporter.is_draining());
        assert_eq!(reporter.backlog_len(), 2);
        point_at(&sink);

        let deadline = Instant::now() + Duration::from_secs(5);
        while delivered() < 3 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let arrivals = tally.arrivals.lock().unwrap().clone();
        let order: Vec<&str> = arrivals.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(tally.max_in_flight.load(Ordering::SeqCst), 1);
        for pair in arrivals.windows(2) {
            assert!(pair[1].1 - pair[0].1 >= Duration::from_millis(900));
        }

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_observer_reports_idle_transition() {
        let (addr, inbox, shutdown_tx) = audit_sink(StatusCode::OK).await;
        let reporter = IncidentReporter::new(ReporterConfig::new(format!("http://{addr}/audit"))).unwrap();

        let monitor = IdleMonitor::new(MonitorConfig {
            idle_timeout_minutes: 5,
            ..MonitorConfig::default()
        });
        let observer = SessionObserver::attach(&monitor, Some(reporter));

        monitor.trigger_idle();
        assert!(observer.snapshot().is_idle);

        wait_for(&inbox, 1, Duration::from_secs(2)).await;
        let received = inbox.lock().unwrap().clone();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].body["type"], "warning");
        assert_eq!(received[0].body["payload"]["event"], "session.idle");
        assert_eq!(received[0].body["payload"]["timeoutMinutes"], 5);

        let _ = shutdown_tx.send(());
    }
}
