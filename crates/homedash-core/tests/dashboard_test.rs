// End-to-end tests for the `Dashboard` facade.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use homedash_core::dashboard::CONNECTION_TASK;
use homedash_core::{
    CoreError, Dashboard, DashboardConfig, Lifecycle, ProbeTarget, ServiceConfig, SetOptions, StorageConfig,
    WaitOptions,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn proxy(id: &str, server: &MockServer) -> ServiceConfig {
    ServiceConfig::new(
        id,
        ProbeTarget::Proxy {
            base_url: Url::parse(&server.uri()).unwrap(),
        },
    )
}

fn config(services: Vec<ServiceConfig>) -> DashboardConfig {
    DashboardConfig {
        services,
        probe_timeout: Duration::from_millis(300),
        connection_poll_interval: Duration::from_secs(60),
        startup: WaitOptions {
            max_attempts: 2,
            retry_interval: Duration::from_millis(10),
            timeout: Duration::from_secs(1),
        },
        ..DashboardConfig::default()
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_start_emits_ready_and_starts_polling() {
    let sonos = MockServer::start().await;
    let plugs = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "uptime": 42 })))
        .mount(&sonos)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&plugs)
        .await;

    let dashboard =
        Dashboard::new(config(vec![proxy("sonos", &sonos), proxy("plugs", &plugs)])).unwrap();
    assert_eq!(dashboard.lifecycle(), Lifecycle::Created);

    let ready = Arc::new(Mutex::new(None::<Value>));
    let sink = Arc::clone(&ready);
    dashboard.bus().once("app:ready", move |event| {
        *sink.lock().unwrap() = Some(event.payload.clone());
        Ok(())
    });

    let snapshot = dashboard.start().await;

    assert!(snapshot["sonos"].online);
    assert!(!snapshot["plugs"].online);
    assert_eq!(dashboard.lifecycle(), Lifecycle::Ready);

    let payload = ready.lock().unwrap().clone().unwrap();
    assert_eq!(payload["services"], json!({ "sonos": true, "plugs": false }));
    assert!(payload["timestamp"].is_string());

    assert_eq!(dashboard.store().get("connections.sonos.online"), Some(json!(true)));
    assert_eq!(dashboard.poller().task_names(), vec![CONNECTION_TASK]);
    assert!(dashboard.poller().task_status(CONNECTION_TASK).unwrap().timer_active);

    dashboard.shutdown();
    assert_eq!(dashboard.lifecycle(), Lifecycle::Stopped);
    assert!(!dashboard.poller().task_status(CONNECTION_TASK).unwrap().timer_active);
}

#[tokio::test]
async fn test_start_with_no_services_is_immediately_ready() {
    let dashboard = Dashboard::new(config(Vec::new())).unwrap();
    let snapshot = dashboard.start().await;
    assert!(snapshot.is_empty());
    assert_eq!(dashboard.lifecycle(), Lifecycle::Ready);
    dashboard.shutdown();
}

#[tokio::test]
async fn test_state_survives_restart_with_directory_storage() {
    let dir = tempfile::tempdir().unwrap();
    let storage_config = DashboardConfig {
        storage: StorageConfig::Directory(dir.path().join("state")),
        ..config(Vec::new())
    };

    let first = Dashboard::new(storage_config.clone()).unwrap();
    first.start().await;
    first
        .store()
        .set("settings.theme", json!("dark"), SetOptions::default());
    first
        .store()
        .set("scratch.note", json!("memory only"), SetOptions::default());
    first.shutdown();

    let second = Dashboard::new(storage_config).unwrap();
    second.start().await;

    assert_eq!(second.store().get("settings.theme"), Some(json!("dark")));
    assert_eq!(second.store().get("scratch"), None);
    second.shutdown();
}

#[tokio::test]
async fn test_duplicate_service_ids_are_rejected() {
    let server = MockServer::start().await;
    let result = Dashboard::new(config(vec![proxy("sonos", &server), proxy("sonos", &server)]));
    assert!(matches!(result, Err(CoreError::Config { .. })));
}
