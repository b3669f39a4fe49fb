//! Client resolver chain against a live server.

#![cfg(all(feature = "server", feature = "client"))]

use hotswap_relay::client::{ConfigClient, PropertyChangeType, SourceKind, StaticOverrides};
use hotswap_relay::content::InMemoryContent;
use hotswap_relay::error::RelayError;
use hotswap_relay::server::ConfigServer;
use hotswap_relay::settings::{ClientSettings, RelaySettings};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

struct Running {
    server: Arc<ConfigServer>,
    content: Arc<InMemoryContent>,
    namespace_id: i64,
    url: String,
}

async fn start_server() -> Running {
    let content = Arc::new(InMemoryContent::new());
    let namespace = content.create_namespace("shop", "default", "application");
    content.set_item(namespace.id, "timeout", "30").unwrap();
    content.set_item(namespace.id, "retries", "3").unwrap();
    content.publish(namespace.id).unwrap();

    let mut settings = RelaySettings::default();
    settings.notification.scan_interval_ms = 20;
    let server = Arc::new(
        ConfigServer::builder(settings)
            .with_content(Arc::clone(&content))
            .build()
            .unwrap(),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(Arc::clone(&server).serve_with_listener(listener));

    Running {
        server,
        content,
        namespace_id: namespace.id,
        url,
    }
}

/// An address nothing listens on.
async fn dead_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

fn settings(url: String, cache_dir: Option<&Path>) -> ClientSettings {
    let mut settings = ClientSettings::for_tenant("shop");
    settings.config_services = vec![url];
    settings.cache_dir = cache_dir.map(Path::to_path_buf);
    settings.retry_interval_ms = 10;
    settings.long_poll_initial_backoff_ms = 50;
    settings
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_release_reaches_client_listener() {
    let running = start_server().await;
    let cache_dir = TempDir::new().unwrap();

    let client = ConfigClient::builder(settings(running.url.clone(), Some(cache_dir.path())))
        .with_override(Arc::new(StaticOverrides::new().with("retries", "9")))
        .build()
        .await
        .unwrap();
    let config = client.namespace("application").await.unwrap();
    assert_eq!(config.snapshot().source, SourceKind::Remote);
    assert_eq!(config.get("timeout").as_deref(), Some("30"));
    assert_eq!(config.get("retries").as_deref(), Some("9"));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _handle = config.subscribe(move |event| {
        let _ = tx.send(event.clone());
    });

    let id = running.namespace_id;
    running.content.set_item(id, "timeout", "60").unwrap();
    running.content.set_item(id, "retries", "5").unwrap();
    running.content.publish(id).unwrap();
    running
        .server
        .record_release("shop", "default", "application")
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("no change delivered")
        .unwrap();

    // `retries` is overridden locally, so only `timeout` is reported.
    assert_eq!(event.changed_keys().collect::<Vec<_>>(), vec!["timeout"]);
    let change = event.change("timeout").unwrap();
    assert_eq!(change.change_type, PropertyChangeType::Modified);
    assert_eq!(change.old_value.as_deref(), Some("30"));
    assert_eq!(change.new_value.as_deref(), Some("60"));
    assert_eq!(config.get("timeout").as_deref(), Some("60"));
    assert!(config.snapshot().last_notification_sequence > 0);

    // The refreshed snapshot was persisted; a client that cannot reach any
    // service falls back to it.
    let offline = ConfigClient::builder(settings(dead_url().await, Some(cache_dir.path())))
        .build()
        .await
        .unwrap();
    let fallback = offline.namespace("application").await.unwrap();
    assert_eq!(fallback.snapshot().source, SourceKind::Disk);
    assert_eq!(fallback.get("timeout").as_deref(), Some("60"));

    running.server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_offline_client_walks_down_the_tiers() {
    let url = dead_url().await;

    let client = ConfigClient::builder(settings(url.clone(), None))
        .with_bundled("application", "timeout=15\n")
        .with_default(
            "defaults-only",
            BTreeMap::from([("timeout".to_string(), "1".to_string())]),
        )
        .build()
        .await
        .unwrap();

    let bundled = client.namespace("application").await.unwrap();
    assert_eq!(bundled.snapshot().source, SourceKind::Bundled);
    assert_eq!(bundled.get_or("timeout", "0"), "15");

    let defaulted = client.namespace("defaults-only").await.unwrap();
    assert_eq!(defaulted.snapshot().source, SourceKind::None);

    match client.namespace("unknown").await {
        Err(RelayError::NoConfigAvailable { namespace }) => assert_eq!(namespace, "unknown"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("expected no configuration"),
    }

    // A failed refresh keeps the bundled values and flags the snapshot.
    assert!(bundled.refresh().await.is_err());
    assert!(bundled.snapshot().degraded);
    assert_eq!(bundled.get_or("timeout", "0"), "15");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unpublished_namespace_is_not_served() {
    let running = start_server().await;

    let client = ConfigClient::builder(settings(running.url.clone(), None))
        .build()
        .await
        .unwrap();
    let result = client.namespace("absent").await;
    assert!(matches!(result, Err(RelayError::NoConfigAvailable { .. })));

    running.server.shutdown();
}
