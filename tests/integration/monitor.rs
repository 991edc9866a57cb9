//! Monitor integration tests against a live backend

use std::sync::Arc;
use std::time::Duration;

use argus::config::MonitorConfig;
use argus::journal::{self, JournalStore};
use argus::monitor::registry::ServerOwnership;
use argus::monitor::{Monitor, MonitorState};
use argus::server::Server;
use argus::status::Status;

use crate::{get_backend_config, skip_if_not_enabled};

fn monitor_config(name: &str, user: &str, password: &str) -> MonitorConfig {
    MonitorConfig {
        name: name.to_string(),
        module: "mariadbmon".to_string(),
        monitor_interval_ms: 200,
        journal_max_age_secs: 28800,
        script_timeout_secs: 10,
        script: String::new(),
        events: String::new(),
        backend_read_timeout_secs: 3,
        backend_write_timeout_secs: 3,
        backend_connect_timeout_secs: 3,
        backend_connect_attempts: 1,
        user: user.to_string(),
        password: password.to_string(),
        disk_space_check_interval_ms: 0,
        disk_space_threshold: String::new(),
        servers: vec!["backend-1".to_string()],
    }
}

#[tokio::test]
async fn test_monitor_detects_live_backend() {
    skip_if_not_enabled!();

    let backend = get_backend_config();
    let dir = tempfile::tempdir().unwrap();
    let ownership = Arc::new(ServerOwnership::new());
    let server = Server::new("backend-1", backend.host.clone(), backend.port);

    let mut m = Monitor::new("it-live", "mariadbmon", dir.path(), ownership);
    m.configure(
        &monitor_config("it-live", &backend.user, &backend.password),
        &[server.clone()],
    )
    .unwrap();
    m.start().await.unwrap();

    // Give the monitor a few ticks to probe and classify.
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(m.state(), MonitorState::Running);
    assert!(m.ticks() >= 2);
    assert!(server.is_running(), "backend should be detected as running");
    // A standalone backend is read-write with no slave status: a master.
    assert!(server.status().contains(Status::MASTER));

    m.stop().await;

    // The journal recorded the running state and the master designation.
    let store = JournalStore::new(dir.path(), "it-live");
    let payload = store.load().unwrap().expect("journal should exist");
    let (snapshot, err) = journal::decode(&payload);
    assert!(err.is_none());
    assert_eq!(snapshot.servers[0].0, "backend-1");
    assert_ne!(snapshot.servers[0].1 & Status::RUNNING, 0);
    assert_eq!(snapshot.master.as_deref(), Some("backend-1"));
}

#[tokio::test]
async fn test_monitor_warm_start_from_journal() {
    skip_if_not_enabled!();

    let backend = get_backend_config();
    let dir = tempfile::tempdir().unwrap();
    let ownership = Arc::new(ServerOwnership::new());
    let config = monitor_config("it-warm", &backend.user, &backend.password);

    // First run writes the journal.
    {
        let server = Server::new("backend-1", backend.host.clone(), backend.port);
        let mut m = Monitor::new("it-warm", "mariadbmon", dir.path(), ownership.clone());
        m.configure(&config, &[server.clone()]).unwrap();
        m.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        m.deactivate().await;
    }

    // Second run restores the previous state before the first probe, so the
    // up transition is not re-announced: the record starts observed.
    let server = Server::new("backend-1", backend.host.clone(), backend.port);
    let mut m = Monitor::new("it-warm", "mariadbmon", dir.path(), ownership);
    m.configure(&config, &[server.clone()]).unwrap();
    m.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(server.is_running());
    assert!(server.last_event().is_none(), "no event on unchanged state");

    m.stop().await;
}

#[tokio::test]
async fn test_maintenance_toggle_against_live_backend() {
    skip_if_not_enabled!();

    let backend = get_backend_config();
    let dir = tempfile::tempdir().unwrap();
    let ownership = Arc::new(ServerOwnership::new());
    let server = Server::new("backend-1", backend.host.clone(), backend.port);

    let mut m = Monitor::new("it-maint", "mariadbmon", dir.path(), ownership);
    m.configure(
        &monitor_config("it-maint", &backend.user, &backend.password),
        &[server.clone()],
    )
    .unwrap();
    m.start().await.unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(server.is_running());

    m.set_server_status("backend-1", Status::MAINT).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(server.is_in_maint());
    assert!(!server.is_usable());

    m.clear_server_status("backend-1", Status::MAINT).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!server.is_in_maint());

    m.stop().await;
}
