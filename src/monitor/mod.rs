//! Server monitoring engine
//!
//! A [`Monitor`] owns an ordered set of monitored servers and one worker
//! task that probes them on a fixed tick. The `Monitor` value itself is the
//! admin handle: configuration, lifecycle and status requests all go through
//! it, and exclusive ownership of the value is what serializes admin access.
//! The worker only ever touches the shared pieces (server statuses, request
//! slots, the tick counter) through atomics, so the two sides never race.

pub mod disk;
pub mod event;
pub mod mariadb;
pub mod probe;
pub mod record;
pub mod registry;
pub mod script;
pub mod strategy;
mod worker;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::MonitorConfig;
use crate::journal::JournalStore;
use crate::server::{
    NoServiceCallbacks, PasswordDecryptor, PlainTextPasswords, Server, ServiceCallbacks,
};
use crate::status::Status;

use disk::DiskSpaceLimits;
use event::EventSet;
use probe::ProbeSettings;
use record::{MonitoredServer, StatusRequest};
use registry::{OwnershipError, ServerOwnership};
use strategy::{strategy_for_module, MonitorStrategy};
use worker::Worker;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Monitor '{0}' must be stopped for this operation")]
    NotStopped(String),
    #[error("Monitor '{0}' is already running")]
    AlreadyRunning(String),
    #[error(transparent)]
    Ownership(#[from] OwnershipError),
    #[error("Invalid value for 'disk_space_threshold' for monitor '{monitor}': {reason}")]
    InvalidDiskSpaceThreshold { monitor: String, reason: String },
    #[error("Invalid value for 'events' for monitor '{monitor}': {reason}")]
    InvalidEvents { monitor: String, reason: String },
    #[error("Configuration of monitor '{monitor}' failed: {failures}")]
    Configuration { monitor: String, failures: String },
    #[error("Monitor '{0}' does not monitor a server named '{1}'")]
    UnknownServer(String, String),
    #[error(
        "The server is monitored, so only the maintenance and draining status \
         can be set or cleared manually. Status was not modified."
    )]
    CannotModifyStatus,
    #[error("Failed to start monitor '{0}': {1}")]
    StartFailed(String, String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Running,
    Stopped,
}

impl std::fmt::Display for MonitorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorState::Running => f.write_str("Running"),
            MonitorState::Stopped => f.write_str("Stopped"),
        }
    }
}

/// Runtime settings of one monitor, resolved from its configuration block.
#[derive(Debug, Clone)]
pub struct Settings {
    pub interval: Duration,
    pub journal_max_age: Duration,
    pub script_timeout: Duration,
    pub script: String,
    pub events: EventSet,
    pub probe: ProbeSettings,
    /// `None` disables disk space checking.
    pub disk_space_check_interval: Option<Duration>,
    pub disk_space_limits: DiskSpaceLimits,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2000),
            journal_max_age: Duration::from_secs(28800),
            script_timeout: Duration::from_secs(90),
            script: String::new(),
            events: EventSet::ALL,
            probe: ProbeSettings {
                connect_timeout: Duration::from_secs(3),
                read_timeout: Duration::from_secs(3),
                write_timeout: Duration::from_secs(3),
                connect_attempts: 1,
                user: String::new(),
                password: String::new(),
            },
            disk_space_check_interval: None,
            disk_space_limits: DiskSpaceLimits::default(),
        }
    }
}

impl Settings {
    fn from_config(config: &MonitorConfig) -> Result<Self, MonitorError> {
        let events = EventSet::parse(&config.events).map_err(|reason| {
            MonitorError::InvalidEvents {
                monitor: config.name.clone(),
                reason,
            }
        })?;
        let disk_space_limits: DiskSpaceLimits =
            config.disk_space_threshold.parse().map_err(|reason| {
                MonitorError::InvalidDiskSpaceThreshold {
                    monitor: config.name.clone(),
                    reason,
                }
            })?;

        Ok(Self {
            interval: Duration::from_millis(config.monitor_interval_ms),
            journal_max_age: Duration::from_secs(config.journal_max_age_secs),
            script_timeout: Duration::from_secs(config.script_timeout_secs),
            script: config.script.clone(),
            events,
            probe: ProbeSettings {
                connect_timeout: Duration::from_secs(config.backend_connect_timeout_secs),
                read_timeout: Duration::from_secs(config.backend_read_timeout_secs),
                write_timeout: Duration::from_secs(config.backend_write_timeout_secs),
                connect_attempts: config.backend_connect_attempts,
                user: config.user.clone(),
                password: config.password.clone(),
            },
            disk_space_check_interval: (config.disk_space_check_interval_ms > 0)
                .then(|| Duration::from_millis(config.disk_space_check_interval_ms)),
            disk_space_limits,
        })
    }
}

struct WorkerHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Admin handle of one monitor.
pub struct Monitor {
    name: String,
    module: String,
    settings: Settings,
    servers: Vec<Arc<MonitoredServer>>,
    ticks: Arc<AtomicU64>,
    status_change_pending: Arc<AtomicBool>,
    ownership: Arc<ServerOwnership>,
    strategy: Arc<dyn MonitorStrategy>,
    callbacks: Arc<dyn ServiceCallbacks>,
    decryptor: Arc<dyn PasswordDecryptor>,
    data_dir: PathBuf,
    worker: Option<WorkerHandle>,
    /// Permission pre-flight has passed once; not repeated on restarts.
    permissions_checked: bool,
    /// Configuration echo for serialization.
    parameters: Option<MonitorConfig>,
}

impl Monitor {
    pub fn new(
        name: impl Into<String>,
        module: impl Into<String>,
        data_dir: impl Into<PathBuf>,
        ownership: Arc<ServerOwnership>,
    ) -> Self {
        let module = module.into();
        Self {
            name: name.into(),
            strategy: strategy_for_module(&module),
            module,
            settings: Settings::default(),
            servers: Vec::new(),
            ticks: Arc::new(AtomicU64::new(0)),
            status_change_pending: Arc::new(AtomicBool::new(false)),
            ownership,
            callbacks: Arc::new(NoServiceCallbacks),
            decryptor: Arc::new(PlainTextPasswords),
            data_dir: data_dir.into(),
            worker: None,
            permissions_checked: false,
            parameters: None,
        }
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn MonitorStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_callbacks(mut self, callbacks: Arc<dyn ServiceCallbacks>) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn with_decryptor(mut self, decryptor: Arc<dyn PasswordDecryptor>) -> Self {
        self.decryptor = decryptor;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn state(&self) -> MonitorState {
        match &self.worker {
            Some(handle) if !handle.handle.is_finished() => MonitorState::Running,
            _ => MonitorState::Stopped,
        }
    }

    /// Completed ticks since creation.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    pub fn servers(&self) -> &[Arc<MonitoredServer>] {
        &self.servers
    }

    /// Apply a configuration block. The monitor must be stopped. The server
    /// list is rebuilt from scratch; a server that cannot be claimed fails
    /// the result but does not stop the remaining servers from being added.
    pub fn configure(
        &mut self,
        config: &MonitorConfig,
        servers: &[Arc<Server>],
    ) -> Result<(), MonitorError> {
        if self.state() == MonitorState::Running {
            return Err(MonitorError::NotStopped(self.name.clone()));
        }

        self.settings = Settings::from_config(config)?;

        self.remove_all_servers();

        let mut failures = Vec::new();
        for name in &config.servers {
            let Some(server) = servers.iter().find(|s| s.name() == name.as_str()) else {
                error!(
                    monitor = %self.name,
                    server = %name,
                    "Cannot monitor unknown server"
                );
                failures.push(format!("unknown server '{name}'"));
                continue;
            };
            if let Err(e) = self.add_server(server.clone()) {
                error!(monitor = %self.name, error = %e, "Failed to add server");
                failures.push(e.to_string());
            }
        }

        self.parameters = Some(config.clone());

        if failures.is_empty() {
            Ok(())
        } else {
            Err(MonitorError::Configuration {
                monitor: self.name.clone(),
                failures: failures.join("; "),
            })
        }
    }

    /// Claim and append a server. The monitor must be stopped.
    pub fn add_server(&mut self, server: Arc<Server>) -> Result<(), MonitorError> {
        if self.state() == MonitorState::Running {
            return Err(MonitorError::NotStopped(self.name.clone()));
        }
        self.ownership.claim(server.name(), &self.name)?;
        self.servers.push(MonitoredServer::new(server.clone()));
        self.callbacks.server_added(&server);
        Ok(())
    }

    /// Release every claimed server and drop the records.
    pub fn remove_all_servers(&mut self) {
        debug_assert!(self.state() == MonitorState::Stopped);
        for record in self.servers.drain(..) {
            let server = record.server();
            debug_assert_eq!(
                self.ownership.claimed_by(server.name()).as_deref(),
                Some(self.name.as_str())
            );
            self.ownership.release(server.name());
            self.callbacks.server_removed(server);
        }
    }

    /// Spawn the worker. Runs the permission pre-flight on the first start
    /// and discards a stale journal.
    pub async fn start(&mut self) -> Result<(), MonitorError> {
        if self.state() == MonitorState::Running {
            return Err(MonitorError::AlreadyRunning(self.name.clone()));
        }

        let journal = JournalStore::new(&self.data_dir, &self.name);
        if journal.is_stale(self.settings.journal_max_age) {
            warn!(monitor = %self.name, "Removing stale journal file");
            journal.remove();
        }

        if !self.permissions_checked {
            let strategy = self.strategy.clone();
            if !strategy.has_sufficient_permissions(self).await {
                return Err(MonitorError::StartFailed(
                    self.name.clone(),
                    "insufficient permissions, see earlier errors for details".into(),
                ));
            }
            self.permissions_checked = true;
        }

        let cancel = CancellationToken::new();
        let worker = Worker {
            monitor_name: self.name.clone(),
            servers: self.servers.clone(),
            settings: self.settings.clone(),
            strategy: self.strategy.clone(),
            decryptor: self.decryptor.clone(),
            callbacks: self.callbacks.clone(),
            ticks: self.ticks.clone(),
            status_change_pending: self.status_change_pending.clone(),
            journal,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(worker.run());
        self.worker = Some(WorkerHandle { cancel, handle });

        info!(monitor = %self.name, "Monitor started");
        Ok(())
    }

    /// Signal the worker and wait for it to finish its current tick and
    /// exit. Connection handles are closed by the departing worker.
    pub async fn stop(&mut self) {
        if let Some(handle) = self.worker.take() {
            handle.cancel.cancel();
            if let Err(e) = handle.handle.await {
                error!(monitor = %self.name, error = %e, "Monitor worker task failed");
            }
            info!(monitor = %self.name, "Monitor stopped");
        }
    }

    /// Stop and unregister everything; the end of this monitor's life.
    pub async fn deactivate(&mut self) {
        self.stop().await;
        self.remove_all_servers();
    }

    /// Delete the on-disk journal.
    pub fn remove_journal(&self) {
        JournalStore::new(&self.data_dir, &self.name).remove();
    }

    /// Set status bits on a monitored server.
    ///
    /// While the monitor runs, only the maintenance and draining bits may be
    /// set and they travel through the per-server request slot; a stopped
    /// monitor's servers are written directly. Returns whether the request
    /// was written.
    pub fn set_server_status(&self, server_name: &str, bits: u64) -> Result<bool, MonitorError> {
        self.change_server_status(server_name, bits, true)
    }

    /// Clear status bits on a monitored server; same rules as
    /// [`set_server_status`](Self::set_server_status).
    pub fn clear_server_status(&self, server_name: &str, bits: u64) -> Result<bool, MonitorError> {
        self.change_server_status(server_name, bits, false)
    }

    fn change_server_status(
        &self,
        server_name: &str,
        bits: u64,
        set: bool,
    ) -> Result<bool, MonitorError> {
        let record = self
            .servers
            .iter()
            .find(|r| r.server().name() == server_name)
            .ok_or_else(|| {
                MonitorError::UnknownServer(self.name.clone(), server_name.to_string())
            })?;

        if self.state() == MonitorState::Running {
            if bits & !(Status::MAINT | Status::DRAINING) != 0 {
                return Err(MonitorError::CannotModifyStatus);
            }
            let request = match (bits & Status::MAINT != 0, set) {
                (true, true) => StatusRequest::MaintOn,
                (true, false) => StatusRequest::MaintOff,
                (false, true) => StatusRequest::DrainOn,
                (false, false) => StatusRequest::DrainOff,
            };
            let previous = record.push_request(request);
            if previous != StatusRequest::None {
                warn!(
                    monitor = %self.name,
                    server = server_name,
                    "Previous maintenance request was not yet read by the monitor \
                     and was overwritten"
                );
            }
            self.status_change_pending.store(true, Ordering::Release);
        } else if set {
            record.server().set_status_bits(bits);
        } else {
            record.server().clear_status_bits(bits);
        }

        Ok(true)
    }

    /// Connect to every monitored server and execute `query` with the
    /// monitor credentials. Access-denied answers on either step fail the
    /// check permanently; other errors (server down, network) are tolerated.
    pub async fn test_permissions(&self, query: &str) -> bool {
        if self.servers.is_empty() {
            return true;
        }

        let mut denied = false;
        for record in &self.servers {
            let server = record.server();
            let mut slot = record.conn_slot().lock().await;
            let result = probe::ping_or_connect(
                &self.settings.probe,
                self.decryptor.as_ref(),
                server,
                &mut *slot,
            )
            .await;

            if !probe::connection_is_ok(&result) {
                let access_denied = result.error().is_some_and(|e| e.is_access_denied());
                error!(
                    monitor = %self.name,
                    server = server.name(),
                    endpoint = %server.endpoint(),
                    error = %result.error().map(ToString::to_string).unwrap_or_default(),
                    "Failed to connect to server when checking monitor user credentials \
                     and permissions"
                );
                denied |= access_denied;
                continue;
            }

            let conn = slot.as_mut().expect("probe left a live connection");
            if let Err(e) = conn.query_rows(query).await {
                error!(
                    monitor = %self.name,
                    server = server.name(),
                    query,
                    user = %self.settings.probe.user,
                    error = %e,
                    "Failed to execute query when checking monitor permissions"
                );
                denied |= e.is_access_denied();
            }
        }

        !denied
    }

    /// REST-style serialization of the monitor: identity, state, parameters
    /// and the server relationships, plus per-server diagnostics while
    /// running.
    pub fn to_json(&self, host: &str) -> serde_json::Value {
        let state = self.state();

        let mut attributes = json!({
            "module": self.module,
            "state": state.to_string(),
            "ticks": self.ticks(),
            "parameters": self.parameters_to_json(),
        });

        if state == MonitorState::Running {
            let server_info: Vec<serde_json::Value> = self
                .servers
                .iter()
                .map(|r| {
                    let server = r.server();
                    let last_event = server.last_event();
                    json!({
                        "name": server.name(),
                        "status": server.status().to_string(),
                        "last_event": last_event.map(|e| e.event.name()),
                    })
                })
                .collect();
            attributes["monitor_diagnostics"] = json!({ "server_info": server_info });
        }

        let relationships = json!({
            "servers": {
                "links": { "self": format!("{host}/v1/servers/") },
                "data": self
                    .servers
                    .iter()
                    .map(|r| json!({ "id": r.server().name(), "type": "servers" }))
                    .collect::<Vec<_>>(),
            }
        });

        json!({
            "id": self.name,
            "type": "monitors",
            "attributes": attributes,
            "relationships": relationships,
            "links": { "self": format!("{host}/v1/monitors/{}", self.name) },
        })
    }

    fn parameters_to_json(&self) -> serde_json::Value {
        let Some(params) = &self.parameters else {
            return json!({});
        };
        json!({
            "module": params.module,
            "monitor_interval": params.monitor_interval_ms,
            "journal_max_age": params.journal_max_age_secs,
            "script_timeout": params.script_timeout_secs,
            "script": params.script,
            "events": params.events,
            "backend_read_timeout": params.backend_read_timeout_secs,
            "backend_write_timeout": params.backend_write_timeout_secs,
            "backend_connect_timeout": params.backend_connect_timeout_secs,
            "backend_connect_attempts": params.backend_connect_attempts,
            "user": params.user,
            "password": "*****",
            "disk_space_check_interval": params.disk_space_check_interval_ms,
            "disk_space_threshold": params.disk_space_threshold,
            "servers": params.servers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::strategy::ProbeOnlyStrategy;

    fn test_config(name: &str, servers: Vec<String>) -> MonitorConfig {
        MonitorConfig {
            name: name.to_string(),
            module: "mariadbmon".to_string(),
            monitor_interval_ms: 100,
            journal_max_age_secs: 28800,
            script_timeout_secs: 5,
            script: String::new(),
            events: String::new(),
            backend_read_timeout_secs: 1,
            backend_write_timeout_secs: 1,
            backend_connect_timeout_secs: 1,
            backend_connect_attempts: 1,
            user: "monitor".to_string(),
            password: String::new(),
            disk_space_check_interval_ms: 0,
            disk_space_threshold: String::new(),
            servers,
        }
    }

    fn monitor(name: &str, dir: &std::path::Path, ownership: &Arc<ServerOwnership>) -> Monitor {
        Monitor::new(name, "mariadbmon", dir, ownership.clone())
            .with_strategy(Arc::new(ProbeOnlyStrategy))
    }

    #[tokio::test]
    async fn test_ownership_conflict_between_monitors() {
        let dir = tempfile::tempdir().unwrap();
        let ownership = Arc::new(ServerOwnership::new());
        let server = Server::new("srv-a", "localhost", 3306);

        let mut m1 = monitor("M1", dir.path(), &ownership);
        let mut m2 = monitor("M2", dir.path(), &ownership);

        m1.add_server(server.clone()).unwrap();

        let err = m2.add_server(server.clone()).unwrap_err();
        match err {
            MonitorError::Ownership(OwnershipError::AlreadyClaimed { server, owner }) => {
                assert_eq!(server, "srv-a");
                assert_eq!(owner, "M1");
            }
            other => panic!("unexpected error: {other}"),
        }

        // M1 still owns the server; releasing via M1 frees it for M2.
        m1.remove_all_servers();
        m2.add_server(server).unwrap();
    }

    #[tokio::test]
    async fn test_configure_claims_all_servers() {
        let dir = tempfile::tempdir().unwrap();
        let ownership = Arc::new(ServerOwnership::new());
        let servers = vec![
            Server::new("db-1", "localhost", 3306),
            Server::new("db-2", "localhost", 3307),
        ];

        let mut m = monitor("M1", dir.path(), &ownership);
        let config = test_config("M1", vec!["db-1".into(), "db-2".into()]);
        m.configure(&config, &servers).unwrap();

        assert_eq!(m.servers().len(), 2);
        assert_eq!(ownership.claimed_by("db-1").as_deref(), Some("M1"));
        assert_eq!(ownership.claimed_by("db-2").as_deref(), Some("M1"));

        // Reconfiguration with a shorter list releases the dropped server.
        let config = test_config("M1", vec!["db-2".into()]);
        m.configure(&config, &servers).unwrap();
        assert!(ownership.claimed_by("db-1").is_none());
        assert_eq!(m.servers().len(), 1);
    }

    #[tokio::test]
    async fn test_configure_continues_after_failed_claim() {
        let dir = tempfile::tempdir().unwrap();
        let ownership = Arc::new(ServerOwnership::new());
        let servers = vec![
            Server::new("db-1", "localhost", 3306),
            Server::new("db-2", "localhost", 3307),
        ];

        let mut other = monitor("Other", dir.path(), &ownership);
        other.add_server(servers[0].clone()).unwrap();

        let mut m = monitor("M1", dir.path(), &ownership);
        let config = test_config("M1", vec!["db-1".into(), "db-2".into()]);
        let err = m.configure(&config, &servers).unwrap_err();

        assert!(matches!(err, MonitorError::Configuration { .. }));
        assert!(err.to_string().contains("Other"));
        // db-2 was still added.
        assert_eq!(m.servers().len(), 1);
        assert_eq!(ownership.claimed_by("db-2").as_deref(), Some("M1"));
    }

    #[tokio::test]
    async fn test_set_status_directly_while_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let ownership = Arc::new(ServerOwnership::new());
        let server = Server::new("db-1", "localhost", 3306);

        let mut m = monitor("M1", dir.path(), &ownership);
        m.add_server(server.clone()).unwrap();

        // Stopped: any bit goes straight to the descriptor.
        assert!(m.set_server_status("db-1", Status::MAINT).unwrap());
        assert!(server.is_in_maint());
        assert!(m.clear_server_status("db-1", Status::MAINT).unwrap());
        assert!(!server.is_in_maint());

        assert!(matches!(
            m.set_server_status("nope", Status::MAINT),
            Err(MonitorError::UnknownServer(..))
        ));
    }

    #[tokio::test]
    async fn test_invalid_config_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ownership = Arc::new(ServerOwnership::new());
        let mut m = monitor("M1", dir.path(), &ownership);

        let mut config = test_config("M1", vec![]);
        config.events = "no_such_event".into();
        assert!(matches!(
            m.configure(&config, &[]),
            Err(MonitorError::InvalidEvents { .. })
        ));

        let mut config = test_config("M1", vec![]);
        config.disk_space_threshold = "/data:9000".into();
        assert!(matches!(
            m.configure(&config, &[]),
            Err(MonitorError::InvalidDiskSpaceThreshold { .. })
        ));
    }

    #[tokio::test]
    async fn test_to_json_shape() {
        let dir = tempfile::tempdir().unwrap();
        let ownership = Arc::new(ServerOwnership::new());
        let servers = vec![Server::new("db-1", "localhost", 3306)];

        let mut m = monitor("M1", dir.path(), &ownership);
        m.configure(&test_config("M1", vec!["db-1".into()]), &servers)
            .unwrap();

        let json = m.to_json("http://localhost:8989");
        assert_eq!(json["id"], "M1");
        assert_eq!(json["type"], "monitors");
        assert_eq!(json["attributes"]["state"], "Stopped");
        assert_eq!(json["attributes"]["parameters"]["password"], "*****");
        assert_eq!(
            json["relationships"]["servers"]["data"][0]["id"],
            "db-1"
        );
        assert_eq!(
            json["links"]["self"],
            "http://localhost:8989/v1/monitors/M1"
        );
        // Diagnostics only appear while running.
        assert!(json["attributes"]["monitor_diagnostics"].is_null());
    }

    /// End-to-end worker behavior against a closed port: the probe fails
    /// fast, the server is marked down, ticks advance and the journal lands
    /// on disk.
    #[tokio::test]
    async fn test_worker_marks_unreachable_server_down() {
        let dir = tempfile::tempdir().unwrap();
        let ownership = Arc::new(ServerOwnership::new());

        // Grab a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let server = Server::new("db-1", "127.0.0.1", port);
        // Pretend it was up so the first tick detects a change.
        server.set_status_bits(Status::RUNNING);

        let mut m = monitor("M1", dir.path(), &ownership);
        m.configure(&test_config("M1", vec!["db-1".into()]), &[server.clone()])
            .unwrap();
        m.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(m.state(), MonitorState::Running);
        assert!(m.ticks() >= 1);
        assert!(server.is_down());
        assert!(m.servers()[0].err_count() >= 1);

        m.stop().await;
        assert_eq!(m.state(), MonitorState::Stopped);

        // Ticks stop advancing once the worker is joined.
        let ticks = m.ticks();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(m.ticks(), ticks);

        // The journal was persisted and records the server as down.
        let store = JournalStore::new(dir.path(), "M1");
        let payload = store.load().unwrap().expect("journal should exist");
        let (snapshot, err) = crate::journal::decode(&payload);
        assert!(err.is_none());
        assert_eq!(snapshot.servers.len(), 1);
        assert_eq!(snapshot.servers[0].0, "db-1");
        assert_eq!(snapshot.servers[0].1 & Status::RUNNING, 0);
    }

    /// A maintenance request against a running monitor is applied within a
    /// couple of base intervals and the server is skipped afterwards.
    #[tokio::test]
    async fn test_maintenance_toggle_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let ownership = Arc::new(ServerOwnership::new());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let server = Server::new("db-1", "127.0.0.1", port);
        let mut m = monitor("M1", dir.path(), &ownership);
        // Long interval: only admin requests force ticks after the first.
        let mut config = test_config("M1", vec!["db-1".into()]);
        config.monitor_interval_ms = 60_000;
        m.configure(&config, &[server.clone()]).unwrap();
        m.start().await.unwrap();

        // Let the initial tick run.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let ticks_before = m.ticks();

        assert!(m.set_server_status("db-1", Status::MAINT).unwrap());
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(server.is_in_maint());
        assert!(m.ticks() > ticks_before);

        // Running monitors only accept the maintenance and draining bits.
        assert!(matches!(
            m.set_server_status("db-1", Status::MASTER),
            Err(MonitorError::CannotModifyStatus)
        ));

        assert!(m.clear_server_status("db-1", Status::MAINT).unwrap());
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!server.is_in_maint());

        m.stop().await;
    }
}
