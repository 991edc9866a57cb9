//! The monitor worker loop
//!
//! Each started monitor runs exactly one worker task. The worker owns the
//! probe state of every record, the designated master and the journal; the
//! admin side communicates with it only through the per-record request slots
//! and the pending flag.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::backend::{err_code, BackendConnection};
use crate::journal::{self, JournalStore};
use crate::metrics::metrics;
use crate::monitor::disk::{self, MountInfo};
use crate::monitor::event::{self, MonitorEvent};
use crate::monitor::probe::{self, ConnectResult};
use crate::monitor::record::{MonitoredServer, StatusRequest};
use crate::monitor::script::{self, ScriptError};
use crate::monitor::strategy::{MonitorStrategy, TickContext};
use crate::monitor::Settings;
use crate::server::{PasswordDecryptor, ServiceCallbacks};
use crate::status::Status;

/// Minimum sleep between two ticks and the poll period for early wakeups.
const BASE_INTERVAL: Duration = Duration::from_millis(100);

pub(super) struct Worker {
    pub monitor_name: String,
    pub servers: Vec<Arc<MonitoredServer>>,
    pub settings: Settings,
    pub strategy: Arc<dyn MonitorStrategy>,
    pub decryptor: Arc<dyn PasswordDecryptor>,
    pub callbacks: Arc<dyn ServiceCallbacks>,
    pub ticks: Arc<AtomicU64>,
    pub status_change_pending: Arc<AtomicBool>,
    pub journal: JournalStore,
    pub cancel: CancellationToken,
}

impl Worker {
    pub async fn run(mut self) {
        let mut master: Option<Arc<MonitoredServer>> = None;
        self.pre_loop(&mut master).await;

        let mut disk_space_checked = Instant::now();
        let mut last_tick = Instant::now();
        // The first tick runs immediately.
        let mut first_tick = true;
        let mut delay = Duration::ZERO;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            if first_tick
                || last_tick.elapsed() >= self.settings.interval
                || self.status_change_pending.load(Ordering::Acquire)
                || self.strategy.immediate_tick_required()
            {
                first_tick = false;
                last_tick = Instant::now();
                self.tick(&mut master, &mut disk_space_checked).await;
                self.ticks.fetch_add(1, Ordering::AcqRel);
                metrics()
                    .ticks_total
                    .with_label_values(&[&self.monitor_name])
                    .inc();
            }

            let remaining = self.settings.interval.saturating_sub(last_tick.elapsed());
            delay = if remaining.is_zero() || remaining >= BASE_INTERVAL {
                BASE_INTERVAL
            } else {
                remaining
            };
        }

        self.post_loop(&mut master).await;
    }

    /// Restore journaled state, then hand the strategy its first look.
    async fn pre_loop(&mut self, master: &mut Option<Arc<MonitoredServer>>) {
        match self.journal.load() {
            Ok(Some(payload)) => {
                let (snapshot, decode_error) = journal::decode(&payload);
                for (name, status) in &snapshot.servers {
                    if let Some(record) = self.find_record(name) {
                        record.restore_status(Status(*status));
                    }
                }
                if let Some(name) = &snapshot.master {
                    *master = self.find_record(name);
                }
                match decode_error {
                    None => info!(
                        monitor = %self.monitor_name,
                        path = %self.journal.path().display(),
                        "Loaded server states from journal file"
                    ),
                    Some(e) => error!(
                        monitor = %self.monitor_name,
                        error = %e,
                        "Possibly corrupted journal file. Ignoring."
                    ),
                }
            }
            Ok(None) => {}
            Err(e) => error!(
                monitor = %self.monitor_name,
                error = %e,
                "Failed to read journal file. Ignoring."
            ),
        }

        let mut ctx = TickContext {
            servers: &self.servers,
            master,
        };
        self.strategy.pre_loop(&mut ctx).await;
    }

    async fn post_loop(&mut self, master: &mut Option<Arc<MonitoredServer>>) {
        let mut ctx = TickContext {
            servers: &self.servers,
            master,
        };
        self.strategy.post_loop(&mut ctx).await;

        for record in &self.servers {
            if let Some(conn) = record.conn_slot().lock().await.take() {
                conn.close().await;
            }
        }
        debug!(monitor = %self.monitor_name, "Monitor worker exited");
    }

    async fn tick(
        &mut self,
        master: &mut Option<Arc<MonitoredServer>>,
        disk_space_checked: &mut Instant,
    ) {
        self.apply_admin_requests();

        {
            let mut ctx = TickContext {
                servers: &self.servers,
                master: &mut *master,
            };
            self.strategy.pre_tick(&mut ctx).await;
        }

        let update_disk_space = self.check_disk_space_this_tick(disk_space_checked);

        for record in &self.servers {
            if record.server().is_in_maint() {
                continue;
            }
            self.probe_one(record, update_disk_space).await;
        }

        {
            let mut ctx = TickContext {
                servers: &self.servers,
                master: &mut *master,
            };
            self.strategy.post_tick(&mut ctx).await;
        }

        self.flush_pending_statuses();
        self.process_state_changes().await;
        self.hangup_failed_servers();
        self.persist_journal(master.as_deref());
    }

    /// Drain the admin request slots into the server statuses. The admin can
    /// only toggle the maintenance and draining bits this way.
    fn apply_admin_requests(&self) {
        if !self.status_change_pending.swap(false, Ordering::AcqRel) {
            return;
        }

        for record in &self.servers {
            let server = record.server();
            match record.take_request() {
                StatusRequest::None => {}
                StatusRequest::MaintOn => server.set_status_bits(Status::MAINT),
                StatusRequest::MaintOff => server.clear_status_bits(Status::MAINT),
                StatusRequest::DrainOn => server.set_status_bits(Status::DRAINING),
                StatusRequest::DrainOff => server.clear_status_bits(Status::DRAINING),
            }
        }
    }

    async fn probe_one(&self, record: &Arc<MonitoredServer>, update_disk_space: bool) {
        let server = record.server();
        record.stash_current_status();

        let mut slot = record.conn_slot().lock().await;
        let result = probe::ping_or_connect(
            &self.settings.probe,
            self.decryptor.as_ref(),
            server,
            &mut *slot,
        )
        .await;

        metrics()
            .probes_total
            .with_label_values(&[&self.monitor_name, probe_label(&result)])
            .inc();

        if probe::connection_is_ok(&result) {
            record.clear_pending(Status::AUTH_ERROR);
            record.set_pending(Status::RUNNING);

            let conn = slot.as_mut().expect("probe left a live connection");
            if update_disk_space && self.can_update_disk_space(record) {
                self.update_disk_space_status(record, conn).await;
            }
            self.strategy.update_server_status(record, conn).await;
        } else {
            // Everything except the has-been-a-master mark is wiped on a
            // failed probe.
            record.clear_pending(!Status::WAS_MASTER);

            let access_denied = result.error().is_some_and(|e| e.is_access_denied());
            if access_denied {
                record.set_pending(Status::AUTH_ERROR);
            } else {
                record.clear_pending(Status::AUTH_ERROR);
            }

            if record.should_print_fail_status() {
                self.log_connect_error(record, &result);
            }
        }

        record.track_failure(server.is_down());
    }

    fn check_disk_space_this_tick(&self, disk_space_checked: &mut Instant) -> bool {
        let Some(interval) = self.settings.disk_space_check_interval else {
            return false;
        };
        if disk_space_checked.elapsed() > interval {
            // Reset regardless of the outcome so all servers are checked
            // during the same tick.
            *disk_space_checked = Instant::now();
            return true;
        }
        false
    }

    fn can_update_disk_space(&self, record: &MonitoredServer) -> bool {
        record.disk_space_checkable()
            && (!self.settings.disk_space_limits.is_empty()
                || record.server().disk_space_limits().is_some())
    }

    async fn update_disk_space_status(
        &self,
        record: &MonitoredServer,
        conn: &mut BackendConnection,
    ) {
        let server = record.server();

        let rows = match conn.query_rows(disk::DISKS_QUERY).await {
            Ok(rows) => rows,
            Err(e) if e.server_errno() == Some(err_code::ER_UNKNOWN_TABLE) => {
                record.disable_disk_space_check();
                error!(
                    server = server.name(),
                    address = server.address(),
                    "Disk space cannot be checked, because the server version is too old \
                     or the DISKS information schema plugin has not been installed. \
                     Disk space checking has been disabled."
                );
                return;
            }
            Err(e) => {
                error!(
                    server = server.name(),
                    address = server.address(),
                    error = %e,
                    "Checking the disk space failed"
                );
                return;
            }
        };

        let mounts: Vec<MountInfo> = rows
            .iter()
            .filter_map(|row| {
                Some(MountInfo {
                    path: row.first()?.clone(),
                    total: row.get(1)?.parse().ok()?,
                    available: row.get(2)?.parse().ok()?,
                })
            })
            .collect();

        // Server-specific limits take precedence.
        let limits = server
            .disk_space_limits()
            .cloned()
            .unwrap_or_else(|| self.settings.disk_space_limits.clone());

        let exhausted = disk::exhausted_mounts(&mounts, &limits);
        for (path, used, limit) in &exhausted {
            error!(
                server = server.name(),
                address = server.address(),
                path = %path,
                used_percentage = *used,
                limit_percentage = *limit,
                "Disk space is exhausted"
            );
        }

        if exhausted.is_empty() {
            record.clear_pending(Status::DISK_SPACE_EXHAUSTED);
        } else {
            record.set_pending(Status::DISK_SPACE_EXHAUSTED);
        }
    }

    /// Move the accumulated pending statuses into the shared descriptors.
    /// Servers in maintenance keep their current status.
    fn flush_pending_statuses(&self) {
        for record in &self.servers {
            let server = record.server();
            if !server.is_in_maint() {
                server.assign_status(record.pending_status());
            }
            metrics()
                .servers_running
                .with_label_values(&[&self.monitor_name, server.name()])
                .set(server.is_running() as i64);
        }
    }

    /// Classify transitions, record them on the servers, dispatch scripts.
    async fn process_state_changes(&self) {
        let mut master_down = false;
        let mut master_up = false;

        for record in &self.servers {
            if !record.status_changed() {
                continue;
            }

            let event = event::classify(record.prev_status(), record.server().status());
            record.server().record_event(event);
            self.log_state_change(record, event);
            metrics()
                .state_changes_total
                .with_label_values(&[&self.monitor_name, event.name()])
                .inc();

            match event {
                MonitorEvent::MasterDown => master_down = true,
                MonitorEvent::MasterUp | MonitorEvent::NewMaster => master_up = true,
                _ => {}
            }

            if !self.settings.script.is_empty() && self.settings.events.contains(event) {
                self.launch_script(record, event).await;
            }
        }

        if master_down && master_up {
            info!(
                monitor = %self.monitor_name,
                "Master switch detected: lost a master and gained a new one"
            );
        }
    }

    /// Tell the connection layer to drop clients on servers that just became
    /// unusable or fell out of the cluster.
    fn hangup_failed_servers(&self) {
        for record in &self.servers {
            let server = record.server();
            if record.status_changed() && (!server.is_usable() || !server.is_in_cluster()) {
                self.callbacks.hangup_server(server);
            }
        }
    }

    fn persist_journal(&mut self, master: Option<&MonitoredServer>) {
        let encoded = journal::encode(
            self.servers
                .iter()
                .map(|r| (r.server().name(), r.server().status().bits())),
            master.map(|m| m.server().name()),
        );

        let result = match self.journal.store(&encoded) {
            Ok(true) => "written",
            Ok(false) => "unchanged",
            Err(e) => {
                error!(
                    monitor = %self.monitor_name,
                    error = %e,
                    "Failed to write journal data to disk"
                );
                "error"
            }
        };
        metrics()
            .journal_writes_total
            .with_label_values(&[&self.monitor_name, result])
            .inc();
    }

    async fn launch_script(&self, record: &MonitoredServer, event: MonitorEvent) {
        let argv = match script::tokenize(&self.settings.script) {
            Ok(argv) => argv,
            Err(e) => {
                error!(
                    monitor = %self.monitor_name,
                    script = %self.settings.script,
                    error = %e,
                    "Failed to initialize script"
                );
                return;
            }
        };

        let vars = self.script_variables(record, event);
        let argv = script::substitute(&argv, &vars);

        let outcome = match script::run_script(&argv, self.settings.script_timeout).await {
            Ok(()) => {
                info!(
                    monitor = %self.monitor_name,
                    event = event.name(),
                    command = %script::command_line(&argv),
                    "Executed monitor script"
                );
                "ok"
            }
            Err(ScriptError::Exit(code)) => {
                error!(
                    monitor = %self.monitor_name,
                    script = %argv[0],
                    event = event.name(),
                    code,
                    "Script returned a non-zero value"
                );
                "exit_error"
            }
            Err(ScriptError::Timeout) => {
                error!(
                    monitor = %self.monitor_name,
                    script = %argv[0],
                    event = event.name(),
                    "Script exceeded its timeout and was killed"
                );
                "timeout"
            }
            Err(e) => {
                error!(
                    monitor = %self.monitor_name,
                    script = %argv[0],
                    event = event.name(),
                    error = %e,
                    "Failed to execute script on server state change event"
                );
                "spawn_error"
            }
        };
        metrics()
            .scripts_total
            .with_label_values(&[&self.monitor_name, outcome])
            .inc();
    }

    /// The full placeholder set. `$LIST` is substituted last because it is a
    /// suffix of the other list tokens.
    fn script_variables(
        &self,
        record: &MonitoredServer,
        event: MonitorEvent,
    ) -> Vec<(&'static str, String)> {
        vec![
            ("$INITIATOR", record.server().endpoint()),
            ("$PARENT", self.parent_node(record)),
            ("$CHILDREN", self.child_nodes(record)),
            ("$EVENT", event.name().to_string()),
            ("$CREDENTIALS", self.node_names(0, true)),
            ("$NODELIST", self.node_names(Status::RUNNING, false)),
            ("$MASTERLIST", self.node_names(Status::MASTER, false)),
            ("$SLAVELIST", self.node_names(Status::SLAVE, false)),
            ("$SYNCEDLIST", self.node_names(Status::JOINED, false)),
            ("$LIST", self.node_names(0, false)),
        ]
    }

    /// Endpoint of the record whose node id is the initiator's master id.
    fn parent_node(&self, record: &MonitoredServer) -> String {
        let master_id = record.server().master_id();
        if master_id <= 0 {
            return String::new();
        }
        self.servers
            .iter()
            .find(|r| r.server().node_id() == master_id)
            .map(|r| r.server().endpoint())
            .unwrap_or_default()
    }

    /// Endpoints of the records whose master id is the initiator's node id.
    fn child_nodes(&self, record: &MonitoredServer) -> String {
        let node_id = record.server().node_id();
        if node_id <= 0 {
            return String::new();
        }
        let children: Vec<String> = self
            .servers
            .iter()
            .filter(|r| r.server().master_id() == node_id)
            .map(|r| r.server().endpoint())
            .collect();
        children.join(",")
    }

    /// Comma-separated endpoints of servers matching the status filter
    /// (0 matches all), optionally with monitor credentials prepended.
    fn node_names(&self, status_filter: u64, credentials: bool) -> String {
        let names: Vec<String> = self
            .servers
            .iter()
            .filter(|r| status_filter == 0 || r.server().status().intersects(status_filter))
            .map(|r| {
                let server = r.server();
                if credentials {
                    let (user, password) = match server.monitor_user() {
                        Some(user) => (
                            user.to_string(),
                            server.monitor_password().unwrap_or_default().to_string(),
                        ),
                        None => (
                            self.settings.probe.user.clone(),
                            self.settings.probe.password.clone(),
                        ),
                    };
                    format!("{user}:{}@{}", self.decryptor.decrypt(&password), server.endpoint())
                } else {
                    server.endpoint()
                }
            })
            .collect();
        names.join(",")
    }

    fn log_connect_error(&self, record: &MonitoredServer, result: &ConnectResult) {
        let server = record.server();
        let error = result
            .error()
            .map(ToString::to_string)
            .unwrap_or_default();
        match result {
            ConnectResult::Timeout(_) => error!(
                monitor = %self.monitor_name,
                server = server.name(),
                endpoint = %server.endpoint(),
                %error,
                "Monitor timed out when connecting to server"
            ),
            _ => error!(
                monitor = %self.monitor_name,
                server = server.name(),
                endpoint = %server.endpoint(),
                %error,
                "Monitor was unable to connect to server"
            ),
        }
    }

    fn log_state_change(&self, record: &MonitoredServer, event: MonitorEvent) {
        let server = record.server();
        info!(
            monitor = %self.monitor_name,
            server = server.name(),
            endpoint = %server.endpoint(),
            event = event.name(),
            from = %record.prev_status(),
            to = %server.status(),
            "Server changed state"
        );
    }

    fn find_record(&self, name: &str) -> Option<Arc<MonitoredServer>> {
        self.servers
            .iter()
            .find(|r| r.server().name() == name)
            .cloned()
    }
}

fn probe_label(result: &ConnectResult) -> &'static str {
    match result {
        ConnectResult::ExistingOk => "existing_ok",
        ConnectResult::NewOk => "new_ok",
        ConnectResult::Refused(_) => "refused",
        ConnectResult::Timeout(_) => "timeout",
    }
}
