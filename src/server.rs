//! Backend server descriptors
//!
//! A [`Server`] is owned by the surrounding proxy; the monitor holds a
//! non-owning `Arc` and is the only writer of its status once running.
//! Readers outside the monitor worker (routing, serialization) must treat
//! the status as eventually consistent.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;

use crate::config::ServerConfig;
use crate::monitor::disk::DiskSpaceLimits;
use crate::monitor::event::MonitorEvent;
use crate::status::Status;

/// The last transition the monitor observed on a server.
#[derive(Debug, Clone, Copy)]
pub struct LastEvent {
    pub event: MonitorEvent,
    pub triggered_at: SystemTime,
}

/// Shared descriptor of one backend database server.
pub struct Server {
    name: String,
    address: String,
    port: u16,
    /// Current status bits, flushed once per tick by the monitor worker.
    status: AtomicU64,
    /// Server-specific monitor credentials; override the monitor-wide ones.
    monitor_user: Option<String>,
    monitor_password: Option<String>,
    /// Server-specific disk space limits; override the monitor-wide ones.
    disk_space_limits: Option<DiskSpaceLimits>,
    /// Replication node id, discovered by the monitor strategy. -1 = unknown.
    node_id: AtomicI64,
    /// Node id of this server's replication master. -1 = none.
    master_id: AtomicI64,
    last_event: Mutex<Option<LastEvent>>,
}

impl Server {
    pub fn new(name: impl Into<String>, address: impl Into<String>, port: u16) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            address: address.into(),
            port,
            status: AtomicU64::new(0),
            monitor_user: None,
            monitor_password: None,
            disk_space_limits: None,
            node_id: AtomicI64::new(-1),
            master_id: AtomicI64::new(-1),
            last_event: Mutex::new(None),
        })
    }

    pub fn from_config(config: &ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            name: config.name.clone(),
            address: config.address.clone(),
            port: config.port,
            status: AtomicU64::new(0),
            monitor_user: config.monitor_user.clone(),
            monitor_password: config.monitor_password.clone(),
            disk_space_limits: config
                .disk_space_threshold
                .as_deref()
                .and_then(|s| s.parse().ok()),
            node_id: AtomicI64::new(-1),
            master_id: AtomicI64::new(-1),
            last_event: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `[address]:port`, the form used in logs and script arguments.
    pub fn endpoint(&self) -> String {
        format!("[{}]:{}", self.address, self.port)
    }

    pub fn status(&self) -> Status {
        Status(self.status.load(Ordering::Acquire))
    }

    pub fn set_status_bits(&self, bits: u64) {
        self.status.fetch_or(bits, Ordering::AcqRel);
    }

    pub fn clear_status_bits(&self, bits: u64) {
        self.status.fetch_and(!bits, Ordering::AcqRel);
    }

    /// Replace the whole status word; the worker's end-of-tick flush.
    pub fn assign_status(&self, status: Status) {
        self.status.store(status.bits(), Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.status().contains(Status::RUNNING)
    }

    pub fn is_down(&self) -> bool {
        !self.is_running()
    }

    pub fn is_in_maint(&self) -> bool {
        self.status().contains(Status::MAINT)
    }

    /// Usable for routing: running and not in maintenance.
    pub fn is_usable(&self) -> bool {
        let status = self.status();
        status.contains(Status::RUNNING) && !status.contains(Status::MAINT)
    }

    /// Part of the cluster: carries a master, slave or synced role.
    pub fn is_in_cluster(&self) -> bool {
        self.status()
            .intersects(Status::MASTER | Status::SLAVE | Status::JOINED)
    }

    pub fn monitor_user(&self) -> Option<&str> {
        self.monitor_user.as_deref()
    }

    pub fn monitor_password(&self) -> Option<&str> {
        self.monitor_password.as_deref()
    }

    pub fn disk_space_limits(&self) -> Option<&DiskSpaceLimits> {
        self.disk_space_limits.as_ref()
    }

    pub fn node_id(&self) -> i64 {
        self.node_id.load(Ordering::Relaxed)
    }

    pub fn set_node_id(&self, id: i64) {
        self.node_id.store(id, Ordering::Relaxed);
    }

    pub fn master_id(&self) -> i64 {
        self.master_id.load(Ordering::Relaxed)
    }

    pub fn set_master_id(&self, id: i64) {
        self.master_id.store(id, Ordering::Relaxed);
    }

    pub fn last_event(&self) -> Option<LastEvent> {
        *self.last_event.lock()
    }

    pub fn record_event(&self, event: MonitorEvent) {
        *self.last_event.lock() = Some(LastEvent {
            event,
            triggered_at: SystemTime::now(),
        });
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("port", &self.port)
            .field("status", &self.status().to_string())
            .finish()
    }
}

/// Callbacks into the surrounding proxy service layer.
///
/// The monitor notifies the service when its server set changes and when a
/// failed server's client connections should be hung up. The proxy wires in
/// its own implementation; the default does nothing, which is what the tests
/// and a standalone monitor process want.
pub trait ServiceCallbacks: Send + Sync {
    fn server_added(&self, _server: &Server) {}
    fn server_removed(&self, _server: &Server) {}
    /// Drop client connections routed to this server.
    fn hangup_server(&self, _server: &Server) {}
}

/// No-op [`ServiceCallbacks`] implementation.
#[derive(Debug, Default)]
pub struct NoServiceCallbacks;

impl ServiceCallbacks for NoServiceCallbacks {}

/// Decrypts stored monitor passwords.
///
/// Password encryption lives outside this crate; deployments that encrypt
/// credentials plug their decryptor in here.
pub trait PasswordDecryptor: Send + Sync {
    fn decrypt(&self, stored: &str) -> String;
}

/// Passwords are stored in the clear.
#[derive(Debug, Default)]
pub struct PlainTextPasswords;

impl PasswordDecryptor for PlainTextPasswords {
    fn decrypt(&self, stored: &str) -> String {
        stored.to_string()
    }
}
