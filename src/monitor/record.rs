//! Per-monitored-server record
//!
//! A [`MonitoredServer`] pairs the shared server descriptor with the state
//! the monitor worker accumulates about it. The probe state is owned by the
//! worker between ticks; the admin side only touches the request slot, which
//! is a lock-free cell drained once per tick.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::backend::BackendConnection;
use crate::server::Server;
use crate::status::Status;

/// Admin-requested status change, applied by the worker at tick start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StatusRequest {
    None = 0,
    MaintOn = 1,
    MaintOff = 2,
    DrainOn = 3,
    DrainOff = 4,
}

impl StatusRequest {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => StatusRequest::MaintOn,
            2 => StatusRequest::MaintOff,
            3 => StatusRequest::DrainOn,
            4 => StatusRequest::DrainOff,
            _ => StatusRequest::None,
        }
    }
}

/// Worker-owned probe bookkeeping.
#[derive(Debug)]
pub struct ProbeState {
    /// Status observed at the previous tick; the sentinel until then.
    pub prev_status: Status,
    /// Status being accumulated during the current tick.
    pub pending_status: Status,
    /// Consecutive failed probes.
    pub err_count: u64,
    /// Cleared when the server lacks the disk introspection table.
    pub disk_space_checkable: bool,
}

impl Default for ProbeState {
    fn default() -> Self {
        Self {
            prev_status: Status::UNOBSERVED,
            pending_status: Status::empty(),
            err_count: 0,
            disk_space_checkable: true,
        }
    }
}

/// One server as seen by its monitor.
pub struct MonitoredServer {
    server: Arc<Server>,
    state: RwLock<ProbeState>,
    request: AtomicU8,
    /// Probe connection, kept across ticks. Only the worker locks it during
    /// normal operation; the admin side uses it for the permission pre-flight
    /// while the monitor is stopped.
    conn: Mutex<Option<BackendConnection>>,
}

impl MonitoredServer {
    pub fn new(server: Arc<Server>) -> Arc<Self> {
        Arc::new(Self {
            server,
            state: RwLock::new(ProbeState::default()),
            request: AtomicU8::new(StatusRequest::None as u8),
            conn: Mutex::new(None),
        })
    }

    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    pub fn conn_slot(&self) -> &Mutex<Option<BackendConnection>> {
        &self.conn
    }

    /// Copy the current server status into both previous and pending, the
    /// first step of a tick.
    pub fn stash_current_status(&self) {
        let status = self.server.status();
        let mut state = self.state.write();
        state.prev_status = status;
        state.pending_status = status;
    }

    pub fn set_pending(&self, bits: u64) {
        self.state.write().pending_status.set(bits);
    }

    pub fn clear_pending(&self, bits: u64) {
        self.state.write().pending_status.clear(bits);
    }

    pub fn prev_status(&self) -> Status {
        self.state.read().prev_status
    }

    pub fn pending_status(&self) -> Status {
        self.state.read().pending_status
    }

    /// Restore journaled state: previous, pending and current all become the
    /// stored status.
    pub fn restore_status(&self, status: Status) {
        let mut state = self.state.write();
        state.prev_status = status;
        state.pending_status = status;
        self.server.assign_status(status);
    }

    /// Whether the server moved to a state worth reporting since the last
    /// tick. Pure maintenance toggles are not reportable, and neither are
    /// changes where the server was down before and after.
    pub fn status_changed(&self) -> bool {
        let prev = self.state.read().prev_status;
        if prev.is_unobserved() {
            return false;
        }

        let old = prev.masked(Status::ALL_MONITORED);
        let new = self.server.status().masked(Status::ALL_MONITORED);

        old != new
            && (old | new) & Status::MAINT == 0
            && (old | new) & Status::RUNNING == Status::RUNNING
    }

    /// Log a connect failure only once per failure streak.
    pub fn should_print_fail_status(&self) -> bool {
        self.server.is_down() && self.state.read().err_count == 0
    }

    pub fn err_count(&self) -> u64 {
        self.state.read().err_count
    }

    /// Advance or reset the consecutive-failure counter.
    pub fn track_failure(&self, failed: bool) {
        let mut state = self.state.write();
        if failed {
            state.err_count += 1;
        } else {
            state.err_count = 0;
        }
    }

    pub fn disk_space_checkable(&self) -> bool {
        self.state.read().disk_space_checkable
    }

    pub fn disable_disk_space_check(&self) {
        self.state.write().disk_space_checkable = false;
    }

    /// Admin side: deposit a request, returning the one it replaced.
    pub fn push_request(&self, request: StatusRequest) -> StatusRequest {
        StatusRequest::from_u8(self.request.swap(request as u8, Ordering::AcqRel))
    }

    /// Worker side: drain the slot, leaving `None` behind.
    pub fn take_request(&self) -> StatusRequest {
        StatusRequest::from_u8(
            self.request
                .swap(StatusRequest::None as u8, Ordering::AcqRel),
        )
    }
}
