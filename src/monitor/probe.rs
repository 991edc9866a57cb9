//! Ping-or-connect probing of backend servers

use std::time::{Duration, Instant};

use tracing::debug;

use crate::backend::{BackendConnection, ConnectionError, ConnectionSettings};
use crate::server::{PasswordDecryptor, Server};

/// Connection parameters shared by every probe of one monitor.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// Sequential attempts per tick, at least 1.
    pub connect_attempts: u32,
    pub user: String,
    /// As configured; run through the decryptor before use.
    pub password: String,
}

/// Outcome of one probe.
#[derive(Debug)]
pub enum ConnectResult {
    /// The existing connection answered a ping.
    ExistingOk,
    /// A fresh connection was established.
    NewOk,
    /// Could not connect; the server actively refused or errored.
    Refused(ConnectionError),
    /// Could not connect within the configured timeout.
    Timeout(ConnectionError),
}

impl ConnectResult {
    pub fn error(&self) -> Option<&ConnectionError> {
        match self {
            ConnectResult::Refused(e) | ConnectResult::Timeout(e) => Some(e),
            _ => None,
        }
    }
}

/// Is the probe outcome one of the OK values.
pub fn connection_is_ok(result: &ConnectResult) -> bool {
    matches!(result, ConnectResult::ExistingOk | ConnectResult::NewOk)
}

/// Probe a server, reusing the connection in `slot` when it is still alive.
///
/// A dead connection is discarded and a fresh one attempted up to
/// `connect_attempts` times with the server-specific credentials when the
/// descriptor carries them. The failure flavor depends on the wall-clock
/// spent: reaching `connect_timeout` is a timeout, anything faster is a
/// refusal.
pub async fn ping_or_connect(
    settings: &ProbeSettings,
    decryptor: &dyn PasswordDecryptor,
    server: &Server,
    slot: &mut Option<BackendConnection>,
) -> ConnectResult {
    if let Some(conn) = slot.as_mut() {
        match conn.ping().await {
            Ok(()) => return ConnectResult::ExistingOk,
            Err(e) => {
                debug!(server = server.name(), error = %e, "Cached connection failed, reconnecting");
                if let Some(dead) = slot.take() {
                    dead.close().await;
                }
            }
        }
    }

    let (user, password) = resolve_credentials(settings, server);
    let conn_settings = ConnectionSettings {
        connect_timeout: settings.connect_timeout,
        read_timeout: settings.read_timeout,
        write_timeout: settings.write_timeout,
        user,
        password: decryptor.decrypt(&password),
    };

    let attempts = settings.connect_attempts.max(1);
    let start = Instant::now();
    let mut last_error = None;

    for _ in 0..attempts {
        match BackendConnection::connect(server.address(), server.port(), &conn_settings).await {
            Ok(conn) => {
                *slot = Some(conn);
                return ConnectResult::NewOk;
            }
            Err(e) => last_error = Some(e),
        }
    }

    let error = last_error.unwrap_or(ConnectionError::Timeout);
    classify_failure(start.elapsed(), settings.connect_timeout, error)
}

/// Server-specific monitor credentials take precedence over the monitor's.
fn resolve_credentials(settings: &ProbeSettings, server: &Server) -> (String, String) {
    match server.monitor_user() {
        Some(user) => (
            user.to_string(),
            server.monitor_password().unwrap_or_default().to_string(),
        ),
        None => (settings.user.clone(), settings.password.clone()),
    }
}

fn classify_failure(
    elapsed: Duration,
    connect_timeout: Duration,
    error: ConnectionError,
) -> ConnectResult {
    if elapsed >= connect_timeout {
        ConnectResult::Timeout(error)
    } else {
        ConnectResult::Refused(error)
    }
}
