//! Backend connection handling for monitor probes

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::debug;

use super::handshake::{capabilities, compute_auth_response, HandshakeResponse, InitialHandshake};
use super::protocol::{
    command, err_code, is_eof_packet, is_err_packet, is_ok_packet, parse_column_name,
    parse_lenenc_int, parse_lenenc_string, ErrPacket, Packet, PacketCodec,
};

/// Timeouts and credentials used when opening and driving a probe connection.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub user: String,
    /// Already decrypted.
    pub password: String,
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Failed to connect: {0}")]
    Connect(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Operation timed out")]
    Timeout,
    #[error("Server closed the connection")]
    Disconnected,
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Server error {code}: {message}")]
    Server { code: u16, message: String },
}

/// A collected text-protocol result set.
#[derive(Debug, Default)]
pub struct ResultSet {
    /// Column names in select order.
    pub columns: Vec<String>,
    /// Row values as strings; SQL NULL becomes an empty string.
    pub rows: Vec<Vec<String>>,
}

impl ResultSet {
    /// Position of a column by name, matched case-insensitively the way the
    /// server matches identifiers.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Value at `(row, column-name)`, when both exist.
    pub fn value(&self, row: usize, column: &str) -> Option<&str> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.get(index).map(String::as_str)
    }
}

impl ConnectionError {
    /// The server rejected the monitor user's credentials or privileges.
    pub fn is_access_denied(&self) -> bool {
        matches!(
            self,
            ConnectionError::Server { code, .. } if matches!(
                *code,
                err_code::ER_ACCESS_DENIED_ERROR
                    | err_code::ER_DBACCESS_DENIED_ERROR
                    | err_code::ER_TABLEACCESS_DENIED_ERROR
                    | err_code::ER_COLUMNACCESS_DENIED_ERROR
                    | err_code::ER_SPECIFIC_ACCESS_DENIED_ERROR
                    | err_code::ER_PROCACCESS_DENIED_ERROR
                    | err_code::ER_KILL_DENIED_ERROR
            )
        )
    }

    pub fn server_errno(&self) -> Option<u16> {
        match self {
            ConnectionError::Server { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// One authenticated connection to a backend server.
///
/// The monitor worker keeps a connection per server across ticks and pings it
/// instead of reconnecting.
pub struct BackendConnection {
    framed: Framed<TcpStream, PacketCodec>,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl BackendConnection {
    /// Connect and authenticate. The whole exchange is bounded by
    /// `settings.connect_timeout`.
    pub async fn connect(
        address: &str,
        port: u16,
        settings: &ConnectionSettings,
    ) -> Result<Self, ConnectionError> {
        tokio::time::timeout(
            settings.connect_timeout,
            Self::connect_inner(address, port, settings),
        )
        .await
        .map_err(|_| ConnectionError::Timeout)?
    }

    async fn connect_inner(
        address: &str,
        port: u16,
        settings: &ConnectionSettings,
    ) -> Result<Self, ConnectionError> {
        let addr = format!("{address}:{port}");
        debug!(addr = %addr, "Connecting to backend");

        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| ConnectionError::Connect(e.to_string()))?;

        let mut framed = Framed::new(stream, PacketCodec);

        let greeting = framed
            .next()
            .await
            .ok_or(ConnectionError::Disconnected)?
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if is_err_packet(&greeting.payload) {
            let err = ErrPacket::parse(&greeting.payload)
                .ok_or_else(|| ConnectionError::Protocol("Malformed ERR greeting".into()))?;
            return Err(ConnectionError::Server {
                code: err.error_code,
                message: err.error_message,
            });
        }

        let handshake = InitialHandshake::parse(&greeting.payload)
            .ok_or_else(|| ConnectionError::Protocol("Invalid backend handshake".into()))?;

        let auth_response =
            compute_auth_response(&settings.password, &handshake.auth_plugin_data());

        let response = HandshakeResponse {
            capability_flags: capabilities::MONITOR_CAPABILITIES & handshake.capability_flags
                | capabilities::CLIENT_PROTOCOL_41,
            max_packet_size: 16 * 1024 * 1024,
            username: settings.user.clone(),
            auth_response,
            auth_plugin_name: handshake.auth_plugin_name.clone(),
        };

        framed
            .send(response.encode(greeting.sequence_id + 1))
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        let reply = framed
            .next()
            .await
            .ok_or(ConnectionError::Disconnected)?
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if is_err_packet(&reply.payload) {
            let err = ErrPacket::parse(&reply.payload)
                .ok_or_else(|| ConnectionError::Protocol("Malformed ERR reply".into()))?;
            return Err(ConnectionError::Server {
                code: err.error_code,
                message: err.error_message,
            });
        }
        if !is_ok_packet(&reply.payload) {
            return Err(ConnectionError::Protocol(
                "Expected OK packet after authentication".into(),
            ));
        }

        Ok(Self {
            framed,
            read_timeout: settings.read_timeout,
            write_timeout: settings.write_timeout,
        })
    }

    async fn send(&mut self, packet: Packet) -> Result<(), ConnectionError> {
        tokio::time::timeout(self.write_timeout, self.framed.send(packet))
            .await
            .map_err(|_| ConnectionError::Timeout)?
            .map_err(|e| ConnectionError::Io(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Packet, ConnectionError> {
        tokio::time::timeout(self.read_timeout, self.framed.next())
            .await
            .map_err(|_| ConnectionError::Timeout)?
            .ok_or(ConnectionError::Disconnected)?
            .map_err(|e| ConnectionError::Io(e.to_string()))
    }

    /// Lightweight liveness round-trip (COM_PING).
    pub async fn ping(&mut self) -> Result<(), ConnectionError> {
        self.send(Packet::command(command::COM_PING, &[])).await?;
        let reply = self.recv().await?;
        if is_ok_packet(&reply.payload) {
            Ok(())
        } else if let Some(err) = ErrPacket::parse(&reply.payload) {
            Err(ConnectionError::Server {
                code: err.error_code,
                message: err.error_message,
            })
        } else {
            Err(ConnectionError::Protocol("Unexpected ping reply".into()))
        }
    }

    /// Run a text-protocol query and collect the full result set, column
    /// names included. Statements without a result set return an empty set.
    pub async fn query(&mut self, sql: &str) -> Result<ResultSet, ConnectionError> {
        self.send(Packet::command(command::COM_QUERY, sql.as_bytes()))
            .await?;

        let first = self.recv().await?;
        if is_err_packet(&first.payload) {
            let err = ErrPacket::parse(&first.payload)
                .ok_or_else(|| ConnectionError::Protocol("Malformed ERR packet".into()))?;
            return Err(ConnectionError::Server {
                code: err.error_code,
                message: err.error_message,
            });
        }
        if is_ok_packet(&first.payload) {
            return Ok(ResultSet::default());
        }

        let (column_count, _) = parse_lenenc_int(&first.payload)
            .ok_or_else(|| ConnectionError::Protocol("Bad column count".into()))?;

        let mut columns = Vec::with_capacity(column_count as usize);
        for _ in 0..column_count {
            let definition = self.recv().await?;
            columns.push(parse_column_name(&definition.payload).unwrap_or_default());
        }

        let mut rows = Vec::new();
        let mut packet = self.recv().await?;
        // EOF terminating the column definitions, unless deprecated.
        if is_eof_packet(&packet.payload) {
            packet = self.recv().await?;
        }

        loop {
            if is_eof_packet(&packet.payload) || is_ok_packet(&packet.payload) {
                break;
            }
            if is_err_packet(&packet.payload) {
                let err = ErrPacket::parse(&packet.payload)
                    .ok_or_else(|| ConnectionError::Protocol("Malformed ERR packet".into()))?;
                return Err(ConnectionError::Server {
                    code: err.error_code,
                    message: err.error_message,
                });
            }

            let mut row = Vec::with_capacity(column_count as usize);
            let mut data = &packet.payload[..];
            for _ in 0..column_count {
                let (value, used) = parse_lenenc_string(data)
                    .ok_or_else(|| ConnectionError::Protocol("Truncated row".into()))?;
                row.push(value.unwrap_or_default());
                data = &data[used..];
            }
            rows.push(row);
            packet = self.recv().await?;
        }

        Ok(ResultSet { columns, rows })
    }

    /// Run a query and collect only the row values.
    pub async fn query_rows(&mut self, sql: &str) -> Result<Vec<Vec<String>>, ConnectionError> {
        Ok(self.query(sql).await?.rows)
    }

    /// Best-effort COM_QUIT before dropping the stream.
    pub async fn close(mut self) {
        let _ = self.send(Packet::command(command::COM_QUIT, &[])).await;
    }
}
