//! MariaDB replication monitor strategy
//!
//! Role detection per server:
//! - `@@read_only = 1` makes it a slave outright
//! - a non-empty `SHOW SLAVE STATUS` makes it a slave
//! - otherwise it is a master candidate
//!
//! `SHOW SLAVE STATUS` also supplies `Master_Server_Id`, which together with
//! `@@server_id` builds the replication topology behind the `$PARENT` and
//! `$CHILDREN` script placeholders. The designated master is the first
//! running master in configuration order.

use async_trait::async_trait;
use tracing::debug;

use crate::backend::{BackendConnection, ResultSet};
use crate::monitor::record::MonitoredServer;
use crate::monitor::strategy::{MonitorStrategy, TickContext};
use crate::monitor::Monitor;
use crate::status::Status;

#[derive(Debug, Default)]
pub struct MariadbStrategy;

/// What `SHOW SLAVE STATUS` said about a server.
#[derive(Debug, Default)]
struct ReplicationStatus {
    /// The server has a replication connection configured.
    is_slave: bool,
    /// `Master_Server_Id` of that connection, when reported.
    master_server_id: Option<i64>,
}

impl MariadbStrategy {
    /// Query `@@server_id` and `@@read_only` in one round trip.
    async fn query_id_and_read_only(
        conn: &mut BackendConnection,
    ) -> Option<(i64, bool)> {
        let rows = conn
            .query_rows("SELECT @@server_id, @@read_only")
            .await
            .ok()?;
        let row = rows.first()?;
        let server_id = row.first()?.parse().ok()?;
        let read_only = match row.get(1).map(String::as_str) {
            Some("0") => false,
            Some("1") => true,
            other => {
                debug!(value = ?other, "Unexpected read_only value, assuming slave");
                true
            }
        };
        Some((server_id, read_only))
    }

    async fn replication_status(conn: &mut BackendConnection) -> ReplicationStatus {
        match conn.query("SHOW SLAVE STATUS").await {
            Ok(result) => ReplicationStatus::from_result(&result),
            Err(e) => {
                // May fail without the REPLICATION CLIENT privilege; treat
                // as no slave status.
                debug!(error = %e, "SHOW SLAVE STATUS failed, assuming no slave status");
                ReplicationStatus::default()
            }
        }
    }
}

impl ReplicationStatus {
    fn from_result(result: &ResultSet) -> Self {
        if result.rows.is_empty() {
            return Self::default();
        }
        Self {
            is_slave: true,
            master_server_id: result
                .value(0, "Master_Server_Id")
                .and_then(|id| id.parse().ok())
                .filter(|id| *id > 0),
        }
    }
}

#[async_trait]
impl MonitorStrategy for MariadbStrategy {
    async fn has_sufficient_permissions(&self, monitor: &Monitor) -> bool {
        monitor.test_permissions("SHOW SLAVE STATUS").await
    }

    async fn update_server_status(&self, record: &MonitoredServer, conn: &mut BackendConnection) {
        let server = record.server();

        let Some((server_id, read_only)) = Self::query_id_and_read_only(conn).await else {
            debug!(server = server.name(), "Role query failed, leaving role bits unchanged");
            return;
        };
        server.set_node_id(server_id);

        let replication = Self::replication_status(conn).await;
        server.set_master_id(replication.master_server_id.unwrap_or(-1));

        if read_only || replication.is_slave {
            record.clear_pending(Status::MASTER);
            record.set_pending(Status::SLAVE);
        } else {
            record.clear_pending(Status::SLAVE);
            record.set_pending(Status::MASTER);
        }
    }

    async fn post_tick(&self, ctx: &mut TickContext<'_>) {
        let mut master = None;
        for record in ctx.servers {
            let pending = record.pending_status();
            if pending.contains(Status::RUNNING | Status::MASTER) {
                // A server that has held mastership keeps the mark even
                // through later failed probes.
                record.set_pending(Status::WAS_MASTER);
                if master.is_none() {
                    master = Some(record.clone());
                }
            }
        }
        *ctx.master = master;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Server;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_post_tick_designates_first_running_master() {
        let strategy = MariadbStrategy;

        let records: Vec<Arc<MonitoredServer>> = ["a", "b", "c"]
            .iter()
            .map(|name| MonitoredServer::new(Server::new(*name, "localhost", 3306)))
            .collect();

        // b and c both claim mastership; b comes first in config order.
        records[0].stash_current_status();
        records[0].set_pending(Status::RUNNING | Status::SLAVE);
        records[1].stash_current_status();
        records[1].set_pending(Status::RUNNING | Status::MASTER);
        records[2].stash_current_status();
        records[2].set_pending(Status::RUNNING | Status::MASTER);

        let mut master = None;
        let mut ctx = TickContext {
            servers: &records,
            master: &mut master,
        };
        strategy.post_tick(&mut ctx).await;

        let designated = master.expect("a master should be designated");
        assert_eq!(designated.server().name(), "b");
        assert!(records[1].pending_status().contains(Status::WAS_MASTER));
        assert!(!records[0].pending_status().contains(Status::WAS_MASTER));
    }

    #[tokio::test]
    async fn test_post_tick_without_masters() {
        let strategy = MariadbStrategy;
        let records = vec![MonitoredServer::new(Server::new("a", "localhost", 3306))];
        records[0].stash_current_status();
        records[0].set_pending(Status::RUNNING | Status::SLAVE);

        let mut master = Some(records[0].clone());
        let mut ctx = TickContext {
            servers: &records,
            master: &mut master,
        };
        strategy.post_tick(&mut ctx).await;
        assert!(master.is_none());
    }

    #[test]
    fn test_replication_status_from_result() {
        // No rows: not replicating.
        let idle = ReplicationStatus::from_result(&ResultSet::default());
        assert!(!idle.is_slave);
        assert!(idle.master_server_id.is_none());

        let replicating = ReplicationStatus::from_result(&ResultSet {
            columns: vec!["Slave_IO_State".into(), "Master_Server_Id".into()],
            rows: vec![vec!["Waiting for master to send event".into(), "101".into()]],
        });
        assert!(replicating.is_slave);
        assert_eq!(replicating.master_server_id, Some(101));

        // A zero id means the master did not report one.
        let anonymous = ReplicationStatus::from_result(&ResultSet {
            columns: vec!["Master_Server_Id".into()],
            rows: vec![vec!["0".into()]],
        });
        assert!(anonymous.is_slave);
        assert!(anonymous.master_server_id.is_none());
    }
}
