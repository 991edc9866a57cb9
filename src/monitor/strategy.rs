//! Monitor specialization hooks
//!
//! The worker loop is a fixed algorithm; everything flavor-specific (role
//! discovery, master designation, extra permission checks) hangs off a
//! [`MonitorStrategy`]. Every hook has a default, so the simplest monitor is
//! a unit struct.

use std::sync::Arc;

use async_trait::async_trait;

use crate::backend::BackendConnection;
use crate::monitor::record::MonitoredServer;
use crate::monitor::Monitor;

/// Mutable view the hooks get into the worker's tick.
pub struct TickContext<'a> {
    /// Monitored servers in configuration order.
    pub servers: &'a [Arc<MonitoredServer>],
    /// The designated master; whatever the strategy leaves here is stored in
    /// the journal at the end of the tick.
    pub master: &'a mut Option<Arc<MonitoredServer>>,
}

#[async_trait]
pub trait MonitorStrategy: Send + Sync {
    /// Pre-flight check run once before the first start. Returning false
    /// keeps the monitor stopped.
    async fn has_sufficient_permissions(&self, monitor: &Monitor) -> bool {
        let _ = monitor;
        true
    }

    /// Runs on the worker before the first tick, after the journal was
    /// loaded.
    async fn pre_loop(&self, ctx: &mut TickContext<'_>) {
        let _ = ctx;
    }

    /// Runs at the start of every tick, before probing.
    async fn pre_tick(&self, ctx: &mut TickContext<'_>) {
        let _ = ctx;
    }

    /// Refine a successfully probed server's pending status, e.g. discover
    /// its replication role. `conn` is the live probe connection.
    async fn update_server_status(&self, record: &MonitoredServer, conn: &mut BackendConnection) {
        let _ = (record, conn);
    }

    /// Runs after all servers were probed, before the pending statuses are
    /// flushed. The place to designate a master.
    async fn post_tick(&self, ctx: &mut TickContext<'_>) {
        let _ = ctx;
    }

    /// Runs when the worker exits.
    async fn post_loop(&self, ctx: &mut TickContext<'_>) {
        let _ = ctx;
    }

    /// Polled between ticks; returning true schedules the next tick without
    /// waiting for the interval.
    fn immediate_tick_required(&self) -> bool {
        false
    }
}

/// Probe-only monitor: servers are up or down, nothing else.
#[derive(Debug, Default)]
pub struct ProbeOnlyStrategy;

#[async_trait]
impl MonitorStrategy for ProbeOnlyStrategy {}

/// Pick the strategy for a configured module name.
pub fn strategy_for_module(module: &str) -> Arc<dyn MonitorStrategy> {
    match module {
        "mariadbmon" => Arc::new(super::mariadb::MariadbStrategy::default()),
        _ => {
            tracing::warn!(module, "Unknown monitor module, falling back to probe-only");
            Arc::new(ProbeOnlyStrategy)
        }
    }
}
