//! Server status bits
//!
//! A server's state is a bitset over a fixed vocabulary. The monitor worker
//! accumulates bits into a pending value during a tick and flushes them to
//! the shared descriptor at the end, so every consumer sees a consistent
//! per-tick snapshot.

use std::fmt;

/// Bitset of server state flags, stored as a `u64` on the wire and in the
/// journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status(pub u64);

impl Status {
    /// Server is up and accepting connections.
    pub const RUNNING: u64 = 1 << 0;
    /// Operator put the server in maintenance; the monitor skips it.
    pub const MAINT: u64 = 1 << 1;
    /// Server is being drained of connections.
    pub const DRAINING: u64 = 1 << 2;
    /// Replication master.
    pub const MASTER: u64 = 1 << 3;
    /// Replication slave.
    pub const SLAVE: u64 = 1 << 4;
    /// Synced member of a (Galera-style) cluster.
    pub const JOINED: u64 = 1 << 5;
    /// Server was a master at some earlier point.
    pub const WAS_MASTER: u64 = 1 << 6;
    /// Monitor credentials were rejected by the server.
    pub const AUTH_ERROR: u64 = 1 << 7;
    /// A monitored mount on the server crossed its disk usage threshold.
    pub const DISK_SPACE_EXHAUSTED: u64 = 1 << 8;

    /// The bits the transition classifier considers.
    pub const ALL_MONITORED: u64 =
        Self::RUNNING | Self::MAINT | Self::MASTER | Self::SLAVE | Self::JOINED;

    /// Role-typed bits compared when telling LOSS and NEW transitions apart.
    pub const ROLE_BITS: u64 = Self::MASTER | Self::SLAVE;

    /// Sentinel meaning "never observed"; a freshly added server starts here.
    pub const UNOBSERVED: Status = Status(u64::MAX);

    pub fn empty() -> Self {
        Status(0)
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn set(&mut self, bits: u64) {
        self.0 |= bits;
    }

    pub fn clear(&mut self, bits: u64) {
        self.0 &= !bits;
    }

    pub fn contains(self, bits: u64) -> bool {
        self.0 & bits == bits
    }

    pub fn intersects(self, bits: u64) -> bool {
        self.0 & bits != 0
    }

    /// The subset of bits selected by `mask`.
    pub fn masked(self, mask: u64) -> u64 {
        self.0 & mask
    }

    pub fn is_unobserved(self) -> bool {
        self == Self::UNOBSERVED
    }
}

impl From<u64> for Status {
    fn from(bits: u64) -> Self {
        Status(bits)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(u64, &str); 9] = [
            (Status::MAINT, "Maintenance"),
            (Status::DRAINING, "Draining"),
            (Status::MASTER, "Master"),
            (Status::SLAVE, "Slave"),
            (Status::JOINED, "Synced"),
            (Status::WAS_MASTER, "Was Master"),
            (Status::AUTH_ERROR, "Auth Error"),
            (Status::DISK_SPACE_EXHAUSTED, "Disk Space Exhausted"),
            (Status::RUNNING, "Running"),
        ];

        if self.is_unobserved() {
            return write!(f, "Unobserved");
        }

        let mut sep = "";
        for (bit, name) in NAMES {
            if self.contains(bit) {
                write!(f, "{sep}{name}")?;
                sep = ", ";
            }
        }
        if sep.is_empty() {
            write!(f, "Down")?;
        } else if !self.contains(Status::RUNNING) {
            write!(f, "{sep}Down")?;
        }
        Ok(())
    }
}
