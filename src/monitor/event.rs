//! State transition classification
//!
//! Each detected status change maps to exactly one event. The event values
//! are bits so a configured subscription is a plain mask.

use std::fmt;
use std::str::FromStr;

use crate::status::Status;

/// A named server state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MonitorEvent {
    Undefined = 0,
    MasterDown = 1 << 0,
    MasterUp = 1 << 1,
    SlaveDown = 1 << 2,
    SlaveUp = 1 << 3,
    ServerDown = 1 << 4,
    ServerUp = 1 << 5,
    SyncedDown = 1 << 6,
    SyncedUp = 1 << 7,
    LostMaster = 1 << 8,
    LostSlave = 1 << 9,
    LostSynced = 1 << 10,
    NewMaster = 1 << 11,
    NewSlave = 1 << 12,
    NewSynced = 1 << 13,
}

impl MonitorEvent {
    pub const ALL: [MonitorEvent; 14] = [
        MonitorEvent::MasterDown,
        MonitorEvent::MasterUp,
        MonitorEvent::SlaveDown,
        MonitorEvent::SlaveUp,
        MonitorEvent::ServerDown,
        MonitorEvent::ServerUp,
        MonitorEvent::SyncedDown,
        MonitorEvent::SyncedUp,
        MonitorEvent::LostMaster,
        MonitorEvent::LostSlave,
        MonitorEvent::LostSynced,
        MonitorEvent::NewMaster,
        MonitorEvent::NewSlave,
        MonitorEvent::NewSynced,
    ];

    /// Lowercase name, as used in configuration and script arguments.
    pub fn name(self) -> &'static str {
        match self {
            MonitorEvent::Undefined => "undefined_event",
            MonitorEvent::MasterDown => "master_down",
            MonitorEvent::MasterUp => "master_up",
            MonitorEvent::SlaveDown => "slave_down",
            MonitorEvent::SlaveUp => "slave_up",
            MonitorEvent::ServerDown => "server_down",
            MonitorEvent::ServerUp => "server_up",
            MonitorEvent::SyncedDown => "synced_down",
            MonitorEvent::SyncedUp => "synced_up",
            MonitorEvent::LostMaster => "lost_master",
            MonitorEvent::LostSlave => "lost_slave",
            MonitorEvent::LostSynced => "lost_synced",
            MonitorEvent::NewMaster => "new_master",
            MonitorEvent::NewSlave => "new_slave",
            MonitorEvent::NewSynced => "new_synced",
        }
    }

    pub fn bits(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for MonitorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MonitorEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|e| e.name() == s)
            .ok_or_else(|| format!("unknown event name '{s}'"))
    }
}

/// Classify the transition between two observed statuses.
///
/// Only the monitored bits participate. Callers must have established that
/// the masked statuses differ; an identity transition is a caller bug.
pub fn classify(prev: Status, new: Status) -> MonitorEvent {
    let prev = prev.masked(Status::ALL_MONITORED);
    let new = new.masked(Status::ALL_MONITORED);

    if prev == new {
        debug_assert!(false, "classifier called with identical statuses");
        return MonitorEvent::Undefined;
    }

    if prev & Status::RUNNING == 0 {
        if new & Status::RUNNING != 0 {
            // Came up; the gained role picks the flavor.
            return if new & Status::MASTER != 0 {
                MonitorEvent::MasterUp
            } else if new & Status::SLAVE != 0 {
                MonitorEvent::SlaveUp
            } else if new & Status::JOINED != 0 {
                MonitorEvent::SyncedUp
            } else {
                MonitorEvent::ServerUp
            };
        }
        // Was not running and still is not; excluded by the caller's
        // change predicate.
        debug_assert!(false, "down-to-down transition reached the classifier");
        return MonitorEvent::Undefined;
    }

    if new & Status::RUNNING == 0 {
        return if prev & Status::MASTER != 0 {
            MonitorEvent::MasterDown
        } else if prev & Status::SLAVE != 0 {
            MonitorEvent::SlaveDown
        } else if prev & Status::JOINED != 0 {
            MonitorEvent::SyncedDown
        } else {
            MonitorEvent::ServerDown
        };
    }

    // Running before and after: either we lost track of what kind of server
    // it was, or we just learned it.
    let prev_roles = prev & Status::ROLE_BITS;
    let new_roles = new & Status::ROLE_BITS;
    let had_type = prev & (Status::MASTER | Status::SLAVE | Status::JOINED) != 0;

    if had_type && (prev_roles == 0 || new_roles == 0 || prev_roles == new_roles) {
        if prev & Status::MASTER != 0 {
            MonitorEvent::LostMaster
        } else if prev & Status::SLAVE != 0 {
            MonitorEvent::LostSlave
        } else if prev & Status::JOINED != 0 {
            MonitorEvent::LostSynced
        } else {
            MonitorEvent::Undefined
        }
    } else if new & Status::MASTER != 0 {
        MonitorEvent::NewMaster
    } else if new & Status::SLAVE != 0 {
        MonitorEvent::NewSlave
    } else if new & Status::JOINED != 0 {
        MonitorEvent::NewSynced
    } else {
        MonitorEvent::Undefined
    }
}

/// Subscription mask over [`MonitorEvent`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventSet(u32);

impl EventSet {
    pub const ALL: EventSet = EventSet(u32::MAX);
    pub const NONE: EventSet = EventSet(0);

    pub fn contains(self, event: MonitorEvent) -> bool {
        self.0 & event.bits() != 0
    }

    /// Parse a comma-separated list of event names. Empty input and the word
    /// `all` both subscribe to everything.
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if s.is_empty() || s == "all" {
            return Ok(Self::ALL);
        }
        let mut mask = 0;
        for part in s.split(',') {
            let event: MonitorEvent = part.trim().parse()?;
            mask |= event.bits();
        }
        Ok(EventSet(mask))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(bits: u64) -> Status {
        Status(bits)
    }

    const RUNNING: u64 = Status::RUNNING;
    const MASTER: u64 = Status::MASTER;
    const SLAVE: u64 = Status::SLAVE;
    const JOINED: u64 = Status::JOINED;

    #[test]
    fn test_up_events() {
        assert_eq!(
            classify(status(0), status(RUNNING)),
            MonitorEvent::ServerUp
        );
        assert_eq!(
            classify(status(0), status(RUNNING | MASTER)),
            MonitorEvent::MasterUp
        );
        assert_eq!(
            classify(status(0), status(RUNNING | SLAVE)),
            MonitorEvent::SlaveUp
        );
        assert_eq!(
            classify(status(0), status(RUNNING | JOINED)),
            MonitorEvent::SyncedUp
        );
    }

    #[test]
    fn test_down_events() {
        assert_eq!(
            classify(status(RUNNING), status(0)),
            MonitorEvent::ServerDown
        );
        assert_eq!(
            classify(status(RUNNING | MASTER), status(0)),
            MonitorEvent::MasterDown
        );
        assert_eq!(
            classify(status(RUNNING | SLAVE), status(0)),
            MonitorEvent::SlaveDown
        );
        assert_eq!(
            classify(status(RUNNING | JOINED), status(0)),
            MonitorEvent::SyncedDown
        );
    }

    #[test]
    fn test_loss_events() {
        assert_eq!(
            classify(status(RUNNING | MASTER), status(RUNNING)),
            MonitorEvent::LostMaster
        );
        assert_eq!(
            classify(status(RUNNING | SLAVE), status(RUNNING)),
            MonitorEvent::LostSlave
        );
        assert_eq!(
            classify(status(RUNNING | JOINED), status(RUNNING)),
            MonitorEvent::LostSynced
        );
        // Role bits unchanged but the synced bit dropped: still a loss,
        // flavored by the surviving role.
        assert_eq!(
            classify(status(RUNNING | SLAVE | JOINED), status(RUNNING | SLAVE)),
            MonitorEvent::LostSlave
        );
    }

    #[test]
    fn test_new_events() {
        assert_eq!(
            classify(status(RUNNING), status(RUNNING | MASTER)),
            MonitorEvent::NewMaster
        );
        assert_eq!(
            classify(status(RUNNING), status(RUNNING | SLAVE)),
            MonitorEvent::NewSlave
        );
        assert_eq!(
            classify(status(RUNNING), status(RUNNING | JOINED)),
            MonitorEvent::NewSynced
        );
        // A role swap is classified as learning the new role.
        assert_eq!(
            classify(status(RUNNING | MASTER), status(RUNNING | SLAVE)),
            MonitorEvent::NewSlave
        );
    }

    #[test]
    fn test_non_monitored_bits_are_ignored() {
        // AUTH_ERROR is outside the monitored mask; the roles decide.
        assert_eq!(
            classify(
                status(RUNNING | MASTER | Status::AUTH_ERROR),
                status(RUNNING)
            ),
            MonitorEvent::LostMaster
        );
    }

    #[test]
    fn test_event_names_roundtrip() {
        for event in MonitorEvent::ALL {
            assert_eq!(event.name().parse::<MonitorEvent>().unwrap(), event);
        }
    }

    #[test]
    fn test_event_set_parse() {
        assert_eq!(EventSet::parse("").unwrap(), EventSet::ALL);
        assert_eq!(EventSet::parse("all").unwrap(), EventSet::ALL);

        let set = EventSet::parse("master_down, master_up").unwrap();
        assert!(set.contains(MonitorEvent::MasterDown));
        assert!(set.contains(MonitorEvent::MasterUp));
        assert!(!set.contains(MonitorEvent::SlaveDown));

        assert!(EventSet::parse("bogus_event").is_err());
    }
}
