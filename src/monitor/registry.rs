//! Process-wide server ownership registry
//!
//! A server may be monitored by at most one monitor. Every `add_server`
//! claims the name here and every removal releases it, so two monitors can
//! never probe and write the same server's status.
//!
//! Claims and releases are issued only by the admin layer, whose operations
//! are serialized upstream; the map itself is still concurrency-safe so that
//! readers (diagnostics) can look up owners without coordination.

use dashmap::DashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OwnershipError {
    #[error("Server '{server}' is already monitored by '{owner}', cannot add it to another monitor")]
    AlreadyClaimed { server: String, owner: String },
}

/// Mapping of server name to owning monitor name.
#[derive(Debug, Default)]
pub struct ServerOwnership {
    owners: DashMap<String, String>,
}

impl ServerOwnership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `monitor` as the owner of `server`. Fails if the name is already
    /// claimed; the error names the existing owner.
    pub fn claim(&self, server: &str, monitor: &str) -> Result<(), OwnershipError> {
        match self.owners.entry(server.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                Err(OwnershipError::AlreadyClaimed {
                    server: server.to_string(),
                    owner: existing.get().clone(),
                })
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(monitor.to_string());
                Ok(())
            }
        }
    }

    /// Release a claimed name. Releasing an unclaimed name is a caller bug.
    pub fn release(&self, server: &str) {
        let removed = self.owners.remove(server);
        debug_assert!(removed.is_some(), "released unclaimed server '{server}'");
    }

    pub fn claimed_by(&self, server: &str) -> Option<String> {
        self.owners.get(server).map(|owner| owner.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_and_release() {
        let ownership = ServerOwnership::new();
        ownership.claim("srv-a", "M1").unwrap();
        assert_eq!(ownership.claimed_by("srv-a").as_deref(), Some("M1"));

        ownership.release("srv-a");
        assert!(ownership.claimed_by("srv-a").is_none());
    }

    #[test]
    fn test_conflicting_claim_names_owner() {
        let ownership = ServerOwnership::new();
        ownership.claim("srv-a", "M1").unwrap();

        let err = ownership.claim("srv-a", "M2").unwrap_err();
        let OwnershipError::AlreadyClaimed { server, owner } = err;
        assert_eq!(server, "srv-a");
        assert_eq!(owner, "M1");

        // The original claim is untouched.
        assert_eq!(ownership.claimed_by("srv-a").as_deref(), Some("M1"));
    }

    #[test]
    fn test_reclaim_after_release() {
        let ownership = ServerOwnership::new();
        ownership.claim("srv-a", "M1").unwrap();
        ownership.release("srv-a");
        ownership.claim("srv-a", "M2").unwrap();
        assert_eq!(ownership.claimed_by("srv-a").as_deref(), Some("M2"));
    }
}
