//! Crash-recovery journal
//!
//! After every tick the monitor snapshots each server's status and the
//! designated master to `<data_dir>/<monitor>/monitor.dat`. On a warm start
//! the snapshot seeds the previous-status values so the first tick does not
//! re-announce states that never changed. The journal is best-effort: any
//! integrity failure is logged and the monitor starts from scratch.

mod codec;
mod store;

pub use codec::{decode, encode, JournalSnapshot, SCHEMA_VERSION};
pub use store::JournalStore;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },
    #[error("Unknown journal schema version: {0}")]
    SchemaVersion(u8),
    #[error("CRC32 mismatch")]
    CrcMismatch,
    #[error("Journal payload too small")]
    Truncated,
    #[error("No null terminator found in journal entry")]
    MissingTerminator,
    #[error("Unknown stored value type: {0}")]
    UnknownEntryType(u8),
    #[error("Failed to rename journal file: {0}")]
    Rename(std::io::Error),
}
