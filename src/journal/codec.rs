//! Binary journal format
//!
//! Big-endian layout:
//!
//! ```text
//! [0..4)    payload_size   u32   bytes from the schema version through the CRC
//! [4]       schema_version u8
//! [5..E)    entries
//! [E..E+4)  crc32          u32   over [4..E)
//! ```
//!
//! Entries:
//!
//! ```text
//! SERVER(=1)  u8 type | server name NUL | u64 status
//! MASTER(=2)  u8 type | server name NUL
//! ```

use super::JournalError;

/// Journals must carry a matching version to be loaded.
pub const SCHEMA_VERSION: u8 = 2;

const LEN_BYTES: usize = 4;
const LEN_SCHEMA_VERSION: usize = 1;
const LEN_CRC32: usize = 4;
const LEN_VALUE_TYPE: usize = 1;
const LEN_SERVER_STATUS: usize = 8;

const TYPE_SERVER: u8 = 1;
const TYPE_MASTER: u8 = 2;

/// Decoded journal contents.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct JournalSnapshot {
    /// `(server name, status bits)` in stored order.
    pub servers: Vec<(String, u64)>,
    /// Name of the designated master, when one was stored.
    pub master: Option<String>,
}

/// Serialize the per-server statuses and optional master into the on-disk
/// frame, including the leading length field.
pub fn encode<'a>(
    servers: impl IntoIterator<Item = (&'a str, u64)> + Clone,
    master: Option<&str>,
) -> Vec<u8> {
    let mut size = LEN_SCHEMA_VERSION + LEN_CRC32;
    for (name, _) in servers.clone() {
        size += LEN_VALUE_TYPE + name.len() + 1 + LEN_SERVER_STATUS;
    }
    if let Some(name) = master {
        size += LEN_VALUE_TYPE + name.len() + 1;
    }

    let mut data = Vec::with_capacity(LEN_BYTES + size);
    data.extend_from_slice(&(size as u32).to_be_bytes());
    data.push(SCHEMA_VERSION);

    for (name, status) in servers {
        data.push(TYPE_SERVER);
        data.extend_from_slice(name.as_bytes());
        data.push(0);
        data.extend_from_slice(&status.to_be_bytes());
    }

    if let Some(name) = master {
        data.push(TYPE_MASTER);
        data.extend_from_slice(name.as_bytes());
        data.push(0);
    }

    let crc = crc32fast::hash(&data[LEN_BYTES..]);
    data.extend_from_slice(&crc.to_be_bytes());

    debug_assert_eq!(data.len(), LEN_BYTES + size);
    data
}

/// Deserialize a journal payload (the bytes after the leading length field).
///
/// Header-level failures (schema, CRC) yield an empty snapshot. Corruption
/// discovered while walking entries returns the entries decoded up to that
/// point together with the error; warm start is best-effort and callers apply
/// whatever was recovered.
pub fn decode(payload: &[u8]) -> (JournalSnapshot, Option<JournalError>) {
    let mut snapshot = JournalSnapshot::default();

    if payload.len() < LEN_SCHEMA_VERSION + LEN_CRC32 {
        return (snapshot, Some(JournalError::Truncated));
    }

    let version = payload[0];
    if version != SCHEMA_VERSION {
        return (snapshot, Some(JournalError::SchemaVersion(version)));
    }

    let crc_offset = payload.len() - LEN_CRC32;
    let stored_crc = u32::from_be_bytes(payload[crc_offset..].try_into().unwrap());
    let computed_crc = crc32fast::hash(&payload[..crc_offset]);
    if stored_crc != computed_crc {
        return (snapshot, Some(JournalError::CrcMismatch));
    }

    let mut ptr = LEN_SCHEMA_VERSION;
    while ptr < crc_offset {
        let entry_type = payload[ptr];
        ptr += LEN_VALUE_TYPE;

        let Some(nul) = payload[ptr..crc_offset].iter().position(|&b| b == 0) else {
            return (snapshot, Some(JournalError::MissingTerminator));
        };
        let name = String::from_utf8_lossy(&payload[ptr..ptr + nul]).to_string();
        ptr += nul + 1;

        match entry_type {
            TYPE_SERVER => {
                if crc_offset - ptr < LEN_SERVER_STATUS {
                    return (snapshot, Some(JournalError::Truncated));
                }
                let status =
                    u64::from_be_bytes(payload[ptr..ptr + LEN_SERVER_STATUS].try_into().unwrap());
                ptr += LEN_SERVER_STATUS;
                snapshot.servers.push((name, status));
            }
            TYPE_MASTER => {
                snapshot.master = Some(name);
            }
            other => {
                return (snapshot, Some(JournalError::UnknownEntryType(other)));
            }
        }
    }

    (snapshot, None)
}
