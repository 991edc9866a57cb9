//! Atomic on-disk persistence of the journal buffer

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use sha1::{Digest, Sha1};
use tracing::{debug, error, warn};

use super::JournalError;

const JOURNAL_NAME: &str = "monitor.dat";

/// Writes, loads and ages the journal file for one monitor.
///
/// Files live at `<data_dir>/<monitor>/monitor.dat` and are replaced via a
/// sibling temp file and rename so readers never see a partial write. The
/// SHA-1 of the last stored payload is kept to skip rewrites when nothing
/// changed between ticks.
pub struct JournalStore {
    dir: PathBuf,
    path: PathBuf,
    last_hash: Option<[u8; 20]>,
}

impl JournalStore {
    pub fn new(data_dir: impl AsRef<Path>, monitor_name: &str) -> Self {
        let dir = data_dir.as_ref().join(monitor_name);
        let path = dir.join(JOURNAL_NAME);
        Self {
            dir,
            path,
            last_hash: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist an encoded journal buffer. Returns `false` when the payload
    /// hash matches the previously stored one and no I/O was done.
    pub fn store(&mut self, encoded: &[u8]) -> Result<bool, JournalError> {
        // Hash the payload region; the leading length field is redundant
        // with it.
        let mut hasher = Sha1::new();
        hasher.update(&encoded[4..]);
        let hash: [u8; 20] = hasher.finalize().into();

        if self.last_hash == Some(hash) {
            debug!(path = %self.path.display(), "Journal unchanged, skipping write");
            return Ok(false);
        }

        fs::create_dir_all(&self.dir)?;

        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(6)
            .map(char::from)
            .collect();
        let tmp_path = self.dir.join(format!("{JOURNAL_NAME}{suffix}"));

        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&tmp_path)?;
        file.write_all(encoded)?;
        file.flush()?;
        file.sync_all()?;
        drop(file);

        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(JournalError::Rename(e));
        }

        self.last_hash = Some(hash);
        Ok(true)
    }

    /// Read the journal payload: the bytes after the 4-byte length field,
    /// exactly `length` of them. `Ok(None)` when no journal exists.
    pub fn load(&self) -> Result<Option<Vec<u8>>, JournalError> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut len_buf = [0u8; 4];
        let got = file.read(&mut len_buf)?;
        if got != len_buf.len() {
            return Err(JournalError::ShortRead {
                expected: len_buf.len(),
                got,
            });
        }
        let size = u32::from_be_bytes(len_buf) as usize;

        let mut payload = vec![0u8; size];
        let mut read = 0;
        while read < size {
            let n = file.read(&mut payload[read..])?;
            if n == 0 {
                return Err(JournalError::ShortRead {
                    expected: size,
                    got: read,
                });
            }
            read += n;
        }

        Ok(Some(payload))
    }

    /// True when the journal file is older than `max_age` (or unreadable).
    /// Missing journals are not stale, they are simply absent.
    pub fn is_stale(&self, max_age: Duration) -> bool {
        let metadata = match fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return false,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Failed to inspect journal file");
                return true;
            }
        };

        match metadata.modified().ok().and_then(|m| m.elapsed().ok()) {
            Some(age) if age >= max_age => {
                warn!(
                    age_secs = age.as_secs(),
                    max_age_secs = max_age.as_secs(),
                    "Journal file exceeds maximum age"
                );
                true
            }
            Some(_) => false,
            // Clock skew puts the mtime in the future; treat as fresh.
            None => false,
        }
    }

    pub fn remove(&self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                error!(path = %self.path.display(), error = %e, "Failed to remove journal file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::codec;

    fn sample_buffer() -> Vec<u8> {
        codec::encode(vec![("a", 1u64), ("b", 0u64)], Some("a"))
    }

    #[test]
    fn test_store_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JournalStore::new(dir.path(), "m1");

        let encoded = sample_buffer();
        assert!(store.store(&encoded).unwrap());

        let payload = store.load().unwrap().unwrap();
        assert_eq!(payload, &encoded[4..]);

        let (snapshot, err) = codec::decode(&payload);
        assert!(err.is_none());
        assert_eq!(snapshot.master.as_deref(), Some("a"));
    }

    #[test]
    fn test_store_skips_unchanged_payload() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JournalStore::new(dir.path(), "m1");

        let encoded = sample_buffer();
        assert!(store.store(&encoded).unwrap());
        assert!(!store.store(&encoded).unwrap());

        let changed = codec::encode(vec![("a", 3u64), ("b", 0u64)], Some("a"));
        assert!(store.store(&changed).unwrap());
    }

    #[test]
    fn test_load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JournalStore::new(dir.path(), "m1");
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_truncated_file_is_short_read() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JournalStore::new(dir.path(), "m1");
        store.store(&sample_buffer()).unwrap();

        // Chop the file in the middle of the payload.
        let data = fs::read(store.path()).unwrap();
        fs::write(store.path(), &data[..data.len() - 3]).unwrap();

        assert!(matches!(
            store.load(),
            Err(JournalError::ShortRead { .. })
        ));
    }

    #[test]
    fn test_staleness() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JournalStore::new(dir.path(), "m1");

        // Absent journal is not stale.
        assert!(!store.is_stale(Duration::from_secs(60)));

        store.store(&sample_buffer()).unwrap();
        assert!(!store.is_stale(Duration::from_secs(60)));
        assert!(store.is_stale(Duration::ZERO));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JournalStore::new(dir.path(), "m1");
        store.store(&sample_buffer()).unwrap();

        store.remove();
        assert!(store.load().unwrap().is_none());
        store.remove();
    }

    #[test]
    fn test_no_leftover_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JournalStore::new(dir.path(), "m1");
        store.store(&sample_buffer()).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path().join("m1"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from(JOURNAL_NAME)]);
    }
}
