//! Disk space thresholds
//!
//! The monitor periodically asks each backend for its mount sizes and flags
//! servers whose used percentage crosses the configured limit. Thresholds
//! are keyed by mount path; the `*` key is a default for mounts without an
//! explicit entry.

use std::collections::BTreeMap;
use std::str::FromStr;

/// Query against the server's disk introspection table.
pub const DISKS_QUERY: &str =
    "SELECT Path, Total, Available FROM information_schema.DISKS";

/// Per-mount maximum used-percentage limits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskSpaceLimits {
    limits: BTreeMap<String, u8>,
}

impl DiskSpaceLimits {
    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }

    /// Limit for a mount path: the explicit entry, or the `*` default.
    pub fn limit_for(&self, path: &str) -> Option<u8> {
        self.limits
            .get(path)
            .or_else(|| self.limits.get("*"))
            .copied()
    }

    pub fn explicit_paths(&self) -> impl Iterator<Item = (&str, u8)> + '_ {
        self.limits
            .iter()
            .filter(|(path, _)| path.as_str() != "*")
            .map(|(path, pct)| (path.as_str(), *pct))
    }
}

impl FromStr for DiskSpaceLimits {
    type Err = String;

    /// Parse `path:pct[,path:pct]*`. Percentages must be within 0..=100.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut limits = BTreeMap::new();
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self { limits });
        }

        for item in s.split(',') {
            let item = item.trim();
            let (path, pct) = item
                .rsplit_once(':')
                .ok_or_else(|| format!("expected 'path:percentage', got '{item}'"))?;
            let path = path.trim();
            if path.is_empty() {
                return Err(format!("empty mount path in '{item}'"));
            }
            if path != "*" && !path.starts_with('/') {
                return Err(format!("mount path must be absolute or '*': '{path}'"));
            }
            let pct: u8 = pct
                .trim()
                .parse()
                .map_err(|_| format!("invalid percentage in '{item}'"))?;
            if pct > 100 {
                return Err(format!("percentage out of range in '{item}'"));
            }
            limits.insert(path.to_string(), pct);
        }

        Ok(Self { limits })
    }
}

/// One row of the server's mount inventory.
#[derive(Debug, Clone)]
pub struct MountInfo {
    pub path: String,
    pub total: u64,
    pub available: u64,
}

impl MountInfo {
    pub fn used_percentage(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        (((self.total - self.available) as f64 / self.total as f64) * 100.0) as u8
    }
}

/// Mounts whose used percentage meets or exceeds their limit.
///
/// Explicitly listed paths are checked against their own limits; the `*`
/// default covers every remaining mount. Returns `(path, used%, limit)` per
/// exhausted mount.
pub fn exhausted_mounts(
    mounts: &[MountInfo],
    limits: &DiskSpaceLimits,
) -> Vec<(String, u8, u8)> {
    let mut exhausted = Vec::new();
    let mut checked = std::collections::BTreeSet::new();

    for (path, limit) in limits.explicit_paths() {
        if let Some(mount) = mounts.iter().find(|m| m.path == path) {
            checked.insert(path.to_string());
            let used = mount.used_percentage();
            if used >= limit {
                exhausted.push((mount.path.clone(), used, limit));
            }
        }
    }

    if let Some(default_limit) = limits.limit_for("*") {
        for mount in mounts {
            if checked.contains(&mount.path) {
                continue;
            }
            let used = mount.used_percentage();
            if used >= default_limit {
                exhausted.push((mount.path.clone(), used, default_limit));
            }
        }
    }

    exhausted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_and_default() {
        let limits: DiskSpaceLimits = "/data:80".parse().unwrap();
        assert_eq!(limits.limit_for("/data"), Some(80));
        assert_eq!(limits.limit_for("/other"), None);

        let limits: DiskSpaceLimits = "/data:80,*:90".parse().unwrap();
        assert_eq!(limits.limit_for("/data"), Some(80));
        assert_eq!(limits.limit_for("/other"), Some(90));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<DiskSpaceLimits>().unwrap().is_empty());
        assert!("/data".parse::<DiskSpaceLimits>().is_err());
        assert!("/data:abc".parse::<DiskSpaceLimits>().is_err());
        assert!("/data:101".parse::<DiskSpaceLimits>().is_err());
        assert!("data:50".parse::<DiskSpaceLimits>().is_err());
        assert!(":50".parse::<DiskSpaceLimits>().is_err());
    }

    #[test]
    fn test_used_percentage() {
        let mount = MountInfo {
            path: "/data".into(),
            total: 1000,
            available: 250,
        };
        assert_eq!(mount.used_percentage(), 75);

        let empty = MountInfo {
            path: "/empty".into(),
            total: 0,
            available: 0,
        };
        assert_eq!(empty.used_percentage(), 0);
    }

    #[test]
    fn test_exhausted_explicit_path() {
        let limits: DiskSpaceLimits = "/data:70".parse().unwrap();
        let mounts = vec![
            MountInfo {
                path: "/data".into(),
                total: 100,
                available: 20,
            },
            MountInfo {
                path: "/logs".into(),
                total: 100,
                available: 1,
            },
        ];
        // /logs has no limit, so only /data is reported.
        let exhausted = exhausted_mounts(&mounts, &limits);
        assert_eq!(exhausted, vec![("/data".to_string(), 80, 70)]);
    }

    #[test]
    fn test_star_covers_unlisted_mounts() {
        let limits: DiskSpaceLimits = "/data:95,*:50".parse().unwrap();
        let mounts = vec![
            MountInfo {
                path: "/data".into(),
                total: 100,
                available: 20, // 80% used, under its own 95 limit
            },
            MountInfo {
                path: "/logs".into(),
                total: 100,
                available: 30, // 70% used, over the default
            },
        ];
        let exhausted = exhausted_mounts(&mounts, &limits);
        assert_eq!(exhausted, vec![("/logs".to_string(), 70, 50)]);
    }
}
