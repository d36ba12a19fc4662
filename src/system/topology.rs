//! Rank table (device topology descriptor)
//!
//! The launcher only needs the rank table to exist; its contents belong to
//! the communication runtime. When it parses as an HCCL-style JSON table we
//! read the device count to catch obvious mismatches early.

use crate::error::{LaunchError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct RawRankTable {
    #[serde(default)]
    server_list: Vec<RawServer>,
}

#[derive(Debug, Deserialize)]
struct RawServer {
    #[serde(default)]
    server_id: Option<String>,
    #[serde(default)]
    device: Vec<RawDevice>,
}

#[derive(Debug, Deserialize)]
struct RawDevice {
    device_id: String,
    rank_id: String,
}

/// A located rank table
#[derive(Debug, Clone)]
pub struct RankTable {
    /// Absolute path of the table
    pub path: PathBuf,
    /// Devices listed in the table, if it could be parsed
    pub device_count: Option<usize>,
    /// Servers listed in the table, if it could be parsed
    pub server_count: Option<usize>,
}

impl RankTable {
    /// Check that `path` is a regular file and inspect it
    ///
    /// Fails with [`LaunchError::RankTableNotFound`] when the path is missing
    /// or is not a regular file. Unparseable contents are not an error.
    pub fn locate(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(LaunchError::RankTableNotFound(path.to_path_buf()));
        }

        let parsed = std::fs::read_to_string(path)
            .ok()
            .and_then(|content| serde_json::from_str::<RawRankTable>(&content).ok());

        let (device_count, server_count) = match parsed {
            Some(table) => {
                for server in &table.server_list {
                    for device in &server.device {
                        tracing::trace!(
                            server = server.server_id.as_deref().unwrap_or("?"),
                            device_id = %device.device_id,
                            rank_id = %device.rank_id,
                            "rank table entry"
                        );
                    }
                }
                let devices = table.server_list.iter().map(|s| s.device.len()).sum();
                (Some(devices), Some(table.server_list.len()))
            }
            None => {
                tracing::debug!(path = %path.display(), "rank table is not an HCCL JSON table");
                (None, None)
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            device_count,
            server_count,
        })
    }

    /// Warn when the table disagrees with the local device count
    pub fn check_device_count(&self, expected: usize) {
        match (self.device_count, self.server_count) {
            (Some(found), Some(1)) if found != expected => {
                tracing::warn!(
                    found,
                    expected,
                    path = %self.path.display(),
                    "rank table device count differs from launch device count"
                );
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE_8P: &str = r#"{
        "version": "1.0",
        "server_count": "1",
        "server_list": [{
            "server_id": "10.0.0.1",
            "device": [
                {"device_id": "0", "device_ip": "192.1.0.1", "rank_id": "0"},
                {"device_id": "1", "device_ip": "192.1.0.2", "rank_id": "1"},
                {"device_id": "2", "device_ip": "192.1.0.3", "rank_id": "2"},
                {"device_id": "3", "device_ip": "192.1.0.4", "rank_id": "3"},
                {"device_id": "4", "device_ip": "192.1.0.5", "rank_id": "4"},
                {"device_id": "5", "device_ip": "192.1.0.6", "rank_id": "5"},
                {"device_id": "6", "device_ip": "192.1.0.7", "rank_id": "6"},
                {"device_id": "7", "device_ip": "192.1.0.8", "rank_id": "7"}
            ],
            "host_nic_ip": "reserve"
        }],
        "status": "completed"
    }"#;

    #[test]
    fn test_missing_rank_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hccl_8p.json");
        assert!(matches!(RankTable::locate(&path), Err(LaunchError::RankTableNotFound(_))));
    }

    #[test]
    fn test_directory_is_not_a_rank_table() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(RankTable::locate(dir.path()), Err(LaunchError::RankTableNotFound(_))));
    }

    #[test]
    fn test_hccl_table_is_inspected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hccl_8p.json");
        std::fs::write(&path, TABLE_8P).unwrap();

        let table = RankTable::locate(&path).unwrap();
        assert_eq!(table.device_count, Some(8));
        assert_eq!(table.server_count, Some(1));
        table.check_device_count(8);
    }

    #[test]
    fn test_opaque_table_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ranks.txt");
        std::fs::write(&path, "not json at all").unwrap();

        let table = RankTable::locate(&path).unwrap();
        assert_eq!(table.device_count, None);
        assert_eq!(table.path, path);
    }
}
