// [apps/netd/src/store.rs]
//! Crash-safe on-disk allocation log. Appends one JSON line per mutation;
//! on restart the log is replayed to rebuild in-memory state, then
//! `reconcile` verifies each device still exists or recreates it,
//! dropping entries that can't be restored.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::link::LinkManager;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllocationRecord {
    pub lab_id: String,
    pub bridge_name: String,
    pub tap_name: String,
    pub host_ip: std::net::Ipv4Addr,
    pub guest_ip: std::net::Ipv4Addr,
    pub netmask: std::net::Ipv4Addr,
    pub block_index: u32,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum LogEntry {
    Created(AllocationRecord),
    Destroyed { lab_id: String },
}

pub struct AllocationStore {
    path: PathBuf,
    file: Mutex<File>,
    records: Mutex<HashMap<String, AllocationRecord>>,
}

impl AllocationStore {
    pub fn load_or_create(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let mut records = HashMap::new();
        if path.exists() {
            let reader = BufReader::new(File::open(path).context("opening allocation log")?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<LogEntry>(&line) {
                    Ok(LogEntry::Created(record)) => {
                        records.insert(record.lab_id.clone(), record);
                    }
                    Ok(LogEntry::Destroyed { lab_id }) => {
                        records.remove(&lab_id);
                    }
                    Err(err) => warn!(%err, "skipping corrupt allocation log line"),
                }
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path).context("opening allocation log for append")?;
        Ok(AllocationStore { path: path.to_path_buf(), file: Mutex::new(file), records: Mutex::new(records) })
    }

    pub fn record(&self, allocation: AllocationRecord) -> anyhow::Result<()> {
        self.append(&LogEntry::Created(allocation.clone()))?;
        self.records.lock().unwrap().insert(allocation.lab_id.clone(), allocation);
        Ok(())
    }

    pub fn remove(&self, lab_id: &str) -> anyhow::Result<Option<AllocationRecord>> {
        self.append(&LogEntry::Destroyed { lab_id: lab_id.to_string() })?;
        Ok(self.records.lock().unwrap().remove(lab_id))
    }

    pub fn get(&self, lab_id: &str) -> Option<AllocationRecord> {
        self.records.lock().unwrap().get(lab_id).cloned()
    }

    pub fn list(&self) -> Vec<AllocationRecord> {
        self.records.lock().unwrap().values().cloned().collect()
    }

    pub fn taken_blocks(&self) -> std::collections::HashSet<u32> {
        self.records.lock().unwrap().values().map(|r| r.block_index).collect()
    }

    fn append(&self, entry: &LogEntry) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = self.file.lock().unwrap();
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Rewrites the log to hold exactly the current in-memory records,
    /// one `Created` line each, discarding prior history of
    /// already-destroyed allocations.
    pub fn compact(&self) -> anyhow::Result<()> {
        let records = self.records.lock().unwrap();
        let mut tmp_path = self.path.clone();
        tmp_path.set_extension("jsonl.compact");
        {
            let mut tmp = File::create(&tmp_path)?;
            for record in records.values() {
                let mut line = serde_json::to_string(&LogEntry::Created(record.clone()))?;
                line.push('\n');
                tmp.write_all(line.as_bytes())?;
            }
            tmp.flush()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        *self.file.lock().unwrap() = OpenOptions::new().append(true).open(&self.path)?;
        Ok(())
    }
}

pub struct ReconcileReport {
    pub recreated: usize,
    pub dropped: usize,
}

/// Verifies every logged device still exists; recreates missing ones,
/// and drops entries whose device creation now fails (the lab is
/// presumed gone — the engine's own reconciliation will mark it FAILED
/// or orphaned independently).
pub async fn reconcile(store: &AllocationStore, links: &dyn LinkManager) -> anyhow::Result<ReconcileReport> {
    let mut recreated = 0;
    let mut dropped = 0;
    for record in store.list() {
        let bridge_ok = links.device_exists(&record.bridge_name).await;
        let tap_ok = links.device_exists(&record.tap_name).await;
        if bridge_ok && tap_ok {
            continue;
        }
        info!(lab_id = %record.lab_id, "recreating missing network devices on restart");
        let result = async {
            if !bridge_ok {
                links.create_bridge(&record.bridge_name, record.host_ip, record.netmask).await?;
            }
            if !tap_ok {
                links.create_tap(&record.tap_name, &record.bridge_name).await?;
            }
            Ok::<(), anyhow::Error>(())
        }
        .await;
        match result {
            Ok(()) => recreated += 1,
            Err(err) => {
                warn!(lab_id = %record.lab_id, %err, "could not recreate network devices, dropping allocation");
                store.remove(&record.lab_id)?;
                dropped += 1;
            }
        }
    }
    Ok(ReconcileReport { recreated, dropped })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::mock::MockLinkManager;
    use std::net::Ipv4Addr;

    fn sample(lab_id: &str) -> AllocationRecord {
        AllocationRecord {
            lab_id: lab_id.to_string(),
            bridge_name: format!("obr{lab_id}"),
            tap_name: format!("otp{lab_id}"),
            host_ip: Ipv4Addr::new(10, 200, 0, 1),
            guest_ip: Ipv4Addr::new(10, 200, 0, 2),
            netmask: Ipv4Addr::new(255, 255, 255, 252),
            block_index: 0,
        }
    }

    #[test]
    fn records_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alloc.jsonl");
        let store = AllocationStore::load_or_create(&path).unwrap();
        store.record(sample("lab1")).unwrap();
        drop(store);

        let reloaded = AllocationStore::load_or_create(&path).unwrap();
        assert_eq!(reloaded.get("lab1"), Some(sample("lab1")));
    }

    #[test]
    fn destroyed_entries_do_not_reappear_on_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alloc.jsonl");
        let store = AllocationStore::load_or_create(&path).unwrap();
        store.record(sample("lab1")).unwrap();
        store.remove("lab1").unwrap();
        drop(store);

        let reloaded = AllocationStore::load_or_create(&path).unwrap();
        assert!(reloaded.get("lab1").is_none());
    }

    #[tokio::test]
    async fn reconcile_recreates_missing_devices() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alloc.jsonl");
        let store = AllocationStore::load_or_create(&path).unwrap();
        store.record(sample("lab1")).unwrap();

        let links = MockLinkManager::default();
        let report = reconcile(&store, &links).await.unwrap();
        assert_eq!(report.recreated, 1);
        assert_eq!(report.dropped, 0);
        assert!(links.devices.lock().unwrap().contains("obrlab1"));
    }

    #[tokio::test]
    async fn reconcile_drops_unrecoverable_allocations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alloc.jsonl");
        let store = AllocationStore::load_or_create(&path).unwrap();
        store.record(sample("lab1")).unwrap();

        let links = MockLinkManager::default();
        links.fail_create.lock().unwrap().insert("obrlab1".to_string());
        let report = reconcile(&store, &links).await.unwrap();
        assert_eq!(report.dropped, 1);
        assert!(store.get("lab1").is_none());
    }
}
