// [libs/domain/models/src/evidence.rs]
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provenance tag for an evidence file: authoritative artifacts come from
/// the network daemon's capture directory or container-engine metadata
/// (outside the guest's writable surface); untrusted artifacts are copied
/// out of the guest itself.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Trust {
    Authoritative,
    Untrusted,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceFile {
    pub path: String,
    pub sha256: String,
    pub size: u64,
    pub trust: Trust,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecord {
    pub name: String,
    pub image: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceBundle {
    pub lab_id: String,
    pub generated_at: DateTime<Utc>,
    pub files: Vec<EvidenceFile>,
    pub containers: Vec<ContainerRecord>,
    /// Base64-encoded HMAC-SHA256 over the canonical manifest bytes,
    /// present only for the "verified" retrieval variant (spec §4.8).
    pub mac: Option<String>,
}

impl EvidenceBundle {
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// Deterministic manifest bytes: files sorted by path, one JSON object
    /// per line, least surprising to hash and to sign. The exact encoding
    /// only matters for MAC stability, not for human consumption.
    pub fn manifest_bytes(&self) -> Vec<u8> {
        let mut files = self.files.clone();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        let mut bytes = Vec::new();
        for file in &files {
            bytes.extend_from_slice(file.path.as_bytes());
            bytes.push(0);
            bytes.extend_from_slice(file.sha256.as_bytes());
            bytes.push(0);
            bytes.extend_from_slice(&file.size.to_le_bytes());
            bytes.push(b'\n');
        }
        bytes
    }
}
