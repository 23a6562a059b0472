// [libs/infra/evidence/src/assembler.rs]
//! Walks the two trust-zone source directories and builds a deterministic
//! `EvidenceBundle`: files sorted by path, one SHA-256 per file, a size
//! cap enforced before the bundle is persisted.

use std::path::{Path, PathBuf};

use octolab_domain_models::evidence::{ContainerRecord, EvidenceBundle, EvidenceFile, Trust};
use sha2::{Digest, Sha256};

use crate::error::EvidenceError;

pub struct BundleSources<'a> {
    pub lab_id: &'a str,
    pub authoritative_dir: &'a Path,
    pub untrusted_dir: &'a Path,
    pub containers: Vec<ContainerRecord>,
    pub max_bundle_bytes: u64,
}

pub async fn assemble(sources: BundleSources<'_>) -> Result<EvidenceBundle, EvidenceError> {
    let mut files = Vec::new();
    collect_files(sources.authoritative_dir, sources.authoritative_dir, Trust::Authoritative, &mut files).await?;
    collect_files(sources.untrusted_dir, sources.untrusted_dir, Trust::Untrusted, &mut files).await?;
    files.sort_by(|a, b| a.path.cmp(&b.path));

    let total: u64 = files.iter().map(|f| f.size).sum();
    if total > sources.max_bundle_bytes {
        return Err(EvidenceError::TooLarge { actual: total, cap: sources.max_bundle_bytes });
    }

    Ok(EvidenceBundle {
        lab_id: sources.lab_id.to_string(),
        generated_at: chrono::Utc::now(),
        files,
        containers: sources.containers,
        mac: None,
    })
}

fn collect_files<'a>(
    root: &'a Path,
    dir: &'a Path,
    trust: Trust,
    out: &'a mut Vec<EvidenceFile>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), EvidenceError>> + Send + 'a>> {
    Box::pin(async move {
        if !dir.exists() {
            return Ok(());
        }
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                collect_files(root, &path, trust, out).await?;
            } else if file_type.is_file() {
                let contents = tokio::fs::read(&path).await?;
                let sha256 = hex::encode(Sha256::digest(&contents));
                let relative = path.strip_prefix(root).unwrap_or(&path).to_string_lossy().to_string();
                out.push(EvidenceFile { path: relative, sha256, size: contents.len() as u64, trust });
            }
        }
        Ok(())
    })
}

pub fn scratch_path(root: &Path, lab_id: &str) -> PathBuf {
    root.join(lab_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn assembles_bundle_with_sorted_tagged_files() {
        let authoritative = tempfile::tempdir().unwrap();
        let untrusted = tempfile::tempdir().unwrap();
        tokio::fs::write(authoritative.path().join("netd.log"), b"capture").await.unwrap();
        tokio::fs::write(untrusted.path().join("session.rec"), b"recording").await.unwrap();

        let bundle = assemble(BundleSources {
            lab_id: "lab-1",
            authoritative_dir: authoritative.path(),
            untrusted_dir: untrusted.path(),
            containers: vec![ContainerRecord { name: "target".to_string(), image: "httpd:2.4.49".to_string(), status: "exited".to_string() }],
            max_bundle_bytes: 1024,
        })
        .await
        .unwrap();

        assert_eq!(bundle.files.len(), 2);
        assert!(bundle.files.windows(2).all(|w| w[0].path <= w[1].path));
        assert!(bundle.files.iter().any(|f| f.trust == Trust::Authoritative));
        assert!(bundle.files.iter().any(|f| f.trust == Trust::Untrusted));
    }

    #[tokio::test]
    async fn oversized_bundle_is_rejected() {
        let authoritative = tempfile::tempdir().unwrap();
        let untrusted = tempfile::tempdir().unwrap();
        tokio::fs::write(authoritative.path().join("big.bin"), vec![0u8; 2048]).await.unwrap();

        let result = assemble(BundleSources {
            lab_id: "lab-1",
            authoritative_dir: authoritative.path(),
            untrusted_dir: untrusted.path(),
            containers: vec![],
            max_bundle_bytes: 1024,
        })
        .await;
        assert!(matches!(result, Err(EvidenceError::TooLarge { .. })));
    }
}
