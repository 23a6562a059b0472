// [libs/infra/evidence/src/signer.rs]
//! Verified-bundle signing: a keyed MAC over the bundle's canonical
//! manifest bytes, using a secret the engine never discloses. Key
//! rotation is out of scope (see DESIGN.md) — one secret for the
//! process lifetime.

use hmac::{Hmac, Mac};
use octolab_domain_models::evidence::EvidenceBundle;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct BundleSigner {
    key: Vec<u8>,
}

impl BundleSigner {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        BundleSigner { key: key.into() }
    }

    /// Returns `bundle` with `mac` set to the hex-encoded HMAC-SHA256 over
    /// its manifest bytes.
    pub fn sign(&self, mut bundle: EvidenceBundle) -> EvidenceBundle {
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(&bundle.manifest_bytes());
        bundle.mac = Some(hex::encode(mac.finalize().into_bytes()));
        bundle
    }

    pub fn verify(&self, bundle: &EvidenceBundle) -> bool {
        let Some(expected_hex) = &bundle.mac else {
            return false;
        };
        let Ok(expected) = hex::decode(expected_hex) else {
            return false;
        };
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(&bundle.manifest_bytes());
        mac.verify_slice(&expected).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use octolab_domain_models::evidence::{ContainerRecord, EvidenceFile, Trust};

    fn sample() -> EvidenceBundle {
        EvidenceBundle {
            lab_id: "lab-1".to_string(),
            generated_at: chrono::Utc::now(),
            files: vec![EvidenceFile { path: "a.log".to_string(), sha256: "deadbeef".to_string(), size: 4, trust: Trust::Authoritative }],
            containers: vec![ContainerRecord { name: "target".to_string(), image: "httpd".to_string(), status: "exited".to_string() }],
            mac: None,
        }
    }

    #[test]
    fn signed_bundle_verifies_with_same_key() {
        let signer = BundleSigner::new(b"top-secret-key".to_vec());
        let signed = signer.sign(sample());
        assert!(signer.verify(&signed));
    }

    #[test]
    fn tampering_with_manifest_breaks_verification() {
        let signer = BundleSigner::new(b"top-secret-key".to_vec());
        let mut signed = signer.sign(sample());
        signed.files[0].sha256 = "tampered".to_string();
        assert!(!signer.verify(&signed));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let signer_a = BundleSigner::new(b"key-a".to_vec());
        let signer_b = BundleSigner::new(b"key-b".to_vec());
        let signed = signer_a.sign(sample());
        assert!(!signer_b.verify(&signed));
    }
}
