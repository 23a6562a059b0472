// [libs/domain/models/src/recipe.rs]
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Recipe review state; only `Approved` recipes may provision labs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    Draft,
    Approved,
    Rejected,
}

/// Named, versioned build description for a vulnerable target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    pub id: String,
    pub name: String,
    pub software: String,
    pub version_constraint: String,
    pub exploit_family: String,
    pub base_image: String,
    pub dockerfile: String,
    pub source_files: Vec<SourceFile>,
    pub exposed_ports: Vec<u16>,
    pub exploit_hint: String,
    pub aliases: Vec<String>,
    pub review_state: ReviewState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: String,
    pub contents: Vec<u8>,
}

impl Recipe {
    /// Content-addressable fingerprint over `(dockerfile, source_files,
    /// base_image)`. Identical content maps to one build-cache entry
    /// regardless of `id`, `name`, or review metadata.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.base_image.as_bytes());
        hasher.update(b"\0");
        hasher.update(self.dockerfile.as_bytes());
        for file in &self.source_files {
            hasher.update(file.path.as_bytes());
            hasher.update(b"\0");
            hasher.update(&file.contents);
        }
        hex::encode(hasher.finalize())
    }

    pub fn is_approved(&self) -> bool {
        self.review_state == ReviewState::Approved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str) -> Recipe {
        Recipe {
            id: "r1".into(),
            name: name.into(),
            software: "apache-httpd".into(),
            version_constraint: "=2.4.49".into(),
            exploit_family: "path-traversal".into(),
            base_image: "httpd:2.4.49".into(),
            dockerfile: "FROM httpd:2.4.49\n".into(),
            source_files: vec![SourceFile { path: "httpd.conf".into(), contents: b"x".to_vec() }],
            exposed_ports: vec![80],
            exploit_hint: "CVE-2021-41773".into(),
            aliases: vec!["CVE-2021-41773".into()],
            review_state: ReviewState::Approved,
        }
    }

    #[test]
    fn fingerprint_ignores_metadata() {
        let mut a = sample("alpha");
        let b = sample("beta");
        assert_eq!(a.fingerprint(), b.fingerprint());
        a.dockerfile.push_str("RUN true\n");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn unapproved_recipe_is_rejected_by_is_approved() {
        let mut recipe = sample("alpha");
        recipe.review_state = ReviewState::Draft;
        assert!(!recipe.is_approved());
    }
}
