// [libs/infra/repository/src/error.rs]
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("lab {0} not found")]
    LabNotFound(String),

    #[error("recipe {0} not found")]
    RecipeNotFound(String),

    #[error("evidence bundle for lab {0} not found")]
    BundleNotFound(String),

    /// CAS loss: `update_status` observed a different current status than
    /// `expected_from`. The caller abandons its work (spec §7).
    #[error("stale state: lab {id} is no longer {expected:?}")]
    StaleState { id: String, expected: octolab_domain_models::lab::LabStatus },

    #[error("database error: {0}")]
    Database(String),

    #[error("mapping error: {0}")]
    Mapping(String),
}
