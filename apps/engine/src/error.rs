// [apps/engine/src/error.rs]
use octolab_domain_models::cause::ErrorClass;
use octolab_policy::Denial;
use thiserror::Error;

/// Top-level error surfaced by `EngineHandle`. Wraps the component error
/// enums the admission/provisioning path can hit; carries `ErrorClass` as
/// a first-class field rather than leaving callers to parse messages.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("policy denied: {0:?}")]
    PolicyDenied(Denial),

    #[error("lab {0} not found")]
    NotFound(String),

    #[error("caller does not own lab {0}")]
    NotOwner(String),

    #[error("recipe {0} is not approved")]
    RecipeUnapproved(String),

    #[error("repository error: {0}")]
    Repository(#[from] octolab_repository::RepositoryError),

    #[error("runtime error: {0}")]
    Runtime(#[from] octolab_runtime::RuntimeError),

    #[error("evidence error: {0}")]
    Evidence(#[from] octolab_evidence::EvidenceError),

    #[error("{0} is not eligible for this operation in its current status")]
    InvalidTransition(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::PolicyDenied(_) => ErrorClass::PolicyDenied,
            EngineError::NotFound(_) | EngineError::NotOwner(_) | EngineError::RecipeUnapproved(_) => {
                ErrorClass::PolicyDenied
            }
            EngineError::InvalidTransition(_) => ErrorClass::StaleState,
            _ => ErrorClass::Fatal,
        }
    }
}
