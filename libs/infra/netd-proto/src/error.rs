// [libs/infra/netd-proto/src/error.rs]
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetdError {
    #[error("could not reach network daemon socket: {0}")]
    Unreachable(String),

    #[error("network daemon rejected the request: {0}")]
    Rejected(String),

    #[error("malformed response from network daemon: {0}")]
    Protocol(String),

    #[error("retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

impl NetdError {
    /// Bridges into the two consecutive-failure rule from spec §4.3: the
    /// caller (C5) only cares whether a given failure should count toward
    /// that counter, i.e. whether it is transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, NetdError::Unreachable(_) | NetdError::RetriesExhausted { .. })
    }
}
