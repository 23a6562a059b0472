// [libs/infra/guest-protocol/src/error.rs]
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request exceeded its deadline")]
    Timeout,

    #[error("response exceeded the size cap")]
    ResponseTooLarge,

    #[error("malformed protocol message: {0}")]
    Protocol(String),

    #[error("agent rejected the request")]
    Rejected,
}
