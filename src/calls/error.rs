//! Call-related error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("no call found for id: {0}")]
    NotFound(String),

    #[error("invalid call state transition: {0}")]
    InvalidTransition(#[from] super::state::InvalidTransition),

    #[error("call {0} is not an incoming call")]
    NotIncoming(String),

    #[error("socket did not come up before the registration timeout")]
    RegistrationTimeout,

    #[error("socket error: {0}")]
    Socket(#[from] crate::socket::SocketError),
}
