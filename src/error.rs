use thiserror::Error;

/// Failure taxonomy for the engine.
///
/// `AuthExpired` is recoverable by a single refresh+retry at the call site;
/// `RefreshExhausted` is fatal to the current account run only. Everything
/// else is logged and isolated per task / per draw / per account.
#[derive(Debug, Error)]
pub enum Error {
    /// The remote service reported the distinguished expired-credential code.
    #[error("authentication expired")]
    AuthExpired,

    /// Any other non-zero application code from the remote service.
    #[error("api error {code}: {message}")]
    Api { code: i64, message: String },

    /// Network failure, timeout, or an undecodable response body.
    #[error("transport error: {0}")]
    Transport(String),

    /// Token refresh retries exhausted; wraps the last underlying failure.
    #[error("token refresh exhausted after {attempts} attempt(s): {last}")]
    RefreshExhausted {
        attempts: u32,
        #[source]
        last: Box<Error>,
    },

    #[error("store error: {0}")]
    Store(String),

    #[error("account {0} not found")]
    AccountNotFound(i64),
}

impl Error {
    /// True when no further remote calls should be attempted for this
    /// account in the current run.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(self, Error::RefreshExhausted { .. })
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
