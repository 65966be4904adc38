use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by the certificate lifecycle engine.
#[derive(Debug, Error)]
pub enum Error {
    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("invalid domain name: {0}")]
    InvalidDomain(String),

    #[error("invalid challenge config: {0}")]
    InvalidConfig(String),

    #[error("no usable challenge config for domain")]
    NoChallengeConfig,

    #[error("an order is already in progress for this domain")]
    OrderInProgress,

    #[error("challenge validation timed out")]
    ChallengeTimeout,

    #[error("certificate authority error: {0}")]
    Authority(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Wraps a failure reported by the external ACME authority.
    pub fn authority(err: impl std::fmt::Display) -> Self {
        Error::Authority(err.to_string())
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<acme_lib::Error> for Error {
    fn from(err: acme_lib::Error) -> Self {
        Error::Authority(err.to_string())
    }
}
