use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid enrollment response: {0}")]
    InvalidEnrollResponse(String),
    #[error("secret data is encrypted")]
    EncryptedSecretData,
    #[error("authenticator is not enrolled")]
    NotEnrolled,
    #[error("crypto error: {0}")]
    Crypto(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl Error {
    /// Enrollment surfaces every raised failure as `InvalidEnrollResponse`,
    /// wrapping the transport or crypto cause.
    pub(crate) fn into_enroll(self) -> Self {
        match self {
            err @ Self::InvalidEnrollResponse(_) => err,
            err => Self::InvalidEnrollResponse(err.to_string()),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
