//! Error types
//!
//! Every fallible operation in the crate returns [`AuthError`]. Callers that
//! only need to pick an HTTP status class use [`AuthError::kind`].

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, AuthError>;

/// Coarse classification of an [`AuthError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad or missing driver, invalid rule, misuse of a client. Fatal, never retried.
    Config,
    /// Network failure, malformed provider response, key decode failure (500-class)
    Infra,
    /// Expired, invalid or malformed credential (401-class)
    CredentialRejected,
    /// Authorization engine refusal (403-class)
    AccessDenied,
}

/// Authentication and authorization errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no driver registered under '{0}'")]
    UnknownDriver(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid authorization rule #{index}: {reason}")]
    InvalidRule { index: usize, reason: String },

    #[error("identity provider answered with status {status}")]
    AuthServer { status: u16 },

    #[error("ticket request denied with status {status}")]
    TicketDenied { status: u16 },

    #[error("{0} is not implemented by this driver")]
    NotImplemented(&'static str),

    #[error("HTTP request failed: {0}")]
    Transport(String),

    #[error("malformed identity provider response: {0}")]
    MalformedResponse(String),

    #[error("failed to decode provider public key: {0}")]
    KeyDecode(String),

    #[error("credential rejected: {0}")]
    CredentialRejected(String),

    #[error("{principal} may not {method} {path}")]
    AccessDenied {
        principal: String,
        method: String,
        path: String,
    },

    #[error("ticket client has been deleted")]
    ClientDeleted,
}

impl AuthError {
    /// Classify this error for status-code selection
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownDriver(_)
            | Self::InvalidConfig(_)
            | Self::InvalidRule { .. }
            | Self::NotImplemented(_)
            | Self::ClientDeleted => ErrorKind::Config,
            Self::AuthServer { status } if *status >= 500 => ErrorKind::Infra,
            Self::AuthServer { .. } | Self::TicketDenied { .. } | Self::CredentialRejected(_) => {
                ErrorKind::CredentialRejected
            }
            Self::Transport(_) | Self::MalformedResponse(_) | Self::KeyDecode(_) => {
                ErrorKind::Infra
            }
            Self::AccessDenied { .. } => ErrorKind::AccessDenied,
        }
    }

    /// HTTP status code a server should answer with for this error
    #[must_use]
    pub fn status_code(&self) -> http::StatusCode {
        match self.kind() {
            ErrorKind::Config | ErrorKind::Infra => http::StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::CredentialRejected => http::StatusCode::UNAUTHORIZED,
            ErrorKind::AccessDenied => http::StatusCode::FORBIDDEN,
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
