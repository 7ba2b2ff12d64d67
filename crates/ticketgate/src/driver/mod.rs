//! Driver contracts
//!
//! A driver speaks one identity-provider protocol. Outbound code uses an
//! [`ObtainerDriver`] to turn login credentials into service tokens; inbound
//! code uses a [`ValidatorDriver`] to turn a presented token into a
//! [`Principal`].
//!
//! # Architecture
//!
//! ```text
//!   TicketClient ──► ObtainerDriver ──┐
//!                                     ├──► HttpTransport ──► identity provider
//!   ValidationGate ► ValidatorDriver ─┘
//! ```
//!
//! Each driver family produces and consumes only its own
//! [`SessionCredential`] variant. The ticket client stores the variant
//! without looking inside it.

pub mod cas;
pub mod keycloak;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};

pub use cas::{CasObtainer, CasValidator};
pub use keycloak::{KeycloakObtainer, KeycloakSession, KeycloakValidator, PublicKeyCache, TokenBundle};

/// Long-lived credential returned by login and used to mint service tokens
#[derive(Clone)]
pub enum SessionCredential {
    /// CAS ticket-granting ticket id (`TGT-...`)
    Cas(String),
    /// Keycloak login material and the latest token bundle
    Keycloak(KeycloakSession),
}

impl SessionCredential {
    /// Driver family that produced this credential
    #[must_use]
    pub fn family(&self) -> &'static str {
        match self {
            Self::Cas(_) => "cas",
            Self::Keycloak(_) => "keycloak",
        }
    }
}

// Manual Debug impl so session material never reaches the logs
impl std::fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple(self.family()).field(&"[REDACTED]").finish()
    }
}

/// The authenticated identity derived from a validated token
///
/// A principal with empty username, groups and client id is the anonymous
/// caller. `groups` and `roles` are sets; their order carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Username
    #[serde(default)]
    pub username: String,
    /// Group memberships
    #[serde(default)]
    pub groups: Vec<String>,
    /// Role memberships
    #[serde(default)]
    pub roles: Vec<String>,
    /// OAuth client the token was issued to
    #[serde(default)]
    pub client_id: String,
}

impl Principal {
    /// Principal with only a username
    pub fn user(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Self::default()
        }
    }

    /// The anonymous caller
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Add a group
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    /// Add a role
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    /// Set the client id
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Whether this is the anonymous caller
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.username.is_empty() && self.groups.is_empty() && self.client_id.is_empty()
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_anonymous() {
            return f.write_str("anonymous");
        }
        if self.username.is_empty() {
            write!(f, "client '{}'", self.client_id)?;
        } else {
            write!(f, "user '{}'", self.username)?;
        }
        if !self.groups.is_empty() {
            write!(f, " (groups: {})", self.groups.join(", "))?;
        }
        Ok(())
    }
}

/// Result of validating a syntactically acceptable token
///
/// Infrastructure failures are reported through `Err`, never through
/// [`ValidationOutcome::Invalid`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// The token is genuine and current
    Valid(Principal),
    /// The token was refused; `status` says why
    Invalid {
        /// Human-readable validation outcome
        status: String,
    },
}

impl ValidationOutcome {
    pub(crate) fn invalid(status: impl Into<String>) -> Self {
        Self::Invalid {
            status: status.into(),
        }
    }

    /// Whether the token was accepted
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    /// The principal, if the token was accepted
    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Self::Valid(principal) => Some(principal),
            Self::Invalid { .. } => None,
        }
    }

    /// The rejection reason, if the token was refused
    #[must_use]
    pub fn status(&self) -> Option<&str> {
        match self {
            Self::Valid(_) => None,
            Self::Invalid { status } => Some(status),
        }
    }
}

/// Obtains service tokens from an identity provider
#[async_trait]
pub trait ObtainerDriver: Send + Sync + std::fmt::Debug {
    /// Exchange login credentials for a session credential
    ///
    /// # Errors
    ///
    /// [`AuthError::AuthServer`] when the provider refuses the credentials,
    /// [`AuthError::Transport`] or [`AuthError::MalformedResponse`] on
    /// infrastructure failures.
    async fn login(
        &self,
        server_addr: &str,
        username: &str,
        password: &SecretString,
    ) -> Result<SessionCredential>;

    /// Exchange a session credential for a token scoped to `service_id`
    ///
    /// Drivers may update `session` in place (Keycloak replaces its token
    /// bundle on every exchange).
    ///
    /// # Errors
    ///
    /// [`AuthError::TicketDenied`] when the session credential is no longer
    /// accepted, or an infrastructure error.
    async fn request_ticket(
        &self,
        server_addr: &str,
        session: &mut SessionCredential,
        service_id: &str,
    ) -> Result<String>;

    /// Revoke a session credential
    ///
    /// # Errors
    ///
    /// The default implementation always fails with
    /// [`AuthError::NotImplemented`]; drivers that support revocation override it.
    async fn logout(&self, _server_addr: &str, _session: &SessionCredential) -> Result<()> {
        Err(AuthError::NotImplemented("logout"))
    }
}

/// Validates inbound tokens against an identity provider
#[async_trait]
pub trait ValidatorDriver: Send + Sync + std::fmt::Debug {
    /// Validate `token` for `audience` against the provider at `server_addr`
    ///
    /// # Errors
    ///
    /// Only infrastructure failures (network, unparseable provider response,
    /// undecodable key). A bad token is `Ok(ValidationOutcome::Invalid)`.
    async fn validate(
        &self,
        server_addr: &str,
        audience: &str,
        token: &str,
    ) -> Result<ValidationOutcome>;
}

fn wrong_session(driver: &str, session: &SessionCredential) -> AuthError {
    AuthError::InvalidConfig(format!(
        "{driver} driver cannot use a {} session credential",
        session.family()
    ))
}

fn trim_server(server_addr: &str) -> &str {
    server_addr.trim_end_matches('/')
}
