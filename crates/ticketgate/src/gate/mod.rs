//! # Inbound validation gate
//!
//! The gate turns an inbound request into a [`Principal`] or a rejection:
//!
//! 1. Read the bearer token from the configured header
//! 2. Validate it with the configured [`ValidatorDriver`]
//! 3. Ask the [`Authorizer`] whether the principal may call `method` on `path`
//!
//! | Outcome | Rejection | Status |
//! |---------|-----------|--------|
//! | No header (anonymous not allowed), malformed header, invalid token | [`GateRejection::Unauthenticated`] | 401 |
//! | Authorization rules refuse the principal | [`GateRejection::Forbidden`] | 403 |
//! | Provider unreachable, unparseable answer, bad key | [`GateRejection::ServerError`] | 500 |
//!
//! [`ValidationGate::admit`] can be called directly from any server. For
//! tower stacks, [`GateLayer`] wraps a service and inserts the admitted
//! [`Principal`] into the request's extensions:
//!
//! ```rust,ignore
//! use tower::ServiceBuilder;
//! use ticketgate::gate::{GateLayer, ValidationGate};
//!
//! let gate = ValidationGate::from_config(&registry, &config)?;
//! let service = ServiceBuilder::new()
//!     .layer(GateLayer::new(gate))
//!     .service(my_handler);
//!
//! // In the handler
//! if let Some(principal) = req.extensions().get::<Principal>() {
//!     println!("caller: {principal}");
//! }
//! ```

mod layer;
mod service;

use std::sync::Arc;

use http::HeaderMap;
use http::header::HeaderName;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::authz::Authorizer;
use crate::config::TicketgateConfig;
use crate::driver::{Principal, ValidationOutcome, ValidatorDriver};
use crate::error::{AuthError, Result};
use crate::registry::DriverRegistry;

pub use layer::GateLayer;
pub use service::{GateService, GateServiceFuture};

/// Gate configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Header the bearer token is read from (default: "Authorization")
    pub auth_header: String,
    /// Whether requests without a token proceed as the anonymous principal
    pub allow_anonymous: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            auth_header: "Authorization".to_string(),
            allow_anonymous: false,
        }
    }
}

impl GateConfig {
    /// Config that lets token-less requests through as anonymous
    #[must_use]
    pub fn allow_anonymous() -> Self {
        Self {
            allow_anonymous: true,
            ..Default::default()
        }
    }

    /// Set the header name
    #[must_use]
    pub fn auth_header(mut self, header: impl Into<String>) -> Self {
        self.auth_header = header.into();
        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidConfig`] if `auth_header` is not a valid header name.
    pub fn validate(&self) -> Result<()> {
        HeaderName::from_bytes(self.auth_header.as_bytes())
            .map(|_| ())
            .map_err(|_| {
                AuthError::InvalidConfig(format!(
                    "'{}' is not a valid header name",
                    self.auth_header
                ))
            })
    }
}

/// Why the gate refused a request
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateRejection {
    /// Missing, malformed or invalid credential
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    /// Valid credential, but the authorization rules refuse the request
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// The identity provider could not be consulted
    #[error("authentication backend failure: {0}")]
    ServerError(String),
}

impl GateRejection {
    /// HTTP status for this rejection
    #[must_use]
    pub fn status_code(&self) -> http::StatusCode {
        match self {
            Self::Unauthenticated(_) => http::StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => http::StatusCode::FORBIDDEN,
            Self::ServerError(_) => http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Render as a plain-text HTTP response
    ///
    /// Backend failure details stay in the logs; the client sees a generic
    /// message.
    pub fn into_response<B: From<String>>(self) -> http::Response<B> {
        let status = self.status_code();
        let body = match self {
            Self::Unauthenticated(reason) | Self::Forbidden(reason) => reason,
            Self::ServerError(_) => "authentication backend unavailable".to_string(),
        };

        let mut response = http::Response::new(B::from(body));
        *response.status_mut() = status;
        response.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        if status == http::StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                http::header::WWW_AUTHENTICATE,
                http::HeaderValue::from_static("Bearer"),
            );
        }
        response
    }
}

/// Validates inbound credentials and applies the authorization rules
#[derive(Debug, Clone)]
pub struct ValidationGate {
    validator: Arc<dyn ValidatorDriver>,
    server_addr: String,
    audience: String,
    authorizer: Arc<Authorizer>,
    config: GateConfig,
}

impl ValidationGate {
    /// Create a gate from its parts
    pub fn new(
        validator: Arc<dyn ValidatorDriver>,
        server_addr: impl Into<String>,
        audience: impl Into<String>,
        authorizer: Authorizer,
        config: GateConfig,
    ) -> Self {
        Self {
            validator,
            server_addr: server_addr.into(),
            audience: audience.into(),
            authorizer: Arc::new(authorizer),
            config,
        }
    }

    /// Build a gate from configuration, looking the validator up in `registry`
    ///
    /// `config.driver.service_id` is the audience tokens must be issued for.
    ///
    /// # Errors
    ///
    /// Any configuration error, or [`AuthError::UnknownDriver`].
    pub fn from_config(registry: &DriverRegistry, config: &TicketgateConfig) -> Result<Self> {
        config.validate()?;
        let validator = registry.validator(&config.driver.driver)?;
        let authorizer = Authorizer::new(&config.authz)?;
        Ok(Self::new(
            validator,
            config.driver.server_addr.clone(),
            config.driver.service_id.clone(),
            authorizer,
            config.gate.clone(),
        ))
    }

    /// Gate configuration
    #[must_use]
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Decide whether a request with `headers` may call `method` on `path`
    ///
    /// # Errors
    ///
    /// The [`GateRejection`] describing why the request is refused.
    pub async fn admit(
        &self,
        headers: &HeaderMap,
        path: &str,
        method: &str,
    ) -> std::result::Result<Principal, GateRejection> {
        let principal = match self.extract_token(headers)? {
            Some(token) => self.authenticate(&token).await?,
            None if self.config.allow_anonymous => {
                debug!(path, method, "No credential presented, continuing as anonymous");
                Principal::anonymous()
            }
            None => {
                return Err(GateRejection::Unauthenticated(
                    "no bearer token presented".to_string(),
                ));
            }
        };

        self.authorizer
            .check(path, method, &principal)
            .map_err(|e| {
                warn!(path, method, principal = %principal, "Request forbidden");
                GateRejection::Forbidden(e.to_string())
            })?;
        Ok(principal)
    }

    fn extract_token(
        &self,
        headers: &HeaderMap,
    ) -> std::result::Result<Option<String>, GateRejection> {
        let Some(value) = headers.get(self.config.auth_header.as_str()) else {
            return Ok(None);
        };

        let malformed = || GateRejection::Unauthenticated("malformed authorization header".to_string());
        let value = value.to_str().map_err(|_| malformed())?;
        let (scheme, token) = value.trim().split_once(' ').ok_or_else(malformed)?;
        let token = token.trim();
        if !scheme.eq_ignore_ascii_case("Bearer") || token.is_empty() {
            return Err(malformed());
        }
        Ok(Some(token.to_string()))
    }

    async fn authenticate(&self, token: &str) -> std::result::Result<Principal, GateRejection> {
        match self
            .validator
            .validate(&self.server_addr, &self.audience, token)
            .await
        {
            Ok(ValidationOutcome::Valid(principal)) => Ok(principal),
            Ok(ValidationOutcome::Invalid { status }) => {
                debug!(server = %self.server_addr, status = %status, "Token rejected");
                Err(GateRejection::Unauthenticated(status))
            }
            Err(e) => {
                error!(server = %self.server_addr, error = %e, "Token validation failed");
                Err(GateRejection::ServerError(e.to_string()))
            }
        }
    }
}
