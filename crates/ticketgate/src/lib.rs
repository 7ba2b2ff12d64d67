//! # Ticketgate - Service-to-Service Authentication
//!
//! Acquire and refresh machine-to-machine credentials from a CAS or Keycloak
//! identity provider, and validate inbound credentials against path-based
//! authorization rules.
//!
//! ## Key Features
//!
//! - **Pluggable drivers** - CAS (ticket-granting tickets, XML validation) and
//!   Keycloak (password/refresh grants, RS256 JWT validation) out of the box
//! - **Ticket lifecycle** - Obtain, renew with one transparent re-login, delete
//! - **Retry on 401** - Outbound requests renew once and resend
//! - **Hierarchical rules** - Most-specific path prefix first, per-rule path vetoes
//! - **Tower middleware** - [`GateLayer`] in front of any `http` service
//!
//! ## Architecture
//!
//! - [`driver`] - `ObtainerDriver` / `ValidatorDriver` contracts and the CAS and Keycloak drivers
//! - [`registry`] - Name → driver table built at startup
//! - [`ticket`] - `TicketClient` state machine
//! - [`invoker`] - Bearer-token request sender with renew-and-resend
//! - [`authz`] - Authorization rule engine
//! - [`gate`] - Inbound validation gate and its tower layer
//! - [`transport`] - "Send HTTP request, get status and body" primitive
//! - [`config`] - Serde configuration surface
//! - [`error`] - `AuthError` and its coarse `ErrorKind`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use secrecy::SecretString;
//! use ticketgate::{AuthenticatedInvoker, DriverConfig, DriverRegistry, ReqwestTransport, TicketClient};
//!
//! # async fn run() -> ticketgate::Result<()> {
//! let transport = Arc::new(ReqwestTransport::new()?);
//! let registry = DriverRegistry::with_defaults(transport.clone());
//!
//! let config = DriverConfig::new("cas", "https://cas.example.com/cas", "https://devices.example.com");
//! let mut client = TicketClient::from_config(
//!     &registry,
//!     &config,
//!     "svc-devices",
//!     SecretString::new("secret".to_string()),
//! )?;
//!
//! let invoker = AuthenticatedInvoker::new(transport);
//! let request = http::Request::get("https://devices.example.com/devices/42").body(Vec::new())
//!     .map_err(|e| ticketgate::AuthError::InvalidConfig(e.to_string()))?;
//! let response = invoker.send(&mut client, request).await?;
//! println!("status: {}", response.status());
//!
//! client.delete().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Classes
//!
//! Every error maps to one [`ErrorKind`]: `Config` (fatal at startup),
//! `Infra` (500-class), `CredentialRejected` (401-class) or `AccessDenied`
//! (403-class). A token that is merely invalid is not an error at all; the
//! validator reports it as [`ValidationOutcome::Invalid`].

pub mod authz;
pub mod config;
pub mod driver;
pub mod error;
pub mod gate;
pub mod invoker;
pub mod registry;
pub mod ticket;
pub mod transport;

#[doc(inline)]
pub use authz::{Authorizer, AuthzConfig, Rule, path_prefixes};

#[doc(inline)]
pub use config::{DriverConfig, TicketgateConfig};

#[doc(inline)]
pub use driver::{
    ObtainerDriver, Principal, SessionCredential, ValidationOutcome, ValidatorDriver,
};

#[doc(inline)]
pub use error::{AuthError, ErrorKind, Result};

#[doc(inline)]
pub use gate::{GateConfig, GateLayer, GateRejection, GateService, ValidationGate};

pub use invoker::AuthenticatedInvoker;
pub use registry::{CAS_DRIVER, DriverRegistry, KEYCLOAK_DRIVER};
pub use ticket::{TicketClient, TicketState};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
