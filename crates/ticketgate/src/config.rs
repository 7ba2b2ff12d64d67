//! Configuration surface
//!
//! Everything here is plain `serde` data validated once at startup. Where
//! the values come from (file, environment, flags) is up to the host.

use serde::{Deserialize, Serialize};

use crate::authz::AuthzConfig;
use crate::error::{AuthError, Result};
use crate::gate::GateConfig;

/// Which driver to use and where the identity provider lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Registered driver name (`"cas"`, `"keycloak"`, ...)
    pub driver: String,
    /// Identity provider base URL (CAS root or Keycloak realm URL)
    pub server_addr: String,
    /// Service identifier (CAS service URL, Keycloak client id / audience)
    pub service_id: String,
}

impl DriverConfig {
    /// Create a driver configuration
    pub fn new(
        driver: impl Into<String>,
        server_addr: impl Into<String>,
        service_id: impl Into<String>,
    ) -> Self {
        Self {
            driver: driver.into(),
            server_addr: server_addr.into(),
            service_id: service_id.into(),
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidConfig`] if a field is empty or `server_addr` is
    /// not an absolute http(s) URL.
    pub fn validate(&self) -> Result<()> {
        if self.driver.trim().is_empty() {
            return Err(AuthError::InvalidConfig("driver must not be empty".to_string()));
        }
        if self.service_id.trim().is_empty() {
            return Err(AuthError::InvalidConfig(
                "service_id must not be empty".to_string(),
            ));
        }

        let url = url::Url::parse(&self.server_addr).map_err(|e| {
            AuthError::InvalidConfig(format!("server_addr '{}': {e}", self.server_addr))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AuthError::InvalidConfig(format!(
                "server_addr '{}' must use http or https",
                self.server_addr
            )));
        }
        Ok(())
    }
}

/// Complete configuration for one service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketgateConfig {
    /// Driver selection
    pub driver: DriverConfig,
    /// Authorization rules
    #[serde(default)]
    pub authz: AuthzConfig,
    /// Inbound gate settings
    #[serde(default)]
    pub gate: GateConfig,
}

impl TicketgateConfig {
    /// Validate every section
    ///
    /// # Errors
    ///
    /// The first [`AuthError::InvalidConfig`] or [`AuthError::InvalidRule`] found.
    pub fn validate(&self) -> Result<()> {
        self.driver.validate()?;
        self.authz.validate()?;
        self.gate.validate()
    }
}
