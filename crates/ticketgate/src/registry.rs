//! Driver registry
//!
//! Maps a short driver name (`"cas"`, `"keycloak"`) to its obtainer and
//! validator implementations. A registry is built once at startup, then
//! shared read-only (usually behind an `Arc`). Several independent registries
//! can coexist in one process.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::driver::{
    CasObtainer, CasValidator, KeycloakObtainer, KeycloakValidator, ObtainerDriver,
    ValidatorDriver,
};
use crate::error::{AuthError, Result};
use crate::transport::HttpTransport;

/// Name of the built-in CAS driver
pub const CAS_DRIVER: &str = "cas";
/// Name of the built-in Keycloak driver
pub const KEYCLOAK_DRIVER: &str = "keycloak";

/// Name → driver table
#[derive(Debug, Default, Clone)]
pub struct DriverRegistry {
    obtainers: HashMap<String, Arc<dyn ObtainerDriver>>,
    validators: HashMap<String, Arc<dyn ValidatorDriver>>,
}

impl DriverRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in CAS and Keycloak drivers sharing `transport`
    pub fn with_defaults(transport: Arc<dyn HttpTransport>) -> Self {
        let mut registry = Self::new();
        registry.obtainers.insert(
            CAS_DRIVER.to_string(),
            Arc::new(CasObtainer::new(Arc::clone(&transport))),
        );
        registry.validators.insert(
            CAS_DRIVER.to_string(),
            Arc::new(CasValidator::new(Arc::clone(&transport))),
        );
        registry.obtainers.insert(
            KEYCLOAK_DRIVER.to_string(),
            Arc::new(KeycloakObtainer::new(Arc::clone(&transport))),
        );
        registry.validators.insert(
            KEYCLOAK_DRIVER.to_string(),
            Arc::new(KeycloakValidator::new(transport)),
        );
        registry
    }

    /// Register an obtainer, replacing any previous one under `name`
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidConfig`] if `name` is empty.
    pub fn register_obtainer(
        &mut self,
        name: impl Into<String>,
        driver: Arc<dyn ObtainerDriver>,
    ) -> Result<()> {
        let name = checked_name(name.into())?;
        if self.obtainers.insert(name.clone(), driver).is_some() {
            debug!(driver = %name, "Replaced obtainer driver");
        } else {
            info!(driver = %name, "Registered obtainer driver");
        }
        Ok(())
    }

    /// Register a validator, replacing any previous one under `name`
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidConfig`] if `name` is empty.
    pub fn register_validator(
        &mut self,
        name: impl Into<String>,
        driver: Arc<dyn ValidatorDriver>,
    ) -> Result<()> {
        let name = checked_name(name.into())?;
        if self.validators.insert(name.clone(), driver).is_some() {
            debug!(driver = %name, "Replaced validator driver");
        } else {
            info!(driver = %name, "Registered validator driver");
        }
        Ok(())
    }

    /// Look up an obtainer
    ///
    /// # Errors
    ///
    /// [`AuthError::UnknownDriver`] naming the missing driver.
    pub fn obtainer(&self, name: &str) -> Result<Arc<dyn ObtainerDriver>> {
        self.obtainers
            .get(name)
            .cloned()
            .ok_or_else(|| AuthError::UnknownDriver(name.to_string()))
    }

    /// Look up a validator
    ///
    /// # Errors
    ///
    /// [`AuthError::UnknownDriver`] naming the missing driver.
    pub fn validator(&self, name: &str) -> Result<Arc<dyn ValidatorDriver>> {
        self.validators
            .get(name)
            .cloned()
            .ok_or_else(|| AuthError::UnknownDriver(name.to_string()))
    }

    /// Registered obtainer names, sorted
    pub fn obtainer_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.obtainers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Registered validator names, sorted
    pub fn validator_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.validators.keys().cloned().collect();
        names.sort();
        names
    }
}

fn checked_name(name: String) -> Result<String> {
    if name.trim().is_empty() {
        return Err(AuthError::InvalidConfig(
            "driver name must not be empty".to_string(),
        ));
    }
    Ok(name)
}
