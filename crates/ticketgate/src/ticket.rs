//! Ticket client
//!
//! A [`TicketClient`] owns one set of login credentials, the session
//! credential its driver handed back, and the most recent service token.
//!
//! ```text
//!  Unobtained ──obtain──► Obtained ──renew──► Obtained
//!       │                    │
//!       └──────delete────────┴──────► Deleted (terminal)
//! ```
//!
//! All mutating operations take `&mut self`, so concurrent obtain/renew on
//! one client has to go through the caller's own lock (for example a
//! `tokio::sync::Mutex<TicketClient>`).

use std::sync::Arc;

use secrecy::SecretString;
use tracing::{debug, info, warn};

use crate::config::DriverConfig;
use crate::driver::{ObtainerDriver, SessionCredential};
use crate::error::{AuthError, Result};
use crate::registry::DriverRegistry;

/// Lifecycle state of a [`TicketClient`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TicketState {
    /// No token yet, or the last obtain failed
    Unobtained,
    /// A token is held
    Obtained,
    /// The session was revoked; the client can no longer be used
    Deleted,
}

/// Outbound credential holder for one logical session
pub struct TicketClient {
    driver: Arc<dyn ObtainerDriver>,
    server_addr: String,
    service_id: String,
    username: String,
    password: SecretString,
    session: Option<SessionCredential>,
    token: Option<String>,
    state: TicketState,
}

impl TicketClient {
    /// Create a client over an explicit driver
    pub fn new(
        driver: Arc<dyn ObtainerDriver>,
        server_addr: impl Into<String>,
        service_id: impl Into<String>,
        username: impl Into<String>,
        password: SecretString,
    ) -> Self {
        Self {
            driver,
            server_addr: server_addr.into(),
            service_id: service_id.into(),
            username: username.into(),
            password,
            session: None,
            token: None,
            state: TicketState::Unobtained,
        }
    }

    /// Create a client whose driver is looked up in `registry`
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidConfig`] if `config` is invalid,
    /// [`AuthError::UnknownDriver`] if no obtainer is registered under its name.
    pub fn from_config(
        registry: &DriverRegistry,
        config: &DriverConfig,
        username: impl Into<String>,
        password: SecretString,
    ) -> Result<Self> {
        config.validate()?;
        let driver = registry.obtainer(&config.driver)?;
        Ok(Self::new(
            driver,
            config.server_addr.clone(),
            config.service_id.clone(),
            username,
            password,
        ))
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> TicketState {
        self.state
    }

    /// The current service token, if one is held
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Whether a service token is held
    #[must_use]
    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Service the tokens are scoped to
    #[must_use]
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Log in and request a first token
    ///
    /// On failure the client keeps whatever it held before and the driver's
    /// error is returned unchanged.
    ///
    /// # Errors
    ///
    /// [`AuthError::ClientDeleted`] after [`delete`](Self::delete), otherwise
    /// whatever the driver reports.
    pub async fn obtain(&mut self) -> Result<&str> {
        self.ensure_live()?;

        let (session, token) = self.login_and_request().await?;
        self.commit(session, token);
        info!(
            server = %self.server_addr,
            service = %self.service_id,
            username = %self.username,
            "Service token obtained"
        );
        Ok(self.token.as_deref().unwrap_or_default())
    }

    /// Request a fresh token with the stored session credential
    ///
    /// If the driver refuses the session credential, the client logs in again
    /// once with the original credentials. A client that never obtained a
    /// session goes straight to login.
    ///
    /// # Errors
    ///
    /// [`AuthError::ClientDeleted`] after [`delete`](Self::delete), otherwise
    /// the error from the re-login attempt.
    pub async fn renew(&mut self) -> Result<&str> {
        self.ensure_live()?;

        if let Some(mut session) = self.session.clone() {
            match self
                .driver
                .request_ticket(&self.server_addr, &mut session, &self.service_id)
                .await
            {
                Ok(token) => {
                    self.commit(session, token);
                    debug!(service = %self.service_id, "Service token renewed");
                    return Ok(self.token.as_deref().unwrap_or_default());
                }
                Err(e) => {
                    warn!(
                        service = %self.service_id,
                        error = %e,
                        "Session credential refused, logging in again"
                    );
                }
            }
        }

        let (session, token) = self.login_and_request().await?;
        self.commit(session, token);
        info!(
            service = %self.service_id,
            username = %self.username,
            "Service token renewed after fresh login"
        );
        Ok(self.token.as_deref().unwrap_or_default())
    }

    /// Revoke the session credential and retire the client
    ///
    /// A client that never logged in is retired without a network call. If
    /// the driver fails, the client stays as it was so the caller can retry.
    ///
    /// # Errors
    ///
    /// Whatever the driver's logout reports, including
    /// [`AuthError::NotImplemented`].
    pub async fn delete(&mut self) -> Result<()> {
        if self.state == TicketState::Deleted {
            return Ok(());
        }

        if let Some(session) = &self.session {
            self.driver.logout(&self.server_addr, session).await?;
        }

        self.session = None;
        self.token = None;
        self.state = TicketState::Deleted;
        info!(service = %self.service_id, username = %self.username, "Ticket client deleted");
        Ok(())
    }

    fn ensure_live(&self) -> Result<()> {
        if self.state == TicketState::Deleted {
            return Err(AuthError::ClientDeleted);
        }
        Ok(())
    }

    async fn login_and_request(&self) -> Result<(SessionCredential, String)> {
        let mut session = self
            .driver
            .login(&self.server_addr, &self.username, &self.password)
            .await?;
        let token = self
            .driver
            .request_ticket(&self.server_addr, &mut session, &self.service_id)
            .await?;
        Ok((session, token))
    }

    fn commit(&mut self, session: SessionCredential, token: String) {
        self.session = Some(session);
        self.token = Some(token);
        self.state = TicketState::Obtained;
    }
}

// Manual Debug impl so neither the password nor the token is printed
impl std::fmt::Debug for TicketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketClient")
            .field("driver", &self.driver)
            .field("server_addr", &self.server_addr)
            .field("service_id", &self.service_id)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted CAS-like driver: each login yields `TGT-n`, each ticket `ST-n`
    #[derive(Debug, Default)]
    struct Scripted {
        logins: AtomicUsize,
        tickets: AtomicUsize,
        logouts: AtomicUsize,
        fail_login: bool,
        fail_logout: bool,
        /// Session credentials the driver refuses
        stale: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ObtainerDriver for Scripted {
        async fn login(&self, _: &str, _: &str, _: &SecretString) -> Result<SessionCredential> {
            let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_login {
                return Err(AuthError::AuthServer { status: 401 });
            }
            Ok(SessionCredential::Cas(format!("TGT-{n}")))
        }

        async fn request_ticket(
            &self,
            _: &str,
            session: &mut SessionCredential,
            _: &str,
        ) -> Result<String> {
            let SessionCredential::Cas(tgt) = session else {
                return Err(AuthError::InvalidConfig("wrong session".into()));
            };
            if self.stale.lock().unwrap().contains(tgt) {
                return Err(AuthError::TicketDenied { status: 404 });
            }
            let n = self.tickets.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("ST-{n}"))
        }

        async fn logout(&self, _: &str, _: &SessionCredential) -> Result<()> {
            self.logouts.fetch_add(1, Ordering::SeqCst);
            if self.fail_logout {
                return Err(AuthError::AuthServer { status: 503 });
            }
            Ok(())
        }
    }

    fn client(driver: Arc<Scripted>) -> TicketClient {
        TicketClient::new(
            driver,
            "https://cas.example.com/cas",
            "https://svc.example.com",
            "svc-user",
            SecretString::new("pw".to_string()),
        )
    }

    #[tokio::test]
    async fn test_obtain_stores_token() {
        let driver = Arc::new(Scripted::default());
        let mut client = client(Arc::clone(&driver));
        assert_eq!(client.state(), TicketState::Unobtained);
        assert!(!client.has_token());

        let token = client.obtain().await.unwrap().to_string();
        assert_eq!(token, "ST-1");
        assert_eq!(client.token(), Some("ST-1"));
        assert_eq!(client.state(), TicketState::Obtained);
        assert_eq!(driver.logins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_obtain_leaves_unobtained() {
        let driver = Arc::new(Scripted {
            fail_login: true,
            ..Scripted::default()
        });
        let mut client = client(driver);

        let err = client.obtain().await.unwrap_err();
        assert!(matches!(err, AuthError::AuthServer { status: 401 }));
        assert_eq!(client.state(), TicketState::Unobtained);
        assert!(client.token().is_none());
    }

    #[tokio::test]
    async fn test_renew_reuses_session() {
        let driver = Arc::new(Scripted::default());
        let mut client = client(Arc::clone(&driver));
        client.obtain().await.unwrap();

        assert_eq!(client.renew().await.unwrap(), "ST-2");
        assert_eq!(driver.logins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_renew_logs_in_once_on_stale_session() {
        let driver = Arc::new(Scripted::default());
        let mut client = client(Arc::clone(&driver));
        client.obtain().await.unwrap();
        driver.stale.lock().unwrap().push("TGT-1".into());

        let renewed = client.renew().await.unwrap().to_string();
        assert_eq!(renewed, "ST-2");
        assert_ne!(renewed, "ST-1");
        assert_eq!(client.state(), TicketState::Obtained);
        assert_eq!(driver.logins.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_renew_does_not_loop() {
        let driver = Arc::new(Scripted::default());
        let mut client = client(Arc::clone(&driver));
        client.obtain().await.unwrap();
        {
            let mut stale = driver.stale.lock().unwrap();
            stale.push("TGT-1".into());
            stale.push("TGT-2".into());
        }

        let err = client.renew().await.unwrap_err();
        assert!(matches!(err, AuthError::TicketDenied { status: 404 }));
        assert_eq!(driver.logins.load(Ordering::SeqCst), 2);
        // Prior token survives a failed renewal
        assert_eq!(client.token(), Some("ST-1"));
    }

    #[tokio::test]
    async fn test_renew_without_session_logs_in() {
        let driver = Arc::new(Scripted::default());
        let mut client = client(Arc::clone(&driver));

        assert_eq!(client.renew().await.unwrap(), "ST-1");
        assert_eq!(driver.logins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delete_failure_keeps_state() {
        let driver = Arc::new(Scripted {
            fail_logout: true,
            ..Scripted::default()
        });
        let mut client = client(Arc::clone(&driver));
        client.obtain().await.unwrap();

        assert!(client.delete().await.is_err());
        assert_eq!(client.state(), TicketState::Obtained);
        assert_eq!(client.token(), Some("ST-1"));
    }

    #[tokio::test]
    async fn test_delete_is_terminal() {
        let driver = Arc::new(Scripted::default());
        let mut client = client(Arc::clone(&driver));
        client.obtain().await.unwrap();

        client.delete().await.unwrap();
        assert_eq!(client.state(), TicketState::Deleted);
        assert!(!client.has_token());
        assert!(matches!(client.obtain().await, Err(AuthError::ClientDeleted)));
        assert!(matches!(client.renew().await, Err(AuthError::ClientDeleted)));

        // Deleting twice is a no-op
        client.delete().await.unwrap();
        assert_eq!(driver.logouts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delete_without_session_skips_logout() {
        let driver = Arc::new(Scripted::default());
        let mut client = client(Arc::clone(&driver));

        client.delete().await.unwrap();
        assert_eq!(client.state(), TicketState::Deleted);
        assert_eq!(driver.logouts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let client = client(Arc::new(Scripted::default()));
        let printed = format!("{client:?}");
        assert!(!printed.contains("\"pw\""));
        assert!(printed.contains("REDACTED"));
    }
}
