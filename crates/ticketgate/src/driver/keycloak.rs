//! Keycloak OAuth2/JWT driver
//!
//! `server_addr` is the realm URL, e.g. `https://sso.example.com/realms/iot`.
//! It doubles as the expected `iss` claim.
//!
//! - Login packages the raw credentials; no request is made.
//! - Obtaining a token is a `password` grant against
//!   `{realm}/protocol/openid-connect/token`.
//! - Renewing is a `refresh_token` grant that replaces the whole bundle.
//! - Validation verifies the RS256 signature with the realm public key
//!   (`GET {realm}`, field `public_key`), then checks `typ`, `aud` and `iss`.
//!
//! # Key caching
//!
//! Realm public keys are cached per validator instance in a
//! [`PublicKeyCache`]. Nothing invalidates an entry automatically: after a
//! realm key rotation the host must call [`PublicKeyCache::invalidate`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::{
    ObtainerDriver, Principal, SessionCredential, ValidationOutcome, ValidatorDriver, trim_server,
    wrong_session,
};
use crate::error::{AuthError, Result};
use crate::transport::{HttpTransport, HttpResponse, body_text, empty_request, form_post};

/// Token type Keycloak puts in the `typ` claim of access tokens
const ACCESS_TOKEN_TYPE: &str = "Bearer";

/// Access/refresh/id token set returned by the token endpoint
#[derive(Clone, Deserialize)]
pub struct TokenBundle {
    /// Access token presented to services
    pub access_token: String,
    /// Refresh token used for renewal and logout
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// OpenID Connect id token
    #[serde(default)]
    pub id_token: Option<String>,
    /// Access token lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Refresh token lifetime in seconds
    #[serde(default)]
    pub refresh_expires_in: Option<u64>,
    /// Token type (Bearer)
    #[serde(default)]
    pub token_type: Option<String>,
}

// Manual Debug impl to prevent token exposure in logs
impl std::fmt::Debug for TokenBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBundle")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("id_token", &self.id_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in", &self.expires_in)
            .field("refresh_expires_in", &self.refresh_expires_in)
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// Keycloak session credential: the login material plus the latest bundle
#[derive(Clone)]
pub struct KeycloakSession {
    username: String,
    password: SecretString,
    client_id: Option<String>,
    bundle: Option<TokenBundle>,
}

impl KeycloakSession {
    /// Package login credentials; no tokens yet
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
            client_id: None,
            bundle: None,
        }
    }

    /// Username the session was opened for
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Latest token bundle, if a grant has succeeded
    pub fn bundle(&self) -> Option<&TokenBundle> {
        self.bundle.as_ref()
    }
}

impl std::fmt::Debug for KeycloakSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeycloakSession")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("client_id", &self.client_id)
            .field("bundle", &self.bundle)
            .finish()
    }
}

/// Obtains Keycloak access tokens with password and refresh grants
#[derive(Clone)]
pub struct KeycloakObtainer {
    transport: Arc<dyn HttpTransport>,
    client_secret: Option<SecretString>,
}

impl KeycloakObtainer {
    /// Create an obtainer for a public client
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            client_secret: None,
        }
    }

    /// Send `client_secret` with every grant (confidential clients)
    #[must_use]
    pub fn with_client_secret(mut self, secret: SecretString) -> Self {
        self.client_secret = Some(secret);
        self
    }

    fn token_endpoint(server_addr: &str) -> String {
        format!("{}/protocol/openid-connect/token", trim_server(server_addr))
    }

    /// Password grant; replaces the session's bundle on success
    ///
    /// # Errors
    ///
    /// [`AuthError::AuthServer`] if Keycloak refuses the credentials,
    /// [`AuthError::MalformedResponse`] if the body is not a token response.
    pub async fn obtain_token(
        &self,
        server_addr: &str,
        session: &mut KeycloakSession,
        client_id: &str,
    ) -> Result<String> {
        let mut fields = vec![
            ("grant_type", "password"),
            ("client_id", client_id),
            ("username", session.username.as_str()),
            ("password", session.password.expose_secret().as_str()),
            ("scope", "openid"),
        ];
        if let Some(secret) = &self.client_secret {
            fields.push(("client_secret", secret.expose_secret().as_str()));
        }

        let response = self
            .transport
            .send(form_post(&Self::token_endpoint(server_addr), &fields)?)
            .await?;
        if !response.status().is_success() {
            warn!(
                server = server_addr,
                username = %session.username,
                status = response.status().as_u16(),
                "Keycloak password grant refused"
            );
            return Err(AuthError::AuthServer {
                status: response.status().as_u16(),
            });
        }

        let bundle = parse_bundle(&response)?;
        let token = bundle.access_token.clone();
        session.bundle = Some(bundle);
        session.client_id = Some(client_id.to_string());
        info!(server = server_addr, username = %session.username, "Keycloak token obtained");
        Ok(token)
    }

    /// Refresh grant using the stored refresh token; replaces the whole bundle
    ///
    /// # Errors
    ///
    /// [`AuthError::TicketDenied`] if there is no refresh token or Keycloak
    /// refuses it.
    pub async fn renew_token(
        &self,
        server_addr: &str,
        session: &mut KeycloakSession,
        client_id: &str,
    ) -> Result<String> {
        let refresh_token = session
            .bundle
            .as_ref()
            .and_then(|bundle| bundle.refresh_token.clone())
            .ok_or(AuthError::TicketDenied { status: 400 })?;

        let mut fields = vec![
            ("grant_type", "refresh_token"),
            ("client_id", client_id),
            ("refresh_token", refresh_token.as_str()),
        ];
        if let Some(secret) = &self.client_secret {
            fields.push(("client_secret", secret.expose_secret().as_str()));
        }

        let response = self
            .transport
            .send(form_post(&Self::token_endpoint(server_addr), &fields)?)
            .await?;
        if !response.status().is_success() {
            debug!(
                server = server_addr,
                status = response.status().as_u16(),
                "Keycloak refresh grant refused"
            );
            return Err(AuthError::TicketDenied {
                status: response.status().as_u16(),
            });
        }

        let bundle = parse_bundle(&response)?;
        let token = bundle.access_token.clone();
        session.bundle = Some(bundle);
        session.client_id = Some(client_id.to_string());
        debug!(server = server_addr, "Keycloak token renewed");
        Ok(token)
    }
}

impl std::fmt::Debug for KeycloakObtainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeycloakObtainer")
            .field("transport", &self.transport)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

fn parse_bundle(response: &HttpResponse) -> Result<TokenBundle> {
    serde_json::from_slice(response.body())
        .map_err(|e| AuthError::MalformedResponse(format!("invalid token response: {e}")))
}

#[async_trait]
impl ObtainerDriver for KeycloakObtainer {
    async fn login(
        &self,
        _server_addr: &str,
        username: &str,
        password: &SecretString,
    ) -> Result<SessionCredential> {
        Ok(SessionCredential::Keycloak(KeycloakSession::new(
            username,
            password.clone(),
        )))
    }

    async fn request_ticket(
        &self,
        server_addr: &str,
        session: &mut SessionCredential,
        service_id: &str,
    ) -> Result<String> {
        let SessionCredential::Keycloak(keycloak) = session else {
            return Err(wrong_session("keycloak", session));
        };

        let has_refresh_token = keycloak
            .bundle
            .as_ref()
            .is_some_and(|bundle| bundle.refresh_token.is_some());
        if has_refresh_token {
            self.renew_token(server_addr, keycloak, service_id).await
        } else {
            self.obtain_token(server_addr, keycloak, service_id).await
        }
    }

    async fn logout(&self, server_addr: &str, session: &SessionCredential) -> Result<()> {
        let SessionCredential::Keycloak(keycloak) = session else {
            return Err(wrong_session("keycloak", session));
        };

        // Nothing was issued yet, so there is nothing to revoke.
        let (Some(client_id), Some(bundle)) = (keycloak.client_id.as_deref(), &keycloak.bundle)
        else {
            return Ok(());
        };
        // Keycloak revokes a session through its refresh token only
        let Some(refresh_token) = bundle.refresh_token.as_deref() else {
            warn!(
                server = server_addr,
                username = %keycloak.username,
                "Cannot revoke Keycloak session issued without a refresh token"
            );
            return Err(AuthError::NotImplemented("logout without refresh token"));
        };

        let mut fields = vec![("client_id", client_id), ("refresh_token", refresh_token)];
        if let Some(secret) = &self.client_secret {
            fields.push(("client_secret", secret.expose_secret().as_str()));
        }

        let uri = format!("{}/protocol/openid-connect/logout", trim_server(server_addr));
        let response = self.transport.send(form_post(&uri, &fields)?).await?;
        if !response.status().is_success() {
            return Err(AuthError::AuthServer {
                status: response.status().as_u16(),
            });
        }
        debug!(server = server_addr, username = %keycloak.username, "Keycloak session revoked");
        Ok(())
    }
}

/// Realm public keys keyed by realm URL
///
/// Entries live until [`invalidate`](Self::invalidate) or
/// [`clear`](Self::clear) is called.
#[derive(Default)]
pub struct PublicKeyCache {
    keys: RwLock<HashMap<String, Arc<DecodingKey>>>,
}

impl std::fmt::Debug for PublicKeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let realms = self
            .keys
            .try_read()
            .map(|keys| keys.keys().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        f.debug_struct("PublicKeyCache").field("realms", &realms).finish()
    }
}

impl PublicKeyCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached key for a realm
    pub async fn get(&self, server_addr: &str) -> Option<Arc<DecodingKey>> {
        self.keys.read().await.get(trim_server(server_addr)).cloned()
    }

    /// Store the key for a realm, replacing any previous one
    pub async fn insert(&self, server_addr: &str, key: Arc<DecodingKey>) {
        self.keys
            .write()
            .await
            .insert(trim_server(server_addr).to_string(), key);
    }

    /// Drop the key for one realm; returns whether one was cached
    pub async fn invalidate(&self, server_addr: &str) -> bool {
        let removed = self.keys.write().await.remove(trim_server(server_addr)).is_some();
        debug!(server = server_addr, removed, "Realm public key invalidated");
        removed
    }

    /// Drop every cached key
    pub async fn clear(&self) {
        self.keys.write().await.clear();
    }

    /// Number of cached realms
    pub async fn len(&self) -> usize {
        self.keys.read().await.len()
    }

    /// Whether the cache is empty
    pub async fn is_empty(&self) -> bool {
        self.keys.read().await.is_empty()
    }
}

/// Realm document returned by `GET {realm}`
#[derive(Debug, Deserialize)]
struct RealmInfo {
    public_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn contains(&self, audience: &str) -> bool {
        match self {
            Self::One(aud) => aud == audience,
            Self::Many(auds) => auds.iter().any(|aud| aud == audience),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RealmAccess {
    #[serde(default)]
    roles: Vec<String>,
}

/// Claims of a Keycloak access token that matter here
#[derive(Debug, Deserialize)]
struct KeycloakClaims {
    #[serde(default)]
    typ: Option<String>,
    #[serde(default)]
    aud: Option<Audience>,
    #[serde(default)]
    iss: Option<String>,
    #[serde(default)]
    preferred_username: Option<String>,
    #[serde(default)]
    groups: Vec<String>,
    #[serde(default)]
    azp: Option<String>,
    #[serde(default)]
    realm_access: Option<RealmAccess>,
}

/// Checks applied after signature verification; `Err` is the status text
fn check_claims(
    claims: KeycloakClaims,
    server_addr: &str,
    audience: &str,
) -> std::result::Result<Principal, String> {
    let typ = claims.typ.unwrap_or_default();
    if typ != ACCESS_TOKEN_TYPE {
        return Err(format!("unexpected token type '{typ}'"));
    }
    if !claims.aud.as_ref().is_some_and(|aud| aud.contains(audience)) {
        return Err(format!("token is not intended for audience '{audience}'"));
    }
    let issuer = claims.iss.unwrap_or_default();
    if issuer != trim_server(server_addr) {
        return Err(format!("unexpected token issuer '{issuer}'"));
    }

    Ok(Principal {
        username: claims.preferred_username.unwrap_or_default(),
        groups: claims.groups,
        roles: claims.realm_access.map(|access| access.roles).unwrap_or_default(),
        client_id: claims.azp.unwrap_or_default(),
    })
}

/// Wrap a base64 SubjectPublicKeyInfo body into PEM
fn public_key_pem(body: &str) -> String {
    let chars: Vec<char> = body.chars().filter(|c| !c.is_whitespace()).collect();
    let mut pem = String::from("-----BEGIN PUBLIC KEY-----\n");
    for line in chars.chunks(64) {
        pem.extend(line);
        pem.push('\n');
    }
    pem.push_str("-----END PUBLIC KEY-----\n");
    pem
}

/// Validates Keycloak access tokens
#[derive(Debug)]
pub struct KeycloakValidator {
    transport: Arc<dyn HttpTransport>,
    keys: PublicKeyCache,
    clock_skew_leeway: Duration,
}

impl KeycloakValidator {
    /// Create a validator with an empty key cache and 60 seconds of clock skew
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            keys: PublicKeyCache::new(),
            clock_skew_leeway: Duration::from_secs(60),
        }
    }

    /// Set custom clock skew tolerance for `exp`/`nbf`
    #[must_use]
    pub fn with_clock_skew(mut self, leeway: Duration) -> Self {
        self.clock_skew_leeway = leeway;
        self
    }

    /// The realm public-key cache
    pub fn key_cache(&self) -> &PublicKeyCache {
        &self.keys
    }

    async fn decoding_key(&self, server_addr: &str) -> Result<Arc<DecodingKey>> {
        if let Some(key) = self.keys.get(server_addr).await {
            return Ok(key);
        }

        info!(server = server_addr, "Fetching realm public key");
        let response = self
            .transport
            .send(empty_request(http::Method::GET, trim_server(server_addr))?)
            .await?;
        if !response.status().is_success() {
            error!(
                server = server_addr,
                status = response.status().as_u16(),
                "Realm endpoint returned error status"
            );
            return Err(AuthError::MalformedResponse(format!(
                "realm endpoint answered with status {}",
                response.status()
            )));
        }

        let realm: RealmInfo = serde_json::from_slice(response.body()).map_err(|e| {
            AuthError::MalformedResponse(format!(
                "invalid realm document ({e}): {}",
                body_text(&response).chars().take(128).collect::<String>()
            ))
        })?;
        let key = DecodingKey::from_rsa_pem(public_key_pem(&realm.public_key).as_bytes())
            .map_err(|e| {
                error!(server = server_addr, error = %e, "Realm public key is not a valid RSA key");
                AuthError::KeyDecode(e.to_string())
            })?;

        let key = Arc::new(key);
        self.keys.insert(server_addr, Arc::clone(&key)).await;
        Ok(key)
    }
}

#[async_trait]
impl ValidatorDriver for KeycloakValidator {
    async fn validate(
        &self,
        server_addr: &str,
        audience: &str,
        token: &str,
    ) -> Result<ValidationOutcome> {
        let header = match decode_header(token) {
            Ok(header) => header,
            Err(e) => {
                debug!(error = %e, "Failed to decode JWT header");
                return Ok(ValidationOutcome::invalid(format!("malformed token: {e}")));
            }
        };
        if header.alg != Algorithm::RS256 {
            warn!(algorithm = ?header.alg, "JWT algorithm not allowed");
            return Ok(ValidationOutcome::invalid(format!(
                "unexpected signing algorithm {:?}",
                header.alg
            )));
        }

        let key = self.decoding_key(server_addr).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_aud = false;
        validation.leeway = self.clock_skew_leeway.as_secs();

        let claims = match decode::<KeycloakClaims>(token, &key, &validation) {
            Ok(data) => data.claims,
            Err(e) => {
                let status = match e.kind() {
                    JwtErrorKind::ExpiredSignature => "token expired".to_string(),
                    JwtErrorKind::ImmatureSignature => "token not yet valid".to_string(),
                    JwtErrorKind::InvalidSignature => "invalid token signature".to_string(),
                    _ => format!("invalid token: {e}"),
                };
                debug!(server = server_addr, error = %e, "JWT validation failed");
                return Ok(ValidationOutcome::invalid(status));
            }
        };

        match check_claims(claims, server_addr, audience) {
            Ok(principal) => {
                debug!(username = %principal.username, client = %principal.client_id, "JWT validation successful");
                Ok(ValidationOutcome::Valid(principal))
            }
            Err(status) => {
                debug!(server = server_addr, audience, status = %status, "JWT claims rejected");
                Ok(ValidationOutcome::invalid(status))
            }
        }
    }
}
