//! HTTP transport
//!
//! Drivers never talk to `reqwest` directly. They build an
//! [`http::Request`] and hand it to an [`HttpTransport`], which returns the
//! status, headers and body. This keeps the drivers testable and lets the
//! host plug in its own client.
//!
//! ## Security Configuration
//!
//! [`ReqwestTransport`] is configured to:
//! - NOT follow redirects (CAS login answers `201` with a `Location` header
//!   that has to be read, and following redirects on credential posts is an
//!   SSRF risk)
//! - Use rustls for TLS (no OpenSSL dependency)

use std::time::Duration;

use async_trait::async_trait;
use http::{HeaderValue, StatusCode};

use crate::error::{AuthError, Result};

/// Type alias for outbound requests
pub type HttpRequest = http::Request<Vec<u8>>;
/// Type alias for responses
pub type HttpResponse = http::Response<Vec<u8>>;

/// "Send a request, get status and body" primitive consumed by the drivers
#[async_trait]
pub trait HttpTransport: Send + Sync + std::fmt::Debug {
    /// Send the request and buffer the whole response
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Transport`] when the request could not be sent or
    /// the response could not be read. Non-2xx statuses are NOT errors here.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// [`HttpTransport`] backed by `reqwest`
#[derive(Clone)]
pub struct ReqwestTransport {
    inner: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with hardened defaults and a 30 second timeout
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Transport`] if the TLS backend cannot be initialised.
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(30))
    }

    /// Create a transport with a custom request timeout
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Transport`] if the TLS backend cannot be initialised.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()?;

        Ok(Self { inner })
    }

    /// Create from an existing reqwest client
    ///
    /// # Warning
    /// Ensure the client is configured with `redirect::Policy::none()`,
    /// otherwise CAS logins lose the `Location` header.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { inner: client }
    }
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("inner", &"<reqwest::Client>")
            .finish()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let (parts, body) = request.into_parts();

        let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
            .map_err(|_| AuthError::Transport(format!("invalid method: {}", parts.method)))?;

        let mut req_builder = self.inner.request(method, parts.uri.to_string());
        for (name, value) in &parts.headers {
            req_builder = req_builder.header(name.as_str(), value.as_bytes());
        }
        let response = req_builder.body(body).send().await?;

        let status = StatusCode::from_u16(response.status().as_u16())
            .map_err(|e| AuthError::Transport(e.to_string()))?;
        let mut builder = http::Response::builder().status(status);
        for (name, value) in response.headers() {
            let header_value = HeaderValue::from_bytes(value.as_bytes())
                .map_err(|e| AuthError::Transport(e.to_string()))?;
            builder = builder.header(name.as_str(), header_value);
        }

        let body_bytes = response.bytes().await?;

        builder
            .body(body_bytes.to_vec())
            .map_err(|e| AuthError::Transport(e.to_string()))
    }
}

/// Build a `application/x-www-form-urlencoded` POST
pub(crate) fn form_post(uri: &str, fields: &[(&str, &str)]) -> Result<HttpRequest> {
    let body = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields)
        .finish();

    http::Request::post(uri)
        .header(http::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .header(http::header::ACCEPT, "*/*")
        .body(body.into_bytes())
        .map_err(|e| AuthError::InvalidConfig(format!("cannot build request for {uri}: {e}")))
}

/// Build a body-less request
pub(crate) fn empty_request(method: http::Method, uri: &str) -> Result<HttpRequest> {
    http::Request::builder()
        .method(method)
        .uri(uri)
        .body(Vec::new())
        .map_err(|e| AuthError::InvalidConfig(format!("cannot build request for {uri}: {e}")))
}

/// Response body as (lossy) UTF-8 text
pub(crate) fn body_text(response: &HttpResponse) -> String {
    String::from_utf8_lossy(response.body()).into_owned()
}
