//! Authenticated request invoker
//!
//! Sends an outbound request with `Authorization: Bearer <token>` taken from
//! a [`TicketClient`]. A `401 Unauthorized` answer triggers exactly one
//! [`TicketClient::renew`] and one resend; the second response is returned
//! whatever its status.

use std::sync::Arc;

use http::header::{AUTHORIZATION, HeaderValue};
use http::StatusCode;
use tracing::debug;

use crate::error::{AuthError, Result};
use crate::ticket::TicketClient;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

/// Sends requests on behalf of a [`TicketClient`]
#[derive(Debug, Clone)]
pub struct AuthenticatedInvoker {
    transport: Arc<dyn HttpTransport>,
}

impl AuthenticatedInvoker {
    /// Create an invoker over `transport`
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    /// Send `request` with a bearer token, renewing once on `401`
    ///
    /// Obtains a first token if the client holds none. Transport failures on
    /// either send are returned immediately.
    ///
    /// # Errors
    ///
    /// Errors from obtaining or renewing the token, or from the transport.
    pub async fn send(
        &self,
        client: &mut TicketClient,
        request: HttpRequest,
    ) -> Result<HttpResponse> {
        if !client.has_token() {
            client.obtain().await?;
        }

        let (parts, body) = request.into_parts();
        let retry = http::Request::from_parts(parts.clone(), body.clone());

        let first = self
            .transport
            .send(with_bearer(http::Request::from_parts(parts, body), current_token(client)?)?)
            .await?;
        if first.status() != StatusCode::UNAUTHORIZED {
            return Ok(first);
        }

        debug!(
            uri = %retry.uri(),
            service = %client.service_id(),
            "Request unauthorized, renewing token and retrying once"
        );
        let token = client.renew().await?.to_string();
        self.transport.send(with_bearer(retry, &token)?).await
    }
}

fn current_token(client: &TicketClient) -> Result<&str> {
    client
        .token()
        .ok_or_else(|| AuthError::InvalidConfig("ticket client holds no token".to_string()))
}

fn with_bearer(mut request: HttpRequest, token: &str) -> Result<HttpRequest> {
    let value = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|e| AuthError::MalformedResponse(format!("token is not a valid header value: {e}")))?;
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(request)
}
