//! CAS ticket-granting-ticket driver
//!
//! Uses the CAS REST protocol:
//!
//! | Step | Request | Success |
//! |------|---------|---------|
//! | login | `POST {server}/v1/tickets` (`username`, `password`) | `201`, TGT id in `Location` |
//! | ticket | `POST {server}/v1/tickets/{tgt}` (`service`) | `200`, body is the service ticket |
//! | logout | `DELETE {server}/v1/tickets/{tgt}` | `200` |
//! | validate | `GET {server}/serviceValidate?ticket=..&service=..` | `200`, XML `serviceResponse` |

use std::sync::Arc;

use async_trait::async_trait;
use quick_xml::Reader;
use quick_xml::events::Event;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use super::{
    ObtainerDriver, Principal, SessionCredential, ValidationOutcome, ValidatorDriver, trim_server,
    wrong_session,
};
use crate::error::{AuthError, Result};
use crate::transport::{HttpTransport, body_text, empty_request, form_post};

/// Obtains CAS service tickets
#[derive(Debug, Clone)]
pub struct CasObtainer {
    transport: Arc<dyn HttpTransport>,
}

impl CasObtainer {
    /// Create an obtainer sending through `transport`
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl ObtainerDriver for CasObtainer {
    async fn login(
        &self,
        server_addr: &str,
        username: &str,
        password: &SecretString,
    ) -> Result<SessionCredential> {
        let uri = format!("{}/v1/tickets", trim_server(server_addr));
        let request = form_post(
            &uri,
            &[("username", username), ("password", password.expose_secret())],
        )?;

        let response = self.transport.send(request).await?;
        let status = response.status();
        if status != http::StatusCode::CREATED && status != http::StatusCode::OK {
            warn!(server = server_addr, username, status = status.as_u16(), "CAS login refused");
            return Err(AuthError::AuthServer {
                status: status.as_u16(),
            });
        }

        let location = response
            .headers()
            .get(http::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                AuthError::MalformedResponse("CAS login response has no Location header".into())
            })?;
        let tgt = location
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty())
            .ok_or_else(|| {
                AuthError::MalformedResponse(format!("no ticket id in Location '{location}'"))
            })?;

        info!(server = server_addr, username, "CAS login succeeded");
        Ok(SessionCredential::Cas(tgt.to_string()))
    }

    async fn request_ticket(
        &self,
        server_addr: &str,
        session: &mut SessionCredential,
        service_id: &str,
    ) -> Result<String> {
        let SessionCredential::Cas(tgt) = session else {
            return Err(wrong_session("cas", session));
        };

        let uri = format!("{}/v1/tickets/{tgt}", trim_server(server_addr));
        let response = self
            .transport
            .send(form_post(&uri, &[("service", service_id)])?)
            .await?;

        if response.status() != http::StatusCode::OK {
            debug!(
                server = server_addr,
                service = service_id,
                status = response.status().as_u16(),
                "CAS refused to issue a service ticket"
            );
            return Err(AuthError::TicketDenied {
                status: response.status().as_u16(),
            });
        }

        let ticket = body_text(&response).trim().to_string();
        if ticket.is_empty() {
            return Err(AuthError::MalformedResponse(
                "CAS returned an empty service ticket".into(),
            ));
        }
        Ok(ticket)
    }

    async fn logout(&self, server_addr: &str, session: &SessionCredential) -> Result<()> {
        let SessionCredential::Cas(tgt) = session else {
            return Err(wrong_session("cas", session));
        };

        let uri = format!("{}/v1/tickets/{tgt}", trim_server(server_addr));
        let response = self
            .transport
            .send(empty_request(http::Method::DELETE, &uri)?)
            .await?;

        if !response.status().is_success() {
            return Err(AuthError::AuthServer {
                status: response.status().as_u16(),
            });
        }
        debug!(server = server_addr, "CAS ticket-granting ticket destroyed");
        Ok(())
    }
}

/// Validates CAS service tickets with `serviceValidate`
#[derive(Debug, Clone)]
pub struct CasValidator {
    transport: Arc<dyn HttpTransport>,
}

impl CasValidator {
    /// Create a validator sending through `transport`
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl ValidatorDriver for CasValidator {
    async fn validate(
        &self,
        server_addr: &str,
        audience: &str,
        token: &str,
    ) -> Result<ValidationOutcome> {
        if token.is_empty() {
            return Ok(ValidationOutcome::invalid("empty service ticket"));
        }

        let url = url::Url::parse_with_params(
            &format!("{}/serviceValidate", trim_server(server_addr)),
            &[("ticket", token), ("service", audience)],
        )
        .map_err(|e| AuthError::InvalidConfig(format!("invalid CAS server address: {e}")))?;

        let response = self
            .transport
            .send(empty_request(http::Method::GET, url.as_str())?)
            .await?;
        if !response.status().is_success() {
            return Err(AuthError::MalformedResponse(format!(
                "serviceValidate answered with status {}",
                response.status()
            )));
        }

        match parse_service_response(&body_text(&response))? {
            ServiceResponse::Success { user } => {
                let principal = split_cas_user(&user)?;
                debug!(username = %principal.username, "CAS ticket validated");
                Ok(ValidationOutcome::Valid(principal))
            }
            ServiceResponse::Failure { code, message } => {
                debug!(code = %code, "CAS rejected service ticket");
                let status = if message.is_empty() {
                    code
                } else {
                    format!("{code}: {message}")
                };
                Ok(ValidationOutcome::invalid(status))
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ServiceResponse {
    Success { user: String },
    Failure { code: String, message: String },
}

#[derive(Clone, Copy)]
enum Field {
    User,
    Failure,
}

fn malformed(e: impl std::fmt::Display) -> AuthError {
    AuthError::MalformedResponse(format!("invalid serviceValidate XML: {e}"))
}

/// Parse a `cas:serviceResponse` document, ignoring namespace prefixes
fn parse_service_response(xml: &str) -> Result<ServiceResponse> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut in_success = false;
    let mut field: Option<Field> = None;
    let mut user: Option<String> = None;
    let mut failure: Option<(String, String)> = None;

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"authenticationSuccess" => in_success = true,
                b"user" if in_success && user.is_none() => {
                    user = Some(String::new());
                    field = Some(Field::User);
                }
                b"authenticationFailure" => {
                    failure = Some((failure_code(&e)?, String::new()));
                    field = Some(Field::Failure);
                }
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"authenticationFailure" => {
                failure = Some((failure_code(&e)?, String::new()));
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(malformed)?;
                append(field, &text, &mut user, &mut failure);
            }
            Event::CData(data) => {
                let text = String::from_utf8_lossy(&data).into_owned();
                append(field, &text, &mut user, &mut failure);
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"user" | b"authenticationFailure" => field = None,
                b"authenticationSuccess" => in_success = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    match (user, failure) {
        (Some(user), _) if !user.trim().is_empty() => Ok(ServiceResponse::Success {
            user: user.trim().to_string(),
        }),
        (Some(_), _) => Err(AuthError::MalformedResponse(
            "authenticationSuccess carries an empty user".into(),
        )),
        (None, Some((code, message))) => Ok(ServiceResponse::Failure {
            code,
            message: message.trim().to_string(),
        }),
        (None, None) => Err(AuthError::MalformedResponse(
            "serviceResponse has neither authenticationSuccess nor authenticationFailure".into(),
        )),
    }
}

fn failure_code(element: &quick_xml::events::BytesStart<'_>) -> Result<String> {
    match element.try_get_attribute("code").map_err(malformed)? {
        Some(attr) => Ok(attr.unescape_value().map_err(malformed)?.into_owned()),
        None => Ok("UNKNOWN".to_string()),
    }
}

fn append(
    field: Option<Field>,
    text: &str,
    user: &mut Option<String>,
    failure: &mut Option<(String, String)>,
) {
    match field {
        Some(Field::User) => {
            if let Some(user) = user.as_mut() {
                user.push_str(text);
            }
        }
        Some(Field::Failure) => {
            if let Some((_, message)) = failure.as_mut() {
                message.push_str(text);
            }
        }
        None => {}
    }
}

/// Split the CAS `user` field into user and group.
///
/// Provider quirk: our CAS deployment packs `{user}-{group}` into the single
/// `user` element. No dash is a plain user, one dash is user and group, and
/// more than one dash cannot be split unambiguously so it is refused. Both
/// halves of a dashed value must be non-empty.
fn split_cas_user(raw: &str) -> Result<Principal> {
    let parts: Vec<&str> = raw.split('-').collect();
    match parts.as_slice() {
        [user] => Ok(Principal::user(*user)),
        [user, group] if user.is_empty() || group.is_empty() => Err(
            AuthError::MalformedResponse(format!("CAS user '{raw}' has an empty user or group")),
        ),
        [user, group] => Ok(Principal::user(*user).with_group(*group)),
        _ => Err(AuthError::MalformedResponse(format!(
            "CAS user '{raw}' contains more than one '-' separator"
        ))),
    }
}
