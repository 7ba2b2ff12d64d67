//! Tower Service implementation for the validation gate
//!
//! For every `http::Request<B>` the service:
//! - runs [`ValidationGate::admit`] with the request headers, path and method
//! - on success inserts the [`Principal`] into the request extensions and
//!   forwards to the inner service
//! - on rejection answers directly with 401, 403 or 500 without calling the
//!   inner service
//!
//! Rejections are responses, not errors, so the inner service's error type
//! passes through unchanged.

use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use tower_service::Service;

use crate::driver::Principal;

use super::ValidationGate;

/// Tower Service that admits requests through a [`ValidationGate`]
#[derive(Debug, Clone)]
pub struct GateService<S> {
    inner: S,
    gate: ValidationGate,
}

impl<S> GateService<S> {
    /// Create a new gate service
    pub fn new(inner: S, gate: ValidationGate) -> Self {
        Self { inner, gate }
    }

    /// Get a reference to the inner service
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Get a mutable reference to the inner service
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }
}

/// Future type for gate service responses
pub type GateServiceFuture<T, E> = BoxFuture<'static, Result<T, E>>;

impl<S, B, ResBody> Service<http::Request<B>> for GateService<S>
where
    S: Service<http::Request<B>, Response = http::Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Send + 'static,
    B: Send + 'static,
    ResBody: From<String> + Send + 'static,
{
    type Response = http::Response<ResBody>;
    type Error = S::Error;
    type Future = GateServiceFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        // The clone is not necessarily ready; keep the ready one for this call
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let gate = self.gate.clone();

        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let admitted = gate
                .admit(&parts.headers, parts.uri.path(), parts.method.as_str())
                .await;

            match admitted {
                Ok(principal) => {
                    let mut req = http::Request::from_parts(parts, body);
                    req.extensions_mut().insert::<Principal>(principal);
                    inner.call(req).await
                }
                Err(rejection) => Ok(rejection.into_response()),
            }
        })
    }
}
