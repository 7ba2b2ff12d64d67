//! Tower Layer for the validation gate

use tower::Layer;

use super::ValidationGate;
use super::service::GateService;

/// Tower Layer that puts a [`ValidationGate`] in front of a service
///
/// # Example
///
/// ```rust,ignore
/// use tower::ServiceBuilder;
/// use ticketgate::gate::GateLayer;
///
/// let service = ServiceBuilder::new()
///     .layer(GateLayer::new(gate))
///     .service(my_inner_service);
/// ```
#[derive(Debug, Clone)]
pub struct GateLayer {
    gate: ValidationGate,
}

impl GateLayer {
    /// Create a layer around `gate`
    pub fn new(gate: ValidationGate) -> Self {
        Self { gate }
    }

    /// The wrapped gate
    pub fn gate(&self) -> &ValidationGate {
        &self.gate
    }
}

impl<S> Layer<S> for GateLayer {
    type Service = GateService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GateService::new(inner, self.gate.clone())
    }
}
