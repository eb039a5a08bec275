//! Ordered call gates
//!
//! A gate inspects call metadata and either lets the call through or rejects
//! it. [`GatePipeline`] runs gates in the order they were added and stops at
//! the first rejection; it plugs into tonic as a regular `Interceptor`.

use std::sync::Arc;
use tonic::metadata::AsciiMetadataValue;
use tonic::service::Interceptor;
use tonic::{Request, Status};
use tracing::debug;
use uuid::Uuid;

/// Metadata key carrying the correlation id
pub const CORRELATION_ID_KEY: &str = "correlation-id";

/// One step of per-call admission
pub trait CallGate: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Inspect (and optionally annotate) the call; `Err` rejects it
    fn inspect(&self, request: &mut Request<()>) -> Result<(), Status>;
}

#[derive(Clone, Default)]
pub struct GatePipeline {
    gates: Vec<Arc<dyn CallGate>>,
}

impl GatePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gate(mut self, gate: impl CallGate) -> Self {
        self.gates.push(Arc::new(gate));
        self
    }

    pub fn gate_names(&self) -> Vec<&'static str> {
        self.gates.iter().map(|gate| gate.name()).collect()
    }
}

impl Interceptor for GatePipeline {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        for gate in &self.gates {
            if let Err(status) = gate.inspect(&mut request) {
                debug!(gate = gate.name(), code = ?status.code(), "Call rejected");
                return Err(status);
            }
        }
        Ok(request)
    }
}

/// Correlation id of the current call, stored in request extensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationId(pub String);

/// Propagates the caller's `correlation-id`, or mints one
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrelationIdGate;

impl CallGate for CorrelationIdGate {
    fn name(&self) -> &'static str {
        "correlation-id"
    }

    fn inspect(&self, request: &mut Request<()>) -> Result<(), Status> {
        let id = request
            .metadata()
            .get(CORRELATION_ID_KEY)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if let Ok(value) = AsciiMetadataValue::try_from(id.as_str()) {
            request.metadata_mut().insert(CORRELATION_ID_KEY, value);
        }
        request.extensions_mut().insert(CorrelationId(id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(Arc<AtomicUsize>);

    impl CallGate for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn inspect(&self, _: &mut Request<()>) -> Result<(), Status> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Reject;

    impl CallGate for Reject {
        fn name(&self) -> &'static str {
            "reject"
        }

        fn inspect(&self, _: &mut Request<()>) -> Result<(), Status> {
            Err(Status::permission_denied("no"))
        }
    }

    #[test]
    fn test_pipeline_stops_at_first_rejection() {
        let before = Arc::new(AtomicUsize::new(0));
        let after = Arc::new(AtomicUsize::new(0));
        let mut pipeline = GatePipeline::new()
            .with_gate(Counting(before.clone()))
            .with_gate(Reject)
            .with_gate(Counting(after.clone()));

        assert_eq!(pipeline.gate_names(), vec!["counting", "reject", "counting"]);

        let status = pipeline.call(Request::new(())).unwrap_err();
        assert_eq!(status.code(), tonic::Code::PermissionDenied);
        assert_eq!(before.load(Ordering::SeqCst), 1);
        assert_eq!(after.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_empty_pipeline_admits() {
        assert!(GatePipeline::new().call(Request::new(())).is_ok());
    }

    #[test]
    fn test_correlation_id_propagated() {
        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert(CORRELATION_ID_KEY, "abc-123".parse().unwrap());

        CorrelationIdGate.inspect(&mut request).unwrap();
        assert_eq!(
            request.extensions().get::<CorrelationId>(),
            Some(&CorrelationId("abc-123".to_string()))
        );
    }

    #[test]
    fn test_correlation_id_generated() {
        let mut request = Request::new(());
        CorrelationIdGate.inspect(&mut request).unwrap();

        let id = request.extensions().get::<CorrelationId>().unwrap();
        assert!(Uuid::parse_str(&id.0).is_ok());
        assert_eq!(
            request.metadata().get(CORRELATION_ID_KEY).unwrap().to_str().unwrap(),
            id.0
        );
    }
}
