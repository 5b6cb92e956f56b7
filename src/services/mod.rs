//! Core scheduler services: the circuit breaker primitive, the Job
//! Registry, the Adjustment Engine, the Recovery Orchestrator, the Ingress
//! Router, and the bus-backed Egress Producer.

pub mod adjustment_engine;
pub mod circuit_breaker;
pub mod egress_producer;
pub mod ingress_router;
pub mod job_registry;
pub mod recovery_orchestrator;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
pub use egress_producer::BusEgressProducer;
pub use ingress_router::IngressRouter;
pub use job_registry::{JobRegistry, JobRegistryConfig};
pub use recovery_orchestrator::{RecoveryMetrics, RecoveryOrchestrator, RecoveryOutcome, RecoveryStatus};
