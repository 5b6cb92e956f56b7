//! Ports — traits the core depends on, implemented by `infrastructure::*`.

pub mod challenge_client;
pub mod egress;

pub use challenge_client::ChallengeClient;
pub use egress::EgressProducer;
