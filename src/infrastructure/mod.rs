//! Adapters implementing the domain ports: bus transport, HTTP challenge
//! client, process configuration, structured logging, and the health
//! endpoint.

pub mod bus;
pub mod challenge_client;
pub mod config;
pub mod health;
pub mod logging;

pub use challenge_client::{HttpChallengeClient, MockChallengeClient};
