//! Bus transport adapters (§6): wire framing plus the real/mock client pair
//! selected once at startup by the connectivity probe.

pub mod client;
pub mod codec;

pub use client::{probe_connectivity, BusClient, Headers, MockBusClient, RealBusClient, PROBE_TIMEOUT};
pub use codec::{JsonSchemaCodec, SchemaCodec};
