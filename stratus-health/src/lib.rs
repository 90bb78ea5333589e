//! # stratus-health
//!
//! Endpoint health monitoring for the Stratus RPC runtime.
//!
//! This crate provides:
//! - `HealthMonitor` - Periodic liveness probing with consecutive-failure
//!   hysteresis and eviction
//! - `Prober` trait with the `TcpProber` transport-level fallback
//! - `AddressRegistry` seam with a static in-memory implementation and
//!   change events

mod monitor;
mod probe;
mod registry;

pub use monitor::{HealthConfig, HealthEvent, HealthMonitor};
pub use probe::{Prober, TcpProber};
pub use registry::{AddressRegistry, RegistryEvent, StaticAddressRegistry};
