//! # stratus-transport
//!
//! Client-side connection and invocation layer for the Stratus RPC runtime.
//!
//! This crate provides:
//! - `Multiplexer` - Request/response correlation over shared connections
//! - `Connection` / `ConnectionCache` - One shared live connection per endpoint
//! - `RemoteInvoker` - The call façade tying cache, correlation, and health
//!   reporting together
//! - `RpcProber` - Application-level liveness probe reusing the cache
//!
//! ## Architecture Note
//!
//! All concurrently-mutated state (the correlation table, the connection
//! slots) is keyed per correlation id or per endpoint; unrelated calls and
//! unrelated endpoints never contend on a common lock.

mod cache;
mod client;
mod conn;
mod mux;
mod probe;

pub use cache::ConnectionCache;
pub use client::{CallTarget, InvokerConfig, RemoteInvoker};
pub use conn::{ConnectConfig, Connection};
pub use mux::{Multiplexer, PendingCall};
pub use probe::RpcProber;
