//! # stratus-dispatch
//!
//! Server-side dispatch and execution path for the Stratus RPC runtime.
//!
//! This crate provides:
//! - `ServiceRegistry` / `ServiceEntry` - Explicit handler registration by
//!   service id and route path
//! - `ServiceHandler` - The handler trait, with `handler_fn` for closures
//! - `Dispatcher` - Locates the handler, applies the execution policy, and
//!   builds the result envelope
//! - `Server` - TCP accept/read loop feeding the dispatcher

mod dispatch;
mod registry;
mod server;

pub use dispatch::{exception_chain, Dispatcher, ReplySink};
pub use registry::{handler_fn, ServiceEntry, ServiceHandler, ServiceRegistry};
pub use server::{Server, ServerConfig, ServerHandle};
