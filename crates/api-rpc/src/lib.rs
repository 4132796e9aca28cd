//! JSON-RPC API Layer
//!
//! Exposes job submission, stop, status and engine statistics over
//! JSON-RPC 2.0.

pub mod error;
pub mod handler;
pub mod server;
pub mod types;

pub use handler::RpcHandler;
pub use server::{RpcServer, RpcServerConfig};
