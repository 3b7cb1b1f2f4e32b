//! agora-rpc
//!
//! The marketplace API surface: a JSON-RPC 2.0 server exposing every
//! operation, DTO types, and the error → status-code mapping. The thin HTTP
//! layer in front of this (framing, CORS, TLS, body limits) extracts the
//! transport context — auth headers, forwarded-for, peer address — and
//! passes it as the first parameter of each call; the canonical signed
//! message binds each operation's logical method and path.

pub mod agent_card;
pub mod api;
pub mod server;
pub mod types;

pub use api::AgoraApiServer;
pub use server::{RpcServer, RpcServerState};
