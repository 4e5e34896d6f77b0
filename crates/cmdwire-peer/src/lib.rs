//! Named-command RPC sessions over TCP.
//!
//! Register typed handlers in a [`CommandRegistry`], start a [`Server`] or
//! [`Client`] with it, then `send` (fire-and-forget) or `call` (correlated,
//! with timeout) commands on the resulting [`Connection`]. Servers keep a
//! [`ClientSet`] for broadcasts, and either side can switch the session to
//! AES-256 after an X25519 key exchange.

pub mod client;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod fault;
pub mod handler;
pub mod handshake;
pub mod pending;
pub mod registry;
pub mod server;

pub use client::Client;
pub use config::{
    ConnectionConfig, OverflowPolicy, ServerConfig, DEFAULT_CALL_TIMEOUT, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_OUTBOUND_QUEUE,
};
pub use connection::{Connection, ConnectionHandle, ConnectionId};
pub use dispatch::{dispatch, invoke};
pub use error::{PeerError, Result};
pub use fault::{
    Fault, FaultKind, FAULT_ARGUMENT_SHAPE_MISMATCH, FAULT_COMMAND_NOT_FOUND, FAULT_HANDLER,
    FAULT_REJECTED,
};
pub use handler::{CallContext, Handler, HandlerFault, HandlerResult};
pub use handshake::{
    client_handshake, register_server_handshake, HandshakeConfig, HandshakePhase, KeyPair,
    COMPLETE_KEY_EXCHANGE, PUBLIC_KEY_LEN, START_KEY_EXCHANGE,
};
pub use pending::{CallOutcome, PendingCalls};
pub use registry::{CommandRegistry, HandlerDescriptor};
pub use server::{BroadcastReport, ClientSet, Server, ServerHandle};
