//! Named-command RPC over TCP.
//!
//! cmdwire frames typed command invocations over a TCP stream, correlates
//! requests with their responses, lets a server broadcast to every client
//! and switches sessions to AES-256 after an X25519 key exchange.
//!
//! # Crate Structure
//!
//! - [`frame`]: wire packets, frames, values and the session cipher
//! - [`peer`]: registry, dispatch, connections, server, client, handshake
//! - [`chat`]: the encrypted chat room served by the `cmdwire` binary

/// Re-export frame types.
pub mod frame {
    pub use cmdwire_frame::*;
}

/// Re-export peer types.
pub mod peer {
    pub use cmdwire_peer::*;
}

pub mod chat;
