//! Agent session management for simgrid.
//!
//! This crate handles who is connected to a region:
//!
//! 1. **Circuit authentication**: matching a new connection to an agent
//!    the login service announced ([`CircuitAuthenticator`], [`CircuitTable`])
//! 2. **Session state**: identity and child/root presence ([`Session`])
//! 3. **Registry**: every connected agent and its outbound queue
//!    ([`SessionRegistry`], [`SessionHandle`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Region layer (above)   ← dispatches packets, broadcasts via the registry
//!     ↕
//! Session layer (this crate)
//!     ↕
//! Protocol layer (below) ← AgentId, SessionId, OutPacket
//! ```

mod auth;
mod error;
mod registry;
mod session;

pub use auth::{AgentCircuit, CircuitAuthenticator, CircuitTable};
pub use error::SessionError;
pub use registry::{
    OutboundReceiver, OutboundSender, SessionHandle, SessionRegistry, outbound_channel,
};
pub use session::{Presence, Session, SessionConfig, SessionIdentity};
