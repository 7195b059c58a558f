//! Error types for the session layer.

use simgrid_protocol::AgentId;

/// Errors that can occur while establishing or tracking agent sessions.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The circuit code is not one the login service announced, or it was
    /// already consumed by an earlier connection.
    #[error("unknown circuit code {0}")]
    UnknownCircuit(u32),

    /// The circuit exists but the agent/session ids presented with it do
    /// not match what the login service registered.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The agent already has a live session in this region.
    /// An agent can only be present once per region.
    #[error("{0} already has an active session")]
    AlreadyConnected(AgentId),
}
