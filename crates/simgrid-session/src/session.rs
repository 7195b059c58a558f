//! Session types: the server's record of one connected agent.
//!
//! A session tracks:
//! - WHO the agent is (agent id, session id, secure session id)
//! - WHERE it is present (child agent of a neighbour, or root in this region)
//! - WHICH avatar entity stands for it in the entity directory

use simgrid_protocol::{AgentId, LocalId, SessionId};

use crate::AgentCircuit;

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Per-session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How many recent inbound sequence numbers are remembered for
    /// duplicate detection. A resent reliable packet older than this
    /// window is dispatched again.
    pub recent_sequence_window: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            recent_sequence_window: 256,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionIdentity
// ---------------------------------------------------------------------------

/// The identity triple fixed at login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionIdentity {
    pub agent_id: AgentId,
    pub session_id: SessionId,
    pub secure_session_id: SessionId,
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// Whether the agent is actually standing in this region.
///
/// ```text
///   Child ──(CompleteAgentMovement)──→ Root
///     ↑                                  │
///     └──────(moved to a neighbour)──────┘
/// ```
///
/// A child agent only watches the region from next door: it receives
/// updates but cannot animate or act here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Child,
    Root,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One agent's session in this region. Owned by the connection worker,
/// never shared.
#[derive(Debug, Clone)]
pub struct Session {
    pub identity: SessionIdentity,
    pub circuit_code: u32,
    pub first_name: String,
    pub last_name: String,
    pub presence: Presence,
    /// Local id of this agent's avatar entity.
    pub avatar: LocalId,
}

impl Session {
    /// Builds a session from an authenticated circuit.
    pub fn new(circuit: &AgentCircuit, circuit_code: u32, avatar: LocalId) -> Self {
        Self {
            identity: SessionIdentity {
                agent_id: circuit.agent_id,
                session_id: circuit.session_id,
                secure_session_id: circuit.secure_session_id,
            },
            circuit_code,
            first_name: circuit.first_name.clone(),
            last_name: circuit.last_name.clone(),
            presence: if circuit.child {
                Presence::Child
            } else {
                Presence::Root
            },
            avatar,
        }
    }

    pub fn agent_id(&self) -> AgentId {
        self.identity.agent_id
    }

    /// "First Last", as shown above the avatar and in chat.
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn is_child(&self) -> bool {
        self.presence == Presence::Child
    }

    /// Promotes a child agent to root. Returns `true` if the presence
    /// actually changed.
    pub fn upgrade_to_root(&mut self) -> bool {
        if self.is_child() {
            self.presence = Presence::Root;
            tracing::info!(agent_id = %self.identity.agent_id, "child agent upgraded to root");
            true
        } else {
            false
        }
    }

    /// Demotes the agent to a child presence (it moved to a neighbour).
    pub fn downgrade_to_child(&mut self) {
        self.presence = Presence::Child;
    }
}
