//! Circuit authentication: binding a new connection to an expected agent.
//!
//! The region does not log anyone in. A separate login service decides who
//! may enter, picks a circuit code, and tells the region "expect agent X
//! with session Y on circuit Z". The first packet on a new connection is
//! `UseCircuitCode`, and the region asks a [`CircuitAuthenticator`] whether
//! it matches.
//!
//! [`CircuitTable`] is the in-process implementation: the login hand-off
//! calls [`CircuitTable::add_circuit`], the handshake consumes the entry.

use std::collections::HashMap;
use std::future::Future;

use parking_lot::Mutex;
use simgrid_protocol::{AgentId, SessionId, Vector3};

use crate::SessionError;

/// Everything the login service knows about an agent entering the region.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentCircuit {
    pub agent_id: AgentId,
    pub session_id: SessionId,
    /// Never sent back to the viewer; used to key uploads.
    pub secure_session_id: SessionId,
    pub first_name: String,
    pub last_name: String,
    pub start_position: Vector3,
    /// `true` if the agent is only a neighbour-region presence (a "child"
    /// agent) until it completes movement into this region.
    pub child: bool,
}

/// Validates a `UseCircuitCode` packet and returns the expected agent.
///
/// The returned future must be `Send`: the server calls this from inside
/// a spawned connection task.
pub trait CircuitAuthenticator: Send + Sync + 'static {
    /// Checks a circuit code against the agent and session the viewer
    /// presented with it.
    ///
    /// # Errors
    /// - [`SessionError::UnknownCircuit`]: code never announced or already used
    /// - [`SessionError::AuthFailed`]: ids do not match the announcement
    fn authenticate(
        &self,
        code: u32,
        agent_id: AgentId,
        session_id: SessionId,
    ) -> impl Future<Output = Result<AgentCircuit, SessionError>> + Send;
}

/// In-memory table of announced circuits.
///
/// Each circuit can be used exactly once.
#[derive(Debug, Default)]
pub struct CircuitTable {
    circuits: Mutex<HashMap<u32, AgentCircuit>>,
}

impl CircuitTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Announces an expected agent. Replaces any earlier entry for the
    /// same code.
    pub fn add_circuit(&self, code: u32, circuit: AgentCircuit) {
        tracing::debug!(code, agent_id = %circuit.agent_id, "circuit announced");
        self.circuits.lock().insert(code, circuit);
    }

    /// Number of circuits announced but not yet used.
    pub fn pending(&self) -> usize {
        self.circuits.lock().len()
    }
}

impl CircuitAuthenticator for CircuitTable {
    async fn authenticate(
        &self,
        code: u32,
        agent_id: AgentId,
        session_id: SessionId,
    ) -> Result<AgentCircuit, SessionError> {
        let mut circuits = self.circuits.lock();
        let circuit = circuits
            .get(&code)
            .ok_or(SessionError::UnknownCircuit(code))?;

        if circuit.agent_id != agent_id || circuit.session_id != session_id {
            return Err(SessionError::AuthFailed(format!(
                "circuit {code} was not issued to {agent_id}"
            )));
        }

        circuits
            .remove(&code)
            .ok_or(SessionError::UnknownCircuit(code))
    }
}
