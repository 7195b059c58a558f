//! The session registry: every agent currently connected to a region.
//!
//! Each connection worker registers a [`SessionHandle`] when its handshake
//! completes and removes it when the connection ends. Any worker can look
//! up another agent or take a snapshot of everyone for a broadcast.
//!
//! # Concurrency note
//!
//! The map lives behind a `parking_lot::RwLock` inside an `Arc`, so the
//! registry is cheap to clone into every worker. Locks are held only for
//! the map operation itself: [`SessionRegistry::snapshot`] clones the
//! handles out and releases the lock before anyone sends, so a broadcast
//! never iterates a map that another worker is mutating.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use simgrid_protocol::{AgentId, LocalId, OutPacket};
use tokio::sync::mpsc;

use crate::{SessionError, SessionIdentity};

/// Sending half of a session's outbound queue.
///
/// Unbounded on purpose: a broadcasting worker must never wait on a slow
/// recipient. The recipient's own worker drains the queue.
pub type OutboundSender = mpsc::UnboundedSender<OutPacket>;

/// Receiving half of a session's outbound queue.
pub type OutboundReceiver = mpsc::UnboundedReceiver<OutPacket>;

/// Creates a fresh outbound queue for one session.
pub fn outbound_channel() -> (OutboundSender, OutboundReceiver) {
    mpsc::unbounded_channel()
}

/// What other workers can see of a session: who it is and how to reach it.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub identity: SessionIdentity,
    /// The agent's avatar entity in the region's entity directory.
    pub avatar: LocalId,
    outbound: OutboundSender,
}

impl SessionHandle {
    pub fn new(identity: SessionIdentity, avatar: LocalId, outbound: OutboundSender) -> Self {
        Self {
            identity,
            avatar,
            outbound,
        }
    }

    pub fn agent_id(&self) -> AgentId {
        self.identity.agent_id
    }

    /// Enqueues a packet for this session without waiting.
    ///
    /// Returns `false` if the session's worker is already gone; the packet
    /// is dropped in that case.
    pub fn send(&self, packet: OutPacket) -> bool {
        self.outbound.send(packet).is_ok()
    }
}

/// All sessions connected to one region, keyed by agent id.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<AgentId, SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session.
    ///
    /// # Errors
    /// Returns [`SessionError::AlreadyConnected`] if the agent is already
    /// registered. The existing session is left untouched.
    pub fn register(&self, handle: SessionHandle) -> Result<(), SessionError> {
        let agent_id = handle.agent_id();
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&agent_id) {
            return Err(SessionError::AlreadyConnected(agent_id));
        }
        sessions.insert(agent_id, handle);
        tracing::info!(%agent_id, sessions = sessions.len(), "session registered");
        Ok(())
    }

    /// Removes a session, returning its handle if it was registered.
    pub fn remove(&self, agent_id: &AgentId) -> Option<SessionHandle> {
        let removed = self.sessions.write().remove(agent_id);
        if removed.is_some() {
            tracing::info!(%agent_id, "session removed");
        }
        removed
    }

    /// Looks up one session.
    pub fn get(&self, agent_id: &AgentId) -> Option<SessionHandle> {
        self.sessions.read().get(agent_id).cloned()
    }

    /// Point-in-time copy of every registered session.
    ///
    /// The lock is released before this returns; sessions that connect or
    /// disconnect afterwards are not reflected in the returned list.
    pub fn snapshot(&self) -> Vec<SessionHandle> {
        self.sessions.read().values().cloned().collect()
    }

    pub fn contains(&self, agent_id: &AgentId) -> bool {
        self.sessions.read().contains_key(agent_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

// =========================================================================
// Tests
// =========================================================================
