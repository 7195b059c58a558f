//! Fan-out of packets to other sessions.
//!
//! Every function here takes a point-in-time snapshot of the registry and
//! enqueues without waiting. A session that disconnects mid-broadcast just
//! misses the packet.

use simgrid_protocol::{AgentId, OutPacket, ViewerEffectBlock};
use simgrid_session::{SessionHandle, SessionRegistry};

/// Sends a copy built per recipient to every session except `exclude`.
/// Returns how many sessions the packet was queued for.
pub fn broadcast_with<F>(registry: &SessionRegistry, exclude: Option<AgentId>, mut build: F) -> usize
where
    F: FnMut(&SessionHandle) -> OutPacket,
{
    let mut delivered = 0;
    for handle in registry.snapshot() {
        if Some(handle.agent_id()) == exclude {
            continue;
        }
        if handle.send(build(&handle)) {
            delivered += 1;
        }
    }
    delivered
}

/// Sends `packet` to every session except `exclude`.
pub fn broadcast_except(registry: &SessionRegistry, exclude: AgentId, packet: &OutPacket) -> usize {
    broadcast_with(registry, Some(exclude), |_| packet.clone())
}

/// Sends `packet` to every session, including the one that caused it.
pub fn broadcast_all(registry: &SessionRegistry, packet: &OutPacket) -> usize {
    broadcast_with(registry, None, |_| packet.clone())
}

/// Relays viewer effects from `sender` to everyone else.
///
/// Each copy carries the recipient's own agent and session ids in its
/// header, the way viewers expect; the effect blocks are untouched.
pub fn relay_viewer_effect(
    registry: &SessionRegistry,
    sender: AgentId,
    effects: &[ViewerEffectBlock],
) -> usize {
    broadcast_with(registry, Some(sender), |recipient| OutPacket::ViewerEffect {
        agent_id: recipient.identity.agent_id,
        session_id: recipient.identity.session_id,
        effects: effects.to_vec(),
    })
}
