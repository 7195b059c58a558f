//! The notification bus: how a session tells the scene what happened.
//!
//! The dispatcher handles protocol bookkeeping itself, but world-level
//! reactions (make a chat bubble, rez an object, start an animation) belong
//! to the scene. Each kind of event has one [`Slot`] on the
//! [`NotificationBus`]; the scene fills the slots it cares about through
//! [`Scene::bind`] when a session's dispatcher is created.
//!
//! A slot holds at most one subscriber. Firing an empty slot does nothing.

use std::fmt;
use std::sync::Arc;

use simgrid_protocol::{AgentId, AgentUpdateData, LocalId, Vector3};
use simgrid_session::SessionIdentity;
use uuid::Uuid;

use crate::Asset;

// ---------------------------------------------------------------------------
// Slot
// ---------------------------------------------------------------------------

type Handler<E> = Box<dyn Fn(&E) + Send + Sync>;

/// A single optional subscriber for events of type `E`.
pub struct Slot<E> {
    handler: Option<Handler<E>>,
}

impl<E> Default for Slot<E> {
    fn default() -> Self {
        Self { handler: None }
    }
}

impl<E> fmt::Debug for Slot<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("bound", &self.is_bound())
            .finish()
    }
}

impl<E> Slot<E> {
    /// Installs `handler`, replacing any previous subscriber.
    pub fn set(&mut self, handler: impl Fn(&E) + Send + Sync + 'static) {
        self.handler = Some(Box::new(handler));
    }

    pub fn clear(&mut self) {
        self.handler = None;
    }

    pub fn is_bound(&self) -> bool {
        self.handler.is_some()
    }

    /// Delivers `event` to the subscriber. Returns `false` if the slot is
    /// empty.
    pub fn fire(&self, event: &E) -> bool {
        match &self.handler {
            Some(handler) => {
                handler(event);
                true
            }
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Something was said in local chat.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatEvent {
    pub sender: AgentId,
    pub from_name: String,
    pub position: Vector3,
    pub message: Vec<u8>,
    pub chat_type: u8,
    pub channel: i32,
}

/// An inventory object is being placed in the world.
#[derive(Debug, Clone, PartialEq)]
pub struct RezEvent {
    pub agent_id: AgentId,
    pub asset: Arc<Asset>,
    pub position: Vector3,
}

/// A terraform brush stroke.
#[derive(Debug, Clone, PartialEq)]
pub struct TerrainEvent {
    pub agent_id: AgentId,
    pub action: u8,
    pub brush_size: u8,
    pub north: f32,
    pub west: f32,
}

/// An event that only names the agent (and its avatar).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentEvent {
    pub agent_id: AgentId,
    pub avatar: LocalId,
}

/// The viewer answered the region handshake.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HandshakeReplyEvent {
    pub agent_id: AgentId,
    pub flags: u32,
}

/// An avatar changed how it looks.
#[derive(Debug, Clone, PartialEq)]
pub struct AppearanceEvent {
    pub agent_id: AgentId,
    pub avatar: LocalId,
    pub texture_entry: Vec<u8>,
    pub visual_params: Vec<u8>,
}

/// Camera and control state.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentUpdateEvent {
    pub agent_id: AgentId,
    pub update: AgentUpdateData,
}

/// An avatar started an animation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnimationEvent {
    pub agent_id: AgentId,
    pub anim_id: Uuid,
    pub sequence: i32,
}

/// A notecard's text was attached to a prim as a script.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptAttachedEvent {
    pub agent_id: AgentId,
    pub local_id: LocalId,
    pub source: String,
}

/// World map blocks were requested.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapBlockEvent {
    pub agent_id: AgentId,
    pub min_x: u16,
    pub min_y: u16,
    pub max_x: u16,
    pub max_y: u16,
}

// ---------------------------------------------------------------------------
// NotificationBus
// ---------------------------------------------------------------------------

/// Every slot a session exposes to the scene.
#[derive(Debug, Default)]
pub struct NotificationBus {
    pub chat: Slot<ChatEvent>,
    pub rez_object: Slot<RezEvent>,
    pub modify_terrain: Slot<TerrainEvent>,
    pub region_handshake_reply: Slot<HandshakeReplyEvent>,
    pub request_wearables: Slot<AgentEvent>,
    pub set_appearance: Slot<AppearanceEvent>,
    pub complete_movement: Slot<AgentEvent>,
    pub agent_update: Slot<AgentUpdateEvent>,
    pub start_animation: Slot<AnimationEvent>,
    pub script_attached: Slot<ScriptAttachedEvent>,
    pub map_layer_request: Slot<AgentEvent>,
    pub map_block_request: Slot<MapBlockEvent>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }
}

/// The world a region's sessions report to.
///
/// `bind` is called once per session, right after the handshake, with the
/// session's empty bus.
pub trait Scene: Send + Sync + 'static {
    fn bind(&self, session: &SessionIdentity, bus: &mut NotificationBus);
}
