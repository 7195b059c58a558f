//! Region state and per-session packet dispatch for simgrid.
//!
//! A [`Region`] owns the shared world state every connection worker
//! touches: the session registry, the entity directory, and handles to
//! the asset and inventory collaborators. Each connected viewer gets a
//! [`ClientView`], which turns its packets into entity mutations,
//! sub-protocol steps, broadcasts, and notification-bus events.
//!
//! # Key types
//!
//! - [`Region`]: shared state; `admit` / `depart` bring agents in and out
//! - [`ClientView`]: the per-session dispatcher
//! - [`EntityDirectory`]: avatars and prims by local id
//! - [`AssetCache`] / [`InventoryCache`]: collaborator traits, with
//!   in-memory implementations
//! - [`AssetUploader`]: the multi-packet upload sub-protocol
//! - [`TeleportState`]: teleport lifecycle
//! - [`NotificationBus`] / [`Scene`]: how the scene hears about events

mod assets;
pub mod broadcast;
mod client;
mod config;
mod entity;
mod error;
mod inventory;
mod notify;
mod region;
pub mod teleport;
pub mod upload;

pub use assets::{Asset, AssetCache, DEFAULT_SCRIPT, EMPTY_NOTECARD, Landmark, MemoryAssetCache};
pub use client::{ClientView, Dispatch, DispatchStats};
pub use config::RegionConfig;
pub use entity::{Avatar, Entity, EntityDirectory, EntityKind, Prim};
pub use error::RegionError;
pub use inventory::{InventoryCache, MemoryInventory};
pub use notify::{
    AgentEvent, AgentUpdateEvent, AnimationEvent, AppearanceEvent, ChatEvent, HandshakeReplyEvent,
    MapBlockEvent, NotificationBus, RezEvent, Scene, ScriptAttachedEvent, Slot, TerrainEvent,
};
pub use region::Region;
pub use teleport::{TeleportOutcome, TeleportState};
pub use upload::AssetUploader;
