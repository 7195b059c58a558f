//! Error types for the region layer.
//!
//! None of these ever end a session. The dispatcher logs them and moves on
//! to the next packet; they exist so each sub-step can say precisely why
//! it did nothing.

use simgrid_protocol::LocalId;

use crate::TeleportState;

/// Errors that can occur while applying a packet to the region.
#[derive(Debug, thiserror::Error)]
pub enum RegionError {
    /// No entity has this local id.
    #[error("entity {0} not found")]
    EntityNotFound(LocalId),

    /// The operation only applies to prims, and this entity is an avatar.
    #[error("entity {0} is not a prim")]
    NotAPrim(LocalId),

    /// Linking `child` under `parent` would make an object its own
    /// ancestor.
    #[error("linking {child} under {parent} would form a cycle")]
    LinkCycle { parent: LocalId, child: LocalId },

    /// An xfer packet named a transfer this session never started, or one
    /// that already finished.
    #[error("unknown xfer {0}")]
    UnknownXfer(u64),

    /// An xfer packet arrived with the wrong index.
    #[error("xfer packet out of order: expected {expected}, got {got}")]
    OutOfOrder { expected: u32, got: u32 },

    /// An asset's bytes could not be interpreted as its declared type.
    #[error("malformed asset: {0}")]
    MalformedAsset(String),

    /// A teleport tried to move between states that are not adjacent.
    #[error("invalid teleport transition {from} -> {to}")]
    InvalidTransition { from: TeleportState, to: TeleportState },

    /// The agent is already present in this region.
    #[error(transparent)]
    Session(#[from] simgrid_session::SessionError),
}
