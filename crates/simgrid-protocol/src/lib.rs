//! Packet records for the simgrid region engine.
//!
//! This crate defines the vocabulary a viewer and a region exchange:
//!
//! - **Types** ([`AgentId`], [`LocalId`], [`Vector3`], flag sets, ...):
//!   the identifiers and values packets are made of.
//! - **Packets** ([`Packet`], [`OutPacket`], [`Envelope`]): inbound and
//!   outbound discriminated unions plus the transport frame around them.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how envelopes become
//!   frames.
//! - **Errors** ([`ProtocolError`]).
//!
//! ```text
//! Transport (frames) → Protocol (Envelope<Packet>) → Region (ClientView)
//! ```

mod codec;
mod error;
mod packets;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use packets::{
    AgentUpdateData, AnimationEntry, AssetType, Envelope, ImageRequest, ImageUpdate,
    InventoryFolder, InventoryItem, ItemUpdate, ObjectAddData, ObjectUpdateData,
    OutPacket, Packet, ParcelBounds, PrimShape, ShapeUpdate, TransferRequest,
    ViewerEffectBlock, WearableEntry,
};
pub use types::{
    AgentId, AssetId, LocalId, ObjectFlags, Quaternion, RegionHandle, SessionId,
    TeleportFlags, TransactionId, Vector3,
};
