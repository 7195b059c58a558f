//! Identity, geometry, and flag types shared by every packet.
//!
//! Everything in here is a plain value: cheap to copy, serializable, and
//! free of behaviour beyond formatting and a few pure helpers. Packets in
//! [`crate::packets`] are built out of these.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// World-unique identifier of an agent (one logged-in user).
///
/// A newtype over [`Uuid`] so an agent id can never be handed to a
/// function expecting a session id, even though both are UUIDs on the
/// wire. `#[serde(transparent)]` keeps the JSON form a bare UUID string.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AgentId(pub Uuid);

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent-{}", self.0)
    }
}

/// A session identifier.
///
/// Used both for the public session id the viewer echoes in every packet
/// and for the secure session id that never leaves the server after login.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Identifier of a stored asset (texture, landmark, notecard, ...).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AssetId(pub Uuid);

impl AssetId {
    /// Returns `true` for the all-zero id viewers send for "no asset".
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "asset-{}", self.0)
    }
}

/// Client-chosen correlation id for an asset upload.
///
/// The viewer picks this value, so two sessions can (and do) reuse the
/// same transaction id. It only becomes a unique asset key once it is
/// paired with the uploader's secure session id via [`TransactionId::combine`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TransactionId(pub Uuid);

impl TransactionId {
    /// The zero transaction id, meaning "no upload involved".
    pub const NIL: Self = Self(Uuid::nil());

    /// Returns `true` if no upload is referenced.
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// Derives the asset id an upload is stored under.
    ///
    /// Byte-wise XOR of the two UUIDs: pure, symmetric in its inputs, and
    /// a bijection in each argument, so one transaction id paired with two
    /// different secure session ids always yields two different asset ids.
    pub fn combine(self, secure_session_id: SessionId) -> AssetId {
        let a = self.0.as_bytes();
        let b = secure_session_id.0.as_bytes();
        let mut out = [0u8; 16];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = a[i] ^ b[i];
        }
        AssetId(Uuid::from_bytes(out))
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Region-scoped numeric id of an entity (avatar or prim).
///
/// Viewers address objects by this 32-bit id inside one region; the
/// world-unique [`Uuid`] is only used across regions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LocalId(pub u32);

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L-{}", self.0)
    }
}

/// 64-bit grid coordinate key of a region: `(x_meters << 32) | y_meters`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RegionHandle(pub u64);

impl RegionHandle {
    /// Builds a handle from grid cell coordinates (256 m regions).
    pub fn from_grid(x: u32, y: u32) -> Self {
        Self(((x as u64 * 256) << 32) | (y as u64 * 256))
    }

    /// Grid cell coordinates encoded in this handle.
    pub fn grid_coords(&self) -> (u32, u32) {
        (((self.0 >> 32) / 256) as u32, ((self.0 & 0xFFFF_FFFF) / 256) as u32)
    }
}

impl fmt::Display for RegionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (x, y) = self.grid_coords();
        write!(f, "({x}, {y})")
    }
}

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// A position, scale, or direction in region coordinates (meters).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for Vector3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}, {}, {}>", self.x, self.y, self.z)
    }
}

/// A rotation. Defaults to the identity rotation, not all-zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quaternion {
    pub const IDENTITY: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

// ---------------------------------------------------------------------------
// Flag sets
// ---------------------------------------------------------------------------

bitflags::bitflags! {
    /// Per-object flags a viewer can toggle with `ObjectFlagUpdate`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ObjectFlags: u32 {
        const USE_PHYSICS = 1 << 0;
        const CREATE_SELECTED = 1 << 1;
        const PHANTOM = 1 << 10;
        const CAST_SHADOWS = 1 << 21;
        const TEMPORARY = 1 << 30;
    }
}

impl Default for ObjectFlags {
    fn default() -> Self {
        Self::CAST_SHADOWS
    }
}

bitflags::bitflags! {
    /// Why a teleport is happening. Echoed in every teleport notice.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct TeleportFlags: u32 {
        const VIA_LURE = 1 << 2;
        const VIA_LANDMARK = 1 << 3;
        const VIA_LOCATION = 1 << 4;
        const VIA_HOME = 1 << 5;
    }
}

// =========================================================================
// Tests
// =========================================================================
