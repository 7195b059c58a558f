//! Decoded packet records.
//!
//! [`Packet`] is everything a viewer can send to a region that the engine
//! looks at; [`OutPacket`] is everything the engine sends back. Each
//! variant carries only the fields the engine consumes. The byte layout
//! on the real wire belongs to an external codec; these records are what
//! that codec hands us.
//!
//! Both enums are internally tagged (`{"type": "ChatFromViewer", ...}`)
//! so the JSON development codec stays readable.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{
    AgentId, AssetId, LocalId, ObjectFlags, Quaternion, RegionHandle, SessionId,
    TeleportFlags, TransactionId, Vector3,
};

// ---------------------------------------------------------------------------
// Shared payload types
// ---------------------------------------------------------------------------

/// Asset type numbering used by viewers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetType {
    Texture = 0,
    Sound = 1,
    CallingCard = 2,
    Landmark = 3,
    Clothing = 5,
    Object = 6,
    Notecard = 7,
    LslText = 10,
    LslBytecode = 11,
    Bodypart = 13,
    Animation = 20,
    Gesture = 21,
}

impl AssetType {
    /// The numeric code viewers use for this type.
    pub fn code(self) -> i8 {
        self as i8
    }
}

/// Path/profile parameters describing a prim's geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimShape {
    pub pcode: u8,
    pub path_curve: u8,
    pub profile_curve: u8,
    pub path_begin: u16,
    pub path_end: u16,
    pub path_scale_x: u8,
    pub path_scale_y: u8,
    pub path_shear_x: u8,
    pub path_shear_y: u8,
    pub path_twist: i8,
    pub path_twist_begin: i8,
    pub path_radius_offset: i8,
    pub path_taper_x: i8,
    pub path_taper_y: i8,
    pub path_revolutions: u8,
    pub path_skew: i8,
    pub profile_begin: u16,
    pub profile_end: u16,
    pub profile_hollow: u16,
}

impl Default for PrimShape {
    /// A plain 0.5 m box.
    fn default() -> Self {
        Self {
            pcode: 9,
            path_curve: 16,
            profile_curve: 1,
            path_begin: 0,
            path_end: 0,
            path_scale_x: 100,
            path_scale_y: 100,
            path_shear_x: 0,
            path_shear_y: 0,
            path_twist: 0,
            path_twist_begin: 0,
            path_radius_offset: 0,
            path_taper_x: 0,
            path_taper_y: 0,
            path_revolutions: 0,
            path_skew: 0,
            profile_begin: 0,
            profile_end: 0,
            profile_hollow: 0,
        }
    }
}

/// One inventory item as the viewer sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub item_id: Uuid,
    pub folder_id: Uuid,
    pub owner_id: AgentId,
    pub creator_id: AgentId,
    pub asset_id: AssetId,
    pub asset_type: AssetType,
    pub inv_type: i8,
    pub wearable_type: u8,
    pub next_owner_mask: u32,
    pub name: String,
    pub description: String,
}

/// One inventory folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryFolder {
    pub folder_id: Uuid,
    pub parent_id: Uuid,
    pub owner_id: AgentId,
    pub folder_type: i8,
    pub name: String,
}

/// Viewer-editable item fields carried by `UpdateInventoryItem`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemUpdate {
    pub item_id: Uuid,
    pub folder_id: Uuid,
    pub transaction_id: TransactionId,
    pub name: String,
    pub description: String,
    pub next_owner_mask: u32,
}

/// Camera and control state sent many times a second.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentUpdateData {
    pub body_rotation: Quaternion,
    pub head_rotation: Quaternion,
    pub camera_center: Vector3,
    pub camera_at_axis: Vector3,
    pub far: f32,
    pub control_flags: u32,
    pub state: u8,
    pub flags: u8,
}

/// One entry of an `AgentAnimation` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationEntry {
    pub anim_id: Uuid,
    pub start_anim: bool,
}

/// One entry of an `AgentIsNowWearing` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WearableEntry {
    pub item_id: Uuid,
    pub wearable_type: u8,
}

/// Parcel bounds of a `ModifyLand` request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParcelBounds {
    pub west: f32,
    pub south: f32,
    pub east: f32,
    pub north: f32,
}

/// Payload of `ObjectAdd`: everything needed to create a new prim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectAddData {
    pub shape: PrimShape,
    pub material: u8,
    pub add_flags: u32,
    pub ray_end: Vector3,
    pub scale: Vector3,
    pub rotation: Quaternion,
}

/// New shape for one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeUpdate {
    pub local_id: LocalId,
    pub shape: PrimShape,
}

/// New texture entry for one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUpdate {
    pub local_id: LocalId,
    pub texture_entry: Vec<u8>,
}

/// One transient visual effect (pointing beam, look-at target, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewerEffectBlock {
    pub id: Uuid,
    pub agent_id: AgentId,
    pub effect_type: u8,
    pub duration: f32,
    pub color: [u8; 4],
    pub type_data: Vec<u8>,
}

/// One texture requested by `RequestImage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRequest {
    pub image: AssetId,
    pub discard_level: i8,
    pub download_priority: f32,
    pub packet: u32,
}

/// An asset transfer requested by `TransferRequest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub transfer_id: Uuid,
    pub channel_type: i32,
    pub source_type: i32,
    pub priority: f32,
    pub params: Vec<u8>,
}

/// Full state of one object, as sent to viewers in `ObjectUpdate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectUpdateData {
    pub local_id: LocalId,
    pub full_id: Uuid,
    pub parent_id: Option<LocalId>,
    pub pcode: u8,
    pub position: Vector3,
    pub scale: Vector3,
    pub rotation: Quaternion,
    pub texture_entry: Vec<u8>,
    pub flags: ObjectFlags,
    /// `FirstName`/`LastName` name-values for avatars, empty for prims.
    pub name_value: String,
}

// ---------------------------------------------------------------------------
// Packet: viewer to region
// ---------------------------------------------------------------------------

/// Every inbound packet kind the engine understands.
///
/// Kinds the engine has no handler for decode as [`Packet::Unknown`];
/// they are acknowledged, counted, and otherwise ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Packet {
    // -- Circuit / presence --
    UseCircuitCode {
        code: u32,
        agent_id: AgentId,
        session_id: SessionId,
    },
    RegionHandshakeReply {
        flags: u32,
    },
    CompleteAgentMovement {
        circuit_code: u32,
    },
    AgentUpdate(AgentUpdateData),
    LogoutRequest,

    // -- Chat / appearance / animation --
    ChatFromViewer {
        message: Vec<u8>,
        chat_type: u8,
        channel: i32,
    },
    AgentWearablesRequest,
    AgentSetAppearance {
        texture_entry: Vec<u8>,
        visual_params: Vec<u8>,
    },
    AgentIsNowWearing {
        wearables: Vec<WearableEntry>,
    },
    AgentAnimation {
        animations: Vec<AnimationEntry>,
    },

    // -- Land --
    ModifyLand {
        action: u8,
        brush_size: u8,
        parcels: Vec<ParcelBounds>,
    },

    // -- Objects --
    RezObject {
        item_id: Uuid,
        ray_end: Vector3,
    },
    ObjectAdd(ObjectAddData),
    ObjectLink {
        parent: LocalId,
        children: Vec<LocalId>,
    },
    ObjectScale {
        local_id: LocalId,
        scale: Vector3,
    },
    ObjectShape {
        objects: Vec<ShapeUpdate>,
    },
    ObjectSelect {
        local_ids: Vec<LocalId>,
    },
    ObjectImage {
        objects: Vec<ImageUpdate>,
    },
    ObjectFlagUpdate {
        local_id: LocalId,
        use_physics: bool,
        is_temporary: bool,
        is_phantom: bool,
        casts_shadows: bool,
    },
    ViewerEffect {
        agent_id: AgentId,
        session_id: SessionId,
        effects: Vec<ViewerEffectBlock>,
    },

    // -- Assets --
    RequestImage {
        requests: Vec<ImageRequest>,
    },
    TransferRequest(TransferRequest),
    AssetUploadRequest {
        transaction_id: TransactionId,
        asset_type: AssetType,
        tempfile: bool,
        store_local: bool,
        asset_data: Vec<u8>,
    },
    RequestXfer {
        xfer_id: u64,
    },
    SendXferPacket {
        xfer_id: u64,
        packet: u32,
        data: Vec<u8>,
    },

    // -- Inventory --
    CreateInventoryFolder {
        folder_id: Uuid,
        parent_id: Uuid,
        folder_type: i8,
        name: String,
    },
    CreateInventoryItem {
        callback_id: u32,
        folder_id: Uuid,
        transaction_id: TransactionId,
        asset_type: AssetType,
        inv_type: i8,
        wearable_type: u8,
        next_owner_mask: u32,
        name: String,
        description: String,
    },
    FetchInventory {
        item_ids: Vec<Uuid>,
    },
    FetchInventoryDescendents {
        folder_id: Uuid,
        fetch_folders: bool,
        fetch_items: bool,
    },
    UpdateInventoryItem {
        items: Vec<ItemUpdate>,
    },
    RequestTaskInventory {
        local_id: LocalId,
    },
    UpdateTaskInventory {
        local_id: LocalId,
        key: u8,
        item_id: Uuid,
    },

    // -- Map --
    MapLayerRequest,
    MapBlockRequest {
        min_x: u16,
        min_y: u16,
        max_x: u16,
        max_y: u16,
    },

    // -- Teleport --
    TeleportLandmarkRequest {
        agent_id: AgentId,
        session_id: SessionId,
        landmark_id: AssetId,
    },
    TeleportLocationRequest {
        agent_id: AgentId,
        session_id: SessionId,
        region_handle: RegionHandle,
        position: Vector3,
        look_at: Vector3,
    },

    /// A packet kind this engine does not model.
    #[serde(other)]
    Unknown,
}

impl Packet {
    /// Short name of the packet kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UseCircuitCode { .. } => "UseCircuitCode",
            Self::RegionHandshakeReply { .. } => "RegionHandshakeReply",
            Self::CompleteAgentMovement { .. } => "CompleteAgentMovement",
            Self::AgentUpdate(_) => "AgentUpdate",
            Self::LogoutRequest => "LogoutRequest",
            Self::ChatFromViewer { .. } => "ChatFromViewer",
            Self::AgentWearablesRequest => "AgentWearablesRequest",
            Self::AgentSetAppearance { .. } => "AgentSetAppearance",
            Self::AgentIsNowWearing { .. } => "AgentIsNowWearing",
            Self::AgentAnimation { .. } => "AgentAnimation",
            Self::ModifyLand { .. } => "ModifyLand",
            Self::RezObject { .. } => "RezObject",
            Self::ObjectAdd(_) => "ObjectAdd",
            Self::ObjectLink { .. } => "ObjectLink",
            Self::ObjectScale { .. } => "ObjectScale",
            Self::ObjectShape { .. } => "ObjectShape",
            Self::ObjectSelect { .. } => "ObjectSelect",
            Self::ObjectImage { .. } => "ObjectImage",
            Self::ObjectFlagUpdate { .. } => "ObjectFlagUpdate",
            Self::ViewerEffect { .. } => "ViewerEffect",
            Self::RequestImage { .. } => "RequestImage",
            Self::TransferRequest(_) => "TransferRequest",
            Self::AssetUploadRequest { .. } => "AssetUploadRequest",
            Self::RequestXfer { .. } => "RequestXfer",
            Self::SendXferPacket { .. } => "SendXferPacket",
            Self::CreateInventoryFolder { .. } => "CreateInventoryFolder",
            Self::CreateInventoryItem { .. } => "CreateInventoryItem",
            Self::FetchInventory { .. } => "FetchInventory",
            Self::FetchInventoryDescendents { .. } => "FetchInventoryDescendents",
            Self::UpdateInventoryItem { .. } => "UpdateInventoryItem",
            Self::RequestTaskInventory { .. } => "RequestTaskInventory",
            Self::UpdateTaskInventory { .. } => "UpdateTaskInventory",
            Self::MapLayerRequest => "MapLayerRequest",
            Self::MapBlockRequest { .. } => "MapBlockRequest",
            Self::TeleportLandmarkRequest { .. } => "TeleportLandmarkRequest",
            Self::TeleportLocationRequest { .. } => "TeleportLocationRequest",
            Self::Unknown => "Unknown",
        }
    }
}

// ---------------------------------------------------------------------------
// OutPacket: region to viewer
// ---------------------------------------------------------------------------

/// Every packet kind the engine produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutPacket {
    PacketAck {
        ids: Vec<u32>,
    },
    RegionHandshake {
        region_name: String,
        region_id: Uuid,
        region_handle: RegionHandle,
    },
    LogoutReply {
        agent_id: AgentId,
        session_id: SessionId,
    },

    // -- Objects / avatars --
    ObjectUpdate(ObjectUpdateData),
    KillObject {
        local_ids: Vec<LocalId>,
    },
    ObjectProperties {
        object_id: Uuid,
        owner_id: AgentId,
        name: String,
        description: String,
    },
    AvatarAppearance {
        sender: AgentId,
        texture_entry: Vec<u8>,
        visual_params: Vec<u8>,
    },
    ViewerEffect {
        agent_id: AgentId,
        session_id: SessionId,
        effects: Vec<ViewerEffectBlock>,
    },
    ReplyTaskInventory {
        task_id: Uuid,
        serial: i16,
        filename: Vec<u8>,
    },

    // -- Asset upload --
    RequestXfer {
        xfer_id: u64,
        vfile_id: AssetId,
        vfile_type: AssetType,
    },
    ConfirmXferPacket {
        xfer_id: u64,
        packet: u32,
    },
    AssetUploadComplete {
        asset_id: AssetId,
        asset_type: AssetType,
        success: bool,
    },

    // -- Inventory --
    UpdateCreateInventoryItem {
        callback_id: u32,
        item: InventoryItem,
    },
    FetchInventoryReply {
        agent_id: AgentId,
        items: Vec<InventoryItem>,
    },
    InventoryDescendents {
        agent_id: AgentId,
        folder_id: Uuid,
        folders: Vec<InventoryFolder>,
        items: Vec<InventoryItem>,
    },

    // -- Teleport --
    TeleportStart {
        flags: TeleportFlags,
    },
    TeleportProgress {
        agent_id: AgentId,
        flags: TeleportFlags,
        message: Vec<u8>,
    },
    TeleportLocal {
        agent_id: AgentId,
        location_id: u32,
        position: Vector3,
        look_at: Vector3,
        flags: TeleportFlags,
    },
    TeleportCancel {
        agent_id: AgentId,
        session_id: SessionId,
    },
}

impl OutPacket {
    /// Short name of the packet kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PacketAck { .. } => "PacketAck",
            Self::RegionHandshake { .. } => "RegionHandshake",
            Self::LogoutReply { .. } => "LogoutReply",
            Self::ObjectUpdate(_) => "ObjectUpdate",
            Self::KillObject { .. } => "KillObject",
            Self::ObjectProperties { .. } => "ObjectProperties",
            Self::AvatarAppearance { .. } => "AvatarAppearance",
            Self::ViewerEffect { .. } => "ViewerEffect",
            Self::ReplyTaskInventory { .. } => "ReplyTaskInventory",
            Self::RequestXfer { .. } => "RequestXfer",
            Self::ConfirmXferPacket { .. } => "ConfirmXferPacket",
            Self::AssetUploadComplete { .. } => "AssetUploadComplete",
            Self::UpdateCreateInventoryItem { .. } => "UpdateCreateInventoryItem",
            Self::FetchInventoryReply { .. } => "FetchInventoryReply",
            Self::InventoryDescendents { .. } => "InventoryDescendents",
            Self::TeleportStart { .. } => "TeleportStart",
            Self::TeleportProgress { .. } => "TeleportProgress",
            Self::TeleportLocal { .. } => "TeleportLocal",
            Self::TeleportCancel { .. } => "TeleportCancel",
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// One transport frame around a packet.
///
/// `seq` is per direction and per circuit. A reliable envelope must be
/// acknowledged; `resent` is set by the sender on retransmission, but the
/// receiver still decides duplication by `seq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<P> {
    pub seq: u32,
    #[serde(default)]
    pub reliable: bool,
    #[serde(default)]
    pub resent: bool,
    pub packet: P,
}

impl<P> Envelope<P> {
    /// Wraps a packet in a reliable, first-transmission envelope.
    pub fn reliable(seq: u32, packet: P) -> Self {
        Self {
            seq,
            reliable: true,
            resent: false,
            packet,
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
