//! `ClientView`: one session's packet dispatcher.
//!
//! The connection worker hands every decoded envelope to
//! [`ClientView::process`], strictly in arrival order. The view
//! acknowledges it, drops redeliveries, and routes the packet to exactly
//! one of:
//!
//! - a notification-bus slot (chat, movement, animation, ...),
//! - a direct handler (objects, uploads, inventory, teleport), or
//! - the unhandled counter.
//!
//! Nothing a viewer sends can fail the session. Handler errors are logged
//! at `debug` and the next packet is processed normally.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use simgrid_protocol::{
    AgentId, AnimationEntry, AssetId, AssetType, Envelope, ImageRequest, ImageUpdate,
    InventoryFolder, InventoryItem, ItemUpdate, LocalId, ObjectAddData, OutPacket, Packet, ParcelBounds,
    RegionHandle, ShapeUpdate, TransactionId, Vector3,
};
use simgrid_session::{OutboundSender, Session, SessionConfig, SessionIdentity};
use uuid::Uuid;

use crate::broadcast::{broadcast_all, broadcast_except, relay_viewer_effect};
use crate::notify::{
    AgentEvent, AgentUpdateEvent, AnimationEvent, AppearanceEvent, ChatEvent, HandshakeReplyEvent,
    MapBlockEvent, RezEvent, ScriptAttachedEvent, TerrainEvent,
};
use crate::teleport::{TeleportOutcome, teleport_via_landmark, teleport_via_location};
use crate::upload::{AssetUploader, ChunkOutcome, PendingItem, QueueOutcome, UploadStart};
use crate::{Asset, EntityKind, NotificationBus, Prim, Region, RegionError};

/// Sequence number animations fired from `AgentAnimation` start at.
const ANIMATION_SEQUENCE: i32 = 1;

// ---------------------------------------------------------------------------
// Dispatch results
// ---------------------------------------------------------------------------

/// What [`ClientView::process`] did with one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Routed to a handler or a notification slot.
    Handled,
    /// No handler exists for this kind.
    Unhandled,
    /// Seen recently; acknowledged again but not dispatched.
    Duplicate,
}

/// Running counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub dispatched: u64,
    pub unhandled: u64,
    pub duplicates: u64,
}

// ---------------------------------------------------------------------------
// Recent sequence window
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct RecentSequences {
    capacity: usize,
    order: VecDeque<u32>,
    seen: HashSet<u32>,
}

impl RecentSequences {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Records `seq`. Returns `false` if it was already in the window.
    fn insert(&mut self, seq: u32) -> bool {
        if self.capacity == 0 {
            return true;
        }
        if !self.seen.insert(seq) {
            return false;
        }
        self.order.push_back(seq);
        if self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// ClientView
// ---------------------------------------------------------------------------

/// The region's side of one viewer connection.
pub struct ClientView {
    region: Arc<Region>,
    session: Session,
    outbound: OutboundSender,
    bus: NotificationBus,
    uploader: AssetUploader,
    recent: RecentSequences,
    pending_acks: Vec<u32>,
    stats: DispatchStats,
    logout_requested: bool,
}

impl std::fmt::Debug for ClientView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientView")
            .field("agent_id", &self.session.agent_id())
            .field("presence", &self.session.presence)
            .field("stats", &self.stats)
            .finish()
    }
}

impl ClientView {
    pub(crate) fn new(
        region: Arc<Region>,
        session: Session,
        outbound: OutboundSender,
        bus: NotificationBus,
        config: &SessionConfig,
    ) -> Self {
        let uploader = AssetUploader::new(session.identity.secure_session_id);
        Self {
            region,
            session,
            outbound,
            bus,
            uploader,
            recent: RecentSequences::new(config.recent_sequence_window),
            pending_acks: Vec::new(),
            stats: DispatchStats::default(),
            logout_requested: false,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn identity(&self) -> SessionIdentity {
        self.session.identity
    }

    pub fn agent_id(&self) -> AgentId {
        self.session.agent_id()
    }

    pub fn avatar(&self) -> LocalId {
        self.session.avatar
    }

    pub fn region(&self) -> &Arc<Region> {
        &self.region
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// The scene's hooks for this session. Subscribers can be added or
    /// replaced at any time.
    pub fn bus_mut(&mut self) -> &mut NotificationBus {
        &mut self.bus
    }

    /// `true` once the viewer has asked to log out.
    pub fn logout_requested(&self) -> bool {
        self.logout_requested
    }

    /// Number of uploads this session still holds.
    pub fn pending_uploads(&self) -> usize {
        self.uploader.len()
    }

    /// Sequence numbers to acknowledge, oldest first. Clears the list.
    pub fn take_pending_acks(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.pending_acks)
    }

    /// Drops the session's uploads. The worker calls this when the
    /// connection ends.
    pub fn close(&mut self) {
        let discarded = self.uploader.clear();
        if discarded > 0 {
            tracing::debug!(agent_id = %self.agent_id(), discarded, "pending uploads discarded");
        }
    }

    /// Handles one inbound envelope.
    pub fn process(&mut self, envelope: Envelope<Packet>) -> Dispatch {
        if envelope.reliable {
            self.pending_acks.push(envelope.seq);
        }
        if !self.recent.insert(envelope.seq) {
            self.stats.duplicates += 1;
            tracing::debug!(
                agent_id = %self.agent_id(),
                seq = envelope.seq,
                kind = envelope.packet.kind(),
                "duplicate packet, not dispatching"
            );
            return Dispatch::Duplicate;
        }

        let kind = envelope.packet.kind();
        match self.dispatch(envelope.packet) {
            Ok(Dispatch::Unhandled) => {
                self.stats.unhandled += 1;
                tracing::debug!(agent_id = %self.agent_id(), kind, "unhandled packet");
                Dispatch::Unhandled
            }
            Ok(result) => {
                self.stats.dispatched += 1;
                result
            }
            Err(e) => {
                self.stats.dispatched += 1;
                tracing::debug!(agent_id = %self.agent_id(), kind, error = %e, "packet had no effect");
                Dispatch::Handled
            }
        }
    }

    fn send(&self, packet: OutPacket) {
        let _ = self.outbound.send(packet);
    }

    fn dispatch(&mut self, packet: Packet) -> Result<Dispatch, RegionError> {
        match packet {
            // Handshake traffic; the server consumed the first one.
            Packet::UseCircuitCode { .. } => {}
            Packet::RegionHandshakeReply { flags } => {
                self.bus.region_handshake_reply.fire(&HandshakeReplyEvent {
                    agent_id: self.agent_id(),
                    flags,
                });
            }
            Packet::CompleteAgentMovement { .. } => self.on_complete_movement(),
            Packet::AgentUpdate(update) => {
                tracing::trace!(agent_id = %self.agent_id(), "agent update");
                self.bus.agent_update.fire(&AgentUpdateEvent {
                    agent_id: self.agent_id(),
                    update,
                });
            }
            Packet::LogoutRequest => self.on_logout(),

            Packet::ChatFromViewer {
                message,
                chat_type,
                channel,
            } => self.on_chat(message, chat_type, channel),
            Packet::AgentWearablesRequest => self.on_wearables_request(),
            Packet::AgentSetAppearance {
                texture_entry,
                visual_params,
            } => self.on_set_appearance(texture_entry, visual_params)?,
            Packet::AgentAnimation { animations } => self.on_animation(&animations),
            Packet::AgentIsNowWearing { .. }
            | Packet::ObjectScale { .. }
            | Packet::RequestXfer { .. } => {}

            Packet::ModifyLand {
                action,
                brush_size,
                parcels,
            } => self.on_modify_land(action, brush_size, &parcels),

            Packet::RezObject { item_id, ray_end } => self.on_rez_object(item_id, ray_end),
            Packet::ObjectAdd(data) => self.on_object_add(data),
            Packet::ObjectLink { parent, children } => {
                self.region.entities().link(parent, &children)?;
            }
            Packet::ObjectShape { objects } => self.on_object_shape(objects),
            Packet::ObjectImage { objects } => self.on_object_image(objects),
            Packet::ObjectFlagUpdate {
                local_id,
                use_physics,
                is_temporary,
                is_phantom,
                casts_shadows,
            } => {
                self.region.entities().update_flags(
                    local_id,
                    use_physics,
                    is_temporary,
                    is_phantom,
                    casts_shadows,
                )?;
            }
            Packet::ObjectSelect { local_ids } => self.on_object_select(&local_ids),
            Packet::ViewerEffect { effects, .. } => {
                relay_viewer_effect(self.region.sessions(), self.agent_id(), &effects);
            }

            Packet::RequestImage { requests } => self.on_request_image(requests),
            Packet::TransferRequest(request) => {
                self.region.assets().add_asset_request(self.agent_id(), request);
            }
            Packet::AssetUploadRequest {
                transaction_id,
                asset_type,
                tempfile,
                store_local,
                asset_data,
            } => self.on_upload_request(transaction_id, asset_type, tempfile, store_local, asset_data),
            Packet::SendXferPacket {
                xfer_id,
                packet,
                data,
            } => self.on_xfer_packet(xfer_id, packet, &data)?,

            Packet::CreateInventoryFolder {
                folder_id,
                parent_id,
                folder_type,
                name,
            } => {
                self.region.inventory().create_folder(InventoryFolder {
                    folder_id,
                    parent_id,
                    owner_id: self.agent_id(),
                    folder_type,
                    name,
                });
            }
            Packet::CreateInventoryItem {
                callback_id,
                folder_id,
                transaction_id,
                asset_type,
                inv_type,
                wearable_type,
                next_owner_mask,
                name,
                description,
            } => {
                let pending = PendingItem {
                    callback_id,
                    folder_id,
                    inv_type,
                    wearable_type,
                    next_owner_mask,
                    name,
                    description,
                };
                if transaction_id.is_nil() {
                    self.create_item_with_new_asset(asset_type, pending);
                } else {
                    self.create_item_from_upload(transaction_id, pending);
                }
            }
            Packet::FetchInventory { item_ids } => {
                let items = self.region.inventory().fetch_items(self.agent_id(), &item_ids);
                self.send(OutPacket::FetchInventoryReply {
                    agent_id: self.agent_id(),
                    items,
                });
            }
            Packet::FetchInventoryDescendents {
                folder_id,
                fetch_folders,
                fetch_items,
            } => {
                let (folders, items) = self.region.inventory().fetch_descendants(
                    self.agent_id(),
                    folder_id,
                    fetch_folders,
                    fetch_items,
                );
                self.send(OutPacket::InventoryDescendents {
                    agent_id: self.agent_id(),
                    folder_id,
                    folders,
                    items,
                });
            }
            Packet::UpdateInventoryItem { items } => self.on_update_inventory(&items),
            Packet::RequestTaskInventory { local_id } => {
                let entity = self
                    .region
                    .entities()
                    .get(local_id)
                    .ok_or(RegionError::EntityNotFound(local_id))?;
                self.send(OutPacket::ReplyTaskInventory {
                    task_id: entity.global_id,
                    serial: 0,
                    filename: Vec::new(),
                });
            }
            Packet::UpdateTaskInventory {
                local_id,
                key,
                item_id,
            } => self.on_update_task_inventory(local_id, key, item_id)?,

            Packet::MapLayerRequest => {
                self.bus.map_layer_request.fire(&self.agent_event());
            }
            Packet::MapBlockRequest {
                min_x,
                min_y,
                max_x,
                max_y,
            } => {
                self.bus.map_block_request.fire(&MapBlockEvent {
                    agent_id: self.agent_id(),
                    min_x,
                    min_y,
                    max_x,
                    max_y,
                });
            }

            Packet::TeleportLandmarkRequest { landmark_id, .. } => {
                self.on_teleport_landmark(landmark_id)?;
            }
            Packet::TeleportLocationRequest {
                region_handle,
                position,
                look_at,
                ..
            } => self.on_teleport_location(region_handle, position, look_at)?,

            Packet::Unknown => return Ok(Dispatch::Unhandled),
        }
        Ok(Dispatch::Handled)
    }

    fn agent_event(&self) -> AgentEvent {
        AgentEvent {
            agent_id: self.agent_id(),
            avatar: self.avatar(),
        }
    }

    // -- Presence ---------------------------------------------------------

    fn on_complete_movement(&mut self) {
        self.session.upgrade_to_root();
        self.bus.complete_movement.fire(&self.agent_event());
    }

    fn on_logout(&mut self) {
        tracing::info!(agent_id = %self.agent_id(), "logout requested");
        self.send(OutPacket::LogoutReply {
            agent_id: self.agent_id(),
            session_id: self.session.identity.session_id,
        });
        self.logout_requested = true;
    }

    // -- Chat / appearance / animation ------------------------------------

    fn on_chat(&self, message: Vec<u8>, chat_type: u8, channel: i32) {
        if message.iter().all(|&b| b == 0) {
            return;
        }
        let position = self
            .region
            .entities()
            .get(self.avatar())
            .map_or(Vector3::ZERO, |e| e.position());
        self.bus.chat.fire(&ChatEvent {
            sender: self.agent_id(),
            from_name: self.session.display_name(),
            position,
            message,
            chat_type,
            channel,
        });
    }

    fn on_set_appearance(
        &self,
        texture_entry: Vec<u8>,
        visual_params: Vec<u8>,
    ) -> Result<(), RegionError> {
        self.region.entities().set_appearance(
            self.avatar(),
            texture_entry.clone(),
            visual_params.clone(),
        )?;
        self.bus.set_appearance.fire(&AppearanceEvent {
            agent_id: self.agent_id(),
            avatar: self.avatar(),
            texture_entry,
            visual_params,
        });
        Ok(())
    }

    /// Full appearance exchange: everyone else learns what this avatar
    /// looks like, and this viewer learns about every other avatar.
    fn on_wearables_request(&self) {
        self.bus.request_wearables.fire(&self.agent_event());

        let entities = self.region.entities();
        if let Some(me) = entities.get(self.avatar()) {
            if let EntityKind::Avatar(avatar) = &me.kind {
                let update = OutPacket::ObjectUpdate(me.object_update());
                let appearance = OutPacket::AvatarAppearance {
                    sender: self.agent_id(),
                    texture_entry: avatar.texture_entry.clone(),
                    visual_params: avatar.visual_params.clone(),
                };
                broadcast_except(self.region.sessions(), self.agent_id(), &update);
                broadcast_except(self.region.sessions(), self.agent_id(), &appearance);
            }
        }

        for other in self.region.sessions().snapshot() {
            if other.agent_id() == self.agent_id() {
                continue;
            }
            let Some(entity) = entities.get(other.avatar) else {
                continue;
            };
            if let EntityKind::Avatar(avatar) = &entity.kind {
                self.send(OutPacket::ObjectUpdate(entity.object_update()));
                self.send(OutPacket::AvatarAppearance {
                    sender: other.agent_id(),
                    texture_entry: avatar.texture_entry.clone(),
                    visual_params: avatar.visual_params.clone(),
                });
            }
        }
    }

    fn on_animation(&self, animations: &[AnimationEntry]) {
        if self.session.is_child() {
            tracing::debug!(agent_id = %self.agent_id(), "child agent cannot animate, ignoring");
            return;
        }
        for entry in animations.iter().filter(|a| a.start_anim) {
            self.bus.start_animation.fire(&AnimationEvent {
                agent_id: self.agent_id(),
                anim_id: entry.anim_id,
                sequence: ANIMATION_SEQUENCE,
            });
        }
    }

    fn on_modify_land(&self, action: u8, brush_size: u8, parcels: &[ParcelBounds]) {
        let Some(parcel) = parcels.first() else {
            return;
        };
        self.bus.modify_terrain.fire(&TerrainEvent {
            agent_id: self.agent_id(),
            action,
            brush_size,
            north: parcel.north,
            west: parcel.west,
        });
    }

    // -- Objects ----------------------------------------------------------

    fn on_rez_object(&self, item_id: Uuid, ray_end: Vector3) {
        let inventory = self.region.inventory();
        let Some(item) = inventory.get_item(self.agent_id(), item_id) else {
            tracing::debug!(agent_id = %self.agent_id(), %item_id, "rez: item not in inventory");
            return;
        };
        let Some(asset) = self.region.assets().get_asset(item.asset_id) else {
            tracing::debug!(agent_id = %self.agent_id(), asset_id = %item.asset_id, "rez: asset not found");
            return;
        };
        self.bus.rez_object.fire(&RezEvent {
            agent_id: self.agent_id(),
            asset,
            position: ray_end,
        });
        inventory.delete_item(self.agent_id(), item_id);
    }

    fn on_object_add(&self, data: ObjectAddData) {
        let prim = Prim {
            shape: data.shape,
            scale: data.scale,
            rotation: data.rotation,
            ..Prim::new(self.agent_id(), data.ray_end)
        };
        let entities = self.region.entities();
        let local_id = entities.add_prim(prim);
        if let Some(update) = entities.object_update(local_id) {
            broadcast_all(self.region.sessions(), &OutPacket::ObjectUpdate(update));
        }
    }

    fn on_object_shape(&self, objects: Vec<ShapeUpdate>) {
        for update in objects {
            if let Err(e) = self.region.entities().update_shape(update.local_id, update.shape) {
                tracing::debug!(error = %e, "shape update skipped");
            }
        }
    }

    fn on_object_image(&self, objects: Vec<ImageUpdate>) {
        for update in objects {
            if let Err(e) = self
                .region
                .entities()
                .update_texture(update.local_id, update.texture_entry)
            {
                tracing::debug!(error = %e, "texture update skipped");
            }
        }
    }

    fn on_object_select(&self, local_ids: &[LocalId]) {
        for &local_id in local_ids {
            let Some(entity) = self.region.entities().get(local_id) else {
                continue;
            };
            if let Some(prim) = entity.as_prim() {
                self.send(OutPacket::ObjectProperties {
                    object_id: entity.global_id,
                    owner_id: prim.owner_id,
                    name: prim.name.clone(),
                    description: prim.description.clone(),
                });
            }
        }
    }

    // -- Assets -----------------------------------------------------------

    fn on_request_image(&self, requests: Vec<ImageRequest>) {
        for request in requests {
            self.region.assets().add_texture_request(self.agent_id(), request);
        }
    }

    fn on_upload_request(
        &mut self,
        transaction_id: TransactionId,
        asset_type: AssetType,
        tempfile: bool,
        store_local: bool,
        data: Vec<u8>,
    ) {
        match self
            .uploader
            .begin_upload(transaction_id, asset_type, tempfile, store_local, data)
        {
            UploadStart::Complete {
                asset,
                pending_item,
            } => self.finish_upload(transaction_id, asset, pending_item),
            UploadStart::AwaitingXfer {
                xfer_id,
                asset_id,
                asset_type,
            } => self.send(OutPacket::RequestXfer {
                xfer_id,
                vfile_id: asset_id,
                vfile_type: asset_type,
            }),
        }
    }

    fn on_xfer_packet(&mut self, xfer_id: u64, packet: u32, data: &[u8]) -> Result<(), RegionError> {
        let outcome = match self.uploader.append_chunk(xfer_id, packet, data) {
            Ok(outcome) => outcome,
            Err(RegionError::OutOfOrder { expected, got }) if got < expected => {
                // Redelivered chunk: the viewer missed our confirmation.
                self.send(OutPacket::ConfirmXferPacket { xfer_id, packet });
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        self.send(OutPacket::ConfirmXferPacket { xfer_id, packet });
        if let ChunkOutcome::Complete {
            transaction_id,
            asset,
            pending_item,
        } = outcome
        {
            self.finish_upload(transaction_id, asset, pending_item);
        }
        Ok(())
    }

    /// Publishes a finished upload and creates the item waiting on it.
    fn finish_upload(
        &mut self,
        transaction_id: TransactionId,
        asset: Arc<Asset>,
        pending_item: Option<PendingItem>,
    ) {
        self.region.assets().add_asset(Arc::clone(&asset));
        self.send(OutPacket::AssetUploadComplete {
            asset_id: asset.id,
            asset_type: asset.asset_type,
            success: true,
        });
        if let Some(pending) = pending_item {
            self.create_item(pending, &asset);
            self.uploader.release(transaction_id);
        }
    }

    // -- Inventory --------------------------------------------------------

    fn create_item(&self, pending: PendingItem, asset: &Asset) {
        let item = InventoryItem {
            item_id: Uuid::new_v4(),
            folder_id: pending.folder_id,
            owner_id: self.agent_id(),
            creator_id: self.agent_id(),
            asset_id: asset.id,
            asset_type: asset.asset_type,
            inv_type: pending.inv_type,
            wearable_type: pending.wearable_type,
            next_owner_mask: pending.next_owner_mask,
            name: pending.name,
            description: pending.description,
        };
        if self.region.inventory().create_item(item.clone()) {
            self.send(OutPacket::UpdateCreateInventoryItem {
                callback_id: pending.callback_id,
                item,
            });
        }
    }

    fn create_item_with_new_asset(&self, asset_type: AssetType, pending: PendingItem) {
        let asset = Arc::new(Asset::with_default_content(
            asset_type,
            &pending.name,
            &pending.description,
        ));
        self.region.assets().add_asset(Arc::clone(&asset));
        self.create_item(pending, &asset);
    }

    fn create_item_from_upload(&mut self, transaction_id: TransactionId, pending: PendingItem) {
        match self.uploader.queue_item(transaction_id, pending.clone()) {
            QueueOutcome::Ready(asset) => {
                self.create_item(pending, &asset);
                self.uploader.release(transaction_id);
            }
            QueueOutcome::Queued => {
                tracing::debug!(%transaction_id, "item creation deferred until upload completes");
            }
            QueueOutcome::AlreadyQueued => {
                tracing::debug!(%transaction_id, "an item is already waiting on this upload");
            }
            QueueOutcome::UnknownTransaction => {
                tracing::debug!(%transaction_id, "create item for unknown upload, ignoring");
            }
        }
    }

    fn on_update_inventory(&mut self, items: &[ItemUpdate]) {
        for update in items {
            if update.transaction_id.is_nil() {
                self.region
                    .inventory()
                    .update_item_details(self.agent_id(), update);
                continue;
            }
            let asset_id = self.uploader.asset_id_for(update.transaction_id);
            let asset = match self.region.assets().get_asset(asset_id) {
                Some(asset) => Some(asset),
                None => self.uploader.completed_asset(update.transaction_id).inspect(|asset| {
                    self.region.assets().add_asset(Arc::clone(asset));
                }),
            };
            match asset {
                Some(asset) => {
                    self.region
                        .inventory()
                        .update_item_asset(self.agent_id(), update.item_id, &asset);
                    self.uploader.release(update.transaction_id);
                }
                None => {
                    tracing::debug!(transaction_id = %update.transaction_id, "item update names no finished upload");
                }
            }
        }
    }

    fn on_update_task_inventory(
        &self,
        local_id: LocalId,
        key: u8,
        item_id: Uuid,
    ) -> Result<(), RegionError> {
        if key != 0 {
            return Ok(());
        }
        let Some(item) = self.region.inventory().get_item(self.agent_id(), item_id) else {
            return Ok(());
        };
        if item.asset_type != AssetType::Notecard {
            return Ok(());
        }
        let Some(asset) = self.region.assets().get_asset(item.asset_id) else {
            return Ok(());
        };
        let source = asset.text();
        self.region.entities().attach_script(local_id, source.clone())?;
        self.bus.script_attached.fire(&ScriptAttachedEvent {
            agent_id: self.agent_id(),
            local_id,
            source,
        });
        Ok(())
    }

    // -- Teleport ---------------------------------------------------------

    fn on_teleport_landmark(&self, landmark_id: AssetId) -> Result<(), RegionError> {
        let landmark = self.region.assets().get_asset(landmark_id);
        let outcome = teleport_via_landmark(
            self.region.config(),
            self.identity(),
            landmark.as_deref(),
        )?;
        self.apply_teleport(outcome);
        Ok(())
    }

    fn on_teleport_location(
        &self,
        region_handle: RegionHandle,
        position: Vector3,
        look_at: Vector3,
    ) -> Result<(), RegionError> {
        let outcome = teleport_via_location(
            self.region.config(),
            self.identity(),
            region_handle,
            position,
            look_at,
        )?;
        self.apply_teleport(outcome);
        Ok(())
    }

    fn apply_teleport(&self, outcome: TeleportOutcome) {
        if let Some(destination) = outcome.destination() {
            if let Err(e) = self.region.entities().set_position(self.avatar(), destination) {
                tracing::debug!(error = %e, "teleported avatar missing from directory");
            }
            if let Some(update) = self.region.entities().object_update(self.avatar()) {
                broadcast_except(
                    self.region.sessions(),
                    self.agent_id(),
                    &OutPacket::ObjectUpdate(update),
                );
            }
        }
        tracing::info!(agent_id = %self.agent_id(), state = %outcome.state, "teleport resolved");
        for packet in outcome.packets {
            self.send(packet);
        }
    }
}
