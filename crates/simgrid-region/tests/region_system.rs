//! Integration tests for the region: sessions admitted through `Region`,
//! packets driven through `ClientView::process`, outbound traffic observed
//! on each session's channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use simgrid_protocol::{
    AgentId, AnimationEntry, AssetId, AssetType, Envelope, ImageRequest, ItemUpdate, LocalId, ObjectAddData,
    OutPacket, Packet, ParcelBounds, PrimShape, Quaternion, RegionHandle, SessionId,
    TeleportFlags, TransactionId, TransferRequest, Vector3, ViewerEffectBlock,
};
use simgrid_region::upload::XFER_LAST_PACKET;
use simgrid_region::{
    Asset, AssetCache, ChatEvent, ClientView, Dispatch, EMPTY_NOTECARD, InventoryCache, Landmark,
    MemoryAssetCache, MemoryInventory, NotificationBus, Region, RegionConfig, RegionError, Scene,
};
use simgrid_session::{AgentCircuit, OutboundReceiver, SessionConfig, SessionIdentity, outbound_channel};
use uuid::Uuid;

// =========================================================================
// Harness
// =========================================================================

struct Harness {
    region: Arc<Region>,
    assets: Arc<MemoryAssetCache>,
    inventory: Arc<MemoryInventory>,
}

fn harness() -> Harness {
    let assets = Arc::new(MemoryAssetCache::new());
    let inventory = Arc::new(MemoryInventory::new());
    let region = Arc::new(Region::new(
        RegionConfig::default(),
        assets.clone(),
        inventory.clone(),
    ));
    Harness {
        region,
        assets,
        inventory,
    }
}

fn aid(n: u128) -> AgentId {
    AgentId(Uuid::from_u128(n))
}

fn circuit(n: u128, child: bool) -> AgentCircuit {
    AgentCircuit {
        agent_id: aid(n),
        session_id: SessionId(Uuid::from_u128(n + 1000)),
        secure_session_id: SessionId(Uuid::from_u128(n + 2000)),
        first_name: "Test".into(),
        last_name: format!("User{n}"),
        start_position: Vector3::new(100.0, 100.0, 22.0),
        child,
    }
}

/// Admits agent `n` as a root agent and discards the handshake and any
/// avatar announcements queued so far.
fn connect(h: &Harness, n: u128) -> (ClientView, OutboundReceiver) {
    connect_as(h, n, false)
}

fn connect_as(h: &Harness, n: u128, child: bool) -> (ClientView, OutboundReceiver) {
    let (tx, mut rx) = outbound_channel();
    let view = h
        .region
        .admit(&circuit(n, child), n as u32, &SessionConfig::default(), tx)
        .expect("admit should succeed");
    let first = rx.try_recv().expect("handshake should be queued");
    assert_eq!(first.kind(), "RegionHandshake");
    (view, rx)
}

fn drain(rx: &mut OutboundReceiver) -> Vec<OutPacket> {
    let mut out = Vec::new();
    while let Ok(p) = rx.try_recv() {
        out.push(p);
    }
    out
}

fn kinds(packets: &[OutPacket]) -> Vec<&'static str> {
    packets.iter().map(OutPacket::kind).collect()
}

/// Feeds packets with fresh sequence numbers.
struct Feeder {
    seq: u32,
}

impl Feeder {
    fn new() -> Self {
        Self { seq: 0 }
    }

    fn send(&mut self, view: &mut ClientView, packet: Packet) -> Dispatch {
        self.seq += 1;
        view.process(Envelope::reliable(self.seq, packet))
    }
}

/// Collects every event fired on a slot.
fn recorder<E: Clone + Send + 'static>() -> (Arc<Mutex<Vec<E>>>, impl Fn(&E) + Send + Sync + 'static) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    (log, move |e: &E| sink.lock().push(e.clone()))
}

fn add_prim(view: &mut ClientView, feed: &mut Feeder, rx: &mut OutboundReceiver) -> LocalId {
    feed.send(
        view,
        Packet::ObjectAdd(ObjectAddData {
            shape: PrimShape::default(),
            material: 3,
            add_flags: 0,
            ray_end: Vector3::new(50.0, 50.0, 21.0),
            scale: Vector3::new(1.0, 1.0, 1.0),
            rotation: Quaternion::IDENTITY,
        }),
    );
    drain(rx)
        .into_iter()
        .find_map(|p| match p {
            OutPacket::ObjectUpdate(data) => Some(data.local_id),
            _ => None,
        })
        .expect("ObjectAdd should announce the new prim")
}

fn notecard_item(owner: AgentId, item: u128, asset_id: AssetId, asset_type: AssetType) -> simgrid_protocol::InventoryItem {
    simgrid_protocol::InventoryItem {
        item_id: Uuid::from_u128(item),
        folder_id: Uuid::from_u128(1),
        owner_id: owner,
        creator_id: owner,
        asset_id,
        asset_type,
        inv_type: asset_type.code(),
        wearable_type: 0,
        next_owner_mask: 0,
        name: "item".into(),
        description: String::new(),
    }
}

// =========================================================================
// Admission / departure
// =========================================================================

#[test]
fn test_admit_registers_session_and_avatar() {
    let h = harness();
    let (view, _rx) = connect(&h, 1);

    assert!(h.region.sessions().contains(&aid(1)));
    let avatar = h.region.entities().get(view.avatar()).expect("avatar placed");
    assert_eq!(avatar.as_avatar().unwrap().agent_id, aid(1));
}

#[test]
fn test_admit_announces_new_avatar_to_others() {
    let h = harness();
    let (_a, mut rx_a) = connect(&h, 1);
    let (b, _rx_b) = connect(&h, 2);

    let seen = drain(&mut rx_a);
    assert!(seen.iter().any(|p| matches!(p, OutPacket::ObjectUpdate(d) if d.local_id == b.avatar())));
}

#[test]
fn test_admit_same_agent_twice_is_rejected_without_side_effects() {
    let h = harness();
    let (_view, _rx) = connect(&h, 1);
    let entities_before = h.region.entities().len();

    let (tx, _rx2) = outbound_channel();
    let result = h
        .region
        .admit(&circuit(1, false), 1, &SessionConfig::default(), tx);

    assert!(matches!(result, Err(RegionError::Session(_))));
    assert_eq!(h.region.entities().len(), entities_before);
    assert_eq!(h.region.sessions().len(), 1);
}

#[test]
fn test_depart_removes_session_avatar_and_notifies_others() {
    let h = harness();
    let (a, _rx_a) = connect(&h, 1);
    let (_b, mut rx_b) = connect(&h, 2);
    drain(&mut rx_b);

    h.region.depart(a.agent_id(), a.avatar());

    assert!(!h.region.sessions().contains(&aid(1)));
    assert!(h.region.entities().get(a.avatar()).is_none());
    assert_eq!(
        drain(&mut rx_b),
        vec![OutPacket::KillObject {
            local_ids: vec![a.avatar()]
        }]
    );
}

// =========================================================================
// Dispatch basics
// =========================================================================

#[test]
fn test_unknown_packet_is_counted_and_later_packets_still_dispatch() {
    let h = harness();
    let (mut view, mut rx) = connect(&h, 1);
    let (chats, sink) = recorder::<ChatEvent>();
    view.bus_mut().chat.set(sink);
    let mut feed = Feeder::new();

    assert_eq!(feed.send(&mut view, Packet::Unknown), Dispatch::Unhandled);
    assert!(drain(&mut rx).is_empty());

    feed.send(
        &mut view,
        Packet::ChatFromViewer {
            message: b"hello".to_vec(),
            chat_type: 1,
            channel: 0,
        },
    );

    assert_eq!(view.stats().unhandled, 1);
    assert_eq!(view.stats().dispatched, 1);
    assert_eq!(chats.lock().len(), 1);
}

#[test]
fn test_reliable_packets_are_acked_in_order() {
    let h = harness();
    let (mut view, _rx) = connect(&h, 1);

    view.process(Envelope::reliable(5, Packet::AgentIsNowWearing { wearables: vec![] }));
    view.process(Envelope {
        seq: 6,
        reliable: false,
        resent: false,
        packet: Packet::MapLayerRequest,
    });
    view.process(Envelope::reliable(7, Packet::Unknown));

    assert_eq!(view.take_pending_acks(), vec![5, 7]);
    assert!(view.take_pending_acks().is_empty());
}

#[test]
fn test_redelivered_packet_is_acked_but_not_dispatched_twice() {
    let h = harness();
    let (mut view, _rx) = connect(&h, 1);
    let (chats, sink) = recorder::<ChatEvent>();
    view.bus_mut().chat.set(sink);
    let chat = Packet::ChatFromViewer {
        message: b"once".to_vec(),
        chat_type: 1,
        channel: 0,
    };

    assert_eq!(view.process(Envelope::reliable(3, chat.clone())), Dispatch::Handled);
    let resent = Envelope {
        resent: true,
        ..Envelope::reliable(3, chat)
    };
    assert_eq!(view.process(resent), Dispatch::Duplicate);

    assert_eq!(chats.lock().len(), 1);
    assert_eq!(view.take_pending_acks(), vec![3, 3]);
    assert_eq!(view.stats().duplicates, 1);
}

#[test]
fn test_empty_chat_never_fires() {
    let h = harness();
    let (mut view, _rx) = connect(&h, 1);
    let (chats, sink) = recorder::<ChatEvent>();
    view.bus_mut().chat.set(sink);

    let mut feed = Feeder::new();
    feed.send(
        &mut view,
        Packet::ChatFromViewer {
            message: Vec::new(),
            chat_type: 1,
            channel: 0,
        },
    );
    // A lone string terminator is still an empty message.
    feed.send(
        &mut view,
        Packet::ChatFromViewer {
            message: vec![0],
            chat_type: 1,
            channel: 0,
        },
    );

    assert!(chats.lock().is_empty());
}

#[test]
fn test_chat_carries_display_name_and_position() {
    let h = harness();
    let (mut view, _rx) = connect(&h, 1);
    let (chats, sink) = recorder::<ChatEvent>();
    view.bus_mut().chat.set(sink);

    Feeder::new().send(
        &mut view,
        Packet::ChatFromViewer {
            message: b"hi".to_vec(),
            chat_type: 1,
            channel: 0,
        },
    );

    let chats = chats.lock();
    assert_eq!(chats[0].from_name, "Test User1");
    assert_eq!(chats[0].position, Vector3::new(100.0, 100.0, 22.0));
    assert_eq!(chats[0].message, b"hi".to_vec());
}

#[test]
fn test_empty_bus_slots_are_harmless() {
    let h = harness();
    let (mut view, _rx) = connect(&h, 1);
    let mut feed = Feeder::new();

    for packet in [
        Packet::RegionHandshakeReply { flags: 0 },
        Packet::CompleteAgentMovement { circuit_code: 1 },
        Packet::MapLayerRequest,
        Packet::ChatFromViewer {
            message: b"x".to_vec(),
            chat_type: 1,
            channel: 0,
        },
    ] {
        assert_eq!(feed.send(&mut view, packet), Dispatch::Handled);
    }
}

#[test]
fn test_logout_replies_and_marks_session() {
    let h = harness();
    let (mut view, mut rx) = connect(&h, 1);

    Feeder::new().send(&mut view, Packet::LogoutRequest);

    assert!(view.logout_requested());
    assert_eq!(
        drain(&mut rx),
        vec![OutPacket::LogoutReply {
            agent_id: aid(1),
            session_id: SessionId(Uuid::from_u128(1001)),
        }]
    );
}

// =========================================================================
// Presence / animation / appearance
// =========================================================================

#[test]
fn test_complete_movement_upgrades_child_then_notifies() {
    let h = harness();
    let (mut view, _rx) = connect_as(&h, 1, true);
    let (events, sink) = recorder::<simgrid_region::AgentEvent>();
    view.bus_mut().complete_movement.set(sink);

    Feeder::new().send(&mut view, Packet::CompleteAgentMovement { circuit_code: 1 });

    assert!(!view.session().is_child());
    assert_eq!(events.lock().len(), 1);
}

#[test]
fn test_animation_ignored_for_child_agent() {
    let h = harness();
    let (mut view, _rx) = connect_as(&h, 1, true);
    let (anims, sink) = recorder::<simgrid_region::AnimationEvent>();
    view.bus_mut().start_animation.set(sink);

    Feeder::new().send(
        &mut view,
        Packet::AgentAnimation {
            animations: vec![AnimationEntry {
                anim_id: Uuid::from_u128(7),
                start_anim: true,
            }],
        },
    );

    assert!(anims.lock().is_empty());
}

#[test]
fn test_animation_fires_once_per_started_entry() {
    let h = harness();
    let (mut view, _rx) = connect(&h, 1);
    let (anims, sink) = recorder::<simgrid_region::AnimationEvent>();
    view.bus_mut().start_animation.set(sink);

    Feeder::new().send(
        &mut view,
        Packet::AgentAnimation {
            animations: vec![
                AnimationEntry {
                    anim_id: Uuid::from_u128(1),
                    start_anim: true,
                },
                AnimationEntry {
                    anim_id: Uuid::from_u128(2),
                    start_anim: false,
                },
                AnimationEntry {
                    anim_id: Uuid::from_u128(3),
                    start_anim: true,
                },
            ],
        },
    );

    let anims = anims.lock();
    let ids: Vec<_> = anims.iter().map(|a| a.anim_id).collect();
    assert_eq!(ids, vec![Uuid::from_u128(1), Uuid::from_u128(3)]);
    assert!(anims.iter().all(|a| a.sequence == 1));
}

#[test]
fn test_set_appearance_is_stored_and_exchanged_on_wearables_request() {
    let h = harness();
    let (mut a, mut rx_a) = connect(&h, 1);
    let (mut b, mut rx_b) = connect(&h, 2);
    let mut feed_a = Feeder::new();
    let mut feed_b = Feeder::new();
    feed_b.send(
        &mut b,
        Packet::AgentSetAppearance {
            texture_entry: vec![0xB],
            visual_params: vec![2, 2],
        },
    );
    feed_a.send(
        &mut a,
        Packet::AgentSetAppearance {
            texture_entry: vec![0xA],
            visual_params: vec![1, 1],
        },
    );
    drain(&mut rx_a);
    drain(&mut rx_b);

    feed_a.send(&mut a, Packet::AgentWearablesRequest);

    let to_a = drain(&mut rx_a);
    assert!(to_a.contains(&OutPacket::AvatarAppearance {
        sender: aid(2),
        texture_entry: vec![0xB],
        visual_params: vec![2, 2],
    }));
    assert!(to_a.iter().any(|p| matches!(p, OutPacket::ObjectUpdate(d) if d.local_id == b.avatar())));

    let to_b = drain(&mut rx_b);
    assert!(to_b.contains(&OutPacket::AvatarAppearance {
        sender: aid(1),
        texture_entry: vec![0xA],
        visual_params: vec![1, 1],
    }));
    assert!(!to_b.iter().any(|p| matches!(p, OutPacket::AvatarAppearance { sender, .. } if *sender == aid(2))));
}

#[test]
fn test_modify_land_uses_first_parcel() {
    let h = harness();
    let (mut view, _rx) = connect(&h, 1);
    let (events, sink) = recorder::<simgrid_region::TerrainEvent>();
    view.bus_mut().modify_terrain.set(sink);
    let mut feed = Feeder::new();

    feed.send(
        &mut view,
        Packet::ModifyLand {
            action: 1,
            brush_size: 2,
            parcels: vec![],
        },
    );
    feed.send(
        &mut view,
        Packet::ModifyLand {
            action: 1,
            brush_size: 2,
            parcels: vec![
                ParcelBounds {
                    west: 10.0,
                    south: 20.0,
                    east: 30.0,
                    north: 40.0,
                },
                ParcelBounds {
                    west: 0.0,
                    south: 0.0,
                    east: 0.0,
                    north: 0.0,
                },
            ],
        },
    );

    let events = events.lock();
    assert_eq!(events.len(), 1);
    assert_eq!((events[0].north, events[0].west), (40.0, 10.0));
}

// =========================================================================
// Objects
// =========================================================================

#[test]
fn test_object_add_announces_prim_to_everyone() {
    let h = harness();
    let (mut a, mut rx_a) = connect(&h, 1);
    let (_b, mut rx_b) = connect(&h, 2);
    drain(&mut rx_a);
    drain(&mut rx_b);

    let id = add_prim(&mut a, &mut Feeder::new(), &mut rx_a);

    let prim = h.region.entities().get(id).unwrap();
    assert_eq!(prim.as_prim().unwrap().owner_id, aid(1));
    assert!(drain(&mut rx_b).iter().any(|p| matches!(p, OutPacket::ObjectUpdate(d) if d.local_id == id)));
}

#[test]
fn test_object_link_sets_parent_of_each_child() {
    let h = harness();
    let (mut view, mut rx) = connect(&h, 1);
    let mut feed = Feeder::new();
    let p = add_prim(&mut view, &mut feed, &mut rx);
    let c1 = add_prim(&mut view, &mut feed, &mut rx);
    let c2 = add_prim(&mut view, &mut feed, &mut rx);

    feed.send(
        &mut view,
        Packet::ObjectLink {
            parent: p,
            children: vec![c1, c2],
        },
    );

    let entities = h.region.entities();
    assert_eq!(entities.get(c1).unwrap().parent, Some(p));
    assert_eq!(entities.get(c2).unwrap().parent, Some(p));
    assert_eq!(entities.get(p).unwrap().parent, None);
}

#[test]
fn test_object_mutations_skip_absent_entities() {
    let h = harness();
    let (mut view, mut rx) = connect(&h, 1);
    let mut feed = Feeder::new();
    let p = add_prim(&mut view, &mut feed, &mut rx);

    let result = feed.send(
        &mut view,
        Packet::ObjectImage {
            objects: vec![
                simgrid_protocol::ImageUpdate {
                    local_id: LocalId(9999),
                    texture_entry: vec![1],
                },
                simgrid_protocol::ImageUpdate {
                    local_id: p,
                    texture_entry: vec![7, 7],
                },
            ],
        },
    );

    assert_eq!(result, Dispatch::Handled);
    let prim = h.region.entities().get(p).unwrap();
    assert_eq!(prim.as_prim().unwrap().texture_entry, vec![7, 7]);
}

#[test]
fn test_object_select_returns_properties_for_resolved_prims() {
    let h = harness();
    let (mut view, mut rx) = connect(&h, 1);
    let mut feed = Feeder::new();
    let p = add_prim(&mut view, &mut feed, &mut rx);
    let avatar = view.avatar();

    feed.send(
        &mut view,
        Packet::ObjectSelect {
            local_ids: vec![p, LocalId(9999), avatar],
        },
    );

    let out = drain(&mut rx);
    assert_eq!(kinds(&out), ["ObjectProperties"]);
}

#[test]
fn test_request_task_inventory_replies_only_for_existing_entity() {
    let h = harness();
    let (mut view, mut rx) = connect(&h, 1);
    let mut feed = Feeder::new();
    let p = add_prim(&mut view, &mut feed, &mut rx);
    let global = h.region.entities().get(p).unwrap().global_id;

    feed.send(&mut view, Packet::RequestTaskInventory { local_id: LocalId(9999) });
    assert!(drain(&mut rx).is_empty());

    feed.send(&mut view, Packet::RequestTaskInventory { local_id: p });
    assert_eq!(
        drain(&mut rx),
        vec![OutPacket::ReplyTaskInventory {
            task_id: global,
            serial: 0,
            filename: Vec::new(),
        }]
    );
}

#[test]
fn test_update_task_inventory_attaches_notecard_text_as_script() {
    let h = harness();
    let (mut view, mut rx) = connect(&h, 1);
    let (events, sink) = recorder::<simgrid_region::ScriptAttachedEvent>();
    view.bus_mut().script_attached.set(sink);
    let mut feed = Feeder::new();
    let p = add_prim(&mut view, &mut feed, &mut rx);
    let asset = Asset::new(AssetId(Uuid::from_u128(40)), AssetType::Notecard, b"say hi".to_vec());
    h.assets.add_asset(Arc::new(asset.clone()));
    h.inventory
        .create_item(notecard_item(aid(1), 30, asset.id, AssetType::Notecard));

    feed.send(
        &mut view,
        Packet::UpdateTaskInventory {
            local_id: p,
            key: 0,
            item_id: Uuid::from_u128(30),
        },
    );

    let prim = h.region.entities().get(p).unwrap();
    assert_eq!(prim.as_prim().unwrap().scripts, vec!["say hi".to_string()]);
    assert_eq!(events.lock().len(), 1);
}

#[test]
fn test_update_task_inventory_ignores_non_notecards() {
    let h = harness();
    let (mut view, mut rx) = connect(&h, 1);
    let mut feed = Feeder::new();
    let p = add_prim(&mut view, &mut feed, &mut rx);
    let asset = Asset::new(AssetId(Uuid::from_u128(40)), AssetType::Texture, vec![1]);
    h.assets.add_asset(Arc::new(asset.clone()));
    h.inventory
        .create_item(notecard_item(aid(1), 30, asset.id, AssetType::Texture));

    feed.send(
        &mut view,
        Packet::UpdateTaskInventory {
            local_id: p,
            key: 0,
            item_id: Uuid::from_u128(30),
        },
    );

    assert!(h.region.entities().get(p).unwrap().as_prim().unwrap().scripts.is_empty());
}

#[test]
fn test_rez_object_fires_and_consumes_item() {
    let h = harness();
    let (mut view, _rx) = connect(&h, 1);
    let (rezzed, sink) = recorder::<simgrid_region::RezEvent>();
    view.bus_mut().rez_object.set(sink);
    let asset = Asset::new(AssetId(Uuid::from_u128(60)), AssetType::Object, vec![9]);
    h.assets.add_asset(Arc::new(asset.clone()));
    h.inventory
        .create_item(notecard_item(aid(1), 61, asset.id, AssetType::Object));
    let mut feed = Feeder::new();

    feed.send(
        &mut view,
        Packet::RezObject {
            item_id: Uuid::from_u128(61),
            ray_end: Vector3::new(5.0, 6.0, 7.0),
        },
    );
    // Second rez of the same item finds nothing.
    feed.send(
        &mut view,
        Packet::RezObject {
            item_id: Uuid::from_u128(61),
            ray_end: Vector3::ZERO,
        },
    );

    let rezzed = rezzed.lock();
    assert_eq!(rezzed.len(), 1);
    assert_eq!(rezzed[0].position, Vector3::new(5.0, 6.0, 7.0));
    assert_eq!(rezzed[0].asset.id, asset.id);
    assert!(h.inventory.get_item(aid(1), Uuid::from_u128(61)).is_none());
}

// =========================================================================
// Viewer effects
// =========================================================================

#[test]
fn test_viewer_effect_reaches_every_other_session_exactly_once() {
    let h = harness();
    let (mut s, mut rx_s) = connect(&h, 1);
    let (_b, mut rx_b) = connect(&h, 2);
    let (_c, mut rx_c) = connect(&h, 3);
    drain(&mut rx_s);
    drain(&mut rx_b);
    drain(&mut rx_c);

    Feeder::new().send(
        &mut s,
        Packet::ViewerEffect {
            agent_id: aid(1),
            session_id: SessionId(Uuid::from_u128(1001)),
            effects: vec![ViewerEffectBlock {
                id: Uuid::from_u128(77),
                agent_id: aid(1),
                effect_type: 7,
                duration: 1.0,
                color: [0, 0, 255, 255],
                type_data: vec![],
            }],
        },
    );

    assert!(drain(&mut rx_s).is_empty(), "sender never gets its own effect");
    for (rx, n) in [(&mut rx_b, 2u128), (&mut rx_c, 3u128)] {
        let got = drain(rx);
        assert_eq!(got.len(), 1);
        assert!(matches!(&got[0], OutPacket::ViewerEffect { agent_id, .. } if *agent_id == aid(n)));
    }
}

// =========================================================================
// Asset upload
// =========================================================================

fn xfer_first(body: &[u8]) -> Vec<u8> {
    let mut data = (body.len() as u32).to_le_bytes().to_vec();
    data.extend_from_slice(body);
    data
}

fn start_xfer_upload(view: &mut ClientView, feed: &mut Feeder, rx: &mut OutboundReceiver, tx: TransactionId) -> u64 {
    feed.send(
        view,
        Packet::AssetUploadRequest {
            transaction_id: tx,
            asset_type: AssetType::LslText,
            tempfile: false,
            store_local: false,
            asset_data: Vec::new(),
        },
    );
    match drain(rx).as_slice() {
        [OutPacket::RequestXfer { xfer_id, .. }] => *xfer_id,
        other => panic!("expected RequestXfer, got {other:?}"),
    }
}

#[test]
fn test_xfer_upload_completes_once_with_concatenated_chunks() {
    let h = harness();
    let (mut view, mut rx) = connect(&h, 1);
    let mut feed = Feeder::new();
    let tx = TransactionId(Uuid::from_u128(500));
    let xfer = start_xfer_upload(&mut view, &mut feed, &mut rx, tx);

    feed.send(&mut view, Packet::SendXferPacket { xfer_id: xfer, packet: 0, data: xfer_first(b"one ") });
    feed.send(&mut view, Packet::SendXferPacket { xfer_id: xfer, packet: 1, data: b"two ".to_vec() });
    feed.send(
        &mut view,
        Packet::SendXferPacket {
            xfer_id: xfer,
            packet: 2 | XFER_LAST_PACKET,
            data: b"three".to_vec(),
        },
    );

    let out = drain(&mut rx);
    assert_eq!(
        kinds(&out),
        ["ConfirmXferPacket", "ConfirmXferPacket", "ConfirmXferPacket", "AssetUploadComplete"]
    );
    let expected_id = tx.combine(SessionId(Uuid::from_u128(2001)));
    let stored = h.assets.get_asset(expected_id).expect("asset published");
    assert_eq!(stored.data, b"one two three".to_vec());
    assert_eq!(stored.asset_type, AssetType::LslText);
}

#[test]
fn test_xfer_final_chunk_redelivery_is_confirmed_again_only() {
    let h = harness();
    let (mut view, mut rx) = connect(&h, 1);
    let mut feed = Feeder::new();
    let tx = TransactionId(Uuid::from_u128(504));
    let xfer = start_xfer_upload(&mut view, &mut feed, &mut rx, tx);
    let last = Packet::SendXferPacket {
        xfer_id: xfer,
        packet: 1 | XFER_LAST_PACKET,
        data: b"done".to_vec(),
    };

    feed.send(&mut view, Packet::SendXferPacket { xfer_id: xfer, packet: 0, data: xfer_first(b"all ") });
    feed.send(&mut view, last.clone());
    drain(&mut rx);

    let result = feed.send(&mut view, last);

    assert_eq!(result, Dispatch::Handled);
    let out = drain(&mut rx);
    assert_eq!(
        out,
        [OutPacket::ConfirmXferPacket {
            xfer_id: xfer,
            packet: 1 | XFER_LAST_PACKET,
        }]
    );
    assert_eq!(h.assets.len(), 1);
    let stored = h.assets.get_asset(tx.combine(SessionId(Uuid::from_u128(2001)))).unwrap();
    assert_eq!(stored.data, b"all done".to_vec());
}

#[test]
fn test_create_item_before_upload_completes_is_deferred_and_created_once() {
    let h = harness();
    let (mut view, mut rx) = connect(&h, 1);
    let mut feed = Feeder::new();
    let tx = TransactionId(Uuid::from_u128(501));
    let xfer = start_xfer_upload(&mut view, &mut feed, &mut rx, tx);
    let create = Packet::CreateInventoryItem {
        callback_id: 42,
        folder_id: Uuid::from_u128(1),
        transaction_id: tx,
        asset_type: AssetType::LslText,
        inv_type: 10,
        wearable_type: 0,
        next_owner_mask: 0,
        name: "My Script".into(),
        description: String::new(),
    };

    feed.send(&mut view, create.clone());
    feed.send(&mut view, create);
    assert!(drain(&mut rx).is_empty(), "no item before the upload finishes");

    feed.send(
        &mut view,
        Packet::SendXferPacket {
            xfer_id: xfer,
            packet: XFER_LAST_PACKET,
            data: xfer_first(b"default {}"),
        },
    );

    let out = drain(&mut rx);
    let created: Vec<_> = out
        .iter()
        .filter_map(|p| match p {
            OutPacket::UpdateCreateInventoryItem { callback_id, item } => Some((*callback_id, item.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].0, 42);
    assert_eq!(created[0].1.asset_id, tx.combine(SessionId(Uuid::from_u128(2001))));
    assert_eq!(h.inventory.item_count(aid(1)), 1);
    assert_eq!(view.pending_uploads(), 0);
}

#[test]
fn test_create_item_after_inline_upload_attaches_immediately() {
    let h = harness();
    let (mut view, mut rx) = connect(&h, 1);
    let mut feed = Feeder::new();
    let tx = TransactionId(Uuid::from_u128(502));

    feed.send(
        &mut view,
        Packet::AssetUploadRequest {
            transaction_id: tx,
            asset_type: AssetType::Notecard,
            tempfile: false,
            store_local: false,
            asset_data: b"note".to_vec(),
        },
    );
    feed.send(
        &mut view,
        Packet::CreateInventoryItem {
            callback_id: 7,
            folder_id: Uuid::from_u128(1),
            transaction_id: tx,
            asset_type: AssetType::Notecard,
            inv_type: 7,
            wearable_type: 0,
            next_owner_mask: 0,
            name: "Note".into(),
            description: String::new(),
        },
    );

    let out = drain(&mut rx);
    assert_eq!(kinds(&out), ["AssetUploadComplete", "UpdateCreateInventoryItem"]);
    assert_eq!(view.pending_uploads(), 0);
}

#[test]
fn test_create_item_for_unknown_transaction_is_silent() {
    let h = harness();
    let (mut view, mut rx) = connect(&h, 1);

    let result = Feeder::new().send(
        &mut view,
        Packet::CreateInventoryItem {
            callback_id: 1,
            folder_id: Uuid::from_u128(1),
            transaction_id: TransactionId(Uuid::from_u128(999)),
            asset_type: AssetType::Notecard,
            inv_type: 7,
            wearable_type: 0,
            next_owner_mask: 0,
            name: "x".into(),
            description: String::new(),
        },
    );

    assert_eq!(result, Dispatch::Handled);
    assert!(drain(&mut rx).is_empty());
    assert_eq!(h.inventory.item_count(aid(1)), 0);
}

#[test]
fn test_create_item_without_transaction_creates_default_asset() {
    let h = harness();
    let (mut view, mut rx) = connect(&h, 1);

    Feeder::new().send(
        &mut view,
        Packet::CreateInventoryItem {
            callback_id: 3,
            folder_id: Uuid::from_u128(1),
            transaction_id: TransactionId::NIL,
            asset_type: AssetType::Notecard,
            inv_type: 7,
            wearable_type: 0,
            next_owner_mask: 0,
            name: "New Note".into(),
            description: String::new(),
        },
    );

    let out = drain(&mut rx);
    let [OutPacket::UpdateCreateInventoryItem { item, .. }] = out.as_slice() else {
        panic!("expected one created item, got {out:?}");
    };
    let asset = h.assets.get_asset(item.asset_id).expect("default asset stored");
    assert_eq!(asset.text(), EMPTY_NOTECARD);
}

#[test]
fn test_update_inventory_item_with_transaction_repoints_asset() {
    let h = harness();
    let (mut view, mut rx) = connect(&h, 1);
    let mut feed = Feeder::new();
    let tx = TransactionId(Uuid::from_u128(503));
    h.inventory
        .create_item(notecard_item(aid(1), 80, AssetId(Uuid::from_u128(81)), AssetType::Notecard));
    feed.send(
        &mut view,
        Packet::AssetUploadRequest {
            transaction_id: tx,
            asset_type: AssetType::Notecard,
            tempfile: false,
            store_local: false,
            asset_data: b"edited".to_vec(),
        },
    );
    drain(&mut rx);

    feed.send(
        &mut view,
        Packet::UpdateInventoryItem {
            items: vec![ItemUpdate {
                item_id: Uuid::from_u128(80),
                folder_id: Uuid::from_u128(1),
                transaction_id: tx,
                name: "item".into(),
                description: String::new(),
                next_owner_mask: 0,
            }],
        },
    );

    let item = h.inventory.get_item(aid(1), Uuid::from_u128(80)).unwrap();
    assert_eq!(item.asset_id, tx.combine(SessionId(Uuid::from_u128(2001))));
    assert_eq!(view.pending_uploads(), 0);
}

/// Drops the first asset it is handed, as if evicted right away.
struct EvictingAssetCache {
    inner: MemoryAssetCache,
    evict_next: AtomicBool,
}

impl AssetCache for EvictingAssetCache {
    fn get_asset(&self, id: AssetId) -> Option<Arc<Asset>> {
        self.inner.get_asset(id)
    }

    fn add_asset(&self, asset: Arc<Asset>) {
        if !self.evict_next.swap(false, Ordering::SeqCst) {
            self.inner.add_asset(asset);
        }
    }

    fn add_texture_request(&self, requester: AgentId, request: ImageRequest) {
        self.inner.add_texture_request(requester, request);
    }

    fn add_asset_request(&self, requester: AgentId, request: TransferRequest) {
        self.inner.add_asset_request(requester, request);
    }
}

fn item_update(item: u128, tx: TransactionId) -> Packet {
    Packet::UpdateInventoryItem {
        items: vec![ItemUpdate {
            item_id: Uuid::from_u128(item),
            folder_id: Uuid::from_u128(1),
            transaction_id: tx,
            name: "item".into(),
            description: String::new(),
            next_owner_mask: 0,
        }],
    }
}

#[test]
fn test_update_inventory_item_falls_back_to_completed_upload() {
    let assets = Arc::new(EvictingAssetCache {
        inner: MemoryAssetCache::new(),
        evict_next: AtomicBool::new(true),
    });
    let inventory = Arc::new(MemoryInventory::new());
    let h = Harness {
        region: Arc::new(Region::new(
            RegionConfig::default(),
            assets.clone(),
            inventory.clone(),
        )),
        assets: Arc::new(MemoryAssetCache::new()),
        inventory,
    };
    let (mut view, mut rx) = connect(&h, 1);
    let mut feed = Feeder::new();
    let tx = TransactionId(Uuid::from_u128(505));
    let expected_id = tx.combine(SessionId(Uuid::from_u128(2001)));
    h.inventory
        .create_item(notecard_item(aid(1), 82, AssetId(Uuid::from_u128(83)), AssetType::Notecard));
    feed.send(
        &mut view,
        Packet::AssetUploadRequest {
            transaction_id: tx,
            asset_type: AssetType::Notecard,
            tempfile: false,
            store_local: false,
            asset_data: b"evicted".to_vec(),
        },
    );
    drain(&mut rx);
    assert!(assets.get_asset(expected_id).is_none());

    feed.send(&mut view, item_update(82, tx));

    let item = h.inventory.get_item(aid(1), Uuid::from_u128(82)).unwrap();
    assert_eq!(item.asset_id, expected_id);
    let republished = assets.get_asset(expected_id).expect("asset published again");
    assert_eq!(republished.data, b"evicted".to_vec());
    assert_eq!(view.pending_uploads(), 0);
}

#[test]
fn test_update_inventory_item_for_running_upload_is_skipped() {
    let h = harness();
    let (mut view, mut rx) = connect(&h, 1);
    let mut feed = Feeder::new();
    let tx = TransactionId(Uuid::from_u128(506));
    let original = AssetId(Uuid::from_u128(85));
    h.inventory
        .create_item(notecard_item(aid(1), 84, original, AssetType::Notecard));
    start_xfer_upload(&mut view, &mut feed, &mut rx, tx);

    let result = feed.send(&mut view, item_update(84, tx));

    assert_eq!(result, Dispatch::Handled);
    assert!(drain(&mut rx).is_empty());
    let item = h.inventory.get_item(aid(1), Uuid::from_u128(84)).unwrap();
    assert_eq!(item.asset_id, original);
    assert_eq!(view.pending_uploads(), 1);
}

#[test]
fn test_same_transaction_from_two_sessions_yields_two_assets() {
    let h = harness();
    let (mut a, _rx_a) = connect(&h, 1);
    let (mut b, _rx_b) = connect(&h, 2);
    let tx = TransactionId(Uuid::from_u128(600));
    let upload = Packet::AssetUploadRequest {
        transaction_id: tx,
        asset_type: AssetType::Texture,
        tempfile: false,
        store_local: false,
        asset_data: vec![1],
    };

    Feeder::new().send(&mut a, upload.clone());
    Feeder::new().send(&mut b, upload);

    assert_eq!(h.assets.len(), 2);
}

#[test]
fn test_close_discards_pending_uploads() {
    let h = harness();
    let (mut view, mut rx) = connect(&h, 1);
    let mut feed = Feeder::new();
    start_xfer_upload(&mut view, &mut feed, &mut rx, TransactionId(Uuid::from_u128(1)));
    assert_eq!(view.pending_uploads(), 1);

    view.close();

    assert_eq!(view.pending_uploads(), 0);
}

// =========================================================================
// Inventory
// =========================================================================

#[test]
fn test_create_folder_replay_does_not_duplicate() {
    let h = harness();
    let (mut view, _rx) = connect(&h, 1);
    let mut feed = Feeder::new();
    let create = Packet::CreateInventoryFolder {
        folder_id: Uuid::from_u128(10),
        parent_id: Uuid::from_u128(1),
        folder_type: -1,
        name: "Scripts".into(),
    };

    feed.send(&mut view, create.clone());
    feed.send(&mut view, create);

    assert_eq!(h.inventory.folder_count(aid(1)), 1);
}

#[test]
fn test_fetch_descendents_replies_with_folder_contents() {
    let h = harness();
    let (mut view, mut rx) = connect(&h, 1);
    let mut feed = Feeder::new();
    feed.send(
        &mut view,
        Packet::CreateInventoryFolder {
            folder_id: Uuid::from_u128(10),
            parent_id: Uuid::from_u128(1),
            folder_type: -1,
            name: "Scripts".into(),
        },
    );
    h.inventory
        .create_item(notecard_item(aid(1), 20, AssetId(Uuid::from_u128(21)), AssetType::Notecard));

    feed.send(
        &mut view,
        Packet::FetchInventoryDescendents {
            folder_id: Uuid::from_u128(1),
            fetch_folders: true,
            fetch_items: true,
        },
    );

    match drain(&mut rx).as_slice() {
        [OutPacket::InventoryDescendents { folders, items, .. }] => {
            assert_eq!(folders.len(), 1);
            assert_eq!(items.len(), 1);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_fetch_inventory_returns_known_items() {
    let h = harness();
    let (mut view, mut rx) = connect(&h, 1);
    h.inventory
        .create_item(notecard_item(aid(1), 20, AssetId(Uuid::from_u128(21)), AssetType::Notecard));

    Feeder::new().send(
        &mut view,
        Packet::FetchInventory {
            item_ids: vec![Uuid::from_u128(20), Uuid::from_u128(404)],
        },
    );

    match drain(&mut rx).as_slice() {
        [OutPacket::FetchInventoryReply { agent_id, items }] => {
            assert_eq!(*agent_id, aid(1));
            assert_eq!(items.len(), 1);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_request_image_is_forwarded_to_asset_cache() {
    let h = harness();
    let (mut view, _rx) = connect(&h, 1);

    Feeder::new().send(
        &mut view,
        Packet::RequestImage {
            requests: vec![
                simgrid_protocol::ImageRequest {
                    image: AssetId(Uuid::from_u128(1)),
                    discard_level: 0,
                    download_priority: 1.0,
                    packet: 0,
                },
                simgrid_protocol::ImageRequest {
                    image: AssetId(Uuid::from_u128(2)),
                    discard_level: 0,
                    download_priority: 1.0,
                    packet: 0,
                },
            ],
        },
    );

    let requests = h.assets.take_texture_requests();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|(agent, _)| *agent == aid(1)));
}

// =========================================================================
// Teleport
// =========================================================================

fn store_landmark(h: &Harness, id: u128, region_id: Uuid, position: Vector3) -> AssetId {
    let lm = Landmark {
        region_id,
        position,
        region_handle: RegionHandle(0),
    };
    let asset = Asset::new(AssetId(Uuid::from_u128(id)), AssetType::Landmark, lm.to_text().into_bytes());
    let asset_id = asset.id;
    h.assets.add_asset(Arc::new(asset));
    asset_id
}

#[test]
fn test_landmark_teleport_in_region_moves_avatar() {
    let h = harness();
    let (mut view, mut rx) = connect(&h, 1);
    let target = Vector3::new(30.0, 40.0, 25.0);
    let landmark = store_landmark(&h, 900, h.region.config().region_id, target);

    Feeder::new().send(
        &mut view,
        Packet::TeleportLandmarkRequest {
            agent_id: aid(1),
            session_id: SessionId(Uuid::from_u128(1001)),
            landmark_id: landmark,
        },
    );

    let out = drain(&mut rx);
    let locals: Vec<_> = out
        .iter()
        .filter(|p| matches!(p, OutPacket::TeleportLocal { .. }))
        .collect();
    assert_eq!(locals.len(), 1);
    assert!(matches!(
        locals[0],
        OutPacket::TeleportLocal { position, flags, .. }
            if *position == target && flags.contains(TeleportFlags::VIA_LANDMARK)
    ));
    assert!(!out.iter().any(|p| p.kind() == "TeleportCancel"));
    assert_eq!(h.region.entities().get(view.avatar()).unwrap().position(), target);
}

#[test]
fn test_landmark_teleport_to_other_region_is_cancelled() {
    let h = harness();
    let (mut view, mut rx) = connect(&h, 1);
    let landmark = store_landmark(&h, 901, Uuid::from_u128(0xBEEF), Vector3::ZERO);

    Feeder::new().send(
        &mut view,
        Packet::TeleportLandmarkRequest {
            agent_id: aid(1),
            session_id: SessionId(Uuid::from_u128(1001)),
            landmark_id: landmark,
        },
    );

    let out = drain(&mut rx);
    assert_eq!(out.iter().filter(|p| p.kind() == "TeleportCancel").count(), 1);
    assert!(!out.iter().any(|p| p.kind() == "TeleportLocal"));
}

#[test]
fn test_location_teleport_to_other_handle_is_cancelled() {
    let h = harness();
    let (mut view, mut rx) = connect(&h, 1);

    Feeder::new().send(
        &mut view,
        Packet::TeleportLocationRequest {
            agent_id: aid(1),
            session_id: SessionId(Uuid::from_u128(1001)),
            region_handle: RegionHandle::from_grid(2000, 2000),
            position: Vector3::new(1.0, 1.0, 1.0),
            look_at: Vector3::ZERO,
        },
    );

    assert_eq!(kinds(&drain(&mut rx)), ["TeleportStart", "TeleportCancel"]);
}

// =========================================================================
// Scene binding
// =========================================================================

struct ChatLogScene {
    log: Arc<Mutex<Vec<(AgentId, Vec<u8>)>>>,
}

impl Scene for ChatLogScene {
    fn bind(&self, _session: &SessionIdentity, bus: &mut NotificationBus) {
        let log = Arc::clone(&self.log);
        bus.chat.set(move |e: &ChatEvent| log.lock().push((e.sender, e.message.clone())));
    }
}

#[test]
fn test_scene_binds_every_new_session() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let assets = Arc::new(MemoryAssetCache::new());
    let inventory = Arc::new(MemoryInventory::new());
    let region = Arc::new(
        Region::new(RegionConfig::default(), assets.clone(), inventory.clone())
            .with_scene(Arc::new(ChatLogScene { log: Arc::clone(&log) })),
    );
    let h = Harness {
        region,
        assets,
        inventory,
    };
    let (mut a, _rx_a) = connect(&h, 1);
    let (mut b, _rx_b) = connect(&h, 2);

    for view in [&mut a, &mut b] {
        Feeder::new().send(
            view,
            Packet::ChatFromViewer {
                message: b"hey".to_vec(),
                chat_type: 1,
                channel: 0,
            },
        );
    }

    let senders: Vec<_> = log.lock().iter().map(|(a, _)| *a).collect();
    assert_eq!(senders, vec![aid(1), aid(2)]);
}

// =========================================================================
// Concurrency
// =========================================================================

#[tokio::test]
async fn test_concurrent_workers_share_region_state() {
    let h = harness();
    let mut tasks = Vec::new();
    for n in 1..=8u128 {
        let (view, rx) = connect(&h, n);
        tasks.push(tokio::spawn(async move {
            let mut view = view;
            let _rx = rx;
            let mut feed = Feeder::new();
            for _ in 0..10 {
                feed.send(
                    &mut view,
                    Packet::ObjectAdd(ObjectAddData {
                        shape: PrimShape::default(),
                        material: 0,
                        add_flags: 0,
                        ray_end: Vector3::ZERO,
                        scale: Vector3::new(1.0, 1.0, 1.0),
                        rotation: Quaternion::IDENTITY,
                    }),
                );
            }
            view.stats().dispatched
        }));
    }

    for task in tasks {
        assert_eq!(task.await.unwrap(), 10);
    }
    // 8 avatars + 80 prims.
    assert_eq!(h.region.entities().len(), 88);
}
