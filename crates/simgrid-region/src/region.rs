//! The region: shared state every session worker holds an `Arc` to.

use std::sync::Arc;

use simgrid_protocol::{AgentId, LocalId, OutPacket, Vector3};
use simgrid_session::{AgentCircuit, OutboundSender, Session, SessionConfig, SessionHandle, SessionRegistry};

use crate::broadcast::broadcast_except;
use crate::{
    AssetCache, Avatar, ClientView, EntityDirectory, InventoryCache, NotificationBus, RegionConfig,
    RegionError, Scene,
};

/// One region and its collaborators.
pub struct Region {
    config: RegionConfig,
    sessions: SessionRegistry,
    entities: EntityDirectory,
    assets: Arc<dyn AssetCache>,
    inventory: Arc<dyn InventoryCache>,
    scene: Option<Arc<dyn Scene>>,
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("name", &self.config.name)
            .field("sessions", &self.sessions.len())
            .field("entities", &self.entities.len())
            .finish()
    }
}

impl Region {
    pub fn new(
        config: RegionConfig,
        assets: Arc<dyn AssetCache>,
        inventory: Arc<dyn InventoryCache>,
    ) -> Self {
        Self {
            config,
            sessions: SessionRegistry::new(),
            entities: EntityDirectory::new(),
            assets,
            inventory,
            scene: None,
        }
    }

    /// Attaches the scene that binds every new session's notification bus.
    pub fn with_scene(mut self, scene: Arc<dyn Scene>) -> Self {
        self.scene = Some(scene);
        self
    }

    pub fn config(&self) -> &RegionConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn entities(&self) -> &EntityDirectory {
        &self.entities
    }

    pub fn assets(&self) -> &dyn AssetCache {
        self.assets.as_ref()
    }

    pub fn inventory(&self) -> &dyn InventoryCache {
        self.inventory.as_ref()
    }

    /// Brings an authenticated agent into the region.
    ///
    /// Places the avatar, registers the session, queues the
    /// `RegionHandshake` for the new viewer and announces the avatar to
    /// everyone else. Returns the session's dispatcher.
    ///
    /// # Errors
    /// Returns [`RegionError::Session`] if the agent is already connected;
    /// nothing is left behind in that case.
    pub fn admit(
        self: &Arc<Self>,
        circuit: &AgentCircuit,
        circuit_code: u32,
        session_config: &SessionConfig,
        outbound: OutboundSender,
    ) -> Result<ClientView, RegionError> {
        let position = if circuit.start_position == Vector3::ZERO {
            self.config.default_position
        } else {
            circuit.start_position
        };
        let avatar = self.entities.add_avatar(Avatar::new(
            circuit.agent_id,
            &circuit.first_name,
            &circuit.last_name,
            position,
        ));

        let session = Session::new(circuit, circuit_code, avatar);
        let handle = SessionHandle::new(session.identity, avatar, outbound.clone());
        if let Err(e) = self.sessions.register(handle) {
            self.entities.remove(avatar);
            return Err(e.into());
        }

        let _ = outbound.send(OutPacket::RegionHandshake {
            region_name: self.config.name.clone(),
            region_id: self.config.region_id,
            region_handle: self.config.region_handle,
        });
        if let Some(update) = self.entities.object_update(avatar) {
            broadcast_except(&self.sessions, circuit.agent_id, &OutPacket::ObjectUpdate(update));
        }

        let mut bus = NotificationBus::new();
        if let Some(scene) = &self.scene {
            scene.bind(&session.identity, &mut bus);
        }

        tracing::info!(
            agent_id = %circuit.agent_id,
            name = %session.display_name(),
            %avatar,
            child = session.is_child(),
            "agent entered region"
        );
        Ok(ClientView::new(Arc::clone(self), session, outbound, bus, session_config))
    }

    /// Takes an agent out of the region: unregisters the session, removes
    /// its avatar and tells everyone else to forget it.
    pub fn depart(&self, agent_id: AgentId, avatar: LocalId) {
        self.sessions.remove(&agent_id);
        if self.entities.remove(avatar).is_some() {
            broadcast_except(
                &self.sessions,
                agent_id,
                &OutPacket::KillObject {
                    local_ids: vec![avatar],
                },
            );
        }
        tracing::info!(%agent_id, %avatar, "agent left region");
    }
}
