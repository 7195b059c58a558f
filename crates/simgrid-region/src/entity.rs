//! The entity directory: every avatar and prim in the region, by local id.
//!
//! Local ids are small integers handed out by the region and only
//! meaningful inside it; global ids are world-unique UUIDs. Viewers name
//! objects by local id in almost every packet, so the directory is keyed
//! on it.
//!
//! # Concurrency note
//!
//! Every connection worker reads and mutates the directory. One
//! `parking_lot::RwLock` guards the whole map, and each public method takes
//! it exactly once, so a multi-step operation like [`EntityDirectory::link`]
//! is atomic with respect to other workers. Readers get clones, never
//! references into the map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;
use simgrid_protocol::{
    AgentId, LocalId, ObjectFlags, ObjectUpdateData, PrimShape, Quaternion, Vector3,
};
use uuid::Uuid;

use crate::RegionError;

/// Pcode viewers use for avatars.
const AVATAR_PCODE: u8 = 47;

/// First local id the region hands out.
const FIRST_LOCAL_ID: u32 = 1;

// ---------------------------------------------------------------------------
// Entity payloads
// ---------------------------------------------------------------------------

/// An agent's body in the world.
#[derive(Debug, Clone, PartialEq)]
pub struct Avatar {
    pub agent_id: AgentId,
    pub first_name: String,
    pub last_name: String,
    pub position: Vector3,
    pub rotation: Quaternion,
    pub texture_entry: Vec<u8>,
    pub visual_params: Vec<u8>,
}

impl Avatar {
    pub fn new(agent_id: AgentId, first_name: &str, last_name: &str, position: Vector3) -> Self {
        Self {
            agent_id,
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            position,
            rotation: Quaternion::IDENTITY,
            texture_entry: Vec::new(),
            visual_params: Vec::new(),
        }
    }
}

/// A primitive object.
#[derive(Debug, Clone, PartialEq)]
pub struct Prim {
    pub owner_id: AgentId,
    pub name: String,
    pub description: String,
    pub shape: PrimShape,
    pub position: Vector3,
    pub scale: Vector3,
    pub rotation: Quaternion,
    pub texture_entry: Vec<u8>,
    pub flags: ObjectFlags,
    /// Script sources attached from notecards, in attach order.
    pub scripts: Vec<String>,
}

impl Prim {
    /// A default box owned by `owner_id` at `position`.
    pub fn new(owner_id: AgentId, position: Vector3) -> Self {
        Self {
            owner_id,
            name: "Primitive".to_string(),
            description: String::new(),
            shape: PrimShape::default(),
            position,
            scale: Vector3::new(0.5, 0.5, 0.5),
            rotation: Quaternion::IDENTITY,
            texture_entry: Vec::new(),
            flags: ObjectFlags::default(),
            scripts: Vec::new(),
        }
    }
}

/// What an entity is. Prim-only operations match on this instead of
/// down-casting.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityKind {
    Avatar(Avatar),
    Prim(Prim),
}

/// One addressable object in the region.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub local_id: LocalId,
    pub global_id: Uuid,
    /// The prim this entity is linked under, if any.
    pub parent: Option<LocalId>,
    pub kind: EntityKind,
}

impl Entity {
    pub fn as_avatar(&self) -> Option<&Avatar> {
        match &self.kind {
            EntityKind::Avatar(avatar) => Some(avatar),
            EntityKind::Prim(_) => None,
        }
    }

    pub fn as_prim(&self) -> Option<&Prim> {
        match &self.kind {
            EntityKind::Prim(prim) => Some(prim),
            EntityKind::Avatar(_) => None,
        }
    }

    fn as_prim_mut(&mut self) -> Result<&mut Prim, RegionError> {
        match &mut self.kind {
            EntityKind::Prim(prim) => Ok(prim),
            EntityKind::Avatar(_) => Err(RegionError::NotAPrim(self.local_id)),
        }
    }

    pub fn position(&self) -> Vector3 {
        match &self.kind {
            EntityKind::Avatar(avatar) => avatar.position,
            EntityKind::Prim(prim) => prim.position,
        }
    }

    /// Full viewer-facing state of this entity.
    pub fn object_update(&self) -> ObjectUpdateData {
        match &self.kind {
            EntityKind::Avatar(avatar) => ObjectUpdateData {
                local_id: self.local_id,
                full_id: self.global_id,
                parent_id: self.parent,
                pcode: AVATAR_PCODE,
                position: avatar.position,
                scale: Vector3::new(1.0, 1.0, 1.0),
                rotation: avatar.rotation,
                texture_entry: avatar.texture_entry.clone(),
                flags: ObjectFlags::empty(),
                name_value: format!(
                    "FirstName STRING RW SV {}\nLastName STRING RW SV {}",
                    avatar.first_name, avatar.last_name
                ),
            },
            EntityKind::Prim(prim) => ObjectUpdateData {
                local_id: self.local_id,
                full_id: self.global_id,
                parent_id: self.parent,
                pcode: prim.shape.pcode,
                position: prim.position,
                scale: prim.scale,
                rotation: prim.rotation,
                texture_entry: prim.texture_entry.clone(),
                flags: prim.flags,
                name_value: String::new(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// EntityDirectory
// ---------------------------------------------------------------------------

/// All entities in one region.
#[derive(Debug)]
pub struct EntityDirectory {
    entities: RwLock<HashMap<LocalId, Entity>>,
    next_local_id: AtomicU32,
}

impl Default for EntityDirectory {
    fn default() -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
            next_local_id: AtomicU32::new(FIRST_LOCAL_ID),
        }
    }
}

impl EntityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, kind: EntityKind) -> LocalId {
        let local_id = LocalId(self.next_local_id.fetch_add(1, Ordering::Relaxed));
        let entity = Entity {
            local_id,
            global_id: Uuid::new_v4(),
            parent: None,
            kind,
        };
        self.entities.write().insert(local_id, entity);
        local_id
    }

    /// Places an avatar in the region and returns its local id.
    pub fn add_avatar(&self, avatar: Avatar) -> LocalId {
        let agent_id = avatar.agent_id;
        let local_id = self.insert(EntityKind::Avatar(avatar));
        tracing::debug!(%agent_id, %local_id, "avatar added");
        local_id
    }

    /// Creates a prim and returns its local id.
    pub fn add_prim(&self, prim: Prim) -> LocalId {
        let local_id = self.insert(EntityKind::Prim(prim));
        tracing::debug!(%local_id, "prim added");
        local_id
    }

    /// Removes an entity. Children linked under it become unlinked.
    pub fn remove(&self, local_id: LocalId) -> Option<Entity> {
        let mut entities = self.entities.write();
        let removed = entities.remove(&local_id)?;
        for entity in entities.values_mut() {
            if entity.parent == Some(local_id) {
                entity.parent = None;
            }
        }
        Some(removed)
    }

    /// Clone of one entity.
    pub fn get(&self, local_id: LocalId) -> Option<Entity> {
        self.entities.read().get(&local_id).cloned()
    }

    pub fn contains(&self, local_id: LocalId) -> bool {
        self.entities.read().contains_key(&local_id)
    }

    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }

    /// Viewer-facing state of one entity.
    pub fn object_update(&self, local_id: LocalId) -> Option<ObjectUpdateData> {
        self.entities.read().get(&local_id).map(Entity::object_update)
    }

    /// Links each child under `parent`, replacing any previous parent.
    ///
    /// The parent is resolved once. Each child is then handled on its own:
    /// unknown children are skipped, and a child that is an avatar, is the
    /// parent itself, or is an ancestor of the parent is rejected with a
    /// warning. The rest still link.
    ///
    /// Returns the children that were actually linked.
    ///
    /// # Errors
    /// - [`RegionError::EntityNotFound`]: the parent does not exist
    /// - [`RegionError::NotAPrim`]: the parent is an avatar
    pub fn link(&self, parent: LocalId, children: &[LocalId]) -> Result<Vec<LocalId>, RegionError> {
        let mut entities = self.entities.write();
        match entities.get(&parent) {
            None => return Err(RegionError::EntityNotFound(parent)),
            Some(entity) if entity.as_prim().is_none() => {
                return Err(RegionError::NotAPrim(parent));
            }
            Some(_) => {}
        }

        let mut linked = Vec::with_capacity(children.len());
        for &child in children {
            let Some(entity) = entities.get(&child) else {
                tracing::debug!(%parent, %child, "link child not found, skipping");
                continue;
            };
            if entity.as_prim().is_none() {
                tracing::warn!(%parent, %child, "refusing to link an avatar");
                continue;
            }
            if is_ancestor_or_self(&entities, child, parent) {
                let err = RegionError::LinkCycle { parent, child };
                tracing::warn!(error = %err, "link rejected");
                continue;
            }
            if let Some(entity) = entities.get_mut(&child) {
                entity.parent = Some(parent);
                linked.push(child);
            }
        }
        Ok(linked)
    }

    /// Replaces a prim's shape.
    pub fn update_shape(&self, local_id: LocalId, shape: PrimShape) -> Result<(), RegionError> {
        self.with_prim(local_id, |prim| prim.shape = shape)
    }

    /// Replaces a prim's texture entry.
    pub fn update_texture(&self, local_id: LocalId, texture_entry: Vec<u8>) -> Result<(), RegionError> {
        self.with_prim(local_id, |prim| prim.texture_entry = texture_entry)
    }

    /// Sets the viewer-editable object flags of a prim.
    pub fn update_flags(
        &self,
        local_id: LocalId,
        use_physics: bool,
        is_temporary: bool,
        is_phantom: bool,
        casts_shadows: bool,
    ) -> Result<(), RegionError> {
        self.with_prim(local_id, |prim| {
            prim.flags.set(ObjectFlags::USE_PHYSICS, use_physics);
            prim.flags.set(ObjectFlags::TEMPORARY, is_temporary);
            prim.flags.set(ObjectFlags::PHANTOM, is_phantom);
            prim.flags.set(ObjectFlags::CAST_SHADOWS, casts_shadows);
        })
    }

    /// Adds a script source to a prim.
    pub fn attach_script(&self, local_id: LocalId, source: String) -> Result<(), RegionError> {
        self.with_prim(local_id, |prim| prim.scripts.push(source))
    }

    /// Stores an avatar's appearance. Prims are left alone.
    pub fn set_appearance(
        &self,
        local_id: LocalId,
        texture_entry: Vec<u8>,
        visual_params: Vec<u8>,
    ) -> Result<(), RegionError> {
        let mut entities = self.entities.write();
        let entity = entities
            .get_mut(&local_id)
            .ok_or(RegionError::EntityNotFound(local_id))?;
        match &mut entity.kind {
            EntityKind::Avatar(avatar) => {
                avatar.texture_entry = texture_entry;
                avatar.visual_params = visual_params;
                Ok(())
            }
            EntityKind::Prim(_) => Err(RegionError::EntityNotFound(local_id)),
        }
    }

    /// Moves an entity.
    pub fn set_position(&self, local_id: LocalId, position: Vector3) -> Result<(), RegionError> {
        let mut entities = self.entities.write();
        let entity = entities
            .get_mut(&local_id)
            .ok_or(RegionError::EntityNotFound(local_id))?;
        match &mut entity.kind {
            EntityKind::Avatar(avatar) => avatar.position = position,
            EntityKind::Prim(prim) => prim.position = position,
        }
        Ok(())
    }

    fn with_prim<R>(
        &self,
        local_id: LocalId,
        f: impl FnOnce(&mut Prim) -> R,
    ) -> Result<R, RegionError> {
        let mut entities = self.entities.write();
        let entity = entities
            .get_mut(&local_id)
            .ok_or(RegionError::EntityNotFound(local_id))?;
        Ok(f(entity.as_prim_mut()?))
    }
}

/// Returns `true` if `candidate` is `start` or one of its ancestors.
fn is_ancestor_or_self(
    entities: &HashMap<LocalId, Entity>,
    candidate: LocalId,
    start: LocalId,
) -> bool {
    let mut current = Some(start);
    // Bounded by the map size in case an earlier bug left a cycle behind.
    for _ in 0..=entities.len() {
        match current {
            Some(id) if id == candidate => return true,
            Some(id) => current = entities.get(&id).and_then(|e| e.parent),
            None => return false,
        }
    }
    true
}
