//! Agent inventories and the inventory cache collaborator.
//!
//! Like assets, inventories live elsewhere. The dispatcher only calls the
//! [`InventoryCache`] trait. [`MemoryInventory`] keeps one folder map and
//! one item map per agent, keyed by id, so creating the same folder or item
//! twice leaves a single copy.

use std::collections::HashMap;

use parking_lot::RwLock;
use simgrid_protocol::{AgentId, InventoryFolder, InventoryItem, ItemUpdate};
use uuid::Uuid;

use crate::Asset;

/// The region's view of agent inventories.
pub trait InventoryCache: Send + Sync + 'static {
    /// Adds a folder. Returns `false` if a folder with that id already
    /// exists; the existing folder is kept.
    fn create_folder(&self, folder: InventoryFolder) -> bool;

    /// Adds an item. Returns `false` if an item with that id already
    /// exists; the existing item is kept.
    fn create_item(&self, item: InventoryItem) -> bool;

    fn get_item(&self, owner: AgentId, item_id: Uuid) -> Option<InventoryItem>;

    fn delete_item(&self, owner: AgentId, item_id: Uuid) -> Option<InventoryItem>;

    /// Points an item at a new asset. Returns `false` if the item is
    /// unknown.
    fn update_item_asset(&self, owner: AgentId, item_id: Uuid, asset: &Asset) -> bool;

    /// Applies viewer-editable fields. Returns `false` if the item is
    /// unknown.
    fn update_item_details(&self, owner: AgentId, update: &ItemUpdate) -> bool;

    /// The requested items that exist, in request order.
    fn fetch_items(&self, owner: AgentId, item_ids: &[Uuid]) -> Vec<InventoryItem>;

    /// Direct sub-folders and items of a folder.
    fn fetch_descendants(
        &self,
        owner: AgentId,
        folder_id: Uuid,
        fetch_folders: bool,
        fetch_items: bool,
    ) -> (Vec<InventoryFolder>, Vec<InventoryItem>);
}

#[derive(Debug, Default)]
struct AgentInventory {
    folders: HashMap<Uuid, InventoryFolder>,
    items: HashMap<Uuid, InventoryItem>,
}

/// An [`InventoryCache`] that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemoryInventory {
    agents: RwLock<HashMap<AgentId, AgentInventory>>,
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items an agent owns.
    pub fn item_count(&self, owner: AgentId) -> usize {
        self.agents.read().get(&owner).map_or(0, |inv| inv.items.len())
    }

    /// Number of folders an agent owns.
    pub fn folder_count(&self, owner: AgentId) -> usize {
        self.agents.read().get(&owner).map_or(0, |inv| inv.folders.len())
    }
}

impl InventoryCache for MemoryInventory {
    fn create_folder(&self, folder: InventoryFolder) -> bool {
        let mut agents = self.agents.write();
        let inv = agents.entry(folder.owner_id).or_default();
        if inv.folders.contains_key(&folder.folder_id) {
            tracing::debug!(folder_id = %folder.folder_id, "folder already exists");
            return false;
        }
        inv.folders.insert(folder.folder_id, folder);
        true
    }

    fn create_item(&self, item: InventoryItem) -> bool {
        let mut agents = self.agents.write();
        let inv = agents.entry(item.owner_id).or_default();
        if inv.items.contains_key(&item.item_id) {
            tracing::debug!(item_id = %item.item_id, "item already exists");
            return false;
        }
        inv.items.insert(item.item_id, item);
        true
    }

    fn get_item(&self, owner: AgentId, item_id: Uuid) -> Option<InventoryItem> {
        self.agents.read().get(&owner)?.items.get(&item_id).cloned()
    }

    fn delete_item(&self, owner: AgentId, item_id: Uuid) -> Option<InventoryItem> {
        self.agents.write().get_mut(&owner)?.items.remove(&item_id)
    }

    fn update_item_asset(&self, owner: AgentId, item_id: Uuid, asset: &Asset) -> bool {
        let mut agents = self.agents.write();
        let Some(item) = agents
            .get_mut(&owner)
            .and_then(|inv| inv.items.get_mut(&item_id))
        else {
            return false;
        };
        item.asset_id = asset.id;
        item.asset_type = asset.asset_type;
        true
    }

    fn update_item_details(&self, owner: AgentId, update: &ItemUpdate) -> bool {
        let mut agents = self.agents.write();
        let Some(item) = agents
            .get_mut(&owner)
            .and_then(|inv| inv.items.get_mut(&update.item_id))
        else {
            return false;
        };
        item.name.clone_from(&update.name);
        item.description.clone_from(&update.description);
        item.next_owner_mask = update.next_owner_mask;
        if !update.folder_id.is_nil() {
            item.folder_id = update.folder_id;
        }
        true
    }

    fn fetch_items(&self, owner: AgentId, item_ids: &[Uuid]) -> Vec<InventoryItem> {
        let agents = self.agents.read();
        let Some(inv) = agents.get(&owner) else {
            return Vec::new();
        };
        item_ids
            .iter()
            .filter_map(|id| inv.items.get(id).cloned())
            .collect()
    }

    fn fetch_descendants(
        &self,
        owner: AgentId,
        folder_id: Uuid,
        fetch_folders: bool,
        fetch_items: bool,
    ) -> (Vec<InventoryFolder>, Vec<InventoryItem>) {
        let agents = self.agents.read();
        let Some(inv) = agents.get(&owner) else {
            return (Vec::new(), Vec::new());
        };

        let mut folders: Vec<InventoryFolder> = if fetch_folders {
            inv.folders
                .values()
                .filter(|f| f.parent_id == folder_id)
                .cloned()
                .collect()
        } else {
            Vec::new()
        };
        let mut items: Vec<InventoryItem> = if fetch_items {
            inv.items
                .values()
                .filter(|i| i.folder_id == folder_id)
                .cloned()
                .collect()
        } else {
            Vec::new()
        };

        // Stable order for viewers and tests.
        folders.sort_by(|a, b| a.name.cmp(&b.name).then(a.folder_id.cmp(&b.folder_id)));
        items.sort_by(|a, b| a.name.cmp(&b.name).then(a.item_id.cmp(&b.item_id)));
        (folders, items)
    }
}
