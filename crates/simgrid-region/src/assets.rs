//! Assets and the asset cache collaborator.
//!
//! The region never owns asset storage. It talks to an [`AssetCache`]
//! that some other service backs; [`MemoryAssetCache`] is the in-process
//! implementation used by the bundled server and the tests.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use simgrid_protocol::{AgentId, AssetId, AssetType, ImageRequest, RegionHandle, TransferRequest, Vector3};
use uuid::Uuid;

use crate::RegionError;

/// Body of a freshly created notecard.
pub const EMPTY_NOTECARD: &str =
    "Linden text version 2\n{\nLLEmbeddedItems version 1\n{\ncount 0\n}\nText length 0\n}\n";

/// Body of a freshly created script.
pub const DEFAULT_SCRIPT: &str =
    "default\n{\n    state_entry()\n    {\n        llSay(0, \"Script running\");\n    }\n}\n";

// ---------------------------------------------------------------------------
// Asset
// ---------------------------------------------------------------------------

/// One stored blob plus its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
    pub id: AssetId,
    pub asset_type: AssetType,
    pub inv_type: i8,
    pub name: String,
    pub description: String,
    pub data: Vec<u8>,
    /// Only kept by this region, never forwarded to the grid asset service.
    pub local: bool,
    /// May be discarded at any time.
    pub temporary: bool,
}

impl Asset {
    pub fn new(id: AssetId, asset_type: AssetType, data: Vec<u8>) -> Self {
        Self {
            id,
            asset_type,
            inv_type: asset_type.code(),
            name: String::new(),
            description: String::new(),
            data,
            local: false,
            temporary: false,
        }
    }

    /// A new asset with the starting content a viewer expects for its type:
    /// an empty notecard, a default script, or no bytes at all.
    pub fn with_default_content(asset_type: AssetType, name: &str, description: &str) -> Self {
        let data = match asset_type {
            AssetType::Notecard => EMPTY_NOTECARD.as_bytes().to_vec(),
            AssetType::LslText => DEFAULT_SCRIPT.as_bytes().to_vec(),
            _ => Vec::new(),
        };
        Self {
            name: name.to_string(),
            description: description.to_string(),
            ..Self::new(AssetId(Uuid::new_v4()), asset_type, data)
        }
    }

    /// The asset bytes as text, with invalid UTF-8 replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

// ---------------------------------------------------------------------------
// Landmark
// ---------------------------------------------------------------------------

/// A stored region + position reference.
///
/// Stored as a text asset:
///
/// ```text
/// Landmark version 2
/// region_id 5147...
/// local_pos 128 64 22.5
/// region_handle 1099511628032000
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    pub region_id: Uuid,
    pub position: Vector3,
    pub region_handle: RegionHandle,
}

impl Landmark {
    /// Parses a landmark asset body.
    ///
    /// # Errors
    /// Returns [`RegionError::MalformedAsset`] if the header is missing or
    /// any required field is absent or unparseable.
    pub fn parse(data: &[u8]) -> Result<Self, RegionError> {
        let text = std::str::from_utf8(data)
            .map_err(|_| RegionError::MalformedAsset("landmark is not UTF-8".into()))?;
        let mut lines = text.lines();
        match lines.next() {
            Some(header) if header.trim_start().starts_with("Landmark version") => {}
            _ => return Err(RegionError::MalformedAsset("missing landmark header".into())),
        }

        let mut region_id = None;
        let mut position = None;
        let mut region_handle = None;
        for line in lines {
            let mut parts = line.split_whitespace();
            match parts.next() {
                Some("region_id") => {
                    region_id = parts.next().and_then(|s| Uuid::parse_str(s).ok());
                }
                Some("local_pos") => {
                    let coords: Vec<f32> = parts.filter_map(|s| s.parse().ok()).collect();
                    if let &[x, y, z] = coords.as_slice() {
                        position = Some(Vector3::new(x, y, z));
                    }
                }
                Some("region_handle") => {
                    region_handle = parts.next().and_then(|s| s.parse().ok()).map(RegionHandle);
                }
                _ => {}
            }
        }

        match (region_id, position) {
            (Some(region_id), Some(position)) => Ok(Self {
                region_id,
                position,
                region_handle: region_handle.unwrap_or(RegionHandle(0)),
            }),
            (None, _) => Err(RegionError::MalformedAsset("landmark has no region_id".into())),
            (_, None) => Err(RegionError::MalformedAsset("landmark has no local_pos".into())),
        }
    }

    /// Renders the landmark in its stored text form.
    pub fn to_text(&self) -> String {
        format!(
            "Landmark version 2\nregion_id {}\nlocal_pos {} {} {}\nregion_handle {}\n",
            self.region_id,
            self.position.x,
            self.position.y,
            self.position.z,
            self.region_handle.0
        )
    }
}

// ---------------------------------------------------------------------------
// AssetCache
// ---------------------------------------------------------------------------

/// The region's view of asset storage.
///
/// Lookups are synchronous: a miss is a miss, and callers treat it as a
/// silent no-op. Texture and transfer requests are handed over and the
/// cache answers the viewer on its own schedule.
pub trait AssetCache: Send + Sync + 'static {
    /// Returns the asset if the cache currently holds it.
    fn get_asset(&self, id: AssetId) -> Option<Arc<Asset>>;

    /// Publishes an asset. Replaces any earlier asset with the same id.
    fn add_asset(&self, asset: Arc<Asset>);

    /// Queues a texture download for a viewer.
    fn add_texture_request(&self, requester: AgentId, request: ImageRequest);

    /// Queues a generic asset transfer for a viewer.
    fn add_asset_request(&self, requester: AgentId, request: TransferRequest);
}

/// An [`AssetCache`] that keeps everything in memory.
///
/// Incoming texture and transfer requests are recorded so a test (or a
/// serving task) can drain them.
#[derive(Debug, Default)]
pub struct MemoryAssetCache {
    assets: RwLock<HashMap<AssetId, Arc<Asset>>>,
    texture_requests: Mutex<Vec<(AgentId, ImageRequest)>>,
    transfer_requests: Mutex<Vec<(AgentId, TransferRequest)>>,
}

impl MemoryAssetCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.assets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.read().is_empty()
    }

    /// Takes every texture request received so far.
    pub fn take_texture_requests(&self) -> Vec<(AgentId, ImageRequest)> {
        std::mem::take(&mut *self.texture_requests.lock())
    }

    /// Takes every transfer request received so far.
    pub fn take_transfer_requests(&self) -> Vec<(AgentId, TransferRequest)> {
        std::mem::take(&mut *self.transfer_requests.lock())
    }
}

impl AssetCache for MemoryAssetCache {
    fn get_asset(&self, id: AssetId) -> Option<Arc<Asset>> {
        self.assets.read().get(&id).cloned()
    }

    fn add_asset(&self, asset: Arc<Asset>) {
        tracing::debug!(asset_id = %asset.id, asset_type = ?asset.asset_type, bytes = asset.data.len(), "asset stored");
        self.assets.write().insert(asset.id, asset);
    }

    fn add_texture_request(&self, requester: AgentId, request: ImageRequest) {
        self.texture_requests.lock().push((requester, request));
    }

    fn add_asset_request(&self, requester: AgentId, request: TransferRequest) {
        self.transfer_requests.lock().push((requester, request));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_landmark_parse_reads_all_fields() {
        let id = Uuid::from_u128(77);
        let text = format!(
            "Landmark version 2\nregion_id {id}\nlocal_pos 128 64 22.5\nregion_handle 42\n"
        );

        let lm = Landmark::parse(text.as_bytes()).unwrap();

        assert_eq!(lm.region_id, id);
        assert_eq!(lm.position, Vector3::new(128.0, 64.0, 22.5));
        assert_eq!(lm.region_handle, RegionHandle(42));
    }

    #[test]
    fn test_landmark_to_text_parses_back() {
        let lm = Landmark {
            region_id: Uuid::from_u128(5),
            position: Vector3::new(1.5, 2.0, 3.25),
            region_handle: RegionHandle::from_grid(1000, 1001),
        };
        assert_eq!(Landmark::parse(lm.to_text().as_bytes()).unwrap(), lm);
    }

    #[test]
    fn test_landmark_parse_missing_header_is_malformed() {
        let result = Landmark::parse(b"region_id 00000000-0000-0000-0000-000000000001\n");
        assert!(matches!(result, Err(RegionError::MalformedAsset(_))));
    }

    #[test]
    fn test_landmark_parse_missing_position_is_malformed() {
        let text = format!("Landmark version 2\nregion_id {}\n", Uuid::from_u128(1));
        assert!(matches!(
            Landmark::parse(text.as_bytes()),
            Err(RegionError::MalformedAsset(_))
        ));
    }

    #[test]
    fn test_with_default_content_per_type() {
        let note = Asset::with_default_content(AssetType::Notecard, "n", "");
        let script = Asset::with_default_content(AssetType::LslText, "s", "");
        let texture = Asset::with_default_content(AssetType::Texture, "t", "");

        assert_eq!(note.text(), EMPTY_NOTECARD);
        assert!(script.text().contains("state_entry"));
        assert!(texture.data.is_empty());
        assert_ne!(note.id, script.id);
    }

    #[test]
    fn test_memory_cache_add_then_get() {
        let cache = MemoryAssetCache::new();
        let asset = Arc::new(Asset::new(AssetId(Uuid::from_u128(9)), AssetType::Texture, vec![1, 2]));

        cache.add_asset(asset.clone());

        assert_eq!(cache.get_asset(asset.id), Some(asset));
        assert!(cache.get_asset(AssetId(Uuid::from_u128(10))).is_none());
    }
}
