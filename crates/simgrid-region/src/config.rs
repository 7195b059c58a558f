//! Region configuration.

use serde::{Deserialize, Serialize};
use simgrid_protocol::{RegionHandle, Vector3};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RegionConfig
// ---------------------------------------------------------------------------

/// Static settings of one region.
///
/// Operators override these defaults through the server builder's
/// `region_config()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionConfig {
    /// World-unique id of this region. Landmarks name their region by it.
    pub region_id: Uuid,

    /// Grid position of this region. Location teleports name their target
    /// region by it.
    pub region_handle: RegionHandle,

    /// Name shown to viewers in the region handshake.
    pub name: String,

    /// Where a new avatar stands when its circuit carries no start
    /// position.
    pub default_position: Vector3,

    /// A session whose outbound queue grows past this many packets is
    /// logged as lagging. 0 disables the warning.
    pub outbound_warn_depth: usize,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            region_id: Uuid::from_u128(0x5147_0000_0000_0000_0000_0000_0000_0001),
            region_handle: RegionHandle::from_grid(1000, 1000),
            name: "Sandbox".to_string(),
            default_position: Vector3::new(128.0, 128.0, 25.0),
            outbound_warn_depth: 1024,
        }
    }
}
