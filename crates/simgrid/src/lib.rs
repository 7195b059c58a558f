//! # simgrid
//!
//! A virtual-world region server. Viewers connect, present a circuit code
//! issued by a login service, and are admitted into the region as an
//! avatar. From then on every packet they send is dispatched in order by
//! a per-session [`ClientView`](simgrid_region::ClientView), and every
//! packet the region has for them is written back by the same worker.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use simgrid::prelude::*;
//!
//! # async fn start() -> Result<(), SimgridError> {
//! let server = RegionServer::builder()
//!     .bind("0.0.0.0:9000")
//!     .build(CircuitTable::new())
//!     .await?;
//! server.run().await
//! # }
//! ```

mod error;
mod handler;
mod server;

pub use error::SimgridError;
pub use server::{DEFAULT_IDLE_TIMEOUT, HANDSHAKE_TIMEOUT, RegionServer, RegionServerBuilder};

/// Everything a region host usually needs.
pub mod prelude {
    pub use crate::{RegionServer, RegionServerBuilder, SimgridError};
    pub use simgrid_protocol::{
        AgentId, AssetId, AssetType, Codec, Envelope, JsonCodec, LocalId, OutPacket, Packet,
        RegionHandle, SessionId, TransactionId, Vector3,
    };
    pub use simgrid_region::{
        Asset, AssetCache, ChatEvent, InventoryCache, MemoryAssetCache, MemoryInventory,
        NotificationBus, Region, RegionConfig, Scene,
    };
    pub use simgrid_session::{
        AgentCircuit, CircuitAuthenticator, CircuitTable, SessionConfig, SessionError,
        SessionIdentity,
    };
}

/// Installs the `tracing` subscriber used by the binary: `RUST_LOG`
/// filtering, defaulting to `info`.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
