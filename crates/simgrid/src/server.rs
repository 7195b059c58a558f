//! `RegionServer` builder and accept loop.
//!
//! Ties the layers together: transport → codec → circuit handshake →
//! region. One Tokio task per accepted connection.

use std::sync::Arc;
use std::time::Duration;

use simgrid_protocol::{Codec, JsonCodec};
use simgrid_region::{
    AssetCache, InventoryCache, MemoryAssetCache, MemoryInventory, Region, RegionConfig, Scene,
};
use simgrid_session::{CircuitAuthenticator, CircuitTable, SessionConfig};
use simgrid_transport::{Transport, WebSocketTransport};

use crate::SimgridError;
use crate::handler::handle_connection;

/// How long a new connection has to finish its WebSocket upgrade, and
/// then again to present `UseCircuitCode`.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a session may stay silent before it is dropped.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Shared server state handed to each connection task.
pub(crate) struct ServerState<A: CircuitAuthenticator, C: Codec> {
    pub(crate) region: Arc<Region>,
    pub(crate) auth: Arc<A>,
    pub(crate) codec: C,
    pub(crate) session_config: SessionConfig,
    pub(crate) handshake_timeout: Duration,
    pub(crate) idle_timeout: Duration,
}

/// Builder for a region server.
///
/// ```rust,ignore
/// use simgrid::prelude::*;
///
/// let circuits = CircuitTable::new();
/// let server = RegionServer::builder()
///     .bind("0.0.0.0:9000")
///     .region_config(RegionConfig { name: "Lobby".into(), ..RegionConfig::default() })
///     .build(circuits)
///     .await?;
/// server.run().await
/// ```
pub struct RegionServerBuilder {
    bind_addr: String,
    region_config: RegionConfig,
    session_config: SessionConfig,
    assets: Option<Arc<dyn AssetCache>>,
    inventory: Option<Arc<dyn InventoryCache>>,
    scene: Option<Arc<dyn Scene>>,
    handshake_timeout: Duration,
    idle_timeout: Duration,
}

impl RegionServerBuilder {
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:9000".to_string(),
            region_config: RegionConfig::default(),
            session_config: SessionConfig::default(),
            assets: None,
            inventory: None,
            scene: None,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    pub fn region_config(mut self, config: RegionConfig) -> Self {
        self.region_config = config;
        self
    }

    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Asset storage. Defaults to an in-memory cache.
    pub fn asset_cache(mut self, assets: Arc<dyn AssetCache>) -> Self {
        self.assets = Some(assets);
        self
    }

    /// Inventory storage. Defaults to an in-memory inventory.
    pub fn inventory(mut self, inventory: Arc<dyn InventoryCache>) -> Self {
        self.inventory = Some(inventory);
        self
    }

    pub fn scene(mut self, scene: Arc<dyn Scene>) -> Self {
        self.scene = Some(scene);
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Binds the transport and assembles the region.
    ///
    /// Uses [`JsonCodec`] over [`WebSocketTransport`].
    pub async fn build<A: CircuitAuthenticator>(
        self,
        auth: A,
    ) -> Result<RegionServer<A, JsonCodec>, SimgridError> {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;

        let assets = self
            .assets
            .unwrap_or_else(|| Arc::new(MemoryAssetCache::new()));
        let inventory = self
            .inventory
            .unwrap_or_else(|| Arc::new(MemoryInventory::new()));
        let mut region = Region::new(self.region_config, assets, inventory);
        if let Some(scene) = self.scene {
            region = region.with_scene(scene);
        }

        let state = Arc::new(ServerState {
            region: Arc::new(region),
            auth: Arc::new(auth),
            codec: JsonCodec,
            session_config: self.session_config,
            handshake_timeout: self.handshake_timeout,
            idle_timeout: self.idle_timeout,
        });
        Ok(RegionServer { transport, state })
    }
}

impl Default for RegionServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound region server. Call [`run`](Self::run) to start accepting.
pub struct RegionServer<A: CircuitAuthenticator, C: Codec> {
    transport: WebSocketTransport,
    state: Arc<ServerState<A, C>>,
}

impl RegionServer<CircuitTable, JsonCodec> {
    /// Starts configuring a server. Any [`CircuitAuthenticator`] can be
    /// passed to [`RegionServerBuilder::build`].
    pub fn builder() -> RegionServerBuilder {
        RegionServerBuilder::new()
    }
}

impl<A, C> RegionServer<A, C>
where
    A: CircuitAuthenticator,
    C: Codec,
{
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, SimgridError> {
        Ok(self.transport.local_addr()?)
    }

    /// The region this server hosts.
    pub fn region(&self) -> Arc<Region> {
        Arc::clone(&self.state.region)
    }

    /// The authenticator, shared with whatever announces circuits.
    pub fn authenticator(&self) -> Arc<A> {
        Arc::clone(&self.state.auth)
    }

    /// Runs the accept loop until the process ends.
    pub async fn run(mut self) -> Result<(), SimgridError> {
        let addr = self.transport.local_addr()?;
        tracing::info!(
            %addr,
            region = %self.state.region.config().name,
            "region server running"
        );

        loop {
            match self.transport.accept().await {
                Ok(incoming) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(incoming, state).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}
