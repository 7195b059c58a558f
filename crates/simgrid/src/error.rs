//! Unified error type for the simgrid server.

use simgrid_protocol::ProtocolError;
use simgrid_region::RegionError;
use simgrid_session::SessionError;
use simgrid_transport::TransportError;

/// Top-level error wrapping every crate's error, so `?` converts them.
#[derive(Debug, thiserror::Error)]
pub enum SimgridError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Region(#[from] RegionError),
}
