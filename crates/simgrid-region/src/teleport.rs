//! The teleport state machine.
//!
//! Only teleports inside this region are carried out. Anything that would
//! leave the region is cancelled: cross-region hand-off does not exist.
//!
//! Every request produces exactly one `TeleportStart` and exactly one
//! terminal notice (`TeleportLocal` or `TeleportCancel`). There are no
//! retries and no timeouts; a request resolves in-line while its packet is
//! being dispatched.

use std::fmt;

use simgrid_protocol::{OutPacket, RegionHandle, TeleportFlags, Vector3};
use simgrid_session::SessionIdentity;

use crate::{Asset, Landmark, RegionConfig, RegionError};

/// Location id viewers expect in a same-region `TeleportLocal`.
const LOCAL_LOCATION_ID: u32 = 2;

/// Progress text shown while the landmark is resolved.
const LANDMARK_PROGRESS_MESSAGE: &[u8] = b"sending_landmark";

// ---------------------------------------------------------------------------
// TeleportState
// ---------------------------------------------------------------------------

/// Where a teleport request is.
///
/// ```text
///             ┌──→ AwaitingLandmark ──┬──→ LocalAccepted
///   Started ──┤                       └──→ Cancelled
///             ├──→ LocalAccepted
///             └──→ Cancelled
/// ```
///
/// `LocalAccepted` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeleportState {
    Started,
    AwaitingLandmark,
    LocalAccepted,
    Cancelled,
}

impl TeleportState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::LocalAccepted | Self::Cancelled)
    }

    /// Returns `true` if moving to `target` is a legal step.
    pub fn can_transition_to(self, target: Self) -> bool {
        match self {
            Self::Started => matches!(
                target,
                Self::AwaitingLandmark | Self::LocalAccepted | Self::Cancelled
            ),
            Self::AwaitingLandmark => matches!(target, Self::LocalAccepted | Self::Cancelled),
            Self::LocalAccepted | Self::Cancelled => false,
        }
    }
}

impl fmt::Display for TeleportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started => write!(f, "Started"),
            Self::AwaitingLandmark => write!(f, "AwaitingLandmark"),
            Self::LocalAccepted => write!(f, "LocalAccepted"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

// ---------------------------------------------------------------------------
// TeleportRequest
// ---------------------------------------------------------------------------

/// One teleport in progress, and the notices it has produced so far.
#[derive(Debug)]
pub struct TeleportRequest {
    identity: SessionIdentity,
    flags: TeleportFlags,
    state: TeleportState,
    packets: Vec<OutPacket>,
}

impl TeleportRequest {
    /// Opens a request and emits its `TeleportStart`.
    pub fn start(identity: SessionIdentity, flags: TeleportFlags) -> Self {
        Self {
            identity,
            flags,
            state: TeleportState::Started,
            packets: vec![OutPacket::TeleportStart { flags }],
        }
    }

    pub fn state(&self) -> TeleportState {
        self.state
    }

    fn advance(&mut self, next: TeleportState) -> Result<(), RegionError> {
        if !self.state.can_transition_to(next) {
            return Err(RegionError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(agent_id = %self.identity.agent_id, from = %self.state, to = %next, "teleport transition");
        self.state = next;
        Ok(())
    }

    /// Emits the landmark progress notice and waits for the lookup.
    pub fn await_landmark(&mut self) -> Result<(), RegionError> {
        self.advance(TeleportState::AwaitingLandmark)?;
        self.packets.push(OutPacket::TeleportProgress {
            agent_id: self.identity.agent_id,
            flags: self.flags,
            message: LANDMARK_PROGRESS_MESSAGE.to_vec(),
        });
        Ok(())
    }

    /// Accepts the teleport as a move inside this region.
    pub fn accept_local(&mut self, position: Vector3, look_at: Vector3) -> Result<(), RegionError> {
        self.advance(TeleportState::LocalAccepted)?;
        self.packets.push(OutPacket::TeleportLocal {
            agent_id: self.identity.agent_id,
            location_id: LOCAL_LOCATION_ID,
            position,
            look_at,
            flags: self.flags,
        });
        Ok(())
    }

    /// Refuses the teleport.
    pub fn cancel(&mut self) -> Result<(), RegionError> {
        self.advance(TeleportState::Cancelled)?;
        self.packets.push(OutPacket::TeleportCancel {
            agent_id: self.identity.agent_id,
            session_id: self.identity.session_id,
        });
        Ok(())
    }

    /// Closes the request, returning its final state and every notice to
    /// send to the requester, in order.
    pub fn finish(self) -> TeleportOutcome {
        TeleportOutcome {
            state: self.state,
            packets: self.packets,
        }
    }
}

/// How a teleport ended.
#[derive(Debug, Clone, PartialEq)]
pub struct TeleportOutcome {
    pub state: TeleportState,
    pub packets: Vec<OutPacket>,
}

impl TeleportOutcome {
    /// Where the avatar now stands, if the teleport was accepted.
    pub fn destination(&self) -> Option<Vector3> {
        self.packets.iter().find_map(|p| match p {
            OutPacket::TeleportLocal { position, .. } => Some(*position),
            _ => None,
        })
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Teleports to a landmark.
///
/// `landmark` is the landmark asset as the asset cache returned it, or
/// `None` on a miss. A missing or unparseable landmark, or one pointing at
/// another region, cancels the teleport.
pub fn teleport_via_landmark(
    region: &RegionConfig,
    identity: SessionIdentity,
    landmark: Option<&Asset>,
) -> Result<TeleportOutcome, RegionError> {
    let mut request = TeleportRequest::start(identity, TeleportFlags::VIA_LANDMARK);
    request.await_landmark()?;

    let parsed = landmark.map(|asset| Landmark::parse(&asset.data));
    match parsed {
        Some(Ok(lm)) if lm.region_id == region.region_id => {
            request.accept_local(lm.position, Vector3::ZERO)?;
        }
        Some(Ok(lm)) => {
            tracing::debug!(agent_id = %identity.agent_id, target = %lm.region_id, "landmark in another region, cancelling");
            request.cancel()?;
        }
        Some(Err(e)) => {
            tracing::debug!(agent_id = %identity.agent_id, error = %e, "unreadable landmark, cancelling");
            request.cancel()?;
        }
        None => {
            tracing::debug!(agent_id = %identity.agent_id, "landmark not found, cancelling");
            request.cancel()?;
        }
    }
    Ok(request.finish())
}

/// Teleports to a position in the region named by `region_handle`.
pub fn teleport_via_location(
    region: &RegionConfig,
    identity: SessionIdentity,
    region_handle: RegionHandle,
    position: Vector3,
    look_at: Vector3,
) -> Result<TeleportOutcome, RegionError> {
    let mut request = TeleportRequest::start(identity, TeleportFlags::VIA_LOCATION);
    if region_handle == region.region_handle {
        request.accept_local(position, look_at)?;
    } else {
        tracing::debug!(agent_id = %identity.agent_id, target = %region_handle, "location in another region, cancelling");
        request.cancel()?;
    }
    Ok(request.finish())
}
