//! Error types for the protocol layer.
//!
//! Each crate in simgrid defines its own error enum. A `ProtocolError`
//! always means the bytes could not be turned into a packet (or back),
//! never that the packet itself was rejected by the region.

/// Errors that can occur while encoding or decoding packets.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a packet into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a packet).
    ///
    /// Common causes: truncated frames, missing required fields, or a
    /// client speaking a different protocol revision.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The frame decoded but breaks circuit rules, e.g. the first packet
    /// on a new connection is not `UseCircuitCode`.
    #[error("invalid packet: {0}")]
    InvalidPacket(String),
}
