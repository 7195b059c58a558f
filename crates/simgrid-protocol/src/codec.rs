//! Codec trait and implementations for framing packets.
//!
//! The region engine never looks at bytes; it consumes [`Envelope`]s of
//! decoded [`Packet`]s and produces envelopes of [`OutPacket`]s. A codec
//! is the seam where a transport turns those envelopes into frames.
//!
//! The byte-exact viewer layout is supplied by an external codec. This
//! crate ships [`JsonCodec`], which is what the bundled WebSocket server
//! and the integration tests speak.

use serde::{Serialize, de::DeserializeOwned};

use crate::{Envelope, OutPacket, Packet, ProtocolError};

/// Converts envelopes to frames and back.
///
/// `Send + Sync + 'static` because one codec instance is shared by every
/// connection worker in the region server.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into a frame.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if the value cannot be represented.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes a frame back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the frame is malformed or
    /// truncated.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;

    /// Decodes one inbound frame from a viewer.
    fn decode_inbound(&self, data: &[u8]) -> Result<Envelope<Packet>, ProtocolError> {
        self.decode(data)
    }

    /// Encodes one outbound envelope for a viewer.
    fn encode_outbound(
        &self,
        envelope: &Envelope<OutPacket>,
    ) -> Result<Vec<u8>, ProtocolError> {
        self.encode(envelope)
    }
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// Human-readable frames: handy for packet captures and for writing test
/// clients in anything that can open a WebSocket.
///
/// ```rust
/// use simgrid_protocol::{Codec, Envelope, JsonCodec, Packet};
///
/// let codec = JsonCodec;
/// let frame = codec
///     .encode(&Envelope::reliable(1, Packet::LogoutRequest))
///     .unwrap();
/// let decoded = codec.decode_inbound(&frame).unwrap();
/// assert_eq!(decoded.packet, Packet::LogoutRequest);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
