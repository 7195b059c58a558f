//! Per-connection worker: circuit handshake, then the packet pump.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   0. Finish the WebSocket upgrade within the handshake timeout
//!   1. Receive `UseCircuitCode` → authenticate the circuit
//!   2. Admit the agent → `RegionHandshake` is queued, avatar announced
//!   3. Loop: inbound frames go to the session's `ClientView` in order;
//!      the session's outbound queue is written back with a sequence
//!      counter; acks are flushed after every inbound envelope
//!   4. On idle timeout, logout, or close → the agent departs

use std::sync::Arc;

use simgrid_protocol::{AgentId, Codec, Envelope, LocalId, OutPacket, Packet, ProtocolError};
use simgrid_region::{ClientView, Region};
use simgrid_session::{AgentCircuit, CircuitAuthenticator, OutboundReceiver, outbound_channel};
use simgrid_transport::{
    Connection, ConnectionReader, ConnectionWriter, Incoming, TransportError, WebSocketIncoming,
    WebSocketReader, WebSocketWriter,
};

use crate::SimgridError;
use crate::server::ServerState;

/// Takes the agent out of the region when the worker exits, including
/// on error or panic.
struct SessionGuard {
    region: Arc<Region>,
    agent_id: AgentId,
    avatar: LocalId,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.region.depart(self.agent_id, self.avatar);
    }
}

/// Why the packet pump stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Closed,
    IdleTimeout,
    Logout,
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<A, C>(
    incoming: WebSocketIncoming,
    state: Arc<ServerState<A, C>>,
) -> Result<(), SimgridError>
where
    A: CircuitAuthenticator,
    C: Codec,
{
    let conn = match tokio::time::timeout(state.handshake_timeout, incoming.upgrade()).await {
        Ok(Ok(conn)) => conn,
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            return Err(TransportError::AcceptFailed(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "websocket upgrade timed out",
            ))
            .into());
        }
    };
    let conn_id = conn.id();
    let peer = conn.peer_addr();
    tracing::debug!(%conn_id, %peer, "handling new connection");
    let (mut reader, mut writer) = conn.split();

    // --- Step 1: circuit handshake ---
    let (circuit, code, first) = match perform_handshake(&mut reader, &state).await {
        Ok(accepted) => accepted,
        Err(e) => {
            tracing::warn!(%conn_id, error = %e, "handshake rejected");
            let _ = writer.close().await;
            return Err(e);
        }
    };

    // --- Step 2: admission ---
    // The guard only exists once admission succeeded: a rejected duplicate
    // must not take the original session down with it.
    let (tx, mut rx) = outbound_channel();
    let mut view = match state.region.admit(&circuit, code, &state.session_config, tx) {
        Ok(view) => view,
        Err(e) => {
            tracing::warn!(%conn_id, agent_id = %circuit.agent_id, error = %e, "admission refused");
            let _ = writer.close().await;
            return Err(e.into());
        }
    };
    let _guard = SessionGuard {
        region: Arc::clone(&state.region),
        agent_id: view.agent_id(),
        avatar: view.avatar(),
    };
    tracing::info!(%conn_id, agent_id = %view.agent_id(), "session started");

    // The handshake envelope goes through the dispatcher like any other,
    // so it is acknowledged and remembered for duplicate detection.
    view.process(first);

    // --- Step 3: packet pump ---
    let mut pump = Pump {
        writer: &mut writer,
        codec: &state.codec,
        seq: 1,
        warn_depth: state.region.config().outbound_warn_depth,
    };
    let exit = run_session(&mut reader, &mut pump, &mut view, &mut rx, &state).await;
    view.close();

    match exit {
        Ok(exit) => {
            tracing::info!(%conn_id, agent_id = %view.agent_id(), ?exit, stats = ?view.stats(), "session ended");
            if exit != Exit::Closed {
                let _ = writer.close().await;
            }
            Ok(())
        }
        Err(e) => {
            tracing::debug!(%conn_id, agent_id = %view.agent_id(), error = %e, "session failed");
            Err(e)
        }
    }
    // _guard drops here → depart.
}

/// Receives and authenticates the `UseCircuitCode` envelope.
async fn perform_handshake<A, C>(
    reader: &mut WebSocketReader,
    state: &ServerState<A, C>,
) -> Result<(AgentCircuit, u32, Envelope<Packet>), SimgridError>
where
    A: CircuitAuthenticator,
    C: Codec,
{
    let data = match tokio::time::timeout(state.handshake_timeout, reader.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(ProtocolError::InvalidPacket("connection closed before handshake".into()).into());
        }
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            return Err(ProtocolError::InvalidPacket("handshake timed out".into()).into());
        }
    };

    let envelope = state.codec.decode_inbound(&data)?;
    let Packet::UseCircuitCode {
        code,
        agent_id,
        session_id,
    } = envelope.packet
    else {
        return Err(ProtocolError::InvalidPacket(format!(
            "first packet must be UseCircuitCode, got {}",
            envelope.packet.kind()
        ))
        .into());
    };

    let circuit = state.auth.authenticate(code, agent_id, session_id).await?;
    tracing::debug!(code, %agent_id, "circuit accepted");
    Ok((circuit, code, envelope))
}

/// Outbound side of one session.
struct Pump<'a, C: Codec> {
    writer: &'a mut WebSocketWriter,
    codec: &'a C,
    seq: u32,
    warn_depth: usize,
}

impl<C: Codec> Pump<'_, C> {
    async fn send(&mut self, packet: OutPacket) -> Result<(), SimgridError> {
        let envelope = Envelope {
            seq: self.seq,
            reliable: false,
            resent: false,
            packet,
        };
        self.seq = self.seq.wrapping_add(1);
        let bytes = self.codec.encode_outbound(&envelope)?;
        self.writer.send(&bytes).await?;
        Ok(())
    }

    async fn flush_acks(&mut self, view: &mut ClientView) -> Result<(), SimgridError> {
        let ids = view.take_pending_acks();
        if ids.is_empty() {
            return Ok(());
        }
        self.send(OutPacket::PacketAck { ids }).await
    }

    /// Writes everything queued right now.
    async fn drain(&mut self, rx: &mut OutboundReceiver) -> Result<(), SimgridError> {
        while let Ok(packet) = rx.try_recv() {
            self.send(packet).await?;
        }
        Ok(())
    }
}

async fn run_session<A, C>(
    reader: &mut WebSocketReader,
    pump: &mut Pump<'_, C>,
    view: &mut ClientView,
    rx: &mut OutboundReceiver,
    state: &ServerState<A, C>,
) -> Result<Exit, SimgridError>
where
    A: CircuitAuthenticator,
    C: Codec,
{
    let idle = tokio::time::sleep(state.idle_timeout);
    tokio::pin!(idle);

    loop {
        pump.flush_acks(view).await?;
        if view.logout_requested() {
            pump.drain(rx).await?;
            return Ok(Exit::Logout);
        }

        tokio::select! {
            Some(packet) = rx.recv() => {
                let depth = rx.len();
                if depth > pump.warn_depth {
                    tracing::warn!(agent_id = %view.agent_id(), depth, "outbound queue backing up");
                }
                pump.send(packet).await?;
            }
            frame = reader.recv() => {
                let data = match frame? {
                    Some(data) => data,
                    None => return Ok(Exit::Closed),
                };
                idle.as_mut().reset(tokio::time::Instant::now() + state.idle_timeout);
                match state.codec.decode_inbound(&data) {
                    Ok(envelope) => {
                        view.process(envelope);
                    }
                    Err(e) => {
                        tracing::debug!(agent_id = %view.agent_id(), error = %e, "undecodable frame skipped");
                    }
                }
            }
            () = &mut idle => {
                tracing::info!(agent_id = %view.agent_id(), "session idle, dropping");
                return Ok(Exit::IdleTimeout);
            }
        }
    }
}
