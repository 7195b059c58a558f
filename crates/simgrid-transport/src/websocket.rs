//! WebSocket transport using `tokio-tungstenite`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use crate::{
    Connection, ConnectionId, ConnectionReader, ConnectionWriter, Incoming, Transport,
    TransportError,
};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

type WsStream = WebSocketStream<TcpStream>;

/// A [`Transport`] that accepts WebSocket upgrades on a TCP listener.
pub struct WebSocketTransport {
    listener: TcpListener,
}

impl WebSocketTransport {
    /// Binds to `addr`. Port 0 picks a free port; see
    /// [`Transport::local_addr`].
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "websocket transport listening");
        Ok(Self { listener })
    }
}

impl Transport for WebSocketTransport {
    type Incoming = WebSocketIncoming;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Incoming, Self::Error> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, error = %e, "could not disable nagle");
        }
        tracing::trace!(%peer, "tcp peer accepted");
        Ok(WebSocketIncoming { stream, peer })
    }

    fn local_addr(&self) -> Result<SocketAddr, Self::Error> {
        self.listener.local_addr().map_err(TransportError::AcceptFailed)
    }
}

/// A TCP peer that has not sent its WebSocket upgrade request yet.
pub struct WebSocketIncoming {
    stream: TcpStream,
    peer: SocketAddr,
}

impl Incoming for WebSocketIncoming {
    type Error = TransportError;
    type Connection = WebSocketConnection;

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    async fn upgrade(self) -> Result<WebSocketConnection, TransportError> {
        let ws = tokio_tungstenite::accept_async(self.stream)
            .await
            .map_err(|e| {
                TransportError::AcceptFailed(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    e,
                ))
            })?;

        let id = ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(%id, peer = %self.peer, "accepted websocket connection");
        Ok(WebSocketConnection {
            id,
            peer: self.peer,
            ws,
        })
    }
}

/// An upgraded WebSocket connection.
pub struct WebSocketConnection {
    id: ConnectionId,
    peer: SocketAddr,
    ws: WsStream,
}

impl Connection for WebSocketConnection {
    type Error = TransportError;
    type Reader = WebSocketReader;
    type Writer = WebSocketWriter;

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn split(self) -> (WebSocketReader, WebSocketWriter) {
        let (sink, stream) = self.ws.split();
        (
            WebSocketReader {
                id: self.id,
                stream,
            },
            WebSocketWriter { id: self.id, sink },
        )
    }
}

/// Inbound half of a [`WebSocketConnection`].
pub struct WebSocketReader {
    id: ConnectionId,
    stream: SplitStream<WsStream>,
}

impl ConnectionReader for WebSocketReader {
    type Error = TransportError;

    async fn recv(&mut self) -> Result<Option<Vec<u8>>, Self::Error> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(Some(data.into())),
                Some(Ok(Message::Text(text))) => return Ok(Some(text.as_bytes().to_vec())),
                Some(Ok(Message::Close(_))) | None => {
                    tracing::trace!(id = %self.id, "peer closed");
                    return Ok(None);
                }
                // ping/pong are answered by tungstenite
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(TransportError::receive(e)),
            }
        }
    }
}

/// Outbound half of a [`WebSocketConnection`].
pub struct WebSocketWriter {
    id: ConnectionId,
    sink: SplitSink<WsStream, Message>,
}

impl ConnectionWriter for WebSocketWriter {
    type Error = TransportError;

    async fn send(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        self.sink
            .send(Message::Binary(data.to_vec().into()))
            .await
            .map_err(TransportError::send)
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        tracing::trace!(id = %self.id, "closing");
        self.sink.close().await.map_err(TransportError::send)
    }
}
