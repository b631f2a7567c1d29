//! Message-framed, resumable byte transport over an upgraded TCP socket.
//!
//! Two framing backends share one set of semantics so the rest of the
//! system (handshake, registry, connections) never has to know which mode
//! it is talking to:
//!
//! - WebSocket mode frames control messages as RFC 6455 frames, built on
//!   `tokio-tungstenite` over the already-upgraded socket.
//! - Raw mode frames control messages with a simple length-prefixed codec,
//!   used when the client requests `skipWebSocketFrames=true`.

use bytes::{Buf, Bytes, BytesMut};
use futures_util::{FutureExt, SinkExt, StreamExt};
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::{tungstenite::protocol::Message as WsMessage, WebSocketStream};

use crate::error::{AgentError, AgentResult};

/// The raw duplex byte stream backing a transport once upgraded. Boxed so
/// both the hyper `Upgraded` type and, in tests, a plain loopback
/// `TcpStream` can stand behind it.
pub type Io = TokioIo<Upgraded>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingMode {
    WebSocket,
    Raw,
}

enum Backend {
    WebSocket(WebSocketStream<Io>),
    Raw(Io, BytesMut),
}

struct TransportState {
    backend: Option<Backend>,
    mode: FramingMode,
    /// Frames handed to `send_control`, kept so `rebind` can replay anything
    /// unacknowledged after a reconnect.
    outbound_log: Vec<Bytes>,
}

/// A persistent, message-oriented transport over a raw byte stream.
pub struct FramedTransport {
    state: Mutex<TransportState>,
}

const RAW_FRAME_HEADER_LEN: usize = 4;
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

impl FramedTransport {
    pub async fn new_websocket(io: Io) -> Self {
        let ws = WebSocketStream::from_raw_socket(io, tungstenite::protocol::Role::Server, None).await;
        Self {
            state: Mutex::new(TransportState {
                backend: Some(Backend::WebSocket(ws)),
                mode: FramingMode::WebSocket,
                outbound_log: Vec::new(),
            }),
        }
    }

    pub fn new_raw(io: Io) -> Self {
        Self {
            state: Mutex::new(TransportState {
                backend: Some(Backend::Raw(io, BytesMut::new())),
                mode: FramingMode::Raw,
                outbound_log: Vec::new(),
            }),
        }
    }

    pub async fn mode(&self) -> FramingMode {
        self.state.lock().await.mode
    }

    /// Enqueue and write a framed control message to the peer.
    pub async fn send_control(&self, bytes: Bytes) -> AgentResult<()> {
        let mut state = self.state.lock().await;
        Self::write_frame(state.backend.as_mut(), &bytes).await?;
        state.outbound_log.push(bytes);
        Ok(())
    }

    async fn write_frame(backend: Option<&mut Backend>, bytes: &Bytes) -> AgentResult<()> {
        match backend {
            Some(Backend::WebSocket(ws)) => {
                ws.send(WsMessage::Binary(bytes.to_vec()))
                    .await
                    .map_err(|e| AgentError::Other(format!("websocket send failed: {e}")))
            }
            Some(Backend::Raw(io, _)) => {
                let len = bytes.len() as u32;
                io.write_all(&len.to_be_bytes()).await?;
                io.write_all(bytes).await?;
                Ok(())
            }
            None => Err(AgentError::Other("transport already disposed".into())),
        }
    }

    /// Read exactly one complete inbound message, blocking until it arrives
    /// or the peer closes. Used by the handshake loop, which is always the
    /// sole reader of a freshly-created transport.
    pub async fn recv_one(&self) -> AgentResult<Option<Bytes>> {
        let mut state = self.state.lock().await;
        Self::recv_from_backend(&mut state.backend).await
    }

    async fn recv_from_backend(backend: &mut Option<Backend>) -> AgentResult<Option<Bytes>> {
        match backend {
            Some(Backend::WebSocket(ws)) => loop {
                match ws.next().await {
                    Some(Ok(WsMessage::Binary(data))) => return Ok(Some(Bytes::from(data))),
                    Some(Ok(WsMessage::Text(text))) => return Ok(Some(Bytes::from(text.into_bytes()))),
                    Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => continue,
                    Some(Ok(WsMessage::Close(_))) | None => return Ok(None),
                    Some(Ok(WsMessage::Frame(_))) => continue,
                    Some(Err(e)) => return Err(AgentError::Other(format!("websocket read failed: {e}"))),
                }
            },
            Some(Backend::Raw(io, buf)) => Self::recv_raw_frame(io, buf).await,
            None => Ok(None),
        }
    }

    async fn recv_raw_frame(io: &mut Io, buf: &mut BytesMut) -> AgentResult<Option<Bytes>> {
        loop {
            if buf.len() >= RAW_FRAME_HEADER_LEN {
                let len = u32::from_be_bytes(buf[..RAW_FRAME_HEADER_LEN].try_into().unwrap()) as usize;
                if len > MAX_FRAME_LEN {
                    return Err(AgentError::PayloadTooLarge);
                }
                if buf.len() >= RAW_FRAME_HEADER_LEN + len {
                    buf.advance(RAW_FRAME_HEADER_LEN);
                    let payload = buf.split_to(len).freeze();
                    return Ok(Some(payload));
                }
            }
            let mut chunk = [0u8; 4096];
            let n = io.read(&mut chunk).await?;
            if n == 0 {
                return if buf.is_empty() {
                    Ok(None)
                } else {
                    Err(AgentError::InvalidFrameFormat)
                };
            }
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Atomically detach all unread inbound bytes: every complete message
    /// that has already arrived (polled without blocking), plus, in raw
    /// mode, any undecoded fragment still sitting in the read buffer. Used
    /// at resume-handoff time so the next owner sees a lossless stream.
    pub async fn read_entire_buffer(&self) -> Vec<u8> {
        let mut state = self.state.lock().await;
        let mut out = Vec::new();
        loop {
            let fut = Self::recv_from_backend(&mut state.backend);
            match fut.now_or_never() {
                Some(Ok(Some(bytes))) => out.extend_from_slice(&bytes),
                _ => break,
            }
        }
        if let Some(Backend::Raw(_, buf)) = state.backend.as_mut() {
            out.extend_from_slice(buf);
            buf.clear();
        }
        out
    }

    /// Attach a new underlying socket, replay unacknowledged outbound
    /// frames, and resume reading.
    pub async fn rebind(&self, io: Io, replay_from: usize) -> AgentResult<()> {
        let mut state = self.state.lock().await;
        let mode = state.mode;
        let mut new_backend = match mode {
            FramingMode::WebSocket => {
                let ws = WebSocketStream::from_raw_socket(io, tungstenite::protocol::Role::Server, None).await;
                Backend::WebSocket(ws)
            }
            FramingMode::Raw => Backend::Raw(io, BytesMut::new()),
        };
        let replay: Vec<Bytes> = state.outbound_log.get(replay_from..).unwrap_or(&[]).to_vec();
        for frame in &replay {
            Self::write_frame(Some(&mut new_backend), frame).await?;
        }
        state.backend = Some(new_backend);
        Ok(())
    }

    /// Mark the transport inert without touching the socket. Callers that
    /// still need the socket alive (resume handoff, tunnel, extension-host
    /// dispatch) must call `take_raw` first, which already leaves the
    /// transport in this state; `dispose` on its own is only meaningful
    /// when the transport's backend was never claimed by anyone and is
    /// simply being abandoned.
    pub async fn dispose(&self) {
        let mut state = self.state.lock().await;
        state.backend = None;
    }

    /// Extract the raw underlying socket and drain any buffered prefix,
    /// leaving the transport inert. Used for extension-host and tunnel
    /// dispatch, which bypass this transport's own message framing
    /// entirely once the handshake is done.
    pub async fn take_raw(&self) -> AgentResult<(Io, Vec<u8>)> {
        let mut state = self.state.lock().await;
        let mut prefix = Vec::new();
        loop {
            let fut = Self::recv_from_backend(&mut state.backend);
            match fut.now_or_never() {
                Some(Ok(Some(bytes))) => prefix.extend_from_slice(&bytes),
                _ => break,
            }
        }
        let backend = state.backend.take().ok_or_else(|| AgentError::Other("transport already disposed".into()))?;
        let io = match backend {
            Backend::WebSocket(ws) => ws.into_inner(),
            Backend::Raw(io, mut buf) => {
                prefix.extend_from_slice(&buf);
                buf.clear();
                io
            }
        };
        Ok((io, prefix))
    }
}
