//! Byte-transparent bridge from the client to a local TCP port.

use tokio::io::{copy_bidirectional, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{AgentError, AgentResult};
use crate::transport::FramedTransport;

/// Given a transport already past the handshake and a target port, dial
/// `127.0.0.1:targetPort`, seed it with any buffered prefix, and pipe bytes
/// in both directions until either side closes.
pub async fn bridge(transport: &FramedTransport, target_port: u16) -> AgentResult<()> {
    let (mut remote, buffered_prefix) = transport.take_raw().await?;

    let mut local = match TcpStream::connect(("127.0.0.1", target_port)).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = remote.shutdown().await;
            return Err(AgentError::TunnelDialFailed(e.to_string()));
        }
    };

    if !buffered_prefix.is_empty() {
        local.write_all(&buffered_prefix).await?;
    }

    match copy_bidirectional(&mut remote, &mut local).await {
        Ok(_) => Ok(()),
        Err(e) => Err(AgentError::Io(e)),
    }
}
