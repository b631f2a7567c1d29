//! External collaborator contract for spawning extension-host worker
//! processes. The child-process manager itself (stdio framing, debug
//! attach) is out of scope; this crate only defines and dispatches through
//! the factory boundary.

use async_trait::async_trait;

use crate::error::AgentResult;
use crate::intent::{ReconnectionToken, StartParams};
use crate::registry::ExtensionHostConnection;
use crate::transport::Io;

use std::sync::Arc;

#[async_trait]
pub trait ExtensionHostFactory: Send + Sync {
    /// `newExtensionHost(params, initialBuffer, transport) -> handle`.
    /// `socket` is the raw, already-upgraded connection; `initial_buffer`
    /// is the verbatim buffered prefix captured between handshake
    /// completion and dispatch.
    async fn spawn(
        &self,
        token: ReconnectionToken,
        start_params: StartParams,
        socket: Io,
        initial_buffer: Vec<u8>,
    ) -> AgentResult<Arc<ExtensionHostConnection>>;
}

/// Development/test factory: records the call and reports a connection
/// immediately, without spawning a real child process. Real process
/// management lives outside this crate's scope.
pub struct NullExtensionHostFactory;

#[async_trait]
impl ExtensionHostFactory for NullExtensionHostFactory {
    async fn spawn(
        &self,
        token: ReconnectionToken,
        start_params: StartParams,
        socket: Io,
        _initial_buffer: Vec<u8>,
    ) -> AgentResult<Arc<ExtensionHostConnection>> {
        let debug_port = start_params.port;
        let transport = Arc::new(crate::transport::FramedTransport::new_raw(socket));
        Ok(ExtensionHostConnection::new(token, transport, start_params, debug_port))
    }
}
