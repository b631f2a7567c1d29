//! Routes a validated `ConnectionIntent` to registry actions for each
//! connection type. The dispatcher is the only component that writes to
//! `ConnectionRegistry`; every error reply it sends is followed by
//! disposing the transport and, where no one else took ownership of the
//! socket, explicitly closing it.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;

use crate::debug_port::update_with_free_debug_port;
use crate::error::AgentResult;
use crate::intent::{ConnectionIntent, HandshakeReply, StartParams};
use crate::registry::{ExtensionHostConnection, ManagementConnection};
use crate::state::AgentState;
use crate::transport::FramedTransport;
use crate::tunnel;

pub struct Dispatcher {
    state: Arc<AgentState>,
}

impl Dispatcher {
    pub fn new(state: Arc<AgentState>) -> Self {
        Self { state }
    }

    pub async fn dispatch(&self, intent: ConnectionIntent, transport: Arc<FramedTransport>) -> AgentResult<()> {
        match intent {
            ConnectionIntent::Reject { reason } => self.reject(&transport, reason).await,
            ConnectionIntent::Management { token, is_reconnection } => {
                if is_reconnection {
                    self.resume_management(token, transport).await
                } else {
                    self.fresh_management(token, transport).await
                }
            }
            ConnectionIntent::ExtensionHost { token, is_reconnection, start_params } => {
                if is_reconnection {
                    self.resume_extension_host(token, start_params, transport).await
                } else {
                    self.fresh_extension_host(token, start_params, transport).await
                }
            }
            ConnectionIntent::Tunnel { target_port } => tunnel::bridge(&transport, target_port).await,
        }
    }

    async fn reject(&self, transport: &FramedTransport, reason: String) -> AgentResult<()> {
        tracing::warn!(reason = %reason, "rejecting connection");
        transport.send_control(HandshakeReply::error(reason).to_bytes()).await.ok();
        self.dispose_and_close(transport).await;
        Ok(())
    }

    /// `dispose()` never closes the socket; callers that aren't handing the
    /// socket to a new owner explicitly take it back out and close it, per
    /// the distinction the transport contract draws between the two.
    async fn dispose_and_close(&self, transport: &FramedTransport) {
        if let Ok((mut io, _leftover)) = transport.take_raw().await {
            let _ = io.shutdown().await;
        }
        transport.dispose().await;
    }

    async fn fresh_management(&self, token: String, transport: Arc<FramedTransport>) -> AgentResult<()> {
        let conn = ManagementConnection::new(token.clone(), Arc::clone(&transport));
        if self.state.registry.insert_fresh_management(token.clone(), Arc::clone(&conn)).is_err() {
            // Nobody has started reading for `conn` yet and it was never
            // reachable from the registry, so dropping it here is clean —
            // no orphaned reader task, no half-registered connection.
            return self.reject(&transport, "Duplicate reconnection token.".into()).await;
        }
        conn.start_reading();
        transport.send_control(HandshakeReply::ok().to_bytes()).await?;
        self.spawn_management_close_watcher(token, conn);
        Ok(())
    }

    async fn resume_management(&self, token: String, transport: Arc<FramedTransport>) -> AgentResult<()> {
        let Some(existing) = self.state.registry.get_management(&token) else {
            return self.reject(&transport, "Unknown reconnection token.".into()).await;
        };
        transport.send_control(HandshakeReply::ok().to_bytes()).await?;
        let (io, buffered) = transport.take_raw().await?;
        transport.dispose().await;
        existing.accept_reconnection(io, buffered).await
    }

    fn spawn_management_close_watcher(&self, token: String, conn: Arc<ManagementConnection>) {
        let registry = Arc::clone(&self.state.registry);
        tokio::spawn(async move {
            conn.on_close().await;
            registry.remove_management(&token);
        });
    }

    async fn fresh_extension_host(&self, token: String, start_params: StartParams, transport: Arc<FramedTransport>) -> AgentResult<()> {
        // Reserve the token before any of the async work below runs, so a
        // second fresh connect sharing it is rejected immediately instead
        // of racing debug-port probing and the factory call.
        if self.state.registry.reserve_extension_host(token.clone()).is_err() {
            return self.reject(&transport, "Duplicate reconnection token.".into()).await;
        }

        match self.build_extension_host(&token, start_params, &transport).await {
            Ok(conn) => {
                self.state.idle.on_extension_host_opened().await;
                self.state.registry.finalize_extension_host(token.clone(), Arc::clone(&conn));
                self.spawn_extension_host_close_watcher(token, conn);
                Ok(())
            }
            Err(e) => {
                // Every failure past the reservation must release it — a
                // leaked `Pending` slot would block this token forever.
                self.state.registry.abandon_extension_host_reservation(&token);
                Err(e)
            }
        }
    }

    async fn build_extension_host(
        &self,
        token: &str,
        start_params: StartParams,
        transport: &Arc<FramedTransport>,
    ) -> AgentResult<Arc<ExtensionHostConnection>> {
        let resolved_params = update_with_free_debug_port(start_params).await;
        let ack = HandshakeReply::ext_host_ack(resolved_params.port);
        transport.send_control(ack.to_bytes()).await?;

        let (socket, buffered) = transport.take_raw().await?;

        self.state.extension_host_factory.spawn(token.to_string(), resolved_params, socket, buffered).await.inspect_err(|e| {
            tracing::error!(error = %e, "extension host spawn failed");
        })
    }

    async fn resume_extension_host(&self, token: String, _start_params: StartParams, transport: Arc<FramedTransport>) -> AgentResult<()> {
        let Some(existing) = self.state.registry.get_extension_host(&token) else {
            return self.reject(&transport, "Unknown reconnection token.".into()).await;
        };
        let ack = HandshakeReply::ext_host_ack(existing.debug_port());
        transport.send_control(ack.to_bytes()).await?;
        let (io, buffered) = transport.take_raw().await?;
        transport.dispose().await;
        existing.accept_reconnection(io, buffered).await
    }

    fn spawn_extension_host_close_watcher(&self, token: String, conn: Arc<ExtensionHostConnection>) {
        let registry = Arc::clone(&self.state.registry);
        let idle = Arc::clone(&self.state.idle);
        tokio::spawn(async move {
            conn.on_close().await;
            registry.remove_extension_host(&token);
            idle.on_extension_host_closed().await;
        });
    }
}
