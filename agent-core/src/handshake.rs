//! Drives the auth/connectionType handshake on a freshly upgraded
//! transport and produces a typed `ConnectionIntent`.
//!
//! ```text
//! AWAIT_AUTH ── auth OK ──────────→ AWAIT_TYPE ── connectionType ──→ DISPATCHED (terminal)
//!      │                                  │
//!      └ auth malformed/bad ──→ REJECTED  └ invalid → REJECTED
//! ```
//!
//! Reimplemented as a typed state value rather than nested callbacks: the
//! loop in `run` owns the only subscription to inbound control messages and
//! drops it the moment it returns, so nothing can re-enter after a terminal
//! transition. Error replies on the rejecting path are sent by the
//! dispatcher, not here, since "send error, then dispose" is one policy
//! shared by every rejection source (handshake and dispatch alike).

use std::sync::Arc;

use crate::error::{AgentError, AgentResult};
use crate::intent::{ConnectionIntent, HandshakeMessage, HandshakeReply};
use crate::signer::Signer;
use crate::transport::FramedTransport;

enum HandshakeState {
    AwaitAuth,
    AwaitType,
}

pub struct HandshakeMachine {
    connection_token: String,
    build_commit: Option<String>,
    signer: Option<Arc<dyn Signer>>,
}

impl HandshakeMachine {
    pub fn new(connection_token: String, build_commit: Option<String>, signer: Option<Arc<dyn Signer>>) -> Self {
        Self { connection_token, build_commit, signer }
    }

    /// Run the handshake to completion on `transport`, returning the
    /// resolved connection intent along with the `(token, is_reconnection)`
    /// pair the upgrade query supplied (threaded through untouched so the
    /// dispatcher doesn't have to re-derive it).
    pub async fn run(
        &self,
        transport: &FramedTransport,
        query_token: String,
        query_is_reconnection: bool,
    ) -> AgentResult<ConnectionIntent> {
        let mut state = HandshakeState::AwaitAuth;
        loop {
            let Some(raw) = transport.recv_one().await? else {
                return Err(AgentError::ProtocolViolation("connection closed during handshake".into()));
            };
            let message: HandshakeMessage = match serde_json::from_slice(&raw) {
                Ok(m) => m,
                Err(_) => return Ok(ConnectionIntent::Reject { reason: "Unauthorized client refused.".into() }),
            };

            match (&state, message) {
                (HandshakeState::AwaitAuth, HandshakeMessage::Auth { auth }) => {
                    if auth != self.connection_token {
                        return Ok(ConnectionIntent::Reject { reason: "Unauthorized client refused.".into() });
                    }
                    let challenge = match &self.signer {
                        Some(signer) => signer.create_challenge(auth.as_bytes()),
                        None => b"placeholder-challenge".to_vec(),
                    };
                    let data = String::from_utf8_lossy(&challenge).into_owned();
                    transport.send_control(HandshakeReply::sign(data).to_bytes()).await?;
                    state = HandshakeState::AwaitType;
                }
                (HandshakeState::AwaitAuth, HandshakeMessage::ConnectionType { .. }) => {
                    return Ok(ConnectionIntent::Reject { reason: "Unauthorized client refused.".into() });
                }
                (HandshakeState::AwaitType, HandshakeMessage::ConnectionType {
                    signed_data,
                    commit,
                    is_built,
                    desired_connection_type,
                    args,
                }) => {
                    if let (Some(ours), Some(theirs)) = (&self.build_commit, &commit) {
                        if ours != theirs {
                            return Ok(ConnectionIntent::Reject { reason: "Version mismatch, client refused.".into() });
                        }
                    }

                    let token_valid = signed_data == self.connection_token
                        || self.signer.as_ref().is_some_and(|s| s.validate(signed_data.as_bytes()));

                    if !token_valid {
                        if is_built {
                            return Ok(ConnectionIntent::Reject { reason: "Unauthorized client refused.".into() });
                        }
                        tracing::warn!("dev-mode client proceeding with unsigned connectionType");
                    }

                    return Ok(ConnectionIntent::resolve(&desired_connection_type, query_token, query_is_reconnection, args));
                }
                (HandshakeState::AwaitType, HandshakeMessage::Auth { .. }) => {
                    return Ok(ConnectionIntent::Reject { reason: "Unknown initial data received.".into() });
                }
            }
        }
    }
}
