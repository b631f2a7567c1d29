//! Tagged-union control messages and the connection intent they resolve to.
//!
//! The wire protocol is duck-typed JSON (`{"type": "...", ...}`); we parse it
//! straight into discriminated Rust enums so the rest of the system never
//! matches on a loose string again.

use serde::{Deserialize, Serialize};

pub type ReconnectionToken = String;

/// `startParams` carried by an `ExtensionHost` connection intent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StartParams {
    pub language: Option<String>,
    #[serde(rename = "debugId")]
    pub debug_id: Option<String>,
    pub port: Option<u16>,
    #[serde(rename = "break")]
    pub brk: Option<bool>,
}

/// Inbound handshake control messages, tagged on `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum HandshakeMessage {
    #[serde(rename = "auth")]
    Auth { auth: String },
    #[serde(rename = "connectionType")]
    ConnectionType {
        #[serde(rename = "signedData")]
        signed_data: String,
        commit: Option<String>,
        #[serde(rename = "isBuilt")]
        is_built: bool,
        #[serde(rename = "desiredConnectionType")]
        desired_connection_type: String,
        /// Shaped differently per `desiredConnectionType` (a `StartParams`
        /// record for `ExtensionHost`, `{port}` for `Tunnel`). An untagged
        /// enum can't disambiguate these on structure alone — every field in
        /// `StartParams` is optional, so `{"port":n}` always matches it
        /// first regardless of variant order. Kept as a raw value and
        /// projected once `desiredConnectionType` is known instead.
        args: Option<serde_json::Value>,
    },
}

/// Outbound control replies.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum HandshakeReply {
    Sign { #[serde(rename = "type")] kind: &'static str, data: String },
    Ok { #[serde(rename = "type")] kind: &'static str },
    ExtensionHostAck { #[serde(rename = "debugPort")] debug_port: Option<u16> },
    Error { #[serde(rename = "type")] kind: &'static str, reason: String },
}

impl HandshakeReply {
    pub fn sign(data: String) -> Self {
        Self::Sign { kind: "sign", data }
    }
    pub fn ok() -> Self {
        Self::Ok { kind: "ok" }
    }
    pub fn ext_host_ack(debug_port: Option<u16>) -> Self {
        Self::ExtensionHostAck { debug_port }
    }
    pub fn error(reason: impl Into<String>) -> Self {
        Self::Error { kind: "error", reason: reason.into() }
    }

    pub fn to_bytes(&self) -> bytes::Bytes {
        bytes::Bytes::from(serde_json::to_vec(self).expect("control reply always serializes"))
    }
}

/// What the handshake resolved into, independent of the wire shapes that
/// produced it.
#[derive(Debug, Clone)]
pub enum ConnectionIntent {
    Management { token: ReconnectionToken, is_reconnection: bool },
    ExtensionHost { token: ReconnectionToken, is_reconnection: bool, start_params: StartParams },
    Tunnel { target_port: u16 },
    Reject { reason: String },
}

impl ConnectionIntent {
    /// Project a validated `connectionType` message into a typed intent.
    /// `token` and `is_reconnection` come from the upgrade query string
    /// (see `agent_core::upgrader`), not from the message body, mirroring
    /// how the original flow threads them through from the HTTP layer.
    pub fn resolve(
        desired_connection_type: &str,
        token: ReconnectionToken,
        is_reconnection: bool,
        args: Option<serde_json::Value>,
    ) -> Self {
        match desired_connection_type {
            "Management" => ConnectionIntent::Management { token, is_reconnection },
            "ExtensionHost" => {
                let start_params = args
                    .and_then(|v| serde_json::from_value::<StartParams>(v).ok())
                    .unwrap_or_default();
                ConnectionIntent::ExtensionHost { token, is_reconnection, start_params }
            }
            "Tunnel" => {
                let target_port = args
                    .as_ref()
                    .and_then(|v| v.get("port"))
                    .and_then(|p| p.as_u64())
                    .map(|p| p as u16)
                    .unwrap_or(0);
                ConnectionIntent::Tunnel { target_port }
            }
            other => ConnectionIntent::Reject {
                reason: format!("Unknown initial data received. ({other})"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn auth_message_parses_from_wire_shape() {
        let msg: HandshakeMessage = serde_json::from_value(json!({"type": "auth", "auth": "secret"})).unwrap();
        assert!(matches!(msg, HandshakeMessage::Auth { auth } if auth == "secret"));
    }

    #[test]
    fn connection_type_message_parses_optional_fields() {
        let msg: HandshakeMessage = serde_json::from_value(json!({
            "type": "connectionType",
            "signedData": "tok",
            "isBuilt": true,
            "desiredConnectionType": "Management"
        }))
        .unwrap();
        match msg {
            HandshakeMessage::ConnectionType { signed_data, commit, .. } => {
                assert_eq!(signed_data, "tok");
                assert_eq!(commit, None);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn error_reply_serializes_with_reason() {
        let reply = HandshakeReply::error("Duplicate reconnection token.");
        let value: Value = serde_json::from_slice(&reply.to_bytes()).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["reason"], "Duplicate reconnection token.");
    }

    #[test]
    fn extension_host_ack_omits_debug_port_when_none() {
        let reply = HandshakeReply::ext_host_ack(None);
        let value: Value = serde_json::from_slice(&reply.to_bytes()).unwrap();
        assert!(value["debugPort"].is_null());
    }

    #[test]
    fn resolve_projects_extension_host_args_into_start_params() {
        let args = Some(json!({"language": "node", "port": 9229}));
        let intent = ConnectionIntent::resolve("ExtensionHost", "tok".into(), false, args);
        match intent {
            ConnectionIntent::ExtensionHost { start_params, .. } => {
                assert_eq!(start_params.language.as_deref(), Some("node"));
                assert_eq!(start_params.port, Some(9229));
            }
            other => panic!("wrong intent: {other:?}"),
        }
    }

    #[test]
    fn resolve_projects_tunnel_args_into_target_port() {
        let args = Some(json!({"port": 8080}));
        let intent = ConnectionIntent::resolve("Tunnel", "tok".into(), false, args);
        assert!(matches!(intent, ConnectionIntent::Tunnel { target_port: 8080 }));
    }

    #[test]
    fn resolve_rejects_unknown_desired_connection_type() {
        let intent = ConnectionIntent::resolve("Bogus", "tok".into(), false, None);
        match intent {
            ConnectionIntent::Reject { reason } => assert!(reason.contains("Unknown initial data received.")),
            other => panic!("wrong intent: {other:?}"),
        }
    }
}
