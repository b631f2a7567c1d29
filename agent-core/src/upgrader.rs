//! Listens for HTTP, performs the WebSocket upgrade, and hands the
//! resulting socket plus query parameters off to the handshake machine.
//!
//! Built directly on `hyper::server::conn::http1` plus `hyper::upgrade`
//! (no connection-pooling machinery is needed: every accepted socket is
//! either upgraded once or answered once and dropped).

use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::header::{CONNECTION, UPGRADE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use sha1::{Digest, Sha1};
use tokio::net::TcpStream;

use crate::dispatcher::Dispatcher;
use crate::handshake::HandshakeMachine;
use crate::state::AgentState;
use crate::transport::FramedTransport;

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

pub type Body = http_body_util::combinators::BoxBody<Bytes, Infallible>;

fn full_body(body: impl Into<Bytes>) -> Body {
    Full::new(body.into()).boxed()
}

fn empty_body() -> Body {
    Empty::<Bytes>::new().boxed()
}

/// RFC 6455 §4 accept token: base64(SHA-1(clientKey ⧺ magicGUID)).
pub fn generate_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

fn is_websocket_upgrade<T>(req: &Request<T>) -> bool {
    let headers = req.headers();
    let has_upgrade = headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    let has_connection_upgrade = headers
        .get(CONNECTION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_lowercase().contains("upgrade"));
    has_upgrade && has_connection_upgrade
}

#[derive(Debug, Default, Clone)]
struct UpgradeQuery {
    reconnection_token: Option<String>,
    reconnection: bool,
    skip_websocket_frames: bool,
}

fn parse_upgrade_query(uri: &hyper::Uri) -> UpgradeQuery {
    let mut query = UpgradeQuery::default();
    let Some(raw) = uri.query() else { return query };
    for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
        match key.as_ref() {
            "reconnectionToken" => query.reconnection_token = Some(value.into_owned()),
            "reconnection" => query.reconnection = value == "true",
            "skipWebSocketFrames" => query.skip_websocket_frames = value == "true",
            _ => {}
        }
    }
    query
}

/// Stands in for the out-of-scope static-asset handler; sufficient to
/// exercise the dispatch-to-static-handler path without a templating
/// engine or real asset bundle.
#[async_trait]
pub trait StaticHandler: Send + Sync {
    async fn serve(&self, req: Request<Incoming>) -> Response<Body>;
}

pub struct NotFoundStaticHandler;

#[async_trait]
impl StaticHandler for NotFoundStaticHandler {
    async fn serve(&self, _req: Request<Incoming>) -> Response<Body> {
        Response::builder().status(StatusCode::NOT_FOUND).body(full_body("Not found")).unwrap()
    }
}

async fn handle_request(
    req: Request<Incoming>,
    state: Arc<AgentState>,
    static_handler: Arc<dyn StaticHandler>,
) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::GET {
        let body = format!("Unsupported method {}", req.method());
        return Ok(Response::builder().status(StatusCode::INTERNAL_SERVER_ERROR).body(full_body(body)).unwrap());
    }

    match req.uri().path() {
        "/version" => {
            let commit = state.config.build_commit.clone().unwrap_or_default();
            return Ok(Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "text/html")
                .body(full_body(commit))
                .unwrap());
        }
        "/delay-shutdown" => {
            state.idle.delay_shutdown().await;
            return Ok(Response::builder().status(StatusCode::OK).body(full_body("OK")).unwrap());
        }
        _ => {}
    }

    if !is_websocket_upgrade(&req) {
        return Ok(static_handler.serve(req).await);
    }

    let Some(key) = req.headers().get("sec-websocket-key").and_then(|v| v.to_str().ok()).map(str::to_owned) else {
        return Ok(Response::builder().status(StatusCode::BAD_REQUEST).body(full_body("missing Sec-WebSocket-Key")).unwrap());
    };

    let query = parse_upgrade_query(req.uri());
    let accept = generate_accept_key(&key);

    let response = Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(CONNECTION, "Upgrade")
        .header(UPGRADE, "websocket")
        .header("Sec-WebSocket-Accept", accept)
        .body(empty_body())
        .unwrap();

    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                let io = TokioIo::new(upgraded);
                if let Err(e) = run_handshake_and_dispatch(io, query, state).await {
                    tracing::warn!(error = %e, "connection-plane handshake/dispatch failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "websocket upgrade failed"),
        }
    });

    Ok(response)
}

async fn run_handshake_and_dispatch(
    io: crate::transport::Io,
    query: UpgradeQuery,
    state: Arc<AgentState>,
) -> crate::error::AgentResult<()> {
    let transport = if query.skip_websocket_frames {
        Arc::new(FramedTransport::new_raw(io))
    } else {
        Arc::new(FramedTransport::new_websocket(io).await)
    };

    let token = query.reconnection_token.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let machine = HandshakeMachine::new(state.config.connection_token.clone(), state.config.build_commit.clone(), state.signer.clone());
    let intent = machine.run(&transport, token, query.reconnection).await?;

    let dispatcher = Dispatcher::new(Arc::clone(&state));
    dispatcher.dispatch(intent, transport).await
}

/// Accept-loop entry point: drive one HTTP/1.1 connection to completion,
/// routing requests and upgrades per the table above.
pub async fn serve_connection(stream: TcpStream, state: Arc<AgentState>, static_handler: Arc<dyn StaticHandler>) {
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| {
        let state = Arc::clone(&state);
        let static_handler = Arc::clone(&static_handler);
        async move { handle_request(req, state, static_handler).await }
    });

    if let Err(e) = http1::Builder::new().serve_connection(io, service).with_upgrades().await {
        tracing::debug!(error = %e, "connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_key_matches_rfc6455_example() {
        // The worked example from RFC 6455 section 1.3.
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        assert_eq!(generate_accept_key(key), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn upgrade_header_detection_requires_both_headers() {
        let req = Request::builder()
            .header(UPGRADE, "websocket")
            .body(())
            .unwrap();
        assert!(!is_websocket_upgrade(&req));

        let req = Request::builder()
            .header(UPGRADE, "websocket")
            .header(CONNECTION, "Upgrade")
            .body(())
            .unwrap();
        assert!(is_websocket_upgrade(&req));
    }

    #[test]
    fn query_parsing_defaults_when_absent() {
        let uri: hyper::Uri = "/".parse().unwrap();
        let query = parse_upgrade_query(&uri);
        assert_eq!(query.reconnection_token, None);
        assert!(!query.reconnection);
        assert!(!query.skip_websocket_frames);
    }

    #[test]
    fn query_parsing_reads_all_three_params() {
        let uri: hyper::Uri = "/?reconnectionToken=abc&reconnection=true&skipWebSocketFrames=true".parse().unwrap();
        let query = parse_upgrade_query(&uri);
        assert_eq!(query.reconnection_token.as_deref(), Some("abc"));
        assert!(query.reconnection);
        assert!(query.skip_websocket_frames);
    }

    #[test]
    fn empty_reconnection_token_is_present_but_empty() {
        let uri: hyper::Uri = "/?reconnectionToken=".parse().unwrap();
        let query = parse_upgrade_query(&uri);
        assert_eq!(query.reconnection_token.as_deref(), Some(""));
    }
}
