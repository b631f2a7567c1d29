use std::sync::Arc;

use agent_core::config::AgentConfig;
use agent_core::extension_host::NullExtensionHostFactory;
use agent_core::idle::{IdleSupervisor, ProcessExitSink};
use agent_core::registry::ConnectionRegistry;
use agent_core::state::AgentState;
use agent_core::upgrader::{self, NotFoundStaticHandler};
use clap::Parser;
use tokio::net::TcpListener;

mod logging;

/// Connection-plane binary: HTTP-to-WebSocket upgrade, handshake,
/// connection-type dispatch, reconnection registry, idle shutdown.
#[derive(Parser, Debug)]
#[command(name = "agent", about = "remote agent connection plane")]
struct Args {
    #[arg(long, env = "AGENT_BIND_ADDR", default_value = "0.0.0.0:8000")]
    bind: String,

    #[arg(long, env = "CONNECTION_TOKEN")]
    connection_token: String,

    #[arg(long, env = "ENABLE_REMOTE_AUTO_SHUTDOWN", default_value_t = false)]
    enable_remote_auto_shutdown: bool,

    #[arg(long, env = "BUILD_COMMIT")]
    build_commit: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv_os = if cfg!(target_os = "windows") { ".env.windows" } else { ".env.linux" };
    dotenvy::dotenv().ok();
    dotenvy::from_filename(dotenv_os).ok();

    let _log_guard = logging::init()?;

    let args = Args::parse();
    let config = AgentConfig::new(args.bind.clone(), args.connection_token)?
        .with_auto_shutdown(args.enable_remote_auto_shutdown)
        .with_build_commit(args.build_commit.clone());

    let registry = Arc::new(ConnectionRegistry::new());
    let idle = IdleSupervisor::new(config.enable_remote_auto_shutdown, Arc::clone(&registry), Arc::new(ProcessExitSink));
    let state = AgentState::new(config, registry, idle, None, Arc::new(NullExtensionHostFactory));

    let listener = TcpListener::bind(&state.config.bind_addr).await?;
    let local_addr = listener.local_addr()?;

    // Stable log lines consumed by external orchestration tooling; wording
    // is load-bearing, don't reword.
    tracing::info!("Extension host agent listening on {}", local_addr.port());
    tracing::info!("webview server listening on {}", local_addr.port());
    if args.build_commit.is_some() {
        tracing::info!(
            "Web UI available at http://localhost:{}/#tkn={}",
            local_addr.port(),
            state.config.connection_token
        );
    }

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received shutdown signal");
            let _ = shutdown_tx.send(());
        }
    });

    let static_handler = Arc::new(NotFoundStaticHandler);

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, addr)) => {
                        tracing::debug!(%addr, "accepted connection");
                        let state = Arc::clone(&state);
                        let static_handler = Arc::clone(&static_handler);
                        tokio::spawn(async move {
                            upgrader::serve_connection(stream, state, static_handler).await;
                        });
                    }
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                }
            }
            _ = &mut shutdown_rx => {
                tracing::info!("shutting down");
                break;
            }
        }
    }

    Ok(())
}
