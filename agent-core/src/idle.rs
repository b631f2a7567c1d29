//! Tracks active extension-host connections; when the last one closes,
//! schedules process shutdown after a grace period, cancellable.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::registry::ConnectionRegistry;

pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// What happens when the grace period elapses with no extension hosts
/// left. A trait so tests can observe the decision without exiting the
/// test process.
pub trait ShutdownSink: Send + Sync {
    fn shutdown(&self);
}

pub struct ProcessExitSink;

impl ShutdownSink for ProcessExitSink {
    fn shutdown(&self) {
        std::process::exit(0);
    }
}

pub struct IdleSupervisor {
    enabled: bool,
    registry: Arc<ConnectionRegistry>,
    sink: Arc<dyn ShutdownSink>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl IdleSupervisor {
    pub fn new(enabled: bool, registry: Arc<ConnectionRegistry>, sink: Arc<dyn ShutdownSink>) -> Arc<Self> {
        Arc::new(Self { enabled, registry, sink, timer: Mutex::new(None) })
    }

    /// Call whenever an extension-host connection closes. If none remain,
    /// (re)start the shutdown timer; cancelling any timer already pending.
    pub async fn on_extension_host_closed(self: &Arc<Self>) {
        if !self.enabled {
            return;
        }
        if self.registry.extension_host_count() != 0 {
            return;
        }
        self.restart_timer().await;
    }

    /// Call whenever a fresh or resumed extension-host attaches. Cancels
    /// any pending timer, since the agent is no longer idle.
    pub async fn on_extension_host_opened(&self) {
        if !self.enabled {
            return;
        }
        self.cancel_timer().await;
    }

    /// `/delay-shutdown`: if a timer is pending, cancel and restart it; a
    /// no-op otherwise.
    pub async fn delay_shutdown(self: &Arc<Self>) {
        if !self.enabled {
            return;
        }
        let has_timer = self.timer.lock().await.is_some();
        if has_timer {
            self.restart_timer().await;
        }
    }

    async fn cancel_timer(&self) {
        if let Some(handle) = self.timer.lock().await.take() {
            handle.abort();
        }
    }

    async fn restart_timer(self: &Arc<Self>) {
        self.cancel_timer().await;
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(SHUTDOWN_TIMEOUT).await;
            this.fire().await;
        });
        *self.timer.lock().await = Some(handle);
    }

    /// Timer fire: recheck before acting, since a new connection may have
    /// raced in between schedule and fire. Idempotent by construction.
    async fn fire(&self) {
        *self.timer.lock().await = None;
        if self.registry.extension_host_count() == 0 {
            tracing::info!("idle shutdown: no extension hosts remain, exiting");
            self.sink.shutdown();
        } else {
            tracing::info!("idle shutdown timer fired with active extension hosts; ignoring");
        }
    }
}
