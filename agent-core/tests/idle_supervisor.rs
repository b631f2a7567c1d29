//! IdleSupervisor cancel/fire semantics, driven with paused virtual time so
//! the five-minute grace period doesn't actually elapse in real time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agent_core::idle::{IdleSupervisor, ShutdownSink, SHUTDOWN_TIMEOUT};
use agent_core::registry::ConnectionRegistry;

#[derive(Default)]
struct RecordingSink {
    called: AtomicBool,
}

impl ShutdownSink for RecordingSink {
    fn shutdown(&self) {
        self.called.store(true, Ordering::SeqCst);
    }
}

#[tokio::test(start_paused = true)]
async fn fires_after_grace_period_with_no_hosts_remaining() {
    let registry = Arc::new(ConnectionRegistry::new());
    let sink = Arc::new(RecordingSink::default());
    let idle = IdleSupervisor::new(true, Arc::clone(&registry), Arc::clone(&sink) as Arc<dyn ShutdownSink>);

    idle.on_extension_host_closed().await;
    tokio::time::advance(SHUTDOWN_TIMEOUT + Duration::from_secs(1)).await;
    tokio::task::yield_now().await;

    assert!(sink.called.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn opening_a_host_before_the_timer_fires_cancels_it() {
    let registry = Arc::new(ConnectionRegistry::new());
    let sink = Arc::new(RecordingSink::default());
    let idle = IdleSupervisor::new(true, Arc::clone(&registry), Arc::clone(&sink) as Arc<dyn ShutdownSink>);

    idle.on_extension_host_closed().await;
    tokio::time::advance(SHUTDOWN_TIMEOUT - Duration::from_secs(1)).await;
    idle.on_extension_host_opened().await;
    tokio::time::advance(Duration::from_secs(2)).await;
    tokio::task::yield_now().await;

    assert!(!sink.called.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn disabled_supervisor_never_fires() {
    let registry = Arc::new(ConnectionRegistry::new());
    let sink = Arc::new(RecordingSink::default());
    let idle = IdleSupervisor::new(false, Arc::clone(&registry), Arc::clone(&sink) as Arc<dyn ShutdownSink>);

    idle.on_extension_host_closed().await;
    tokio::time::advance(SHUTDOWN_TIMEOUT * 2).await;
    tokio::task::yield_now().await;

    assert!(!sink.called.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn delay_shutdown_is_a_no_op_without_a_pending_timer() {
    let registry = Arc::new(ConnectionRegistry::new());
    let sink = Arc::new(RecordingSink::default());
    let idle = IdleSupervisor::new(true, Arc::clone(&registry), Arc::clone(&sink) as Arc<dyn ShutdownSink>);

    // No close has happened yet, so no timer is pending.
    idle.delay_shutdown().await;
    tokio::time::advance(SHUTDOWN_TIMEOUT + Duration::from_secs(1)).await;
    tokio::task::yield_now().await;

    assert!(!sink.called.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn delay_shutdown_restarts_a_pending_timer() {
    let registry = Arc::new(ConnectionRegistry::new());
    let sink = Arc::new(RecordingSink::default());
    let idle = IdleSupervisor::new(true, Arc::clone(&registry), Arc::clone(&sink) as Arc<dyn ShutdownSink>);

    idle.on_extension_host_closed().await;
    tokio::time::advance(SHUTDOWN_TIMEOUT - Duration::from_secs(1)).await;
    idle.delay_shutdown().await;
    // Had the timer not been restarted, it would have fired by now.
    tokio::time::advance(Duration::from_secs(2)).await;
    tokio::task::yield_now().await;
    assert!(!sink.called.load(Ordering::SeqCst));

    tokio::time::advance(SHUTDOWN_TIMEOUT).await;
    tokio::task::yield_now().await;
    assert!(sink.called.load(Ordering::SeqCst));
}
