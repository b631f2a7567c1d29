//! `_updateWithFreeDebugPort` — resolves a free debug port for an
//! extension-host start request, or clears debugging entirely.

use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time::{timeout, Instant};

use crate::intent::StartParams;

const MAX_PORTS_TRIED: u16 = 10;
const PROBE_BUDGET: Duration = Duration::from_secs(5);

/// Probe loopback ports starting at `start`, bind-and-release each
/// candidate to test availability. Collisions are occupied ports, not
/// errors; running out of budget or candidates just means no free port was
/// found.
async fn probe_free_port(start: u16) -> Option<u16> {
    let deadline = Instant::now() + PROBE_BUDGET;
    for offset in 0..MAX_PORTS_TRIED {
        let candidate = start.wrapping_add(offset);
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return None;
        }
        let bind = TcpListener::bind(("127.0.0.1", candidate));
        match timeout(remaining, bind).await {
            Ok(Ok(listener)) => {
                drop(listener);
                return Some(candidate);
            }
            _ => continue,
        }
    }
    None
}

/// Resolve `startParams` in place: if a numeric port was requested, find a
/// free one nearby; otherwise debugging is disabled entirely.
pub async fn update_with_free_debug_port(mut start_params: StartParams) -> StartParams {
    match start_params.port {
        Some(requested) => {
            if let Some(free) = probe_free_port(requested).await {
                start_params.port = Some(free);
            }
            // If none found, leave the originally requested port as-is.
        }
        None => {
            start_params.debug_id = None;
            start_params.port = None;
            start_params.brk = None;
        }
    }
    start_params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn probe_finds_the_requested_port_when_free() {
        // Bind and release first to get a port that's very likely free,
        // then probe starting exactly there.
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let candidate = listener.local_addr().unwrap().port();
        drop(listener);

        let found = probe_free_port(candidate).await;
        assert_eq!(found, Some(candidate));
    }

    #[tokio::test]
    async fn probe_skips_an_occupied_port_for_the_next_free_one() {
        let occupied = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let occupied_port = occupied.local_addr().unwrap().port();

        let found = probe_free_port(occupied_port).await;
        assert!(found.is_some());
        assert_ne!(found, Some(occupied_port));
    }

    #[tokio::test]
    async fn resolving_with_no_port_disables_debugging_entirely() {
        let params = StartParams { language: Some("node".into()), debug_id: Some("d1".into()), port: None, brk: Some(true) };
        let resolved = update_with_free_debug_port(params).await;
        assert_eq!(resolved.debug_id, None);
        assert_eq!(resolved.port, None);
        assert_eq!(resolved.brk, None);
    }

    #[tokio::test]
    async fn resolving_with_a_free_port_keeps_other_fields() {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let candidate = listener.local_addr().unwrap().port();
        drop(listener);

        let params = StartParams { language: Some("node".into()), debug_id: Some("d1".into()), port: Some(candidate), brk: Some(true) };
        let resolved = update_with_free_debug_port(params).await;
        assert_eq!(resolved.language.as_deref(), Some("node"));
        assert_eq!(resolved.debug_id.as_deref(), Some("d1"));
        assert_eq!(resolved.port, Some(candidate));
    }
}
