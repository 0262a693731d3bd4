//! Connection counters, health status and the periodic diagnostics reporter.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use humansize::{BINARY, format_size};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::db::client::DbClient;

/// In-flight and lifetime operation counts. Observability only; nothing is
/// ever blocked on them.
#[derive(Debug)]
pub struct ConnectionCounters {
    active: AtomicUsize,
    total: AtomicUsize,
    leak_warning_threshold: usize,
}

impl ConnectionCounters {
    pub fn new(leak_warning_threshold: usize) -> Self {
        Self {
            active: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            leak_warning_threshold,
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }

    /// Count one operation as in flight until the guard drops.
    pub fn acquire(self: &Arc<Self>) -> ConnectionGuard {
        let active = self.active.fetch_add(1, Ordering::AcqRel) + 1;
        self.total.fetch_add(1, Ordering::AcqRel);
        if active > self.leak_warning_threshold {
            warn!(
                active,
                threshold = self.leak_warning_threshold,
                "Active connection count above threshold, possible leak"
            );
        }
        ConnectionGuard {
            counters: Arc::clone(self),
        }
    }

    /// Saturates at 0.
    fn release(&self) {
        let result = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                Some(count.saturating_sub(1))
            });
        if result == Ok(0) {
            warn!("Connection counter released below zero");
        }
    }
}

/// Decrements `active` on drop, including on error paths and cancellation.
#[must_use = "the operation is only counted while the guard is alive"]
#[derive(Debug)]
pub struct ConnectionGuard {
    counters: Arc<ConnectionCounters>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counters.release();
    }
}

/// Result of a health check. Never an error; failures are data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub active_connections: usize,
    pub total_connections: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// =============================================================================
// Diagnostics reporter
// =============================================================================

/// Periodically logs memory use, counters and pool state.
///
/// The task stops when this handle is dropped or the client shuts down.
#[derive(Debug)]
pub struct DiagnosticsReporter {
    handle: JoinHandle<()>,
}

impl DiagnosticsReporter {
    pub fn spawn(client: DbClient, interval: Duration, heap_warning_bytes: u64) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if client.is_shut_down() {
                    debug!("Client shut down, stopping diagnostics");
                    break;
                }
                report(&client, heap_warning_bytes).await;
            }
        });
        Self { handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl Drop for DiagnosticsReporter {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn report(client: &DbClient, heap_warning_bytes: u64) {
    let counters = client.counters();
    let pool = client.pool_state().await;

    match resident_memory_bytes() {
        Some(rss) => {
            if rss > heap_warning_bytes {
                warn!(
                    rss = %format_size(rss, BINARY),
                    threshold = %format_size(heap_warning_bytes, BINARY),
                    "Resident memory above threshold"
                );
            }
            info!(
                rss = %format_size(rss, BINARY),
                active = counters.active(),
                total = counters.total(),
                pool_size = pool.size,
                pool_idle = pool.idle,
                "Diagnostics"
            );
        }
        None => info!(
            active = counters.active(),
            total = counters.total(),
            pool_size = pool.size,
            pool_idle = pool.idle,
            "Diagnostics"
        ),
    }
}

/// `VmRSS` from `/proc/self/status`; `None` off Linux.
pub fn resident_memory_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss(&status)
}

fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb * 1024)
}
