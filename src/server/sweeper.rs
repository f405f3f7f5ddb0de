//! Idle-expiry sweeper.
//!
//! A single task that sleeps until the earliest session expiry, deletes what
//! has expired and goes again. It exits once the registry is empty and is
//! restarted by the next session creation. There is no fixed polling
//! interval.

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::server::registry::SessionRegistry;

/// Starts the sweeper task on `runtime`. Callers must already have moved the
/// registry's sweeper state to Running.
pub(crate) fn spawn(runtime: &Handle, registry: SessionRegistry) -> JoinHandle<()> {
    runtime.spawn(run(registry))
}

async fn run(registry: SessionRegistry) {
    tracing::debug!("expiry sweeper started");
    loop {
        let sweep = registry.sweep_and_plan(Instant::now());
        for token in &sweep.deleted {
            tracing::info!(%token, "timed out idle session");
        }
        let Some(next) = sweep.next_expiry else {
            break;
        };
        tracing::debug!(
            remaining = registry.len(),
            in_ms = next.saturating_duration_since(Instant::now()).as_millis() as u64,
            "expiry sweeper sleeping",
        );
        // A deadline already in the past completes immediately.
        tokio::select! {
            () = tokio::time::sleep_until(next) => {}
            () = registry.earlier_deadline() => {}
        }
    }
    tracing::debug!("no sessions left, expiry sweeper stopped");
}
