//! Background sweeps: expired idempotency records and unflagged SLA breaches.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::engine::TicketEngine;

#[derive(Debug, Clone)]
pub struct CleanupConfig {
    pub idempotency_sweep_secs: u64,
    pub sla_sweep_secs: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            idempotency_sweep_secs: 3600,
            sla_sweep_secs: 300,
        }
    }
}

/// Run one pass of both sweeps. Errors are logged, never propagated.
pub fn run_cleanup_pass(engine: &TicketEngine) {
    purge_idempotency(engine);
    sweep_sla(engine);
}

fn purge_idempotency(engine: &TicketEngine) {
    if let Err(e) = engine.idempotency().purge_expired() {
        tracing::error!("Idempotency cleanup error: {}", e);
    }
}

fn sweep_sla(engine: &TicketEngine) {
    if let Err(e) = engine.sweep_breaches() {
        tracing::error!("SLA sweep error: {}", e);
    }
}

pub fn start_cleanup_service(engine: Arc<TicketEngine>, config: CleanupConfig) -> Vec<JoinHandle<()>> {
    tracing::info!(
        "Cleanup service started (idempotency: {}s, SLA: {}s)",
        config.idempotency_sweep_secs,
        config.sla_sweep_secs
    );

    let idempotency_engine = engine.clone();
    let idempotency = tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(config.idempotency_sweep_secs.max(1)));
        loop {
            ticker.tick().await;
            purge_idempotency(&idempotency_engine);
        }
    });

    let sla = tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(config.sla_sweep_secs.max(1)));
        loop {
            ticker.tick().await;
            sweep_sla(&engine);
        }
    });

    vec![idempotency, sla]
}
