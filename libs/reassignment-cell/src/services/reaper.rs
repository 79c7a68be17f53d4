use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::time::Duration;
use tracing::{debug, info, instrument, warn};

use waitlist_cell::WaitlistStore;

use crate::services::engine::ReassignmentEngine;

/// Drives offer deadlines. An expired pending offer is an implicit
/// decline: the entry re-enters the pool, the slot is freed and immediately
/// re-matched. Releasing goes through the same compare-and-set as a real
/// response, so racing a late acceptance is safe; whoever commits first
/// wins and the loser is a logged no-op.
pub struct OfferReaper {
    engine: Arc<ReassignmentEngine>,
    store: Arc<WaitlistStore>,
    interval: Duration,
    is_shutdown: RwLock<bool>,
}

impl OfferReaper {
    pub fn new(
        engine: Arc<ReassignmentEngine>,
        store: Arc<WaitlistStore>,
        interval_seconds: u64,
    ) -> Self {
        Self {
            engine,
            store,
            interval: Duration::from_secs(interval_seconds.max(1)),
            is_shutdown: RwLock::new(false),
        }
    }

    #[instrument(skip(self))]
    pub async fn start(&self) {
        info!("Offer reaper started (interval {:?})", self.interval);
        loop {
            if *self.is_shutdown.read().await {
                debug!("Offer reaper received shutdown signal");
                break;
            }
            self.run_once(Utc::now()).await;
            tokio::time::sleep(self.interval).await;
        }
        info!("Offer reaper stopped");
    }

    pub async fn shutdown(&self) {
        let mut is_shutdown = self.is_shutdown.write().await;
        *is_shutdown = true;
    }

    /// One sweep over the pending offers. Returns how many were reaped.
    pub async fn run_once(&self, now: DateTime<Utc>) -> usize {
        let expired = self.store.expired_offers(now).await;
        let mut reaped = 0;

        for appointment in expired {
            match self.engine.handle_offer_timeout(&appointment, now).await {
                Ok(_) => {
                    reaped += 1;
                    info!(
                        "Offer {} expired; slot {} re-entered matching",
                        appointment.id, appointment.slot_id
                    );
                }
                Err(e) if e.is_stale() => {
                    debug!(
                        "Offer {} was resolved before the reaper got to it",
                        appointment.id
                    );
                }
                Err(e) => {
                    warn!("Failed to reap offer {}: {}", appointment.id, e);
                }
            }
        }
        reaped
    }
}
