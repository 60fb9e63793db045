use std::{sync::Arc, time::Duration};

use tokio::{sync::watch, time::Instant};
use tracing::info;

use crate::scheduler::Scheduler;

/// Background task that periodically sweeps every pool and reclaims
/// containers idle for longer than the warm window. The only component
/// that destroys containers outside of dead-container handling.
pub struct Janitor {
    scheduler: Arc<Scheduler>,
    warm_time: Duration,
    period: Duration,
    shutdown_rx: watch::Receiver<()>,
}

impl Janitor {
    pub fn new(
        scheduler: Arc<Scheduler>,
        warm_time: Duration,
        period: Duration,
        shutdown_rx: watch::Receiver<()>,
    ) -> Self {
        Self {
            scheduler,
            warm_time,
            period,
            shutdown_rx,
        }
    }

    pub async fn start(mut self) {
        info!(
            warm_time_secs = self.warm_time.as_secs(),
            period_secs = self.period.as_secs(),
            "janitor started"
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.period) => {
                    self.sweep_all().await;
                }
                _ = self.shutdown_rx.changed() => {
                    info!("janitor received shutdown signal");
                    return;
                }
            }
        }
    }

    async fn sweep_all(&self) {
        // Snapshot the pool set under the registry lock so pools created
        // mid-pass are picked up on the next one.
        let pools = self.scheduler.pools_snapshot();
        let now = Instant::now();
        for pool in pools {
            let reclaimed = pool.clone().sweep(now, self.warm_time).await;
            if reclaimed > 0 {
                info!(
                    function_id = %pool.function_id(),
                    reclaimed,
                    "reclaimed expired containers"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockDriver, test_config};

    #[tokio::test(start_paused = true)]
    async fn janitor_reclaims_after_warm_window() {
        let config = test_config();
        let driver = Arc::new(MockDriver::new());
        let scheduler = Scheduler::new(&config, driver.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(());

        let janitor = Janitor::new(
            scheduler.clone(),
            Duration::from_secs(5),
            Duration::from_secs(1),
            shutdown_rx,
        );
        tokio::spawn(janitor.start());

        scheduler.dispatch("a").await.unwrap();
        assert_eq!(scheduler.pool("a").snapshot().idle, 1);

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(driver.destroyed_ids().len(), 1);
        assert_eq!(scheduler.pool("a").snapshot().idle, 0);

        // Destroyed exactly once, even after further passes.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(driver.destroyed_ids().len(), 1);

        // The warm pool is gone, so the next dispatch is a cold start.
        scheduler.dispatch("a").await.unwrap();
        assert_eq!(scheduler.stats().function_snapshot("a").cold_starts, 2);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test(start_paused = true)]
    async fn janitor_stops_on_shutdown_signal() {
        let config = test_config();
        let driver = Arc::new(MockDriver::new());
        let scheduler = Scheduler::new(&config, driver.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(());

        let janitor = Janitor::new(
            scheduler.clone(),
            Duration::from_secs(5),
            Duration::from_secs(1),
            shutdown_rx,
        );
        let handle = tokio::spawn(janitor.start());

        let _ = shutdown_tx.send(());
        handle.await.unwrap();
    }
}
