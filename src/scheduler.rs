use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    config::ServerConfig,
    data_model::{ReleaseOutcome, StartKind, Strategy, StrategyCell},
    driver::{ContainerDriver, InvokeError, LaunchedContainer},
    pool::{AcquireError, Acquired, FunctionPool},
    stats::Stats,
};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Acquire(#[from] AcquireError),
    #[error("invocation transport failure: {0}")]
    Transport(String),
}

/// Outcome of a dispatched invocation. Function-level errors (non-2xx)
/// surface here with the upstream status; only acquisition and transport
/// failures are `DispatchError`s.
#[derive(Debug)]
pub struct InvokeReply {
    pub status: u16,
    pub body: Vec<u8>,
    pub container_id: String,
    pub execution_time_ms: u64,
}

/// Releases an acquired container on every exit path, including a dropped
/// dispatch future.
struct ReleaseGuard {
    pool: Arc<FunctionPool>,
    container_id: String,
    armed: bool,
}

impl ReleaseGuard {
    fn new(pool: Arc<FunctionPool>, container_id: String) -> Self {
        Self {
            pool,
            container_id,
            armed: true,
        }
    }

    fn release(mut self, outcome: ReleaseOutcome) {
        self.armed = false;
        self.pool.clone().release(&self.container_id, outcome);
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if self.armed {
            self.pool
                .clone()
                .release(&self.container_id, ReleaseOutcome::Completed);
        }
    }
}

/// Maps function ids to pools, owns the active reuse strategy and the
/// dispatch counters. Pools are created on first reference and live until
/// process exit.
pub struct Scheduler {
    driver: Arc<dyn ContainerDriver>,
    pools: RwLock<HashMap<String, Arc<FunctionPool>>>,
    strategy: StrategyCell,
    stats: Stats,
    image: String,
    default_cap: usize,
    launch_retries: u32,
}

impl Scheduler {
    pub fn new(config: &ServerConfig, driver: Arc<dyn ContainerDriver>) -> Arc<Self> {
        let scheduler = Self {
            driver: driver.clone(),
            pools: RwLock::new(HashMap::new()),
            strategy: StrategyCell::new(config.initial_strategy),
            stats: Stats::default(),
            image: config.image.clone(),
            default_cap: config.default_concurrency_cap,
            launch_retries: config.launch_retries,
        };
        {
            let mut pools = scheduler.pools.write();
            for (function_id, cap) in &config.preconfigured_pools {
                pools.insert(
                    function_id.clone(),
                    FunctionPool::new(
                        function_id.clone(),
                        *cap,
                        config.image.clone(),
                        config.launch_retries,
                        driver.clone(),
                    ),
                );
            }
        }
        Arc::new(scheduler)
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy.load()
    }

    pub fn set_strategy(&self, strategy: Strategy) {
        info!(strategy = %strategy, "reuse strategy changed");
        self.strategy.store(strategy);
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Resolve the pool for a function, creating it with the default cap
    /// on first reference. Concurrent dispatches for the same unknown
    /// function observe the same pool.
    pub fn pool(&self, function_id: &str) -> Arc<FunctionPool> {
        if let Some(pool) = self.pools.read().get(function_id) {
            return pool.clone();
        }
        self.pools
            .write()
            .entry(function_id.to_string())
            .or_insert_with(|| {
                info!(
                    function_id = %function_id,
                    concurrency_cap = self.default_cap,
                    "creating pool"
                );
                FunctionPool::new(
                    function_id,
                    self.default_cap,
                    self.image.clone(),
                    self.launch_retries,
                    self.driver.clone(),
                )
            })
            .clone()
    }

    /// Pools at this instant, snapshotted under the registry lock so a
    /// caller iterates without holding it.
    pub fn pools_snapshot(&self) -> Vec<Arc<FunctionPool>> {
        self.pools.read().values().cloned().collect()
    }

    /// Drive one invocation end to end: acquire, invoke, release.
    pub async fn dispatch(&self, function_id: &str) -> Result<InvokeReply, DispatchError> {
        let request_id = nanoid::nanoid!();
        let pool = self.pool(function_id);
        let strategy = self.strategy();

        let (container, kind) = match pool.clone().acquire(strategy).await {
            Ok(Acquired::Ready { container, kind }) => (container, kind),
            Ok(Acquired::Queued(ticket)) => {
                self.stats.record_queued(function_id);
                debug!(
                    request_id = %request_id,
                    function_id = %function_id,
                    "pool at capacity, queued"
                );
                match ticket.wait().await {
                    Ok(handed) => handed,
                    Err(e) => {
                        self.stats.record_failed(function_id);
                        return Err(e.into());
                    }
                }
            }
            Err(e) => {
                self.stats.record_failed(function_id);
                return Err(e.into());
            }
        };
        match kind {
            StartKind::Cold => self.stats.record_cold_start(function_id),
            StartKind::Warm => self.stats.record_warm_start(function_id),
        }
        debug!(
            request_id = %request_id,
            function_id = %function_id,
            container_id = %container.id,
            start_kind = ?kind,
            "dispatching invocation"
        );

        let guard = ReleaseGuard::new(pool, container.id.clone());
        let handle = LaunchedContainer {
            id: container.id.clone(),
            endpoint: container.endpoint.clone(),
        };
        let started = Instant::now();
        match self.driver.invoke(&handle, &[]).await {
            Ok(output) => {
                let execution_time_ms = started.elapsed().as_millis() as u64;
                guard.release(ReleaseOutcome::Completed);
                Ok(InvokeReply {
                    status: output.status,
                    body: output.body,
                    container_id: container.id,
                    execution_time_ms,
                })
            }
            Err(InvokeError::Upstream { status, body }) => {
                let execution_time_ms = started.elapsed().as_millis() as u64;
                guard.release(ReleaseOutcome::Completed);
                Ok(InvokeReply {
                    status,
                    body,
                    container_id: container.id,
                    execution_time_ms,
                })
            }
            Err(e @ InvokeError::Transport { .. }) => {
                warn!(
                    request_id = %request_id,
                    function_id = %function_id,
                    container_id = %container.id,
                    error = %e,
                    "invocation transport failure, discarding container"
                );
                guard.release(ReleaseOutcome::ContainerFailed);
                Err(DispatchError::Transport(e.to_string()))
            }
        }
    }

    /// Fail all queued waiters and destroy all idle containers in every
    /// pool. Called after the janitor has stopped.
    pub async fn drain(&self) {
        for pool in self.pools_snapshot() {
            pool.shutdown().await;
        }
    }
}
