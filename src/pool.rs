use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use anyhow::anyhow;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::{sync::oneshot, time::Instant};
use tracing::{debug, error, info, warn};

use crate::{
    data_model::{Container, ContainerState, ReleaseOutcome, StartKind, Strategy},
    driver::{ContainerDriver, LaunchError},
};

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error("pool is shutting down")]
    ShuttingDown,
}

/// Result of a pool acquisition: either a container ready to serve, or a
/// ticket to wait on because the pool is at capacity.
pub enum Acquired {
    Ready {
        container: Container,
        kind: StartKind,
    },
    Queued(WaitTicket),
}

struct Handoff {
    container: Container,
    kind: StartKind,
}

type WaitResult = Result<Handoff, AcquireError>;

struct Waiter {
    id: u64,
    tx: oneshot::Sender<WaitResult>,
}

/// Live gauge of a pool, read under the pool lock.
#[derive(Debug, Clone, Copy)]
pub struct PoolSnapshot {
    pub idle: usize,
    pub busy: usize,
    pub starting: usize,
    pub queue_depth: usize,
    pub concurrency_cap: usize,
}

struct PoolState {
    /// Idle containers ordered by ascending `last_used_at`. LRU picks the
    /// head, MRU the tail; equal timestamps fall back to insertion order.
    idle: VecDeque<Container>,
    busy: HashMap<String, Container>,
    /// Reserved launch slots; counted against the concurrency cap.
    starting: usize,
    /// Containers pulled out of `idle` by a sweep and not yet destroyed.
    reclaiming: usize,
    queue: VecDeque<Waiter>,
    next_waiter_id: u64,
    shutting_down: bool,
}

impl PoolState {
    fn in_flight(&self) -> usize {
        self.idle.len() + self.busy.len() + self.starting + self.reclaiming
    }
}

/// Per-function scheduling unit. Owns the function's containers, enforces
/// the concurrency cap, and queues overflow in FIFO order. The lock guards
/// only in-memory transitions; all driver I/O happens with it released.
pub struct FunctionPool {
    function_id: String,
    concurrency_cap: usize,
    image: String,
    launch_retries: u32,
    driver: Arc<dyn ContainerDriver>,
    state: Mutex<PoolState>,
}

impl FunctionPool {
    pub fn new(
        function_id: impl Into<String>,
        concurrency_cap: usize,
        image: impl Into<String>,
        launch_retries: u32,
        driver: Arc<dyn ContainerDriver>,
    ) -> Arc<Self> {
        Arc::new(Self {
            function_id: function_id.into(),
            concurrency_cap,
            image: image.into(),
            launch_retries,
            driver,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                busy: HashMap::new(),
                starting: 0,
                reclaiming: 0,
                queue: VecDeque::new(),
                next_waiter_id: 0,
                shutting_down: false,
            }),
        })
    }

    pub fn function_id(&self) -> &str {
        &self.function_id
    }

    pub fn concurrency_cap(&self) -> usize {
        self.concurrency_cap
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let st = self.state.lock();
        PoolSnapshot {
            idle: st.idle.len(),
            busy: st.busy.len(),
            starting: st.starting,
            queue_depth: st.queue.len(),
            concurrency_cap: self.concurrency_cap,
        }
    }

    /// Acquire a container: reuse an idle one per `strategy`, launch a new
    /// one if the cap permits, or join the wait queue. The strategy is the
    /// caller's current value, not one latched at pool creation.
    pub async fn acquire(self: Arc<Self>, strategy: Strategy) -> Result<Acquired, AcquireError> {
        {
            let mut st = self.state.lock();
            if st.shutting_down {
                return Err(AcquireError::ShuttingDown);
            }

            let picked = match strategy {
                Strategy::Lru => st.idle.pop_front(),
                Strategy::Mru => st.idle.pop_back(),
            };
            if let Some(mut container) = picked {
                container.state = ContainerState::Busy;
                let handle = container.clone();
                st.busy.insert(container.id.clone(), container);
                return Ok(Acquired::Ready {
                    container: handle,
                    kind: StartKind::Warm,
                });
            }

            if st.in_flight() >= self.concurrency_cap {
                let (tx, rx) = oneshot::channel();
                let id = st.next_waiter_id;
                st.next_waiter_id += 1;
                st.queue.push_back(Waiter { id, tx });
                return Ok(Acquired::Queued(WaitTicket {
                    pool: self.clone(),
                    waiter_id: id,
                    rx: Some(rx),
                }));
            }

            st.starting += 1;
        }

        // Launch in a spawned task so a caller that disappears mid-launch
        // cannot leak the reserved slot or the container it produces.
        let (tx, rx) = oneshot::channel::<Result<Container, AcquireError>>();
        let pool = self.clone();
        tokio::spawn(async move {
            let result = pool.launch_with_retry().await;
            match result {
                Ok(container) => {
                    let handle = {
                        let mut st = pool.state.lock();
                        st.starting -= 1;
                        let mut container = container;
                        container.state = ContainerState::Busy;
                        let handle = container.clone();
                        st.busy.insert(container.id.clone(), container);
                        handle
                    };
                    if let Err(Ok(orphan)) = tx.send(Ok(handle)) {
                        // The acquirer went away; give the container back.
                        pool.clone().release(&orphan.id, ReleaseOutcome::Completed);
                    }
                }
                Err(e) => {
                    {
                        let mut st = pool.state.lock();
                        st.starting -= 1;
                        Self::maybe_promote(&pool, &mut st);
                    }
                    let _ = tx.send(Err(AcquireError::Launch(e)));
                }
            }
        });

        match rx.await {
            Ok(Ok(container)) => Ok(Acquired::Ready {
                container,
                kind: StartKind::Cold,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AcquireError::Launch(LaunchError::Other(anyhow!(
                "launch task dropped"
            )))),
        }
    }

    /// Give a container back after an invocation. A healthy container is
    /// handed directly to the oldest waiter (staying busy, `last_used_at`
    /// untouched) or returned to the idle tail. A dead container is
    /// dropped, and a queued waiter gets a launch attempted on its behalf.
    pub fn release(self: Arc<Self>, container_id: &str, outcome: ReleaseOutcome) {
        let mut st = self.state.lock();
        let Some(mut container) = st.busy.remove(container_id) else {
            drop(st);
            warn!(
                function_id = %self.function_id,
                container_id = %container_id,
                "released container was not tracked as busy"
            );
            return;
        };

        match outcome {
            ReleaseOutcome::ContainerFailed => {
                container.state = ContainerState::Destroyed;
                Self::maybe_promote(&self, &mut st);
                drop(st);
                warn!(
                    function_id = %self.function_id,
                    container_id = %container.id,
                    "dropping dead container"
                );
                let driver = self.driver.clone();
                let id = container.id.clone();
                tokio::spawn(async move { driver.destroy(&id).await });
            }
            ReleaseOutcome::Completed => {
                while let Some(waiter) = st.queue.pop_front() {
                    let handoff = Handoff {
                        container: container.clone(),
                        kind: StartKind::Warm,
                    };
                    if waiter.tx.send(Ok(handoff)).is_ok() {
                        // Handed off without passing through idle.
                        st.busy.insert(container.id.clone(), container);
                        return;
                    }
                    // Waiter cancelled between dequeue and signal; try the
                    // next one.
                }
                if st.shutting_down {
                    drop(st);
                    let driver = self.driver.clone();
                    let id = container.id.clone();
                    tokio::spawn(async move { driver.destroy(&id).await });
                    return;
                }
                container.state = ContainerState::Idle;
                container.last_used_at = Instant::now();
                st.idle.push_back(container);
            }
        }
    }

    /// Reclaim idle containers whose inactivity window has passed. The
    /// idle list is ordered by `last_used_at`, so the scan stops at the
    /// first container still inside the warm window.
    pub async fn sweep(self: Arc<Self>, now: Instant, warm_time: Duration) -> usize {
        let mut expired = {
            let mut st = self.state.lock();
            let mut expired = Vec::new();
            while st
                .idle
                .front()
                .is_some_and(|c| now.duration_since(c.last_used_at) >= warm_time)
            {
                if let Some(mut container) = st.idle.pop_front() {
                    container.state = ContainerState::Reclaiming;
                    expired.push(container);
                }
            }
            st.reclaiming += expired.len();
            expired
        };

        if expired.is_empty() {
            return 0;
        }
        for container in &expired {
            self.driver.destroy(&container.id).await;
        }

        let mut st = self.state.lock();
        st.reclaiming -= expired.len();
        for container in &mut expired {
            container.state = ContainerState::Destroyed;
            debug!(
                function_id = %self.function_id,
                container_id = %container.id,
                "reclaimed idle container"
            );
        }
        // Reclaiming slots counted against the cap; a waiter queued while
        // they drained can launch now.
        Self::maybe_promote(&self, &mut st);
        expired.len()
    }

    /// Stop admitting work: fail all queued waiters and destroy all idle
    /// containers. Busy containers are destroyed as their invocations
    /// release them.
    pub async fn shutdown(&self) {
        let (waiters, idle) = {
            let mut st = self.state.lock();
            st.shutting_down = true;
            let waiters: Vec<Waiter> = st.queue.drain(..).collect();
            let idle: Vec<Container> = st.idle.drain(..).collect();
            (waiters, idle)
        };
        for waiter in waiters {
            let _ = waiter.tx.send(Err(AcquireError::ShuttingDown));
        }
        for container in idle {
            self.driver.destroy(&container.id).await;
        }
        info!(function_id = %self.function_id, "pool drained");
    }

    async fn launch_with_retry(&self) -> Result<Container, LaunchError> {
        let mut attempt = 0;
        loop {
            match self.driver.launch(&self.image, &self.function_id).await {
                Ok(launched) => {
                    return Ok(Container::launched(
                        launched.id,
                        self.function_id.clone(),
                        launched.endpoint,
                    ));
                }
                Err(e @ LaunchError::ImageMissing(_)) => {
                    // A missing image will not appear by retrying.
                    error!(
                        function_id = %self.function_id,
                        error = %e,
                        "container launch failed"
                    );
                    return Err(e);
                }
                Err(e) if attempt < self.launch_retries => {
                    attempt += 1;
                    warn!(
                        function_id = %self.function_id,
                        attempt,
                        error = %e,
                        "container launch failed, retrying"
                    );
                }
                Err(e) => {
                    error!(
                        function_id = %self.function_id,
                        error = %e,
                        "container launch failed"
                    );
                    return Err(e);
                }
            }
        }
    }

    /// With the lock held: if capacity frees up while waiters are queued,
    /// reserve a slot and launch on behalf of the head waiter.
    fn maybe_promote(this: &Arc<Self>, st: &mut PoolState) {
        if st.shutting_down || st.in_flight() >= this.concurrency_cap {
            return;
        }
        let Some(waiter) = st.queue.pop_front() else {
            return;
        };
        st.starting += 1;
        let pool = this.clone();
        tokio::spawn(Self::promote_launch(pool, waiter));
    }

    async fn promote_launch(this: Arc<Self>, waiter: Waiter) {
        let result = this.launch_with_retry().await;
        match result {
            Ok(container) => {
                let handle = {
                    let mut st = this.state.lock();
                    st.starting -= 1;
                    let mut container = container;
                    container.state = ContainerState::Busy;
                    let handle = container.clone();
                    st.busy.insert(container.id.clone(), container);
                    handle
                };
                let handoff = Handoff {
                    container: handle.clone(),
                    kind: StartKind::Cold,
                };
                if waiter.tx.send(Ok(handoff)).is_err() {
                    // Waiter cancelled while we launched for it.
                    this.clone().release(&handle.id, ReleaseOutcome::Completed);
                }
            }
            Err(e) => {
                {
                    let mut st = this.state.lock();
                    st.starting -= 1;
                    Self::maybe_promote(&this, &mut st);
                }
                let _ = waiter.tx.send(Err(AcquireError::Launch(e)));
            }
        }
    }
}

/// A queued acquisition. Awaiting the ticket resolves once a container is
/// handed off or the acquisition fails. Dropping the ticket withdraws the
/// waiter; a handoff that raced the drop is released, never leaked.
pub struct WaitTicket {
    pool: Arc<FunctionPool>,
    waiter_id: u64,
    rx: Option<oneshot::Receiver<WaitResult>>,
}

impl WaitTicket {
    pub async fn wait(mut self) -> Result<(Container, StartKind), AcquireError> {
        let result = match self.rx.as_mut() {
            Some(rx) => rx.await,
            None => return Err(AcquireError::ShuttingDown),
        };
        self.rx = None;
        match result {
            Ok(Ok(handoff)) => Ok((handoff.container, handoff.kind)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AcquireError::Launch(LaunchError::Other(anyhow!(
                "waiter signal dropped"
            )))),
        }
    }
}

impl Drop for WaitTicket {
    fn drop(&mut self) {
        let Some(mut rx) = self.rx.take() else {
            return;
        };
        {
            let mut st = self.pool.state.lock();
            if let Some(pos) = st.queue.iter().position(|w| w.id == self.waiter_id) {
                st.queue.remove(pos);
                // Still queued, so no handoff was in flight.
                return;
            }
        }
        if let Ok(Ok(handoff)) = rx.try_recv() {
            self.pool
                .clone()
                .release(&handoff.container.id, ReleaseOutcome::Completed);
        }
    }
}
