use std::{
    collections::{HashSet, VecDeque},
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    config::ServerConfig,
    driver::{ContainerDriver, InvokeError, InvokeOutput, LaunchError, LaunchedContainer},
};

pub fn test_config() -> ServerConfig {
    ServerConfig {
        image: "test-image:latest".to_string(),
        ..Default::default()
    }
}

/// Deterministic in-memory driver. Launch failures, invocation delays and
/// transport faults are scripted per test; destroys are recorded so tests
/// can assert exactly-once reclamation.
pub struct MockDriver {
    next_id: AtomicU64,
    launch_delay: Mutex<Duration>,
    default_invoke_delay: Mutex<Duration>,
    /// Per-invocation delays consumed in order before falling back to the
    /// default.
    invoke_delays: Mutex<VecDeque<Duration>>,
    fail_launches: Mutex<u32>,
    transport_failures: Mutex<HashSet<String>>,
    upstream_status: Mutex<Option<(u16, Vec<u8>)>>,
    launched: Mutex<Vec<String>>,
    destroyed: Mutex<Vec<String>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            launch_delay: Mutex::new(Duration::ZERO),
            default_invoke_delay: Mutex::new(Duration::ZERO),
            invoke_delays: Mutex::new(VecDeque::new()),
            fail_launches: Mutex::new(0),
            transport_failures: Mutex::new(HashSet::new()),
            upstream_status: Mutex::new(None),
            launched: Mutex::new(Vec::new()),
            destroyed: Mutex::new(Vec::new()),
        }
    }

    pub fn set_launch_delay(&self, delay: Duration) {
        *self.launch_delay.lock() = delay;
    }

    pub fn set_default_invoke_delay(&self, delay: Duration) {
        *self.default_invoke_delay.lock() = delay;
    }

    pub fn push_invoke_delay(&self, delay: Duration) {
        self.invoke_delays.lock().push_back(delay);
    }

    pub fn fail_next_launches(&self, count: u32) {
        *self.fail_launches.lock() = count;
    }

    pub fn fail_transport_once(&self, container_id: &str) {
        self.transport_failures
            .lock()
            .insert(container_id.to_string());
    }

    pub fn set_upstream_status(&self, status: u16, body: Vec<u8>) {
        *self.upstream_status.lock() = Some((status, body));
    }

    pub fn clear_upstream_status(&self) {
        *self.upstream_status.lock() = None;
    }

    pub fn launch_count(&self) -> usize {
        self.launched.lock().len()
    }

    pub fn destroyed_ids(&self) -> Vec<String> {
        self.destroyed.lock().clone()
    }
}

#[async_trait]
impl ContainerDriver for MockDriver {
    async fn launch(
        &self,
        _image: &str,
        _function_id: &str,
    ) -> Result<LaunchedContainer, LaunchError> {
        let delay = *self.launch_delay.lock();
        tokio::time::sleep(delay).await;

        {
            let mut failures = self.fail_launches.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(LaunchError::StartTimeout("mock".to_string()));
            }
        }

        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        let id = format!("mock-{}", n);
        self.launched.lock().push(id.clone());
        Ok(LaunchedContainer {
            id: id.clone(),
            endpoint: format!("127.0.0.1:{}", 42000 + n),
        })
    }

    async fn invoke(
        &self,
        handle: &LaunchedContainer,
        _payload: &[u8],
    ) -> Result<InvokeOutput, InvokeError> {
        let delay = self
            .invoke_delays
            .lock()
            .pop_front()
            .unwrap_or(*self.default_invoke_delay.lock());
        tokio::time::sleep(delay).await;

        if self.transport_failures.lock().remove(&handle.id) {
            return Err(InvokeError::Transport {
                endpoint: handle.endpoint.clone(),
                message: "connection reset".to_string(),
            });
        }
        if let Some((status, body)) = self.upstream_status.lock().clone() {
            if !(200..300).contains(&status) {
                return Err(InvokeError::Upstream { status, body });
            }
            return Ok(InvokeOutput { status, body });
        }
        Ok(InvokeOutput {
            status: 200,
            body: b"{\"message\": \"function executed\"}".to_vec(),
        })
    }

    async fn destroy(&self, container_id: &str) {
        self.destroyed.lock().push(container_id.to_string());
    }
}
