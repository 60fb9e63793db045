mod docker;

use async_trait::async_trait;
pub use docker::DockerDriver;
use thiserror::Error;

/// Container port the function image serves HTTP on. The driver publishes
/// it to an ephemeral host port at launch.
pub const FUNCTION_PORT: u16 = 5000;

/// Handle to a launched, health-probed container.
#[derive(Debug, Clone)]
pub struct LaunchedContainer {
    /// Identifier understood by the driver (container name for Docker).
    pub id: String,
    /// Host address the function is reachable on, e.g. "127.0.0.1:32768".
    pub endpoint: String,
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("image not found: {0}")]
    ImageMissing(String),
    #[error("container {0} did not become reachable in time")]
    StartTimeout(String),
    #[error("health probe failed for container {id}: {reason}")]
    HealthProbeFailed { id: String, reason: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("transport failure invoking {endpoint}: {message}")]
    Transport { endpoint: String, message: String },
    #[error("function returned status {status}")]
    Upstream { status: u16, body: Vec<u8> },
}

/// Successful (2xx) invocation response.
#[derive(Debug)]
pub struct InvokeOutput {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Capability interface over the container engine. Implementations carry
/// no scheduler state and are safe to call from many concurrent contexts.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    /// Start a container for `function_id` from `image` and block until it
    /// is health-probed and reachable.
    async fn launch(&self, image: &str, function_id: &str)
    -> Result<LaunchedContainer, LaunchError>;

    /// Single request/response against a running container.
    async fn invoke(
        &self,
        handle: &LaunchedContainer,
        payload: &[u8],
    ) -> Result<InvokeOutput, InvokeError>;

    /// Best-effort stop and remove. Idempotent; never raises, failures are
    /// logged by the implementation.
    async fn destroy(&self, container_id: &str);
}
