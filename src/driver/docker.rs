use std::{collections::HashMap, time::Duration};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use bollard::{
    Docker,
    models::{ContainerCreateBody, ContainerStateStatusEnum, HostConfig},
    query_parameters::{
        CreateContainerOptions,
        CreateImageOptions,
        InspectContainerOptions,
        RemoveContainerOptions,
        StartContainerOptions,
    },
};
use futures_util::StreamExt;
use tracing::{debug, info, warn};

use super::{ContainerDriver, FUNCTION_PORT, InvokeError, InvokeOutput, LaunchError, LaunchedContainer};

const PROBE_INTERVAL: Duration = Duration::from_millis(200);

/// Driver over the local Docker engine. Containers are launched with all
/// ports published so the engine assigns an ephemeral host port for the
/// function port; the handle's endpoint is resolved from the port bindings.
pub struct DockerDriver {
    docker: Docker,
    http: reqwest::Client,
    launch_timeout: Duration,
}

impl DockerDriver {
    /// Connect to the Docker daemon. `addr` accepts a unix socket path
    /// (with or without the `unix://` prefix) or an `http://`/`tcp://`
    /// address; absent, the platform defaults are used.
    pub fn new(addr: Option<&str>, launch_timeout: Duration) -> Result<Self> {
        let docker = match addr {
            None => Docker::connect_with_local_defaults()
                .context("failed to connect to Docker daemon")?,
            Some(addr) if addr.starts_with("http://") || addr.starts_with("tcp://") => {
                let addr = addr
                    .trim_start_matches("http://")
                    .trim_start_matches("tcp://");
                Docker::connect_with_http(
                    &format!("http://{}", addr),
                    120,
                    bollard::API_DEFAULT_VERSION,
                )
                .context("failed to connect to Docker daemon via HTTP")?
            }
            Some(addr) => {
                let socket_path = addr.trim_start_matches("unix://");
                Docker::connect_with_socket(socket_path, 120, bollard::API_DEFAULT_VERSION)
                    .context("failed to connect to Docker daemon via Unix socket")?
            }
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            docker,
            http,
            launch_timeout,
        })
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(e).context("failed to inspect image"),
        }
    }

    /// Ensure an image is available locally, pulling it if necessary.
    async fn ensure_image(&self, image: &str) -> Result<(), LaunchError> {
        if self
            .image_exists(image)
            .await
            .map_err(LaunchError::Other)?
        {
            return Ok(());
        }

        info!(image = %image, "pulling image");
        let options = CreateImageOptions {
            from_image: Some(image.to_string()),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            match result {
                Ok(progress) => {
                    if let Some(status) = progress.status {
                        debug!(image = %image, status = %status, "pull progress");
                    }
                }
                Err(bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                }) => {
                    return Err(LaunchError::ImageMissing(image.to_string()));
                }
                Err(e) => {
                    return Err(LaunchError::Other(anyhow!(
                        "failed to pull image {}: {}",
                        image,
                        e
                    )));
                }
            }
        }
        info!(image = %image, "image pull completed");
        Ok(())
    }

    /// Resolve the host endpoint published for the function port.
    async fn resolve_endpoint(&self, container_name: &str) -> Result<String> {
        let inspect = self
            .docker
            .inspect_container(container_name, None::<InspectContainerOptions>)
            .await
            .context("failed to inspect container")?;

        let ports = inspect
            .network_settings
            .and_then(|ns| ns.ports)
            .context("container has no port settings")?;

        let bindings = ports
            .get(&format!("{}/tcp", FUNCTION_PORT))
            .cloned()
            .flatten()
            .unwrap_or_default();
        for binding in bindings {
            if let Some(host_port) = binding.host_port {
                return Ok(format!("127.0.0.1:{}", host_port));
            }
        }
        anyhow::bail!(
            "container {} has no published binding for port {}",
            container_name,
            FUNCTION_PORT
        )
    }

    async fn container_running(&self, container_name: &str) -> bool {
        match self
            .docker
            .inspect_container(container_name, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => inspect
                .state
                .and_then(|s| s.status)
                .map(|status| status == ContainerStateStatusEnum::RUNNING)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Poll the endpoint until the server inside the container answers.
    /// Any HTTP response counts as reachable.
    async fn probe_health(&self, container_name: &str, endpoint: &str) -> Result<(), LaunchError> {
        let url = format!("http://{}/", endpoint);
        let deadline = tokio::time::Instant::now() + self.launch_timeout;
        loop {
            if self.http.get(&url).send().await.is_ok() {
                return Ok(());
            }
            if !self.container_running(container_name).await {
                return Err(LaunchError::HealthProbeFailed {
                    id: container_name.to_string(),
                    reason: "container exited during startup".to_string(),
                });
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(LaunchError::StartTimeout(container_name.to_string()));
            }
            tokio::time::sleep(PROBE_INTERVAL).await;
        }
    }
}

/// Docker container names only allow [a-zA-Z0-9_.-].
fn sanitize_name(function_id: &str) -> String {
    function_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[async_trait]
impl ContainerDriver for DockerDriver {
    async fn launch(
        &self,
        image: &str,
        function_id: &str,
    ) -> Result<LaunchedContainer, LaunchError> {
        self.ensure_image(image).await?;

        let container_name = format!(
            "warmpool-{}-{}",
            sanitize_name(function_id),
            nanoid::nanoid!(8)
        );

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(format!("{}/tcp", FUNCTION_PORT), HashMap::new());
        let config = ContainerCreateBody {
            image: Some(image.to_string()),
            env: Some(vec![format!("FUNCTION_ID={}", function_id)]),
            labels: Some(HashMap::from([(
                "warmpool.function_id".to_string(),
                function_id.to_string(),
            )])),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                publish_all_ports: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };
        let create_options = CreateContainerOptions {
            name: Some(container_name.clone()),
            platform: String::new(),
        };
        self.docker
            .create_container(Some(create_options), config)
            .await
            .with_context(|| format!("failed to create container {}", container_name))?;

        if let Err(e) = self
            .docker
            .start_container(&container_name, None::<StartContainerOptions>)
            .await
        {
            let _ = self
                .docker
                .remove_container(
                    &container_name,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await;
            return Err(LaunchError::Other(
                anyhow!(e).context(format!("failed to start container {}", container_name)),
            ));
        }

        let endpoint = match self.resolve_endpoint(&container_name).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                self.destroy(&container_name).await;
                return Err(LaunchError::Other(e));
            }
        };
        if let Err(e) = self.probe_health(&container_name, &endpoint).await {
            self.destroy(&container_name).await;
            return Err(e);
        }

        info!(
            container_id = %container_name,
            function_id = %function_id,
            endpoint = %endpoint,
            "container launched"
        );
        Ok(LaunchedContainer {
            id: container_name,
            endpoint,
        })
    }

    async fn invoke(
        &self,
        handle: &LaunchedContainer,
        payload: &[u8],
    ) -> Result<InvokeOutput, InvokeError> {
        let url = format!("http://{}/", handle.endpoint);
        let response = self
            .http
            .post(&url)
            .body(payload.to_vec())
            .send()
            .await
            .map_err(|e| InvokeError::Transport {
                endpoint: handle.endpoint.clone(),
                message: e.to_string(),
            })?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| InvokeError::Transport {
                endpoint: handle.endpoint.clone(),
                message: e.to_string(),
            })?
            .to_vec();
        if (200..300).contains(&status) {
            Ok(InvokeOutput { status, body })
        } else {
            Err(InvokeError::Upstream { status, body })
        }
    }

    async fn destroy(&self, container_id: &str) {
        match self
            .docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => {
                info!(container_id = %container_id, "container destroyed");
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!(container_id = %container_id, "container already gone");
            }
            Err(e) => {
                warn!(container_id = %container_id, error = %e, "failed to destroy container");
            }
        }
    }
}
