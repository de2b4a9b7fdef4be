//! Container lifecycle management for sanity-test runs.
//!
//! A [`ContainerGuard`] owns one container from name reservation to
//! removal. [`ContainerManager::run`] drives it through
//! create → start → wait → inspect and releases it on every exit path.
//! A guard dropped without being released (panic, cancelled future)
//! schedules a forced removal from its `Drop`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CommandError, DockerError, InfrastructureError};
use crate::execution::docker_client::{BindMount, ContainerConfig, ContainerStatusInfo, DockerClient};
use crate::execution::image::ImageHandle;
use crate::matrix::RunStatus;

/// Default upper bound for one container run.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(3600);

/// Lifecycle state of a managed container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerState {
    /// Name reserved, nothing created in the runtime yet.
    Pending,
    /// Created in the runtime but not started.
    Created,
    /// Started and not yet observed to exit.
    Running,
    /// Observed to exit; holds the exit code text the runtime printed.
    Exited(String),
    /// No observable terminal state could be established.
    InfrastructureError(String),
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerState::Pending => write!(f, "pending"),
            ContainerState::Created => write!(f, "created"),
            ContainerState::Running => write!(f, "running"),
            ContainerState::Exited(code) => write!(f, "exited({})", code),
            ContainerState::InfrastructureError(msg) => write!(f, "infrastructure error: {}", msg),
        }
    }
}

/// A named container and its lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub name: String,
    pub image: String,
    pub state: ContainerState,
}

/// Terminal state read back from the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerExit {
    pub status: ContainerStatusInfo,
    /// Exit code exactly as printed by the runtime (trimmed).
    pub exit_code: String,
}

impl ContainerExit {
    /// Numeric exit code, when the runtime printed an integer.
    pub fn code(&self) -> Option<i64> {
        self.exit_code.parse().ok()
    }
}

/// Everything observed about one container run.
#[derive(Debug)]
pub struct ContainerOutcome {
    pub name: String,
    pub result: Result<ContainerExit, InfrastructureError>,
    /// Container log, fetched when the run did not exit 0.
    pub logs: Option<String>,
}

/// Scoped ownership of one container.
///
/// Call [`ContainerGuard::release`] when done; it stops and removes the
/// container exactly once.
#[derive(Debug)]
pub struct ContainerGuard {
    handle: ContainerHandle,
    config: ContainerConfig,
    client: DockerClient,
    run_timeout: Duration,
    released: bool,
}

impl ContainerGuard {
    /// The container's handle.
    pub fn handle(&self) -> &ContainerHandle {
        &self.handle
    }

    /// Container name.
    pub fn name(&self) -> &str {
        &self.handle.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> &ContainerState {
        &self.handle.state
    }

    /// Whether the container has been released.
    pub fn is_released(&self) -> bool {
        self.released
    }

    fn require(&self, expected: ContainerState, action: &'static str) -> Result<(), InfrastructureError> {
        if self.handle.state == expected {
            Ok(())
        } else {
            Err(InfrastructureError::InvalidState {
                container: self.handle.name.clone(),
                action,
                state: self.handle.state.to_string(),
            })
        }
    }

    fn fail(&mut self, error: InfrastructureError) -> InfrastructureError {
        self.handle.state = ContainerState::InfrastructureError(error.to_string());
        error
    }

    /// Creates and starts the container: Pending → Created → Running.
    pub async fn start(&mut self) -> Result<(), InfrastructureError> {
        self.require(ContainerState::Pending, "start")?;

        if let Err(source) = self.client.create_container(&self.config).await {
            return Err(self.fail(InfrastructureError::Create {
                container: self.handle.name.clone(),
                source,
            }));
        }
        self.handle.state = ContainerState::Created;

        if let Err(source) = self.client.start_container(&self.handle.name).await {
            return Err(self.fail(InfrastructureError::Start {
                container: self.handle.name.clone(),
                source,
            }));
        }
        self.handle.state = ContainerState::Running;
        tracing::info!(container = %self.handle.name, image = %self.handle.image, "Container started");
        Ok(())
    }

    /// Blocks until the container stops or the run timeout elapses.
    pub async fn wait(&mut self) -> Result<(), InfrastructureError> {
        self.require(ContainerState::Running, "wait for")?;

        let waited = self
            .client
            .wait_container(&self.handle.name, self.run_timeout)
            .await;
        match waited {
            Ok(code) => {
                tracing::debug!(container = %self.handle.name, exit_code = ?code, "Container stopped");
                Ok(())
            }
            Err(DockerError::Command(CommandError::TimedOut { .. })) => {
                Err(self.fail(InfrastructureError::WaitTimedOut {
                    container: self.handle.name.clone(),
                    seconds: self.run_timeout.as_secs(),
                }))
            }
            Err(source) => Err(self.fail(InfrastructureError::Wait {
                container: self.handle.name.clone(),
                source,
            })),
        }
    }

    /// Reads the terminal state. Anything short of `exited` with an exit
    /// code is an infrastructure error.
    pub async fn status(&mut self) -> Result<ContainerExit, InfrastructureError> {
        if !matches!(
            self.handle.state,
            ContainerState::Running | ContainerState::Exited(_)
        ) {
            return Err(InfrastructureError::InvalidState {
                container: self.handle.name.clone(),
                action: "read the status of",
                state: self.handle.state.to_string(),
            });
        }

        let name = self.handle.name.clone();
        let inspected = self.client.inspect_state(&name).await;
        let inspected = match inspected {
            Ok(Some(state)) => state,
            Ok(None) => return Err(self.fail(InfrastructureError::NoState { container: name })),
            Err(source) => {
                return Err(self.fail(InfrastructureError::Inspect {
                    container: name,
                    source,
                }))
            }
        };

        if inspected.status != ContainerStatusInfo::Exited {
            return Err(self.fail(InfrastructureError::NotExited {
                container: name,
                state: inspected.status.to_string(),
            }));
        }

        let Some(exit_code) = inspected.exit_code else {
            return Err(self.fail(InfrastructureError::MissingExitCode { container: name }));
        };

        self.handle.state = ContainerState::Exited(exit_code.clone());
        Ok(ContainerExit {
            status: inspected.status,
            exit_code,
        })
    }

    /// Fetches the container log.
    pub async fn logs(&self) -> Result<String, DockerError> {
        self.client.logs(&self.handle.name).await
    }

    /// Stops the container. Idempotent.
    pub async fn stop(&self) -> Result<(), DockerError> {
        self.client.stop_container(&self.handle.name).await
    }

    /// Removes the container. Idempotent.
    pub async fn remove(&self) -> Result<(), DockerError> {
        self.client.remove_container(&self.handle.name, false).await
    }

    /// Stops and removes the container. Runs at most once per guard.
    pub async fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        tracing::debug!(container = %self.handle.name, "Stopping container");
        if let Err(e) = self.stop().await {
            tracing::warn!(container = %self.handle.name, error = %e, "Failed to stop container");
        }

        tracing::debug!(container = %self.handle.name, "Removing container");
        if let Err(e) = self.remove().await {
            tracing::warn!(container = %self.handle.name, error = %e, "Failed to remove container");
        }
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        tracing::warn!(container = %self.handle.name, "Container was not released, forcing removal");

        let client = self.client.clone();
        let name = self.handle.name.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = client.remove_container(&name, true).await {
                        tracing::warn!(container = %name, error = %e, "Forced removal failed");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(container = %name, "No async runtime available; container left behind");
            }
        }
    }
}

/// Creates containers for an image and runs them to completion.
#[derive(Debug, Clone)]
pub struct ContainerManager {
    client: DockerClient,
    network_mode: Option<String>,
    run_timeout: Duration,
}

impl ContainerManager {
    pub fn new(client: DockerClient) -> Self {
        Self {
            client,
            network_mode: Some("host".to_string()),
            run_timeout: DEFAULT_RUN_TIMEOUT,
        }
    }

    /// Sets the container network mode (`None` for the runtime default).
    pub fn with_network_mode(mut self, mode: Option<String>) -> Self {
        self.network_mode = mode;
        self
    }

    /// Sets the bound on a single container run.
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    /// Reserves `name` for a container of `image`. Nothing is created
    /// in the runtime until [`ContainerGuard::start`].
    pub fn create_container(
        &self,
        image: &ImageHandle,
        name: &str,
        env: &[(String, String)],
        mount: &BindMount,
    ) -> ContainerGuard {
        let mut config = ContainerConfig::new(name, &image.name).with_mount(mount.clone());
        for (key, value) in env {
            config = config.with_env(key, value);
        }
        if let Some(mode) = &self.network_mode {
            config = config.with_network_mode(mode);
        }

        ContainerGuard {
            handle: ContainerHandle {
                name: name.to_string(),
                image: image.name.clone(),
                state: ContainerState::Pending,
            },
            config,
            client: self.client.clone(),
            run_timeout: self.run_timeout,
            released: false,
        }
    }

    /// Runs one container to completion and always releases it.
    pub async fn run(
        &self,
        image: &ImageHandle,
        name: &str,
        env: &[(String, String)],
        mount: &BindMount,
    ) -> ContainerOutcome {
        let mut container = self.create_container(image, name, env, mount);

        let result = run_to_exit(&mut container).await;

        let logs = match &result {
            Ok(exit) if RunStatus::from_exit_text(Some(&exit.exit_code)) == RunStatus::Passed => {
                None
            }
            _ => match container.logs().await {
                Ok(logs) => Some(logs),
                Err(e) => {
                    tracing::debug!(container = %name, error = %e, "Failed to fetch container logs");
                    None
                }
            },
        };

        container.release().await;

        ContainerOutcome {
            name: name.to_string(),
            result,
            logs,
        }
    }
}

async fn run_to_exit(container: &mut ContainerGuard) -> Result<ContainerExit, InfrastructureError> {
    container.start().await?;
    container.wait().await?;
    container.status().await
}
