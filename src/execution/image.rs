//! Test image builds and teardown.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::BuildError;
use crate::execution::docker_client::DockerClient;

/// Default upper bound for a single image build.
pub const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(3600);

/// A built image, owned for the duration of one toolchain sub-matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHandle {
    /// Image name (tag).
    pub name: String,
    /// False once the image has been torn down.
    pub built: bool,
}

/// Builds images from a Dockerfile and removes them afterwards.
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    client: DockerClient,
    context: PathBuf,
    network_mode: Option<String>,
    build_timeout: Duration,
}

impl ImageBuilder {
    /// Creates a builder using `context` as the build context.
    pub fn new(client: DockerClient, context: impl Into<PathBuf>) -> Self {
        Self {
            client,
            context: context.into(),
            network_mode: Some("host".to_string()),
            build_timeout: DEFAULT_BUILD_TIMEOUT,
        }
    }

    /// Sets the network mode used during the build (`None` for the runtime default).
    pub fn with_network_mode(mut self, mode: Option<String>) -> Self {
        self.network_mode = mode;
        self
    }

    /// Sets the build timeout.
    pub fn with_build_timeout(mut self, timeout: Duration) -> Self {
        self.build_timeout = timeout;
        self
    }

    /// Builds image `name` from `dockerfile`, passing `build_args` through.
    ///
    /// On failure any partially created image is removed (best-effort)
    /// and the captured stderr is returned in the error.
    pub async fn build(
        &self,
        name: &str,
        dockerfile: &Path,
        build_args: &BTreeMap<String, String>,
    ) -> Result<ImageHandle, BuildError> {
        tracing::info!(image = %name, dockerfile = %dockerfile.display(), "Building image");

        let result = self
            .client
            .build_image(
                name,
                dockerfile,
                &self.context,
                build_args,
                self.network_mode.as_deref(),
                self.build_timeout,
            )
            .await;

        let error = match result {
            Ok(output) if output.success() => {
                tracing::info!(image = %name, duration_ms = output.duration_ms, "Image built");
                return Ok(ImageHandle {
                    name: name.to_string(),
                    built: true,
                });
            }
            Ok(output) => BuildError::Failed {
                image: name.to_string(),
                code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            },
            Err(source) => BuildError::Command {
                image: name.to_string(),
                source,
            },
        };

        tracing::error!(image = %name, error = %error, "Image build failed");
        if let Err(e) = self.client.remove_image(name).await {
            tracing::debug!(image = %name, error = %e, "Failed to remove partial image");
        }
        Err(error)
    }

    /// Removes the image. Safe to call repeatedly.
    pub async fn teardown(&self, handle: &mut ImageHandle) {
        if !handle.built {
            return;
        }
        tracing::info!(image = %handle.name, "Removing image");
        if let Err(e) = self.client.remove_image(&handle.name).await {
            tracing::warn!(image = %handle.name, error = %e, "Failed to remove image");
        }
        handle.built = false;
    }
}
