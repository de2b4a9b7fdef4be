//! Container runtime wrapper over the runtime's command-line interface.
//!
//! This module turns runtime operations into argument vectors for a
//! [`CommandRunner`] and interprets their textual output. Containers and
//! images are addressed by name.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{CommandError, DockerError};
use crate::execution::command::{CommandOutput, CommandRunner, CommandSpec};

/// Template passed to `inspect --format`: status and exit code on one line.
pub const STATE_FORMAT: &str = "{{.State.Status}} {{.State.ExitCode}}";

/// Default timeout for short runtime calls (inspect, stop, rm, ...).
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// A host directory bind-mounted into a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    /// Absolute path on the host.
    pub host_path: PathBuf,
    /// Mount point inside the container.
    pub container_path: String,
    /// Mount read-only.
    pub read_only: bool,
}

impl BindMount {
    /// Read-write bind mount of `host_path` at `container_path`.
    pub fn new(host_path: impl Into<PathBuf>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only: false,
        }
    }

    /// Value for `--mount`.
    pub fn to_mount_arg(&self) -> String {
        let mut arg = format!(
            "type=bind,src={},target={}",
            self.host_path.display(),
            self.container_path
        );
        if self.read_only {
            arg.push_str(",readonly");
        }
        arg
    }
}

/// Configuration for creating a new container.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Unique name for the container.
    pub name: String,
    /// Image to create the container from.
    pub image: String,
    /// Environment variables, in the order they are passed.
    pub env: Vec<(String, String)>,
    /// Bind mounts.
    pub mounts: Vec<BindMount>,
    /// Network mode (e.g., "none", "bridge", "host").
    pub network_mode: Option<String>,
}

impl ContainerConfig {
    /// Creates a new container configuration with the given name and image.
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            env: Vec::new(),
            mounts: Vec::new(),
            network_mode: None,
        }
    }

    /// Adds an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Adds a bind mount.
    pub fn with_mount(mut self, mount: BindMount) -> Self {
        self.mounts.push(mount);
        self
    }

    /// Sets the network mode.
    pub fn with_network_mode(mut self, mode: impl Into<String>) -> Self {
        self.network_mode = Some(mode.into());
        self
    }
}

/// Status of a container as reported by `inspect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerStatusInfo {
    /// Container is created but not started.
    Created,
    /// Container is running.
    Running,
    /// Container is paused.
    Paused,
    /// Container is restarting.
    Restarting,
    /// Container has exited.
    Exited,
    /// Container is being removed.
    Removing,
    /// Container is dead.
    Dead,
    /// Unknown status.
    Unknown(String),
}

impl ContainerStatusInfo {
    fn parse(status: &str) -> Self {
        match status {
            "created" => Self::Created,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "exited" => Self::Exited,
            "removing" => Self::Removing,
            "dead" => Self::Dead,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl std::fmt::Display for ContainerStatusInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Restarting => write!(f, "restarting"),
            Self::Exited => write!(f, "exited"),
            Self::Removing => write!(f, "removing"),
            Self::Dead => write!(f, "dead"),
            Self::Unknown(s) => write!(f, "{}", s),
        }
    }
}

/// Container state parsed from [`STATE_FORMAT`] output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectedState {
    pub status: ContainerStatusInfo,
    /// Exit code exactly as the runtime printed it.
    pub exit_code: Option<String>,
}

/// Parses `inspect --format STATE_FORMAT` output.
///
/// Returns `None` when the runtime printed nothing.
pub fn parse_inspect_output(text: &str) -> Option<InspectedState> {
    let mut fields = text.split_whitespace();
    let status = fields.next()?;
    Some(InspectedState {
        status: ContainerStatusInfo::parse(status),
        exit_code: fields.next().map(str::to_string),
    })
}

/// Whether runtime stderr says the addressed object does not exist.
pub fn is_missing_object(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("no such container")
        || lower.contains("no such image")
        || lower.contains("no such object")
        || lower.contains("image not known")
}

/// Runtime client issuing CLI commands through a [`CommandRunner`].
#[derive(Clone)]
pub struct DockerClient {
    runner: Arc<dyn CommandRunner>,
    binary: String,
    command_timeout: Duration,
    use_buildx: bool,
}

impl std::fmt::Debug for DockerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerClient")
            .field("binary", &self.binary)
            .field("command_timeout", &self.command_timeout)
            .field("use_buildx", &self.use_buildx)
            .finish()
    }
}

impl DockerClient {
    /// Creates a client invoking `binary` (usually `docker`).
    pub fn new(runner: Arc<dyn CommandRunner>, binary: impl Into<String>) -> Self {
        Self {
            runner,
            binary: binary.into(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            use_buildx: true,
        }
    }

    /// Sets the timeout for short runtime calls.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Uses `build` instead of `buildx build`.
    pub fn with_buildx(mut self, use_buildx: bool) -> Self {
        self.use_buildx = use_buildx;
        self
    }

    /// The runner commands go through.
    pub fn runner(&self) -> Arc<dyn CommandRunner> {
        Arc::clone(&self.runner)
    }

    fn command(&self) -> CommandSpec {
        CommandSpec::new(&self.binary).with_timeout(self.command_timeout)
    }

    /// Builds `image` from `dockerfile` in `context`.
    ///
    /// Returns the raw output; interpreting it is the image builder's job.
    pub async fn build_image(
        &self,
        image: &str,
        dockerfile: &Path,
        context: &Path,
        build_args: &BTreeMap<String, String>,
        network_mode: Option<&str>,
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        let mut spec = CommandSpec::new(&self.binary).with_timeout(timeout);
        if self.use_buildx {
            spec = spec.arg("buildx");
        }
        spec = spec
            .args(["build", "-t", image, "-f"])
            .arg(dockerfile.display().to_string());
        if let Some(mode) = network_mode {
            spec = spec.arg(format!("--network={mode}"));
        }
        for (key, value) in build_args {
            spec = spec.arg("--build-arg").arg(format!("{key}={value}"));
        }
        spec = spec.arg(context.display().to_string());

        self.runner.run(&spec).await
    }

    /// Creates (but does not start) a container.
    pub async fn create_container(&self, config: &ContainerConfig) -> Result<(), DockerError> {
        let mut spec = self.command().args(["create", "--name", config.name.as_str()]);
        if let Some(mode) = &config.network_mode {
            spec = spec.arg(format!("--network={mode}"));
        }
        for (key, value) in &config.env {
            spec = spec.arg("-e").arg(format!("{key}={value}"));
        }
        for mount in &config.mounts {
            spec = spec.arg("--mount").arg(mount.to_mount_arg());
        }
        spec = spec.arg(&config.image);

        let output = self.runner.run(&spec).await?;
        check("create", &config.name, output).map(|_| ())
    }

    /// Starts a created container.
    pub async fn start_container(&self, name: &str) -> Result<(), DockerError> {
        let output = self.runner.run(&self.command().args(["start", name])).await?;
        check("start", name, output).map(|_| ())
    }

    /// Blocks until the container stops, bounded by `timeout`.
    ///
    /// Returns the exit code text the runtime printed, if any.
    pub async fn wait_container(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<Option<String>, DockerError> {
        let spec = CommandSpec::new(&self.binary)
            .args(["wait", name])
            .with_timeout(timeout);
        let output = check("wait", name, self.runner.run(&spec).await?)?;
        let code = output.stdout.trim();
        Ok((!code.is_empty()).then(|| code.to_string()))
    }

    /// Reads the container's status and exit code.
    ///
    /// `Ok(None)` means the runtime has no such container or printed
    /// nothing.
    pub async fn inspect_state(&self, name: &str) -> Result<Option<InspectedState>, DockerError> {
        let spec = self
            .command()
            .args(["inspect", "--format", STATE_FORMAT, name]);
        let output = self.runner.run(&spec).await?;
        if !output.success() && is_missing_object(&output.stderr) {
            return Ok(None);
        }
        let output = check("inspect", name, output)?;
        Ok(parse_inspect_output(&output.stdout))
    }

    /// Fetches the container's combined stdout and stderr log.
    pub async fn logs(&self, name: &str) -> Result<String, DockerError> {
        let output = self.runner.run(&self.command().args(["logs", name])).await?;
        let output = check("logs", name, output)?;
        let mut logs = output.stdout;
        logs.push_str(&output.stderr);
        Ok(logs)
    }

    /// Stops a container. A container that does not exist counts as stopped.
    pub async fn stop_container(&self, name: &str) -> Result<(), DockerError> {
        let output = self.runner.run(&self.command().args(["stop", name])).await?;
        check_idempotent("stop", name, output)
    }

    /// Removes a container. A container that does not exist counts as removed.
    pub async fn remove_container(&self, name: &str, force: bool) -> Result<(), DockerError> {
        let mut spec = self.command().arg("rm");
        if force {
            spec = spec.arg("-f");
        }
        let output = self.runner.run(&spec.arg(name)).await?;
        check_idempotent("rm", name, output)
    }

    /// Removes an image. An image that does not exist counts as removed.
    pub async fn remove_image(&self, image: &str) -> Result<(), DockerError> {
        let output = self.runner.run(&self.command().args(["rmi", image])).await?;
        check_idempotent("rmi", image, output)
    }
}

fn check(
    operation: &'static str,
    target: &str,
    output: CommandOutput,
) -> Result<CommandOutput, DockerError> {
    if output.success() {
        Ok(output)
    } else {
        Err(DockerError::NonZeroExit {
            operation,
            target: target.to_string(),
            code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        })
    }
}

fn check_idempotent(
    operation: &'static str,
    target: &str,
    output: CommandOutput,
) -> Result<(), DockerError> {
    if !output.success() && is_missing_object(&output.stderr) {
        tracing::debug!(object = %target, operation, "Already gone");
        return Ok(());
    }
    check(operation, target, output).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::scripted::{ScriptedResponse, ScriptedRunner};

    fn client(runner: &ScriptedRunner) -> DockerClient {
        DockerClient::new(Arc::new(runner.clone()), "docker")
    }

    #[test]
    fn test_container_config_builder() {
        let config = ContainerConfig::new("c1", "img")
            .with_env("CMAKE_VERSION", "3.25")
            .with_env("C_COMPILER", "gcc-11")
            .with_mount(BindMount::new("/src", "/usr/src/app"))
            .with_network_mode("host");

        assert_eq!(config.name, "c1");
        assert_eq!(config.env.len(), 2);
        assert_eq!(config.mounts.len(), 1);
        assert_eq!(config.network_mode.as_deref(), Some("host"));
    }

    #[test]
    fn test_bind_mount_arg() {
        let mount = BindMount::new("/home/me/lib", "/usr/src/app");
        assert_eq!(
            mount.to_mount_arg(),
            "type=bind,src=/home/me/lib,target=/usr/src/app"
        );

        let ro = BindMount {
            read_only: true,
            ..mount
        };
        assert!(ro.to_mount_arg().ends_with(",readonly"));
    }

    #[test]
    fn test_parse_inspect_output() {
        let state = parse_inspect_output("exited 0\n").expect("state");
        assert_eq!(state.status, ContainerStatusInfo::Exited);
        assert_eq!(state.exit_code.as_deref(), Some("0"));

        let running = parse_inspect_output("running").expect("state");
        assert_eq!(running.status, ContainerStatusInfo::Running);
        assert!(running.exit_code.is_none());

        let odd = parse_inspect_output("stopping 137").expect("state");
        assert_eq!(odd.status, ContainerStatusInfo::Unknown("stopping".to_string()));

        assert!(parse_inspect_output("").is_none());
        assert!(parse_inspect_output("  \n").is_none());
    }

    #[test]
    fn test_is_missing_object() {
        assert!(is_missing_object("Error: No such container: c1"));
        assert!(is_missing_object("Error response from daemon: No such image: img:latest"));
        assert!(is_missing_object("Error: no such container c1"));
        assert!(!is_missing_object("permission denied"));
    }

    #[tokio::test]
    async fn test_create_container_argv() {
        let runner = ScriptedRunner::new();
        let config = ContainerConfig::new("img_3.25", "img")
            .with_env("WORKDIR", "/usr/src/app")
            .with_mount(BindMount::new("/src", "/usr/src/app"))
            .with_network_mode("host");

        client(&runner)
            .create_container(&config)
            .await
            .expect("create");

        let calls = runner.calls();
        assert_eq!(
            calls[0].args,
            vec![
                "create",
                "--name",
                "img_3.25",
                "--network=host",
                "-e",
                "WORKDIR=/usr/src/app",
                "--mount",
                "type=bind,src=/src,target=/usr/src/app",
                "img",
            ]
        );
    }

    #[tokio::test]
    async fn test_build_image_argv() {
        let runner = ScriptedRunner::new();
        let mut args = BTreeMap::new();
        args.insert("C_COMPILER".to_string(), "gcc-11".to_string());
        args.insert("CXX_COMPILER".to_string(), "g++-11".to_string());

        client(&runner)
            .build_image(
                "img",
                Path::new("Tests/Dockerfile"),
                Path::new("."),
                &args,
                Some("host"),
                Duration::from_secs(60),
            )
            .await
            .expect("build");

        let calls = runner.calls();
        assert_eq!(
            calls[0].args,
            vec![
                "buildx",
                "build",
                "-t",
                "img",
                "-f",
                "Tests/Dockerfile",
                "--network=host",
                "--build-arg",
                "CXX_COMPILER=g++-11",
                "--build-arg",
                "C_COMPILER=gcc-11",
                ".",
            ]
        );
        assert_eq!(calls[0].timeout, Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_plain_build_without_buildx() {
        let runner = ScriptedRunner::new();
        client(&runner)
            .with_buildx(false)
            .build_image(
                "img",
                Path::new("Dockerfile"),
                Path::new("."),
                &BTreeMap::new(),
                None,
                Duration::from_secs(60),
            )
            .await
            .expect("build");

        assert_eq!(runner.calls()[0].verb(), Some("build"));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let runner = ScriptedRunner::new();
        runner.on_any("rm", ScriptedResponse::fail(1, "Error: No such container: c1"));
        runner.on_any("rmi", ScriptedResponse::fail(1, "Error: No such image: img"));
        runner.on_any("stop", ScriptedResponse::fail(1, "Error: No such container: c1"));

        let client = client(&runner);
        assert!(client.remove_container("c1", false).await.is_ok());
        assert!(client.remove_container("c1", true).await.is_ok());
        assert!(client.remove_image("img").await.is_ok());
        assert!(client.stop_container("c1").await.is_ok());
    }

    #[tokio::test]
    async fn test_remove_reports_real_failures() {
        let runner = ScriptedRunner::new();
        runner.on_any("rm", ScriptedResponse::fail(1, "permission denied"));

        let err = client(&runner).remove_container("c1", false).await.unwrap_err();
        assert!(matches!(err, DockerError::NonZeroExit { operation: "rm", .. }));
    }

    #[tokio::test]
    async fn test_inspect_missing_container() {
        let runner = ScriptedRunner::new();
        runner.on_any("inspect", ScriptedResponse::fail(1, "Error: No such object: c1"));

        let state = client(&runner).inspect_state("c1").await.expect("inspect");
        assert!(state.is_none());
    }

    #[tokio::test]
    async fn test_inspect_empty_output() {
        let runner = ScriptedRunner::new();
        runner.on_any("inspect", ScriptedResponse::ok(""));

        let state = client(&runner).inspect_state("c1").await.expect("inspect");
        assert!(state.is_none());
    }

    #[tokio::test]
    async fn test_wait_returns_exit_text() {
        let runner = ScriptedRunner::new();
        runner.on_any("wait", ScriptedResponse::ok("2\n"));

        let code = client(&runner)
            .wait_container("c1", Duration::from_secs(5))
            .await
            .expect("wait");
        assert_eq!(code.as_deref(), Some("2"));
    }
}
