//! Container execution layer for sanity-test runs.
//!
//! Every runtime operation is a command line handed to a
//! [`CommandRunner`]; the layers above only see typed results.
//!
//! # Architecture
//!
//! Container states follow this lifecycle:
//! ```text
//! PENDING → CREATED → RUNNING → EXITED(code) | INFRASTRUCTURE ERROR → RELEASED
//! ```
//!
//! # Example
//!
//! ```ignore
//! use build_sanity::execution::{BindMount, ContainerManager, DockerClient, ImageBuilder, ProcessRunner};
//!
//! let client = DockerClient::new(Arc::new(ProcessRunner::new()), "docker");
//! let images = ImageBuilder::new(client.clone(), ".");
//! let mut image = images.build("build_sanity_test_gcc-11_gxx-11", dockerfile, &args).await?;
//!
//! let outcome = ContainerManager::new(client)
//!     .run(&image, "build_sanity_test_gcc-11_gxx-11_3.25", &env, &BindMount::new(cwd, "/usr/src/app"))
//!     .await;
//! images.teardown(&mut image).await;
//! ```

pub mod command;
pub mod container;
pub mod docker_client;
pub mod image;
pub mod scripted;

pub use command::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
pub use container::{
    ContainerExit, ContainerGuard, ContainerHandle, ContainerManager, ContainerOutcome,
    ContainerState,
};
pub use docker_client::{BindMount, ContainerConfig, ContainerStatusInfo, DockerClient};
pub use image::{ImageBuilder, ImageHandle};
pub use scripted::{ScriptedResponse, ScriptedRunner};
