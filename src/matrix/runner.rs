//! Matrix runner: toolchain pairs × build-system versions.
//!
//! Combinations run one at a time. They share the bind-mounted working
//! tree, so running them concurrently would race on it.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::error::ConfigError;
use crate::execution::{
    BindMount, CommandRunner, ContainerManager, ContainerOutcome, DockerClient, ImageBuilder,
    ImageHandle,
};
use crate::matrix::config::MatrixConfig;
use crate::matrix::types::{
    tail_lines, BuildMatrixEntry, MatrixReport, RunResult, RunStatus, ToolchainPair,
};
use crate::progress::{ProgressCounters, ProgressMonitor};

/// Drops repeated items, keeping the first occurrence of each.
fn dedup_in_order<T>(items: &[T], what: &str) -> Vec<T>
where
    T: Clone + Eq + Hash + std::fmt::Display,
{
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(items.len());
    for item in items {
        if seen.insert(item.clone()) {
            unique.push(item.clone());
        } else {
            tracing::warn!(item = %item, "Ignoring duplicate {}", what);
        }
    }
    unique
}

/// Enumerates the combinations of a matrix, toolchain-major.
pub fn plan(toolchains: &[ToolchainPair], versions: &[String]) -> Vec<BuildMatrixEntry> {
    let toolchains = dedup_in_order(toolchains, "toolchain");
    let versions = dedup_in_order(versions, "build-system version");
    toolchains
        .iter()
        .flat_map(|toolchain| {
            versions
                .iter()
                .map(move |version| BuildMatrixEntry::new(toolchain.clone(), version.clone()))
        })
        .collect()
}

/// Checks that no two toolchains share an image name.
///
/// Sanitizing is lossy (`g++-11` and `gxx-11` both become `gxx-11`), and
/// a shared image name would also mean shared container names.
pub fn check_image_names(toolchains: &[ToolchainPair], prefix: &str) -> Result<(), ConfigError> {
    let mut claimed: HashMap<String, &ToolchainPair> = HashMap::new();
    for toolchain in toolchains {
        let image = toolchain.image_name(prefix);
        match claimed.get(&image) {
            Some(first) if *first != toolchain => {
                return Err(ConfigError::ImageNameCollision {
                    image,
                    first: first.to_string(),
                    second: toolchain.to_string(),
                });
            }
            Some(_) => {}
            None => {
                claimed.insert(image, toolchain);
            }
        }
    }
    Ok(())
}

/// Runs a build matrix against a container runtime.
#[derive(Debug)]
pub struct MatrixRunner {
    config: MatrixConfig,
    images: ImageBuilder,
    containers: ContainerManager,
    echo_results: bool,
    dry_run: bool,
}

impl MatrixRunner {
    /// Creates a runner issuing runtime commands through `runner`.
    pub fn new(config: MatrixConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let client = DockerClient::new(runner, &config.runtime)
            .with_command_timeout(config.command_timeout())
            .with_buildx(config.use_buildx);

        let images = ImageBuilder::new(client.clone(), &config.build_context)
            .with_network_mode(config.network_mode.clone())
            .with_build_timeout(config.build_timeout());

        let containers = ContainerManager::new(client)
            .with_network_mode(config.network_mode.clone())
            .with_run_timeout(config.run_timeout());

        Self {
            config,
            images,
            containers,
            echo_results: true,
            dry_run: false,
        }
    }

    /// Whether results are printed to stdout as they complete.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo_results = echo;
        self
    }

    /// Marks every combination [`RunStatus::Skipped`] instead of judging
    /// the (scripted) runtime output.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn config(&self) -> &MatrixConfig {
        &self.config
    }

    /// Runs every combination and returns one result per combination.
    ///
    /// Never aborts early: a failed combination is recorded and the next
    /// one runs. A failed image build marks every version of that
    /// toolchain as an infrastructure error, as does a toolchain whose
    /// image name is already taken by an earlier toolchain.
    pub async fn run_matrix(
        &self,
        toolchains: &[ToolchainPair],
        versions: &[String],
    ) -> MatrixReport {
        let mut report = MatrixReport::begin();
        let toolchains = dedup_in_order(toolchains, "toolchain");
        let versions = dedup_in_order(versions, "build-system version");
        let total = toolchains.len() * versions.len();
        let counters = ProgressCounters::new();
        let mut claimed: HashMap<String, ToolchainPair> = HashMap::new();

        tracing::info!(
            run_id = %report.run_id,
            toolchains = toolchains.len(),
            versions = versions.len(),
            total = total,
            "Starting build matrix"
        );

        for toolchain in &toolchains {
            if self.echo_results {
                println!("C Compiler: {}", toolchain.c_compiler);
                println!("CXX Compiler: {}", toolchain.cxx_compiler);
            }

            let image_name = toolchain.image_name(&self.config.image_prefix);
            if let Some(first) = claimed.get(&image_name) {
                let collision = ConfigError::ImageNameCollision {
                    image: image_name.clone(),
                    first: first.to_string(),
                    second: toolchain.to_string(),
                };
                tracing::error!(error = %collision, "Skipping toolchain");
                self.record_unbuilt(
                    &mut report,
                    toolchain,
                    &versions,
                    &collision.to_string(),
                    &counters,
                );
                continue;
            }
            claimed.insert(image_name.clone(), toolchain.clone());

            let build = self
                .images
                .build(
                    &image_name,
                    &self.config.dockerfile,
                    &self.config.build_args(toolchain),
                )
                .await;

            match build {
                Ok(mut image) => {
                    for version in &versions {
                        let entry = BuildMatrixEntry::new(toolchain.clone(), version.clone());
                        let result = self.run_entry(&image, entry, &counters, total).await;
                        self.record(&mut report, result, &counters);
                    }
                    if self.config.keep_images {
                        tracing::info!(image = %image.name, "Keeping image");
                    } else {
                        self.images.teardown(&mut image).await;
                    }
                }
                Err(e) => {
                    let detail = e.to_string();
                    self.record_unbuilt(&mut report, toolchain, &versions, &detail, &counters);
                }
            }
        }

        report.finished_at = Utc::now();
        tracing::info!(
            run_id = %report.run_id,
            passed = report.count(RunStatus::Passed),
            failed = report.count(RunStatus::Failed),
            infrastructure = report.count(RunStatus::InfrastructureError),
            skipped = report.count(RunStatus::Skipped),
            "Build matrix finished"
        );
        report
    }

    /// Records every version of a toolchain that never got an image.
    fn record_unbuilt(
        &self,
        report: &mut MatrixReport,
        toolchain: &ToolchainPair,
        versions: &[String],
        detail: &str,
        counters: &ProgressCounters,
    ) {
        for version in versions {
            let result = RunResult {
                entry: BuildMatrixEntry::new(toolchain.clone(), version.clone()),
                exit_code: None,
                status: RunStatus::InfrastructureError,
                detail: Some(detail.to_string()),
                duration_ms: 0,
                log_tail: None,
            };
            self.record(report, result, counters);
        }
    }

    async fn run_entry(
        &self,
        image: &ImageHandle,
        entry: BuildMatrixEntry,
        counters: &ProgressCounters,
        total: usize,
    ) -> RunResult {
        let name = entry.container_name(&image.name);
        let env = self.config.container_env(&entry);
        let mount = BindMount::new(&self.config.workdir, &self.config.mount_target);
        let start = Instant::now();

        let monitor = self.config.progress_interval().map(|interval| {
            ProgressMonitor::start(entry.to_string(), counters.clone(), total, interval)
        });

        let outcome = self.containers.run(image, &name, &env, &mount).await;

        if let Some(monitor) = monitor {
            monitor.stop().await;
        }

        self.result_from_outcome(entry, outcome, start.elapsed().as_millis() as u64)
    }

    fn result_from_outcome(
        &self,
        entry: BuildMatrixEntry,
        outcome: ContainerOutcome,
        duration_ms: u64,
    ) -> RunResult {
        let (exit_code, status, detail) = match outcome.result {
            // Nothing ran, so the scripted output says nothing about the build.
            _ if self.dry_run => (
                None,
                RunStatus::Skipped,
                Some("dry run, no commands executed".to_string()),
            ),
            Ok(exit) => (
                exit.code(),
                RunStatus::from_exit_text(Some(&exit.exit_code)),
                Some(exit.status.to_string()),
            ),
            Err(e) => (None, RunStatus::InfrastructureError, Some(e.to_string())),
        };

        let log_tail = match status {
            RunStatus::Passed | RunStatus::Skipped => None,
            _ => outcome
                .logs
                .map(|logs| tail_lines(&logs, self.config.log_tail_lines)),
        };

        RunResult {
            entry,
            exit_code,
            status,
            detail,
            duration_ms,
            log_tail,
        }
    }

    fn record(&self, report: &mut MatrixReport, result: RunResult, counters: &ProgressCounters) {
        counters.completed.fetch_add(1, Ordering::Relaxed);
        let bucket = match result.status {
            RunStatus::Passed => Some(&counters.passed),
            RunStatus::Failed => Some(&counters.failed),
            RunStatus::InfrastructureError => Some(&counters.infrastructure),
            RunStatus::Skipped => None,
        };
        if let Some(bucket) = bucket {
            bucket.fetch_add(1, Ordering::Relaxed);
        }

        match result.status {
            RunStatus::Passed => {
                tracing::info!(combination = %result.entry, "Combination passed")
            }
            RunStatus::Skipped => {
                tracing::info!(combination = %result.entry, "Combination skipped (dry run)")
            }
            status => tracing::warn!(
                combination = %result.entry,
                status = %status,
                exit_code = ?result.exit_code,
                detail = ?result.detail,
                "Combination did not pass"
            ),
        }

        if self.echo_results {
            for line in result.summary_lines() {
                println!("{}", line);
            }
            if let Some(tail) = &result.log_tail {
                println!("Container log (last {} lines):", self.config.log_tail_lines);
                println!("{}", tail);
            }
        }

        report.results.push(result);
    }
}
