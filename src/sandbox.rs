//! Docker sandbox for isolated attempt execution.
//!
//! One ephemeral container per attempt. The container is named so that a
//! timeout or cancellation can force-terminate the whole process tree with
//! `docker kill` / `docker rm -f`; `--rm` handles the normal-exit path. When
//! the sandbox future is cancelled mid-run, `Drop` removes the container
//! synchronously before returning, so the process never exits with a
//! container still alive.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

/// How long to wait for forced teardown after a timeout before giving up.
const TEARDOWN_GRACE: Duration = Duration::from_secs(15);

/// Errors from sandbox lifecycle operations.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to launch sandbox: {0}")]
    Launch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration for a sandboxed execution.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Docker image to run.
    pub image: String,
    /// Network mode ("none", "bridge", "host").
    pub network_mode: String,
    /// Working directory inside the container.
    pub workdir: PathBuf,
    /// Environment variables set inside the container.
    pub env_vars: Vec<(String, String)>,
    /// Memory limit (docker syntax, e.g. "4g"); unlimited when `None`.
    pub memory: Option<String>,
    /// CPU quota; unlimited when `None`.
    pub cpus: Option<f64>,
}

impl SandboxConfig {
    /// Creates a configuration with defaults: workdir `/workspace`, bridge
    /// networking, no extra environment.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            network_mode: "bridge".to_string(),
            workdir: PathBuf::from("/workspace"),
            env_vars: Vec::new(),
            memory: None,
            cpus: None,
        }
    }

    /// Sets the network mode.
    pub fn with_network(mut self, mode: impl Into<String>) -> Self {
        self.network_mode = mode.into();
        self
    }

    /// Adds an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    /// Sets the memory limit.
    pub fn with_memory(mut self, limit: impl Into<String>) -> Self {
        self.memory = Some(limit.into());
        self
    }

    /// Sets the CPU quota.
    pub fn with_cpus(mut self, cpus: f64) -> Self {
        self.cpus = Some(cpus);
        self
    }
}

/// Result of one sandboxed command.
#[derive(Debug)]
pub struct SandboxRun {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
    pub duration: Duration,
}

/// An ephemeral container scoped to one attempt's workspace.
pub struct Sandbox {
    id: String,
    config: SandboxConfig,
    workspace_root: PathBuf,
    /// Set once the container is known to be gone (normal exit, launch
    /// failure, or awaited teardown). `Drop` only acts when this is unset.
    finished: AtomicBool,
}

impl Sandbox {
    /// Creates a sandbox bound to a host workspace directory.
    pub fn new(config: SandboxConfig, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            id: format!("bench-forge-{}", Uuid::new_v4()),
            config,
            workspace_root: workspace_root.into(),
            finished: AtomicBool::new(false),
        }
    }

    /// Container name, for logging and forced teardown.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Builds the full `docker run` argument vector for a command.
    pub fn docker_run_args(&self, command: &[String]) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            self.id.clone(),
            format!("--network={}", self.config.network_mode),
            "-v".to_string(),
            format!(
                "{}:{}",
                self.workspace_root.display(),
                self.config.workdir.display()
            ),
            "-w".to_string(),
            self.config.workdir.to_string_lossy().to_string(),
        ];
        if let Some(memory) = &self.config.memory {
            args.push(format!("--memory={}", memory));
        }
        if let Some(cpus) = self.config.cpus {
            args.push(format!("--cpus={}", cpus));
        }
        for (key, value) in &self.config.env_vars {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(self.config.image.clone());
        args.extend(command.iter().cloned());
        args
    }

    /// Runs a command in the container to completion or until `timeout`.
    ///
    /// On timeout the container process tree is force-terminated and the
    /// teardown is awaited (bounded) before returning, so the caller never
    /// observes a still-running sandbox.
    pub async fn run(
        &self,
        command: &[String],
        timeout: Duration,
    ) -> Result<SandboxRun, SandboxError> {
        let args = self.docker_run_args(command);
        debug!(sandbox = %self.id, "docker {}", args.join(" "));

        let start = Instant::now();
        let output = tokio::time::timeout(
            timeout,
            Command::new("docker")
                .args(&args)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output(),
        )
        .await;

        match output {
            Ok(Ok(output)) => {
                self.finished.store(true, Ordering::SeqCst);
                Ok(SandboxRun {
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                    exit_code: output.status.code().unwrap_or(-1),
                    timed_out: false,
                    duration: start.elapsed(),
                })
            }
            Ok(Err(e)) => {
                self.finished.store(true, Ordering::SeqCst);
                Err(SandboxError::Launch(e.to_string()))
            }
            Err(_) => {
                self.force_teardown().await;
                Ok(SandboxRun {
                    stdout: String::new(),
                    stderr: format!("sandbox exceeded {}s deadline", timeout.as_secs()),
                    exit_code: -1,
                    timed_out: true,
                    duration: start.elapsed(),
                })
            }
        }
    }

    /// Force-terminates the container and waits (bounded) for removal.
    pub async fn force_teardown(&self) {
        let teardown = async {
            let _ = Command::new("docker")
                .args(["kill", &self.id])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
            let _ = Command::new("docker")
                .args(["rm", "-f", &self.id])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
        };
        if tokio::time::timeout(TEARDOWN_GRACE, teardown).await.is_err() {
            warn!(sandbox = %self.id, "Forced teardown did not finish within grace period");
        } else {
            debug!(sandbox = %self.id, "Sandbox torn down");
        }
        self.finished.store(true, Ordering::SeqCst);
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        if self.finished.load(Ordering::SeqCst) {
            return;
        }
        // Cancellation dropped the run future mid-flight; the container may
        // still be running. Removal is awaited here, not detached, so it has
        // completed before the process can exit.
        let _ = std::process::Command::new("docker")
            .args(["rm", "-f", &self.id])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // Serializes the tests that put a recording docker stand-in on PATH.
    static PATH_LOCK: Mutex<()> = Mutex::new(());

    #[cfg(unix)]
    fn install_fake_docker(dir: &TempDir) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let log = dir.path().join("docker.log");
        let bin = dir.path().join("docker");
        fs::write(
            &bin,
            format!("#!/bin/sh\necho \"$@\" >> {}\n", log.display()),
        )
        .unwrap();
        fs::set_permissions(&bin, fs::Permissions::from_mode(0o755)).unwrap();
        log
    }

    #[cfg(unix)]
    fn prepend_path(dir: &Path) -> String {
        let old = std::env::var("PATH").unwrap();
        std::env::set_var("PATH", format!("{}:{}", dir.display(), old));
        old
    }

    // For tests that only inspect argument construction; keeps their drops
    // from shelling out to docker.
    fn inert_sandbox(config: SandboxConfig, workspace: &str) -> Sandbox {
        let sandbox = Sandbox::new(config, workspace);
        sandbox.finished.store(true, Ordering::SeqCst);
        sandbox
    }

    #[test]
    fn test_docker_run_args_shape() {
        let config = SandboxConfig::new("bench.agent:latest")
            .with_network("none")
            .with_env("HOME", "/workspace");
        let sandbox = inert_sandbox(config, "/tmp/ws");
        let args =
            sandbox.docker_run_args(&["bash".to_string(), "-c".to_string(), "true".to_string()]);

        assert_eq!(args[0], "run");
        assert!(args.contains(&"--rm".to_string()));
        assert!(args.contains(&"--network=none".to_string()));
        assert!(args.contains(&"/tmp/ws:/workspace".to_string()));
        assert!(args.contains(&"HOME=/workspace".to_string()));
        assert!(args.contains(&"bench.agent:latest".to_string()));
        assert_eq!(args.last().unwrap(), "true");
    }

    #[test]
    fn test_resource_limits_emitted_when_set() {
        let config = SandboxConfig::new("img").with_memory("4g").with_cpus(2.0);
        let sandbox = inert_sandbox(config, "/tmp/ws");
        let args = sandbox.docker_run_args(&["true".to_string()]);
        assert!(args.contains(&"--memory=4g".to_string()));
        assert!(args.contains(&"--cpus=2".to_string()));

        let bare = inert_sandbox(SandboxConfig::new("img"), "/tmp/ws");
        let args = bare.docker_run_args(&["true".to_string()]);
        assert!(!args.iter().any(|a| a.starts_with("--memory")));
    }

    #[test]
    fn test_sandbox_ids_are_unique() {
        let a = inert_sandbox(SandboxConfig::new("img"), "/tmp/a");
        let b = inert_sandbox(SandboxConfig::new("img"), "/tmp/b");
        assert_ne!(a.id(), b.id());
        assert!(a.id().starts_with("bench-forge-"));
    }

    #[cfg(unix)]
    #[test]
    fn test_cancelled_sandbox_removed_before_drop_returns() {
        let _guard = PATH_LOCK.lock().unwrap();
        let dir = TempDir::new().unwrap();
        let log = install_fake_docker(&dir);
        let old_path = prepend_path(dir.path());

        let sandbox = Sandbox::new(SandboxConfig::new("img"), "/tmp/ws");
        let id = sandbox.id().to_string();
        drop(sandbox);

        // Removal has already run by the time drop returns; a process exit
        // right after cannot leave the container behind.
        let recorded = fs::read_to_string(&log).unwrap();
        assert!(recorded.contains(&format!("rm -f {}", id)));

        std::env::set_var("PATH", old_path);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_torn_down_sandbox_not_removed_again_on_drop() {
        let _guard = PATH_LOCK.lock().unwrap();
        let dir = TempDir::new().unwrap();
        let log = install_fake_docker(&dir);
        let old_path = prepend_path(dir.path());

        let sandbox = Sandbox::new(SandboxConfig::new("img"), "/tmp/ws");
        sandbox.force_teardown().await;
        let after_teardown = fs::read_to_string(&log).unwrap();
        drop(sandbox);

        assert_eq!(fs::read_to_string(&log).unwrap(), after_teardown);

        std::env::set_var("PATH", old_path);
    }

    #[test]
    fn test_image_precedes_command() {
        let sandbox = inert_sandbox(SandboxConfig::new("img:1"), "/tmp/ws");
        let args = sandbox.docker_run_args(&["python".to_string(), "x.py".to_string()]);
        let image_pos = args.iter().position(|a| a == "img:1").unwrap();
        let cmd_pos = args.iter().position(|a| a == "python").unwrap();
        assert!(image_pos < cmd_pos);
    }
}
