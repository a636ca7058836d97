//! MachineController - lifecycle of the single managed podman machine.

use crate::classify::{classify, Classifier, Condition, Conditions};
use crate::env::MachineEnv;
use crate::error::{MachineError, Result};
use crate::process::{CommandRunner, OutputSink, ProcessRunner, RunOptions, RunResult};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Name of the podman machine owned by this tool.
pub const MACHINE_NAME: &str = "cloudinit-builder";

/// Bound for inspect and connection commands.
pub const INSPECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound for `machine start`, `machine stop` and `machine rm`.
pub const MACHINE_START_TIMEOUT: Duration = Duration::from_secs(3 * 60);

/// Bound for `machine init`, which may download and provision a VM image.
pub const MACHINE_INIT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Observed state of the managed machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    /// No machine with the managed name exists
    Absent,
    /// Machine exists but is not running
    Stopped,
    /// Machine is running
    Running,
}

impl MachineState {
    /// Interpret the output of `machine inspect --format {{.State}}`.
    ///
    /// Anything other than exactly `running` (after trimming) counts as stopped.
    pub fn from_inspect(output: &str) -> Self {
        if output.trim() == "running" {
            MachineState::Running
        } else {
            MachineState::Stopped
        }
    }
}

impl std::fmt::Display for MachineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MachineState::Absent => write!(f, "absent"),
            MachineState::Stopped => write!(f, "stopped"),
            MachineState::Running => write!(f, "running"),
        }
    }
}

/// A machine that [`MachineController::ensure_ready`] brought up.
#[derive(Debug, Clone)]
pub struct ManagedMachine {
    name: String,
    state: MachineState,
    default_connection: bool,
}

impl ManagedMachine {
    /// Machine (and connection) name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// State when the handle was produced.
    pub fn state(&self) -> MachineState {
        self.state
    }

    /// Whether the machine is registered as the default connection.
    pub fn is_default_connection(&self) -> bool {
        self.default_connection
    }
}

/// Drives the managed podman machine through absent, stopped and running.
///
/// All commands run with the isolated [`MachineEnv`] and the working
/// directory as cwd, so podman never touches host-level state.
pub struct MachineController {
    base_dir: PathBuf,
    podman: PathBuf,
    name: String,
    env: MachineEnv,
    runner: Arc<dyn CommandRunner>,
    classifier: Classifier,
    sink: Option<OutputSink>,
}

impl MachineController {
    /// Create a controller for `podman` scoped to `base_dir`.
    ///
    /// # Errors
    /// Returns [`MachineError::Io`] if the isolated environment cannot be
    /// created.
    pub fn new(base_dir: impl Into<PathBuf>, podman: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        let env = MachineEnv::build(&base_dir)?;
        Ok(Self {
            base_dir,
            podman: podman.into(),
            name: MACHINE_NAME.to_string(),
            env,
            runner: Arc::new(ProcessRunner),
            classifier: classify,
            sink: None,
        })
    }

    /// Use a different command runner.
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Use a different output classifier.
    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Mirror podman output into `sink`.
    pub fn with_sink(mut self, sink: Option<OutputSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Managed machine name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Isolated podman environment.
    pub fn env(&self) -> &MachineEnv {
        &self.env
    }

    /// Run options shared by every podman call.
    pub fn options(&self, timeout: Duration) -> RunOptions {
        RunOptions::new()
            .timeout(timeout)
            .dir(&self.base_dir)
            .envs(self.env.vars())
            .sink(self.sink.clone())
    }

    /// Run podman with `args` in the isolated environment.
    pub async fn exec<S: AsRef<str>>(&self, timeout: Duration, args: &[S]) -> Result<RunResult> {
        let args: Vec<String> = args.iter().map(|a| a.as_ref().to_string()).collect();
        self.runner
            .run(&self.options(timeout), &self.podman, &args)
            .await
    }

    fn conditions(&self, err: &MachineError) -> Conditions {
        match err {
            MachineError::ProcessFailed { result } => {
                (self.classifier)(result.exit_code, &result.stdout, &result.stderr)
            }
            _ => Conditions::new(),
        }
    }

    /// Make sure the machine exists, runs, and is the default connection.
    ///
    /// Calling this on a machine that is already up only inspects it.
    ///
    /// # Errors
    /// Returns [`MachineError::Lifecycle`] naming the step that failed.
    pub async fn ensure_ready(&self) -> Result<ManagedMachine> {
        let start = std::time::Instant::now();
        self.ensure_exists().await?;
        self.ensure_running().await?;
        self.ensure_default_connection().await?;
        tracing::info!(
            machine = %self.name,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "podman machine ready"
        );
        Ok(ManagedMachine {
            name: self.name.clone(),
            state: MachineState::Running,
            default_connection: true,
        })
    }

    /// Current state of the machine.
    pub async fn state(&self) -> Result<MachineState> {
        if !self.exists().await? {
            return Ok(MachineState::Absent);
        }
        self.running_state().await
    }

    async fn exists(&self) -> Result<bool> {
        match self
            .exec(INSPECT_TIMEOUT, &["machine", "inspect", self.name.as_str()])
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if self.conditions(&e).contains(&Condition::MachineMissing) => Ok(false),
            Err(e) => Err(MachineError::lifecycle("check podman machine", e)),
        }
    }

    async fn running_state(&self) -> Result<MachineState> {
        let result = self
            .exec(
                INSPECT_TIMEOUT,
                &["machine", "inspect", self.name.as_str(), "--format", "{{.State}}"],
            )
            .await
            .map_err(|e| MachineError::lifecycle("podman machine inspect", e))?;
        Ok(MachineState::from_inspect(&result.stdout))
    }

    async fn ensure_exists(&self) -> Result<()> {
        if self.exists().await? {
            return Ok(());
        }

        tracing::info!(machine = %self.name, "initializing podman machine");
        self.clear_stale_connections().await;
        let init = ["machine", "init", self.name.as_str(), "--now"];
        match self.exec(MACHINE_INIT_TIMEOUT, &init).await {
            Ok(_) => Ok(()),
            Err(e) if self.conditions(&e).contains(&Condition::ConnectionExists) => {
                tracing::warn!(
                    machine = %self.name,
                    "stale connection blocked machine init, retrying after cleanup"
                );
                self.clear_stale_connections().await;
                self.exec(MACHINE_INIT_TIMEOUT, &init)
                    .await
                    .map(|_| ())
                    .map_err(|e| {
                        MachineError::lifecycle("podman machine init after connection cleanup", e)
                    })
            }
            Err(e) => Err(MachineError::lifecycle("podman machine init", e)),
        }
    }

    async fn ensure_running(&self) -> Result<()> {
        if self.running_state().await? == MachineState::Running {
            return Ok(());
        }
        tracing::info!(machine = %self.name, "starting podman machine");
        self.exec(MACHINE_START_TIMEOUT, &["machine", "start", self.name.as_str()])
            .await
            .map_err(|e| MachineError::lifecycle("podman machine start", e))?;
        Ok(())
    }

    async fn ensure_default_connection(&self) -> Result<()> {
        match self
            .exec(
                INSPECT_TIMEOUT,
                &["system", "connection", "default", self.name.as_str()],
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if self.conditions(&e).contains(&Condition::AlreadyDefault) => Ok(()),
            Err(e) => Err(MachineError::lifecycle("set podman connection default", e)),
        }
    }

    /// Remove `<name>` and `<name>-root` connections; missing ones are fine.
    async fn remove_connections(&self) -> Result<()> {
        for connection in [self.name.clone(), format!("{}-root", self.name)] {
            if let Err(e) = self
                .exec(INSPECT_TIMEOUT, &["system", "connection", "rm", connection.as_str()])
                .await
            {
                let found = self.conditions(&e);
                if found.contains(&Condition::MachineMissing)
                    || found.contains(&Condition::ConnectionMissing)
                {
                    continue;
                }
                return Err(e);
            }
        }
        Ok(())
    }

    async fn clear_stale_connections(&self) {
        if let Err(e) = self.remove_connections().await {
            tracing::warn!(machine = %self.name, error = %e, "failed to clean stale connection");
        }
    }

    /// Stop the machine. Missing or already stopped machines are success.
    ///
    /// # Errors
    /// Returns [`MachineError::Lifecycle`] for any other stop failure.
    pub async fn stop(&self) -> Result<()> {
        tracing::info!(machine = %self.name, "stopping podman machine");
        match self
            .exec(MACHINE_START_TIMEOUT, &["machine", "stop", self.name.as_str()])
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                let found = self.conditions(&e);
                if found.contains(&Condition::MachineMissing)
                    || found.contains(&Condition::AlreadyStopped)
                {
                    tracing::debug!(machine = %self.name, "machine already down");
                    return Ok(());
                }
                Err(MachineError::lifecycle("podman machine stop", e))
            }
        }
    }

    /// Stop and force-remove the machine, then drop its connections.
    ///
    /// A missing machine is success. Leftover connections that cannot be
    /// removed are only logged.
    pub async fn remove(&self) -> Result<()> {
        self.stop().await?;
        tracing::info!(machine = %self.name, "removing podman machine");
        if let Err(e) = self
            .exec(MACHINE_START_TIMEOUT, &["machine", "rm", "-f", self.name.as_str()])
            .await
        {
            if self.conditions(&e).contains(&Condition::MachineMissing) {
                return Ok(());
            }
            return Err(MachineError::lifecycle("podman machine rm", e));
        }
        if let Err(e) = self.remove_connections().await {
            tracing::warn!(
                machine = %self.name,
                error = %e,
                "failed to clean connection after removal"
            );
        }
        Ok(())
    }
}
