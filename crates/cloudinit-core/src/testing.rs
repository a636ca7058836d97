//! Scripted command runner and fixed toolchain for orchestrator tests.

use crate::error::Result;
use crate::toolchain::Toolchain;
use async_trait::async_trait;
use cloudinit_machine::{CommandRunner, MachineError, RunOptions, RunResult};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Responder =
    Box<dyn Fn(&Path, &[String]) -> cloudinit_machine::Result<RunResult> + Send + Sync>;

/// One recorded invocation.
#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub timeout: Duration,
    pub dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl Call {
    pub fn line(&self) -> String {
        self.args.join(" ")
    }
}

/// Runner answering from a closure and recording every call.
pub(crate) struct ScriptedRunner {
    calls: Mutex<Vec<Call>>,
    respond: Responder,
}

impl ScriptedRunner {
    pub fn new(
        respond: impl Fn(&Path, &[String]) -> cloudinit_machine::Result<RunResult>
            + Send
            + Sync
            + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            respond: Box::new(respond),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.calls().iter().map(Call::line).collect()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.lines().iter().filter(|l| l.contains(needle)).count()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        opts: &RunOptions,
        program: &Path,
        args: &[String],
    ) -> cloudinit_machine::Result<RunResult> {
        self.calls.lock().unwrap().push(Call {
            program: program.to_path_buf(),
            args: args.to_vec(),
            timeout: opts.timeout,
            dir: opts.dir.clone(),
            env: opts.env.clone(),
        });
        (self.respond)(program, args)
    }
}

pub(crate) fn ok(stdout: &str) -> cloudinit_machine::Result<RunResult> {
    Ok(RunResult {
        stdout: stdout.to_string(),
        ..Default::default()
    })
}

pub(crate) fn failed(exit_code: i32, stderr: &str) -> cloudinit_machine::Result<RunResult> {
    Err(MachineError::ProcessFailed {
        result: Box::new(RunResult {
            command: "scripted".into(),
            stderr: stderr.to_string(),
            exit_code,
            ..Default::default()
        }),
    })
}

/// Podman answers for a machine that already exists and runs.
pub(crate) fn running_machine(args: &[String]) -> cloudinit_machine::Result<RunResult> {
    if args.len() == 5 && args[0] == "machine" && args[1] == "inspect" {
        return ok("running\n");
    }
    ok("")
}

/// Toolchain returning fixed paths without touching the network.
pub(crate) struct FixedToolchain {
    pub podman: PathBuf,
    pub qemu: PathBuf,
}

impl FixedToolchain {
    pub fn new(base: &Path) -> Arc<Self> {
        Arc::new(Self {
            podman: base.join("tools/podman/podman.exe"),
            qemu: base.join("tools/qemu/qemu-system-x86_64.exe"),
        })
    }
}

#[async_trait]
impl Toolchain for FixedToolchain {
    async fn podman(&self) -> Result<PathBuf> {
        Ok(self.podman.clone())
    }

    async fn qemu(&self) -> Result<PathBuf> {
        Ok(self.qemu.clone())
    }
}
