//! IsoBuilder - produces `images/cloud-init.iso` inside the managed machine.

use crate::config::{BASE_IMAGE, CONTAINER_RUN_TIMEOUT, PULL_TIMEOUT};
use crate::console::Console;
use crate::error::{Result, StepExt};
use crate::layout::{ensure_file, remove_if_exists, Layout};
use crate::toolchain::Toolchain;
use cloudinit_machine::{
    CommandRunner, MachineController, ManagedMachine, OutputSink, ProcessRunner,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Shell script run inside the build container.
pub fn build_script() -> String {
    [
        "set -euo pipefail",
        "apt-get update -qq",
        "apt-get install -y genisoimage",
        "genisoimage -output /work/images/cloud-init.iso -volid cidata -joliet -rock \
         -graft-points user-data=/work/templates/user-data.txt \
         meta-data=/work/templates/meta-data.txt",
    ]
    .join(" && ")
}

/// `podman` arguments for the containerized ISO build.
pub fn container_args(machine: &str, base: &Path) -> Vec<String> {
    vec![
        "--connection".into(),
        machine.into(),
        "run".into(),
        "--rm".into(),
        "-v".into(),
        format!("{}:/work", base.display()),
        "-w".into(),
        "/work".into(),
        BASE_IMAGE.into(),
        "bash".into(),
        "-c".into(),
        build_script(),
    ]
}

/// Sequences one ISO build.
///
/// The machine is stopped on every exit path once it has been brought up.
/// A failed stop is logged and never replaces the build's own result.
pub struct IsoBuilder {
    layout: Layout,
    toolchain: Arc<dyn Toolchain>,
    runner: Arc<dyn CommandRunner>,
    sink: Option<OutputSink>,
    console: Console,
}

impl IsoBuilder {
    pub fn new(layout: Layout, toolchain: Arc<dyn Toolchain>) -> Self {
        Self {
            layout,
            toolchain,
            runner: Arc::new(ProcessRunner),
            sink: None,
            console: Console::default(),
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_sink(mut self, sink: Option<OutputSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_console(mut self, console: Console) -> Self {
        self.console = console;
        self
    }

    /// Build the ISO and return its path.
    ///
    /// # Errors
    /// The first failing step aborts the build; the error names that step.
    pub async fn build(&self) -> Result<PathBuf> {
        let start = std::time::Instant::now();
        self.console.step("Checking dependencies...");
        self.layout.ensure_base().step("ensure base layout")?;
        self.layout.ensure_templates().step("ensure templates")?;

        let podman = self.toolchain.podman().await.step("ensure podman")?;
        self.console.step("Podman ready.");

        let controller = MachineController::new(self.layout.base(), podman)
            .step("ensure podman machine")?
            .with_runner(self.runner.clone())
            .with_sink(self.sink.clone());
        let machine = controller
            .ensure_ready()
            .await
            .step("ensure podman machine")?;

        let outcome = self.produce(&controller, &machine).await;

        match controller.stop().await {
            Ok(()) if outcome.is_ok() => self.console.step("Podman machine stopped."),
            Ok(()) => {}
            Err(e) => tracing::warn!(error = %e, "failed to stop podman machine"),
        }

        let iso = outcome?;
        tracing::info!(
            iso = %iso.display(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "build finished"
        );
        self.console
            .done(format!("Done: {} created.", self.layout.relative(&iso)));
        Ok(iso)
    }

    async fn produce(
        &self,
        controller: &MachineController,
        machine: &ManagedMachine,
    ) -> Result<PathBuf> {
        self.console.step("Pulling Debian image...");
        controller
            .exec(
                PULL_TIMEOUT,
                &["--connection", machine.name(), "pull", BASE_IMAGE],
            )
            .await
            .step("podman pull")?;

        let iso = self.layout.iso_path();
        remove_if_exists(&iso).step("remove stale artifact")?;

        self.console
            .step("Building cloud-init.iso with genisoimage...");
        controller
            .exec(
                CONTAINER_RUN_TIMEOUT,
                &container_args(machine.name(), self.layout.base()),
            )
            .await
            .step("podman run")?;

        ensure_file(&iso, "cloud-init ISO").step("verify artifact")?;
        Ok(iso)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{failed, ok, running_machine, FixedToolchain, ScriptedRunner};
    use cloudinit_machine::ErrorKind;

    /// Runner for a running machine whose container writes the ISO.
    fn podman(iso: PathBuf) -> impl Fn(&Path, &[String]) -> cloudinit_machine::Result<cloudinit_machine::RunResult> {
        move |_, args| {
            if args.get(2).map(String::as_str) == Some("run") {
                std::fs::write(&iso, b"iso9660").unwrap();
            }
            running_machine(args)
        }
    }

    fn builder(base: &Path, runner: Arc<ScriptedRunner>) -> IsoBuilder {
        IsoBuilder::new(Layout::new(base), FixedToolchain::new(base))
            .with_runner(runner)
            .with_console(Console::new(true))
    }

    #[tokio::test]
    async fn test_build_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let runner = ScriptedRunner::new(podman(layout.iso_path()));

        let iso = builder(dir.path(), runner.clone()).build().await.unwrap();
        assert_eq!(iso, layout.iso_path());
        assert!(layout.user_data().is_file());
        assert!(layout.meta_data().is_file());

        let lines = runner.lines();
        assert_eq!(lines[0], "machine inspect cloudinit-builder");
        assert_eq!(lines[1], "machine inspect cloudinit-builder --format {{.State}}");
        assert_eq!(lines[2], "system connection default cloudinit-builder");
        assert_eq!(
            lines[3],
            "--connection cloudinit-builder pull docker.io/library/debian:bookworm"
        );
        assert!(lines[4].starts_with("--connection cloudinit-builder run --rm -v"));
        assert_eq!(lines[5], "machine stop cloudinit-builder");
        assert_eq!(lines.len(), 6);
    }

    #[tokio::test]
    async fn test_podman_calls_share_isolated_env() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let runner = ScriptedRunner::new(podman(layout.iso_path()));
        builder(dir.path(), runner.clone()).build().await.unwrap();

        let calls = runner.calls();
        let toolchain = FixedToolchain::new(dir.path());
        for call in &calls {
            assert_eq!(call.program, toolchain.podman);
            assert_eq!(call.dir.as_deref(), Some(dir.path()));
            assert!(call
                .env
                .iter()
                .any(|(k, v)| k == "HOME" && v.contains("runtime")));
        }
        let pull = &calls[3];
        assert_eq!(pull.timeout, PULL_TIMEOUT);
        assert_eq!(calls[4].timeout, CONTAINER_RUN_TIMEOUT);
    }

    #[tokio::test]
    async fn test_pull_failure_still_stops_machine_once() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(|_, args| {
            if args.get(2).map(String::as_str) == Some("pull") {
                return failed(125, "Error: initializing source: connection refused");
            }
            running_machine(args)
        });

        let err = builder(dir.path(), runner.clone()).build().await.unwrap_err();
        assert_eq!(err.step(), Some("podman pull"));
        assert_eq!(err.kind(), ErrorKind::ProcessFailed);
        assert_eq!(runner.count("machine stop"), 1);
        assert_eq!(runner.count(" run "), 0);
    }

    #[tokio::test]
    async fn test_stale_iso_removed_before_container_runs() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        std::fs::create_dir_all(layout.images_dir()).unwrap();
        std::fs::write(layout.iso_path(), b"old").unwrap();

        let iso = layout.iso_path();
        let runner = ScriptedRunner::new(move |_, args| {
            if args.get(2).map(String::as_str) == Some("run") {
                assert!(!iso.exists(), "stale ISO survived");
                return failed(1, "E: Unable to locate package genisoimage");
            }
            running_machine(args)
        });

        let err = builder(dir.path(), runner.clone()).build().await.unwrap_err();
        assert_eq!(err.step(), Some("podman run"));
        assert!(!layout.iso_path().exists());
        assert_eq!(runner.count("machine stop"), 1);
    }

    #[tokio::test]
    async fn test_stop_failure_does_not_fail_build() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let write_iso = podman(layout.iso_path());
        let runner = ScriptedRunner::new(move |program, args| {
            if args.get(1).map(String::as_str) == Some("stop") {
                return failed(125, "Error: hyperv refused the request");
            }
            write_iso(program, args)
        });

        builder(dir.path(), runner).build().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_failure_does_not_mask_build_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(|_, args| {
            match (args.get(1).map(String::as_str), args.get(2).map(String::as_str)) {
                (Some("stop"), _) => failed(125, "Error: hyperv refused the request"),
                (_, Some("pull")) => failed(125, "Error: manifest unknown"),
                _ => running_machine(args),
            }
        });

        let err = builder(dir.path(), runner).build().await.unwrap_err();
        assert_eq!(err.step(), Some("podman pull"));
    }

    #[tokio::test]
    async fn test_missing_artifact_after_run_fails() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(|_, args| running_machine(args));

        let err = builder(dir.path(), runner.clone()).build().await.unwrap_err();
        assert_eq!(err.step(), Some("verify artifact"));
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(runner.count("machine stop"), 1);
    }

    #[tokio::test]
    async fn test_machine_failure_skips_stop() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(|_, args| {
            if args.first().map(String::as_str) == Some("machine") && args.len() == 3 {
                return failed(125, "Error: WSL is not installed");
            }
            ok("")
        });

        let err = builder(dir.path(), runner.clone()).build().await.unwrap_err();
        assert_eq!(err.step(), Some("ensure podman machine"));
        assert_eq!(err.kind(), ErrorKind::Lifecycle);
        assert_eq!(runner.count("machine stop"), 0);
    }

    #[test]
    fn test_container_args() {
        let args = container_args("cloudinit-builder", Path::new("/data/builder"));
        assert_eq!(args[5], "/data/builder:/work");
        assert_eq!(args[8], BASE_IMAGE);
        let script = args.last().unwrap();
        assert!(script.starts_with("set -euo pipefail && apt-get update -qq && "));
        assert!(script.contains(
            "-volid cidata -joliet -rock -graft-points user-data=/work/templates/user-data.txt meta-data=/work/templates/meta-data.txt"
        ));
    }
}
