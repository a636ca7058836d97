//! Removal of everything the tool created below the working directory.

use crate::config::{PODMAN_EXE, QEMU_EXE, SELF_DELETE_TIMEOUT, TASKKILL_TIMEOUT};
use crate::console::Console;
use crate::error::{CoreError, Result, StepExt};
use crate::layout::{remove_if_exists, Layout, UNINSTALL_DIRS};
use cloudinit_machine::{CommandRunner, MachineController, OutputSink, ProcessRunner, RunOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// `taskkill` exit code for "no such process".
const TASKKILL_NOT_RUNNING: i32 = 128;

/// Contents of the detached script that deletes `binary` and itself.
pub fn self_delete_script(binary: &Path) -> String {
    format!(
        "@echo off\r\ntimeout /t 2 >nul\r\ndel \"{}\"\r\ndel \"%~f0\"\r\n",
        binary.display()
    )
}

/// Tears down the machine, the tools and all generated state.
///
/// `logs/` is left alone; the caller removes it once its transcript is
/// closed.
pub struct Uninstaller {
    layout: Layout,
    runner: Arc<dyn CommandRunner>,
    sink: Option<OutputSink>,
    console: Console,
}

impl Uninstaller {
    pub fn new(layout: Layout) -> Self {
        Self {
            layout,
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

    /// Run the uninstall. With `self_delete`, `binary` is scheduled for
    /// deletion after this process exits.
    ///
    /// Helper-process and machine cleanup failures are warnings; failing to
    /// remove a directory is fatal.
    pub async fn perform(&self, self_delete: bool, binary: Option<&Path>) -> Result<()> {
        tracing::info!(base = %self.layout.base().display(), "starting uninstall");
        self.kill_helpers().await;
        self.remove_machine().await;

        self.console
            .step("Removing tools/, images/, runtime/, cache/, templates/");
        for dir in UNINSTALL_DIRS {
            let path = self.layout.base().join(dir);
            remove_if_exists(&path).step("remove runtime assets")?;
            tracing::info!(path = %path.display(), "removed");
        }

        if self_delete {
            let binary = binary.ok_or_else(|| {
                CoreError::InvalidInput("cannot self-delete: binary path unknown".into())
            })?;
            self.schedule_self_delete(binary).await?;
        }
        Ok(())
    }

    async fn kill_helpers(&self) {
        for name in [PODMAN_EXE, QEMU_EXE] {
            let opts = RunOptions::new()
                .timeout(TASKKILL_TIMEOUT)
                .dir(self.layout.base());
            let args: Vec<String> = ["/IM", name, "/T", "/F"].map(String::from).to_vec();
            match self.runner.run(&opts, Path::new("taskkill"), &args).await {
                Ok(_) => tracing::info!(process = name, "terminated"),
                Err(e)
                    if e.run_result().map(|r| r.exit_code) == Some(TASKKILL_NOT_RUNNING) => {}
                Err(e) => tracing::warn!(process = name, error = %e, "failed to terminate"),
            }
        }
    }

    async fn remove_machine(&self) {
        let podman = self.layout.podman_dir().join(PODMAN_EXE);
        if !podman.is_file() {
            return;
        }
        let removed = match MachineController::new(self.layout.base(), podman) {
            Ok(controller) => {
                controller
                    .with_runner(self.runner.clone())
                    .with_sink(self.sink.clone())
                    .remove()
                    .await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = removed {
            tracing::warn!(error = %e, "failed to remove podman machine");
        }
    }

    async fn schedule_self_delete(&self, binary: &Path) -> Result<PathBuf> {
        let stamp = chrono::Utc::now().timestamp();
        let script = self.layout.base().join(format!("cleanup-{stamp}.bat"));
        std::fs::write(&script, self_delete_script(binary))
            .map_err(|e| CoreError::io(format!("write {}", script.display()), e))?;
        tracing::info!(script = %script.display(), "created self-delete script");

        let opts = RunOptions::new().timeout(SELF_DELETE_TIMEOUT);
        let args = vec![
            "/C".to_string(),
            "start".to_string(),
            String::new(),
            script.to_string_lossy().into_owned(),
        ];
        self.runner
            .run(&opts, Path::new("cmd.exe"), &args)
            .await
            .step("launch cleanup script")?;
        tracing::info!(script = %script.display(), "scheduled self-delete");
        Ok(script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{failed, ok, ScriptedRunner};
    use cloudinit_machine::ErrorKind;

    fn populated() -> (tempfile::TempDir, Layout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        layout.ensure_base().unwrap();
        layout.ensure_templates().unwrap();
        std::fs::write(layout.logs_dir().join("uninstall-1.txt"), b"log").unwrap();
        (dir, layout)
    }

    fn uninstaller(layout: &Layout, runner: Arc<ScriptedRunner>) -> Uninstaller {
        Uninstaller::new(layout.clone())
            .with_runner(runner)
            .with_console(Console::new(true))
    }

    fn program(call: &crate::testing::Call) -> String {
        call.program.display().to_string()
    }

    #[tokio::test]
    async fn test_removes_assets_but_keeps_logs() {
        let (dir, layout) = populated();
        let runner = ScriptedRunner::new(|_, _| failed(TASKKILL_NOT_RUNNING, "not found"));

        uninstaller(&layout, runner.clone())
            .perform(false, None)
            .await
            .unwrap();

        for name in UNINSTALL_DIRS {
            assert!(!dir.path().join(name).exists(), "{name} survived");
        }
        assert!(layout.logs_dir().join("uninstall-1.txt").is_file());
        let programs: Vec<String> = runner.calls().iter().map(program).collect();
        assert_eq!(programs, ["taskkill", "taskkill"]);
        assert_eq!(runner.lines()[0], "/IM podman.exe /T /F");
        assert_eq!(runner.lines()[1], "/IM qemu-system-x86_64.exe /T /F");
    }

    #[tokio::test]
    async fn test_kill_failure_is_only_a_warning() {
        let (_dir, layout) = populated();
        let runner = ScriptedRunner::new(|_, _| failed(1, "Access is denied."));
        uninstaller(&layout, runner).perform(false, None).await.unwrap();
        assert!(!layout.tools_dir().exists());
    }

    #[tokio::test]
    async fn test_removes_machine_when_podman_present() {
        let (_dir, layout) = populated();
        std::fs::write(layout.podman_dir().join(PODMAN_EXE), b"bin").unwrap();
        let runner = ScriptedRunner::new(|program, _| {
            if program == Path::new("taskkill") {
                return failed(TASKKILL_NOT_RUNNING, "not found");
            }
            ok("")
        });

        uninstaller(&layout, runner.clone())
            .perform(false, None)
            .await
            .unwrap();
        assert_eq!(runner.count("machine stop cloudinit-builder"), 1);
        assert_eq!(runner.count("machine rm -f cloudinit-builder"), 1);
    }

    #[tokio::test]
    async fn test_machine_removal_failure_is_only_a_warning() {
        let (_dir, layout) = populated();
        std::fs::write(layout.podman_dir().join(PODMAN_EXE), b"bin").unwrap();
        let runner = ScriptedRunner::new(|program, _| {
            if program == Path::new("taskkill") {
                return ok("");
            }
            failed(125, "Error: hyperv refused the request")
        });

        uninstaller(&layout, runner.clone())
            .perform(false, None)
            .await
            .unwrap();
        assert!(!layout.runtime_dir().exists());
    }

    #[tokio::test]
    async fn test_self_delete_requires_binary() {
        let (_dir, layout) = populated();
        let runner = ScriptedRunner::new(|_, _| ok(""));
        let err = uninstaller(&layout, runner)
            .perform(true, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_self_delete_schedules_script() {
        let (dir, layout) = populated();
        let binary = dir.path().join("cloudinit-builder.exe");
        let runner = ScriptedRunner::new(|_, _| ok(""));

        uninstaller(&layout, runner.clone())
            .perform(true, Some(&binary))
            .await
            .unwrap();

        let calls = runner.calls();
        let launch = calls.last().unwrap();
        assert_eq!(program(launch), "cmd.exe");
        assert_eq!(launch.args[..3], ["/C", "start", ""]);
        assert_eq!(launch.timeout, SELF_DELETE_TIMEOUT);
        let script = PathBuf::from(&launch.args[3]);
        let name = script.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("cleanup-") && name.ends_with(".bat"));
        let body = std::fs::read_to_string(&script).unwrap();
        assert!(body.contains(&format!("del \"{}\"", binary.display())));
        assert!(body.contains("del \"%~f0\""));
    }
}
