//! SmokeTest - boots the generated ISO against a throwaway disk clone.

use crate::config::{qemu_accelerator, VM_RUN_TIMEOUT};
use crate::console::Console;
use crate::error::{CoreError, Result, StepExt};
use crate::layout::{ensure_dir, ensure_file, Layout};
use crate::toolchain::Toolchain;
use crate::transcript::FILE_TIMESTAMP;
use chrono::{DateTime, Local};
use cloudinit_machine::{CommandRunner, OutputSink, ProcessRunner, RunOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Whether `path` names a QEMU-compatible emulator.
pub fn looks_like_qemu(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    name.starts_with("qemu-system") || name.contains("qemu")
}

/// Launch arguments for QEMU.
pub fn qemu_args(disk: &Path, iso: &Path, accel: &str) -> Vec<String> {
    vec![
        "-name".into(),
        "cloudinit-builder-test,process=cloudinit-builder-test".into(),
        "-m".into(),
        "4096".into(),
        "-smp".into(),
        "2".into(),
        "-drive".into(),
        format!("if=virtio,format=qcow2,file={}", disk.display()),
        "-cdrom".into(),
        iso.display().to_string(),
        "-boot".into(),
        "d".into(),
        "-accel".into(),
        accel.into(),
        "-netdev".into(),
        "user,id=wan,ipv6=off".into(),
        "-device".into(),
        "virtio-net-pci,netdev=wan,mac=52:54:00:00:00:01".into(),
        "-vga".into(),
        "std".into(),
        "-display".into(),
        "sdl".into(),
        "-serial".into(),
        "stdio".into(),
    ]
}

/// Launch arguments for any other VM executable.
pub fn custom_args(disk: &Path, iso: &Path) -> Vec<String> {
    vec![
        "--disk".into(),
        disk.display().to_string(),
        "--cdrom".into(),
        iso.display().to_string(),
    ]
}

/// File name of a disk clone taken at `now`.
pub fn clone_name(now: DateTime<Local>) -> String {
    format!("velocloud-{}.qcow2", now.format(FILE_TIMESTAMP))
}

/// Deletes the disk clone when dropped.
struct ScratchDisk {
    path: PathBuf,
    display: String,
    console: Console,
}

impl Drop for ScratchDisk {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => self
                .console
                .step(format!("Deleted temporary disk {}", self.display)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "failed to delete temporary disk"
            ),
        }
    }
}

/// Runs one VM smoke test.
pub struct SmokeTest {
    layout: Layout,
    toolchain: Arc<dyn Toolchain>,
    runner: Arc<dyn CommandRunner>,
    sink: Option<OutputSink>,
    console: Console,
}

impl SmokeTest {
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

    /// Boot the ISO with `vm`, or with the bundled QEMU when `vm` is `None`.
    ///
    /// `extra_args` are appended after the computed arguments. A normal exit
    /// of the VM process is success; nothing inside the guest is inspected.
    ///
    /// # Errors
    /// - [`CoreError::NotFound`] naming the missing executable, ISO or disk
    /// - the VM's `ProcessFailed` or `Timeout`, wrapped in a step error
    pub async fn run(&self, vm: Option<&Path>, extra_args: &[String]) -> Result<()> {
        let (exe, bundled) = match vm {
            None => {
                self.console.step("Preparing bundled QEMU runtime...");
                (self.toolchain.qemu().await.step("ensure qemu")?, true)
            }
            Some(path) => {
                let abs = std::path::absolute(path)
                    .map_err(|e| CoreError::io("resolve vm path", e))?;
                ensure_file(&abs, "VM executable")?;
                (abs, false)
            }
        };

        let iso = self.layout.iso_path();
        ensure_file(&iso, "cloud-init ISO")?;
        let disk = self.layout.disk_image();
        ensure_file(&disk, "velocloud qcow2 image")?;

        let scratch = self.layout.vm_scratch_dir();
        ensure_dir(&scratch).step("prepare vm runtime dir")?;
        let clone = scratch.join(clone_name(Local::now()));
        let display = self.layout.relative(&clone);
        self.console
            .step(format!("Cloning base qcow2 to {display}"));
        let _guard = ScratchDisk {
            path: clone.clone(),
            display,
            console: self.console,
        };
        tokio::fs::copy(&disk, &clone)
            .await
            .map_err(|e| CoreError::io(format!("clone {}", disk.display()), e))
            .step("clone qcow2")?;

        let mut args = if bundled || looks_like_qemu(&exe) {
            self.console.step("Launching QEMU with qcow2 + ISO...");
            qemu_args(&clone, &iso, &qemu_accelerator())
        } else {
            self.console.step("Launching provided VM executable...");
            custom_args(&clone, &iso)
        };
        args.extend(extra_args.iter().cloned());

        let opts = RunOptions::new()
            .timeout(VM_RUN_TIMEOUT)
            .dir(self.layout.base())
            .sink(self.sink.clone());
        self.runner
            .run(&opts, &exe, &args)
            .await
            .step("vm execution failed")?;

        self.console.done("VM process exited normally.");
        Ok(())
    }
}
