//! Fixed settings and environment overrides.

use std::time::Duration;

/// Container image that provides genisoimage.
pub const BASE_IMAGE: &str = "docker.io/library/debian:bookworm";

/// Bound for `podman pull`.
pub const PULL_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Bound for the containerized ISO build.
pub const CONTAINER_RUN_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Bound for one smoke-test VM run.
pub const VM_RUN_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Bound for archive extraction.
pub const EXTRACT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Bound for each helper-process kill during uninstall.
pub const TASKKILL_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound for launching the detached self-delete script.
pub const SELF_DELETE_TIMEOUT: Duration = Duration::from_secs(2);

/// Portable podman release.
pub const PODMAN_VERSION: &str = "v5.1.0";
/// Download location of the portable podman archive.
pub const PODMAN_ZIP_URL: &str = "https://github.com/containers/podman/releases/download/v5.1.0/podman-remote-release-windows_amd64.zip";
/// Cached file name of the podman archive.
pub const PODMAN_ZIP_NAME: &str = "podman-remote-release-windows_amd64.zip";
/// Podman client executable.
pub const PODMAN_EXE: &str = "podman.exe";
/// Helpers podman expects next to its executable.
pub const PODMAN_SUPPORT_BINARIES: [&str; 2] = ["win-sshproxy.exe", "gvproxy.exe"];

/// Portable QEMU build.
pub const QEMU_VERSION: &str = "20240822";
/// Download location of the portable QEMU archive.
pub const QEMU_ZIP_URL: &str = "https://github.com/dirkarnez/qemu-portable/releases/download/20240822/qemu-w64-portable-20240822.zip";
/// Cached file name of the QEMU archive.
pub const QEMU_ZIP_NAME: &str = "qemu-w64-portable-20240822.zip";
/// QEMU system emulator executable.
pub const QEMU_EXE: &str = "qemu-system-x86_64.exe";

/// Environment variable overriding the QEMU accelerator.
pub const QEMU_ACCEL_ENV: &str = "CLOUDINIT_BUILDER_QEMU_ACCEL";
/// Accelerator used when no override is set.
pub const DEFAULT_QEMU_ACCEL: &str = "tcg";

/// Accelerator for bundled QEMU launches, read from the environment now.
pub fn qemu_accelerator() -> String {
    accelerator_from(std::env::var(QEMU_ACCEL_ENV).ok())
}

/// Blank or missing values fall back to [`DEFAULT_QEMU_ACCEL`].
pub fn accelerator_from(value: Option<String>) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_QEMU_ACCEL.to_string())
}
