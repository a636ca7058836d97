//! Portable podman and QEMU provisioning.
//!
//! Executables live under `tools/`. When one is missing, its release archive
//! is downloaded into `cache/`, the tool directory is wiped, and the archive
//! is unpacked with `tar -xf`, which reads zip files on Windows 10 and later.

use crate::config::{
    EXTRACT_TIMEOUT, PODMAN_EXE, PODMAN_SUPPORT_BINARIES, PODMAN_VERSION, PODMAN_ZIP_NAME,
    PODMAN_ZIP_URL, QEMU_EXE, QEMU_VERSION, QEMU_ZIP_NAME, QEMU_ZIP_URL,
};
use crate::error::{CoreError, Result};
use crate::layout::{ensure_dir, remove_if_exists, Layout};
use async_trait::async_trait;
use cloudinit_machine::{CommandRunner, OutputSink, ProcessRunner, RunOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Source of the external executables the orchestrators drive.
#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Absolute path to a usable podman client.
    async fn podman(&self) -> Result<PathBuf>;

    /// Absolute path to a QEMU system emulator.
    async fn qemu(&self) -> Result<PathBuf>;
}

/// Toolchain that downloads portable releases on first use.
pub struct PortableToolchain {
    layout: Layout,
    runner: Arc<dyn CommandRunner>,
    sink: Option<OutputSink>,
}

impl PortableToolchain {
    pub fn new(layout: Layout) -> Self {
        Self {
            layout,
            runner: Arc::new(ProcessRunner),
            sink: None,
        }
    }

    /// Use a different runner for archive extraction.
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Mirror extraction output into `sink`.
    pub fn with_sink(mut self, sink: Option<OutputSink>) -> Self {
        self.sink = sink;
        self
    }

    async fn fetch(&self, url: &str, file_name: &str) -> Result<PathBuf> {
        let cache = self.layout.cache_dir();
        ensure_dir(&cache)?;
        let dest = cache.join(file_name);
        download(url, &dest).await?;
        Ok(dest)
    }

    /// Unpack `archive` into `dest` through the command runner.
    pub(crate) async fn extract(&self, archive: &Path, dest: &Path) -> Result<()> {
        tracing::info!(archive = %archive.display(), "extracting archive");
        let opts = RunOptions::new()
            .timeout(EXTRACT_TIMEOUT)
            .dir(self.layout.base())
            .sink(self.sink.clone());
        let args = vec![
            "-xf".to_string(),
            archive.to_string_lossy().into_owned(),
            "-C".to_string(),
            dest.to_string_lossy().into_owned(),
        ];
        self.runner.run(&opts, Path::new("tar"), &args).await?;
        Ok(())
    }

    async fn reinstall(&self, url: &str, file_name: &str, dir: &Path) -> Result<()> {
        let archive = self.fetch(url, file_name).await?;
        remove_if_exists(dir)?;
        ensure_dir(dir)?;
        self.extract(&archive, dir).await
    }
}

#[async_trait]
impl Toolchain for PortableToolchain {
    async fn podman(&self) -> Result<PathBuf> {
        let dir = self.layout.podman_dir();
        let exe = dir.join(PODMAN_EXE);
        if exe.is_file() {
            for name in PODMAN_SUPPORT_BINARIES {
                hoist(&dir, name)?;
            }
            tracing::debug!(path = %exe.display(), "podman already present");
            return Ok(exe);
        }

        tracing::info!(version = PODMAN_VERSION, "podman not found, downloading portable release");
        self.reinstall(PODMAN_ZIP_URL, PODMAN_ZIP_NAME, &dir).await?;
        hoist(&dir, PODMAN_EXE)?;
        for name in PODMAN_SUPPORT_BINARIES {
            hoist(&dir, name)?;
        }
        tracing::info!(path = %exe.display(), "podman ready");
        Ok(exe)
    }

    async fn qemu(&self) -> Result<PathBuf> {
        let dir = self.layout.qemu_dir();
        ensure_dir(&dir)?;
        if let Some(exe) = find_file(&dir, QEMU_EXE)? {
            tracing::debug!(path = %exe.display(), "qemu already present");
            return Ok(exe);
        }

        tracing::info!(version = QEMU_VERSION, "qemu not found, downloading portable release");
        self.reinstall(QEMU_ZIP_URL, QEMU_ZIP_NAME, &dir).await?;
        let exe = find_file(&dir, QEMU_EXE)?.ok_or_else(|| CoreError::NotFound {
            what: QEMU_EXE.to_string(),
            path: dir.clone(),
        })?;
        tracing::info!(path = %exe.display(), "qemu ready");
        Ok(exe)
    }
}

/// Stream `url` into `dest` via `<dest>.tmp`.
pub async fn download(url: &str, dest: &Path) -> Result<()> {
    tracing::info!(url, "downloading");
    let failed = |source| CoreError::Download {
        url: url.to_string(),
        source,
    };
    let client = reqwest::Client::builder()
        .user_agent(concat!("cloudinit-builder/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(failed)?;
    let mut response = client.get(url).send().await.map_err(failed)?;
    if !response.status().is_success() {
        return Err(CoreError::DownloadStatus {
            url: url.to_string(),
            status: response.status(),
        });
    }

    let mut tmp = dest.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    let mut file = tokio::fs::File::create(&tmp)
        .await
        .map_err(|e| CoreError::io(format!("create {}", tmp.display()), e))?;
    let mut bytes: u64 = 0;
    while let Some(chunk) = response.chunk().await.map_err(failed)? {
        file.write_all(&chunk)
            .await
            .map_err(|e| CoreError::io(format!("write {}", tmp.display()), e))?;
        bytes += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| CoreError::io(format!("flush {}", tmp.display()), e))?;
    drop(file);

    tokio::fs::rename(&tmp, dest)
        .await
        .map_err(|e| CoreError::io(format!("rename {}", tmp.display()), e))?;
    tracing::info!(dest = %dest.display(), bytes, "downloaded");
    Ok(())
}

/// First regular file below `root` named `name`, ignoring ASCII case.
pub fn find_file(root: &Path, name: &str) -> Result<Option<PathBuf>> {
    let entries = std::fs::read_dir(root)
        .map_err(|e| CoreError::io(format!("read {}", root.display()), e))?;
    let mut subdirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| CoreError::io(format!("read {}", root.display()), e))?;
        let file_type = entry
            .file_type()
            .map_err(|e| CoreError::io(format!("stat {}", entry.path().display()), e))?;
        if file_type.is_dir() {
            subdirs.push(entry.path());
        } else if file_type.is_file() && entry.file_name().to_string_lossy().eq_ignore_ascii_case(name)
        {
            return Ok(Some(entry.path()));
        }
    }
    subdirs.sort();
    for dir in subdirs {
        if let Some(found) = find_file(&dir, name)? {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

/// Make sure `<root>/<name>` exists, copying it up from a nested directory.
fn hoist(root: &Path, name: &str) -> Result<()> {
    let target = root.join(name);
    if target.exists() {
        return Ok(());
    }
    let found = find_file(root, name)?.ok_or_else(|| CoreError::NotFound {
        what: name.to_string(),
        path: root.to_path_buf(),
    })?;
    std::fs::copy(&found, &target)
        .map_err(|e| CoreError::io(format!("copy {}", found.display()), e))?;
    tracing::debug!(from = %found.display(), to = %target.display(), "placed binary");
    Ok(())
}
