//! Working-directory layout and default templates.
//!
//! Every path the tool touches is derived from one base directory:
//!
//! ```text
//! <base>/
//! ├── tools/{podman,qemu}/   portable executables
//! ├── templates/             user-data.txt, meta-data.txt
//! ├── images/                velocloud.qcow2 (input), cloud-init.iso (output)
//! ├── runtime/podman/        isolated podman state
//! ├── runtime/vm/            disposable disk clones
//! ├── cache/                 downloaded archives
//! └── logs/                  one transcript per operation
//! ```

use crate::error::{CoreError, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Directories created by [`Layout::ensure_base`], relative to the base.
pub const BASE_DIRS: [&str; 13] = [
    "tools",
    "tools/podman",
    "tools/qemu",
    "templates",
    "images",
    "runtime",
    "runtime/podman",
    "runtime/podman/tmp",
    "runtime/podman/config",
    "runtime/podman/run",
    "runtime/podman/home",
    "cache",
    "logs",
];

/// Directories removed by uninstall.
pub const UNINSTALL_DIRS: [&str; 5] = ["tools", "images", "runtime", "cache", "templates"];

/// Default cloud-init user-data.
pub const DEFAULT_USER_DATA: &str = "#cloud-config
hostname: vce
password: Velocloud123
chpasswd: {expire: False}
ssh_pwauth: True
";

/// Default cloud-init meta-data.
pub const DEFAULT_META_DATA: &str = "instance-id: vce
local-hostname: vce
";

/// Paths below one working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    base: PathBuf,
}

impl Layout {
    /// Layout rooted at `base`, which should be absolute.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn tools_dir(&self) -> PathBuf {
        self.base.join("tools")
    }

    pub fn podman_dir(&self) -> PathBuf {
        self.tools_dir().join("podman")
    }

    pub fn qemu_dir(&self) -> PathBuf {
        self.tools_dir().join("qemu")
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.base.join("templates")
    }

    pub fn user_data(&self) -> PathBuf {
        self.templates_dir().join("user-data.txt")
    }

    pub fn meta_data(&self) -> PathBuf {
        self.templates_dir().join("meta-data.txt")
    }

    pub fn images_dir(&self) -> PathBuf {
        self.base.join("images")
    }

    /// Generated cloud-init ISO.
    pub fn iso_path(&self) -> PathBuf {
        self.images_dir().join("cloud-init.iso")
    }

    /// User-supplied base disk for smoke tests.
    pub fn disk_image(&self) -> PathBuf {
        self.images_dir().join("velocloud.qcow2")
    }

    pub fn runtime_dir(&self) -> PathBuf {
        self.base.join("runtime")
    }

    /// Scratch directory for disk clones.
    pub fn vm_scratch_dir(&self) -> PathBuf {
        self.runtime_dir().join("vm")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.base.join("cache")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base.join("logs")
    }

    /// `path` relative to the base for display, or unchanged if outside it.
    pub fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.base)
            .unwrap_or(path)
            .display()
            .to_string()
    }

    /// Create the directory skeleton.
    pub fn ensure_base(&self) -> Result<()> {
        for rel in BASE_DIRS {
            ensure_dir(&self.base.join(rel))?;
        }
        tracing::debug!(base = %self.base.display(), "base layout verified");
        Ok(())
    }

    /// Write default templates that do not exist yet.
    ///
    /// Existing files are never touched. Returns the paths created.
    pub fn ensure_templates(&self) -> Result<Vec<PathBuf>> {
        ensure_dir(&self.templates_dir())?;
        let mut created = Vec::new();
        for (path, content) in [
            (self.user_data(), DEFAULT_USER_DATA),
            (self.meta_data(), DEFAULT_META_DATA),
        ] {
            if write_new(&path, content)? {
                tracing::info!(path = %path.display(), "created default template");
                created.push(path);
            }
        }
        Ok(created)
    }
}

fn write_new(path: &Path, content: &str) -> Result<bool> {
    let file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path);
    let mut file = match file {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(CoreError::io(format!("create {}", path.display()), e)),
    };
    file.write_all(content.as_bytes())
        .map_err(|e| CoreError::io(format!("write {}", path.display()), e))?;
    Ok(true)
}

/// Create `path` and its parents.
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| CoreError::io(format!("create {}", path.display()), e))
}

/// Remove a file or directory tree; a missing path is fine.
pub fn remove_if_exists(path: &Path) -> Result<()> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(CoreError::io(format!("stat {}", path.display()), e)),
    };
    let removed = if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    match removed {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CoreError::io(format!("remove {}", path.display()), e)),
    }
}

/// Require `path` to be an existing regular file.
///
/// # Errors
/// [`CoreError::NotFound`] when missing, [`CoreError::NotAFile`] for a
/// directory.
pub fn ensure_file(path: &Path, what: &str) -> Result<()> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Err(CoreError::NotAFile {
            what: what.to_string(),
            path: path.to_path_buf(),
        }),
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CoreError::NotFound {
            what: what.to_string(),
            path: path.to_path_buf(),
        }),
        Err(e) => Err(CoreError::io(format!("stat {what}"), e)),
    }
}
