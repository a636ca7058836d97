//! Isolated environment for the managed podman.
//!
//! Podman reads its configuration, connection list and machine state from
//! XDG and home directories. Pointing all of them below
//! `<base>/runtime/podman` keeps the tool away from any podman setup the
//! host user already has.

use crate::error::{MachineError, Result};
use std::path::{Path, PathBuf};

/// Directories and variables that confine podman to the working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineEnv {
    config_dir: PathBuf,
    tmp_dir: PathBuf,
    run_dir: PathBuf,
    home_dir: PathBuf,
}

impl MachineEnv {
    /// Root of podman's private state, relative to the working directory.
    pub fn root(base_dir: &Path) -> PathBuf {
        base_dir.join("runtime").join("podman")
    }

    /// Derive the environment for `base_dir` and create its directories.
    ///
    /// # Errors
    /// Returns [`MachineError::Io`] if the base directory cannot be made
    /// absolute or a directory cannot be created.
    pub fn build(base_dir: &Path) -> Result<Self> {
        let base = std::path::absolute(base_dir)
            .map_err(|e| MachineError::io(format!("resolve {}", base_dir.display()), e))?;
        let root = Self::root(&base);
        let env = Self {
            config_dir: root.join("config"),
            tmp_dir: root.join("tmp"),
            run_dir: root.join("run"),
            home_dir: root.join("home"),
        };
        for dir in env.dirs() {
            std::fs::create_dir_all(dir)
                .map_err(|e| MachineError::io(format!("create {}", dir.display()), e))?;
        }
        tracing::debug!(root = %root.display(), "podman environment prepared");
        Ok(env)
    }

    fn dirs(&self) -> [&Path; 4] {
        [
            &self.config_dir,
            &self.tmp_dir,
            &self.run_dir,
            &self.home_dir,
        ]
    }

    /// Podman config home (`XDG_CONFIG_HOME`).
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Scratch directory (`TMPDIR`, `PODMAN_TMPDIR`).
    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }

    /// Runtime directory (`XDG_RUNTIME_DIR`).
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Home directory seen by podman (`HOME`).
    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    /// Variable bindings to add to every podman invocation.
    pub fn vars(&self) -> Vec<(String, String)> {
        let s = |p: &Path| p.to_string_lossy().into_owned();
        vec![
            ("XDG_CONFIG_HOME".into(), s(&self.config_dir)),
            ("XDG_RUNTIME_DIR".into(), s(&self.run_dir)),
            (
                "PODMAN_CONFIG".into(),
                s(&self.config_dir.join("containers.conf")),
            ),
            ("PODMAN_TMPDIR".into(), s(&self.tmp_dir)),
            ("TMPDIR".into(), s(&self.tmp_dir)),
            ("HOME".into(), s(&self.home_dir)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_creates_dirs_under_base() {
        let base = tempfile::tempdir().unwrap();
        let env = MachineEnv::build(base.path()).unwrap();

        let root = base.path().join("runtime").join("podman");
        assert_eq!(env.config_dir(), root.join("config"));
        assert_eq!(env.tmp_dir(), root.join("tmp"));
        assert_eq!(env.run_dir(), root.join("run"));
        assert_eq!(env.home_dir(), root.join("home"));
        for dir in env.dirs() {
            assert!(dir.is_dir(), "{} should exist", dir.display());
            assert!(dir.is_absolute());
        }
    }

    #[test]
    fn test_vars_point_into_runtime() {
        let base = tempfile::tempdir().unwrap();
        let env = MachineEnv::build(base.path()).unwrap();
        let vars = env.vars();

        let keys: Vec<&str> = vars.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            [
                "XDG_CONFIG_HOME",
                "XDG_RUNTIME_DIR",
                "PODMAN_CONFIG",
                "PODMAN_TMPDIR",
                "TMPDIR",
                "HOME"
            ]
        );
        let root = MachineEnv::root(base.path());
        for (key, value) in &vars {
            assert!(
                Path::new(value).starts_with(&root),
                "{key}={value} escapes {}",
                root.display()
            );
        }
        assert!(vars
            .iter()
            .any(|(k, v)| k == "PODMAN_CONFIG" && v.ends_with("containers.conf")));
    }

    #[test]
    fn test_build_is_repeatable() {
        let base = tempfile::tempdir().unwrap();
        let first = MachineEnv::build(base.path()).unwrap();
        let second = MachineEnv::build(base.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_build_fails_when_blocked_by_file() {
        let base = tempfile::tempdir().unwrap();
        std::fs::write(base.path().join("runtime"), b"not a dir").unwrap();
        let err = MachineEnv::build(base.path()).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Io);
    }
}
