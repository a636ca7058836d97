//! # cloudinit-core
//!
//! Build and smoke-test orchestration for cloudinit-builder.
//!
//! This crate sequences the steps that turn two cloud-init templates into a
//! seed ISO and boots that ISO against a disposable disk clone, on top of
//! the process runner and podman machine control in `cloudinit-machine`.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     cloudinit-core                       │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │   IsoBuilder    │────▶│  MachineController       │   │
//! │  │   - build()     │     │  (from cloudinit-machine)│   │
//! │  └─────────────────┘     └──────────────────────────┘   │
//! │           │                          │ podman           │
//! │           ▼                          ▼                  │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │   Toolchain     │     │  debian container        │   │
//! │  │  - podman()     │     │  genisoimage             │   │
//! │  │  - qemu()       │     └──────────────────────────┘   │
//! │  └─────────────────┘                                    │
//! │           ▲                                              │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │   SmokeTest     │────▶│  QEMU or custom VM       │   │
//! │  │   - run()       │     │  (disk clone + ISO)      │   │
//! │  └─────────────────┘     └──────────────────────────┘   │
//! │                                                          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use cloudinit_core::{IsoBuilder, Layout, PortableToolchain, Transcript};
//! use std::sync::Arc;
//!
//! # async fn example() -> cloudinit_core::Result<()> {
//! let layout = Layout::new("/srv/cloudinit-builder");
//! let transcript = Transcript::open(&layout, "build")?;
//! let toolchain = PortableToolchain::new(layout.clone()).with_sink(Some(transcript.sink()));
//!
//! let iso = IsoBuilder::new(layout, Arc::new(toolchain))
//!     .with_sink(Some(transcript.sink()))
//!     .build()
//!     .await?;
//! println!("wrote {}", iso.display());
//! # Ok(())
//! # }
//! ```

mod builder;
pub mod config;
mod console;
mod error;
mod layout;
mod smoke;
mod toolchain;
mod transcript;
mod uninstall;

#[cfg(test)]
mod testing;

pub use builder::{build_script, container_args, IsoBuilder};
pub use console::Console;
pub use error::{CoreError, Result};
pub use layout::{ensure_file, remove_if_exists, Layout, BASE_DIRS, UNINSTALL_DIRS};
pub use smoke::{clone_name, custom_args, looks_like_qemu, qemu_args, SmokeTest};
pub use toolchain::{download, find_file, PortableToolchain, Toolchain};
pub use transcript::{Transcript, TranscriptWriter};
pub use uninstall::{self_delete_script, Uninstaller};

// Re-export the machine layer for the binary.
pub use cloudinit_machine::{ErrorKind, MachineController, MachineError};
