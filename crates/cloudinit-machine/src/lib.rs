//! # cloudinit-machine
//!
//! Process execution and podman machine control for cloudinit-builder.
//! Everything here is scoped to one working directory: podman sees only the
//! configuration, connections and machines that live below
//! `<base>/runtime/podman`.
//!
//! ## Quick Start
//!
//! ```no_run
//! use cloudinit_machine::{MachineController, MachineState};
//!
//! # async fn example() -> cloudinit_machine::Result<()> {
//! let controller = MachineController::new(".", "runtime/podman/podman.exe")?;
//!
//! // Create, start and select the machine as needed
//! let machine = controller.ensure_ready().await?;
//! assert_eq!(machine.state(), MachineState::Running);
//!
//! // Stopping an already stopped machine is fine
//! controller.stop().await?;
//! controller.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Bounded execution**: every command has a deadline and keeps its
//!   partial output when killed
//! - **Output mirroring**: command output can be copied into a transcript
//! - **Isolation**: podman runs with private XDG, home and temp directories
//! - **Idempotent lifecycle**: repeated ensure/stop/remove calls converge

mod classify;
mod env;
mod error;
mod machine;
mod process;

pub use classify::{classify, Classifier, Condition, Conditions};
pub use env::MachineEnv;
pub use error::{ErrorKind, MachineError, Result};
pub use machine::{
    MachineController, MachineState, ManagedMachine, INSPECT_TIMEOUT, MACHINE_INIT_TIMEOUT,
    MACHINE_NAME, MACHINE_START_TIMEOUT,
};
pub use process::{
    command_line, run_command, CommandRunner, OutputSink, ProcessRunner, RunOptions, RunResult,
};
