//! cloudinit-builder entry point.
//!
//! Each subcommand opens its own transcript under `logs/` and installs a
//! tracing subscriber that writes to it for the duration of the operation.
//!
//! ## Commands
//!
//! - **build**: produce `images/cloud-init.iso` inside the podman machine
//! - **test**: boot the ISO against a clone of `images/velocloud.qcow2`
//! - **uninstall**: remove the machine, tools and generated files

mod config;
mod logging;

use clap::{CommandFactory, Parser, Subcommand};
use cloudinit_core::{
    remove_if_exists, Console, IsoBuilder, Layout, PortableToolchain, SmokeTest, Transcript,
    Uninstaller,
};
use config::BuilderConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// Build and smoke-test cloud-init seed ISOs.
#[derive(Parser, Debug)]
#[command(name = "cloudinit-builder", version, about)]
struct Cli {
    /// Suppress progress output.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Working directory (defaults to $CLOUDINIT_BUILDER_DIR, then the current directory).
    #[arg(long, global = true, value_name = "DIR")]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Cmd {
    /// Build images/cloud-init.iso from the templates.
    Build,

    /// Boot the ISO against a disposable clone of images/velocloud.qcow2.
    Test {
        /// Portable VM executable (bundled QEMU when omitted).
        #[arg(long, value_name = "PATH")]
        vm: Option<PathBuf>,

        /// Extra arguments passed to the VM after `--`.
        #[arg(last = true, value_name = "VM_ARGS")]
        extra: Vec<String>,
    },

    /// Remove the machine, tools and generated files.
    Uninstall {
        /// Delete this executable after exit.
        #[arg(long)]
        self_delete: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };
    let config = BuilderConfig::from_env()?.with_overrides(cli.base_dir, cli.quiet)?;
    let layout = Layout::new(&config.base_dir);
    let console = Console::new(config.quiet);

    match command {
        Cmd::Build => build(&layout, console).await,
        Cmd::Test { vm, extra } => test(&layout, console, vm, extra).await,
        Cmd::Uninstall { self_delete } => uninstall(&layout, console, self_delete).await,
    }
}

fn open_transcript(layout: &Layout, console: Console, prefix: &str) -> anyhow::Result<Transcript> {
    let transcript = Transcript::open(layout, prefix)?;
    console.step(format!(
        "Logging {prefix} output to {}",
        layout.relative(transcript.path())
    ));
    Ok(transcript)
}

async fn build(layout: &Layout, console: Console) -> anyhow::Result<()> {
    let transcript = open_transcript(layout, console, "build")?;
    let _log = tracing::subscriber::set_default(logging::subscriber(&transcript));

    let sink = Some(transcript.sink());
    let toolchain = PortableToolchain::new(layout.clone()).with_sink(sink.clone());
    IsoBuilder::new(layout.clone(), Arc::new(toolchain))
        .with_sink(sink)
        .with_console(console)
        .build()
        .await?;
    Ok(())
}

async fn test(
    layout: &Layout,
    console: Console,
    vm: Option<PathBuf>,
    extra: Vec<String>,
) -> anyhow::Result<()> {
    let transcript = open_transcript(layout, console, "test")?;
    let _log = tracing::subscriber::set_default(logging::subscriber(&transcript));

    let vm = vm.filter(|p| !p.as_os_str().is_empty());
    let sink = Some(transcript.sink());
    let toolchain = PortableToolchain::new(layout.clone()).with_sink(sink.clone());
    SmokeTest::new(layout.clone(), Arc::new(toolchain))
        .with_sink(sink)
        .with_console(console)
        .run(vm.as_deref(), &extra)
        .await?;
    Ok(())
}

async fn uninstall(layout: &Layout, console: Console, self_delete: bool) -> anyhow::Result<()> {
    let transcript = open_transcript(layout, console, "uninstall")?;
    let log = tracing::subscriber::set_default(logging::subscriber(&transcript));

    let binary = std::env::current_exe()
        .ok()
        .and_then(|p| std::path::absolute(p).ok());
    Uninstaller::new(layout.clone())
        .with_sink(Some(transcript.sink()))
        .with_console(console)
        .perform(self_delete, binary.as_deref())
        .await?;

    tracing::info!("closing transcript prior to deleting logs directory");
    drop(log);
    transcript.flush()?;
    drop(transcript);
    remove_if_exists(&layout.logs_dir())?;

    if self_delete {
        console.step("Deleting binary after exit...");
    }
    console.done("Uninstall complete.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_test_with_passthrough() {
        let cli = Cli::try_parse_from([
            "cloudinit-builder",
            "-q",
            "test",
            "--vm",
            "C:/vm/runner.exe",
            "--",
            "--headless",
            "-x",
        ])
        .unwrap();
        assert!(cli.quiet);
        assert_eq!(
            cli.command,
            Some(Cmd::Test {
                vm: Some(PathBuf::from("C:/vm/runner.exe")),
                extra: vec!["--headless".into(), "-x".into()],
            })
        );
    }

    #[test]
    fn test_quiet_after_subcommand() {
        let cli = Cli::try_parse_from(["cloudinit-builder", "build", "--quiet"]).unwrap();
        assert!(cli.quiet);
        assert_eq!(cli.command, Some(Cmd::Build));
    }

    #[test]
    fn test_uninstall_self_delete() {
        let cli = Cli::try_parse_from(["cloudinit-builder", "uninstall", "--self-delete"]).unwrap();
        assert_eq!(cli.command, Some(Cmd::Uninstall { self_delete: true }));
    }

    #[test]
    fn test_no_subcommand_is_allowed() {
        let cli = Cli::try_parse_from(["cloudinit-builder", "--base-dir", "work"]).unwrap();
        assert_eq!(cli.command, None);
        assert_eq!(cli.base_dir, Some(PathBuf::from("work")));
    }

    #[test]
    fn test_unknown_subcommand_rejected() {
        assert!(Cli::try_parse_from(["cloudinit-builder", "deploy"]).is_err());
    }
}
