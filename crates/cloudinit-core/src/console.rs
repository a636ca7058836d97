//! User-facing progress lines.

use std::fmt::Display;

/// Prints `[*]`/`[+]` progress lines unless quiet.
///
/// Every line is also recorded as a tracing event so it lands in the
/// transcript even when the console is silent.
#[derive(Debug, Clone, Copy, Default)]
pub struct Console {
    quiet: bool,
}

impl Console {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }

    /// A step is starting.
    pub fn step(&self, msg: impl Display) {
        tracing::info!("{msg}");
        if !self.quiet {
            println!("[*] {msg}");
        }
    }

    /// An operation finished successfully.
    pub fn done(&self, msg: impl Display) {
        tracing::info!("{msg}");
        if !self.quiet {
            println!("[+] {msg}");
        }
    }
}
