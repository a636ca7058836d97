//! Recognition of benign podman failures.
//!
//! Podman reports "the machine is missing", "the connection already exists"
//! and similar conditions only through its exit status and free-form text.
//! The lifecycle controller treats some of these as success or as a reason to
//! retry, so the matching lives here where it can be tested against fixed
//! output samples.

use std::collections::BTreeSet;

/// Conditions the lifecycle controller knows how to react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Condition {
    /// The named machine does not exist.
    MachineMissing,
    /// A system connection with the machine's name is already registered.
    ConnectionExists,
    /// The system connection to remove is not registered.
    ConnectionMissing,
    /// The machine is not running.
    AlreadyStopped,
    /// The connection is already the default one.
    AlreadyDefault,
}

/// Set of conditions recognized in one command's output.
pub type Conditions = BTreeSet<Condition>;

/// Maps (exit code, stdout, stderr) onto recognized conditions.
pub type Classifier = fn(i32, &str, &str) -> Conditions;

const MISSING_MACHINE: &[&str] = &["no such vm", "not found", "does not exist"];
const MISSING_CONNECTION: &[&str] = &["no such connection", "not found"];

/// Default classifier, matching podman 5 output (case-insensitive).
pub fn classify(_exit_code: i32, stdout: &str, stderr: &str) -> Conditions {
    let text = format!("{stdout}\n{stderr}").to_lowercase();
    let has = |needle: &str| text.contains(needle);

    let mut found = Conditions::new();
    if MISSING_MACHINE.iter().any(|n| has(n)) {
        found.insert(Condition::MachineMissing);
    }
    if MISSING_CONNECTION.iter().any(|n| has(n)) {
        found.insert(Condition::ConnectionMissing);
    }
    if has("connection") && has("already exists") {
        found.insert(Condition::ConnectionExists);
    }
    if has("already stopped") {
        found.insert(Condition::AlreadyStopped);
    }
    if has("already default") {
        found.insert(Condition::AlreadyDefault);
    }
    found
}
