//! Tracing subscriber assembly.

use cloudinit_core::Transcript;
use tracing::Subscriber;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer};

/// Console filter when `RUST_LOG` is unset.
pub const DEFAULT_CONSOLE_FILTER: &str = "warn";

/// Subscriber for one operation: stderr console plus the transcript file.
///
/// The console honours `RUST_LOG`; the transcript always records debug and
/// above.
pub fn subscriber(transcript: &Transcript) -> impl Subscriber + Send + Sync {
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_CONSOLE_FILTER));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(console_filter),
        )
        .with(
            fmt::layer()
                .with_writer(transcript.writer())
                .with_ansi(false)
                .with_filter(LevelFilter::DEBUG),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudinit_core::Layout;

    #[test]
    fn test_events_reach_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let transcript = Transcript::open(&Layout::new(dir.path()), "build").unwrap();
        {
            let _guard = tracing::subscriber::set_default(subscriber(&transcript));
            tracing::info!(machine = "cloudinit-builder", "podman machine ready");
            tracing::trace!("too detailed");
        }
        transcript.flush().unwrap();

        let text = std::fs::read_to_string(transcript.path()).unwrap();
        assert!(text.contains("podman machine ready"));
        assert!(text.contains("machine=\"cloudinit-builder\""));
        assert!(!text.contains("too detailed"));
    }
}
