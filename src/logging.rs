use std::io::{self, Write};

use tracing_subscriber::EnvFilter;

use crate::progress;

/// Log to stderr. `RUST_LOG` wins over `-v`.
pub fn init(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "helm_scan=info,warn",
        _ => "helm_scan=debug,info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // Ignore a second init (tests install their own subscriber).
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(|| SpinnerAwareStderr)
        .with_target(false)
        .without_time()
        .try_init();
}

/// Stderr writer that lifts the spinner off the line before each event.
struct SpinnerAwareStderr;

impl Write for SpinnerAwareStderr {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        progress::suspend(|| io::stderr().write(buf))
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        progress::suspend(|| io::stderr().write_all(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}
