use std::sync::Mutex;

use crossterm::style::Stylize;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// The spinner currently drawing on stderr, if any.
static ACTIVE: Mutex<Option<ProgressBar>> = Mutex::new(None);

/// A simple spinner for long-running stages.
pub struct Spinner {
    bar: ProgressBar,
    quiet: bool,
}

impl Spinner {
    pub fn new(message: impl Into<String>) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(spinner_style());
        bar.set_message(message.into());
        bar.enable_steady_tick(std::time::Duration::from_millis(80));
        set_active(Some(bar.clone()));
        Self { bar, quiet: false }
    }

    /// A spinner that prints nothing, for machine-readable runs.
    pub fn hidden() -> Self {
        let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::hidden());
        Self { bar, quiet: true }
    }

    pub fn set_message(&self, message: impl Into<String>) {
        self.bar.set_message(message.into());
    }

    /// Handle for updating the spinner from other tasks.
    pub fn clone_bar(&self) -> ProgressBar {
        self.bar.clone()
    }

    /// Clear the spinner and print a `✔ message` line to stderr.
    pub fn finish(self, message: impl Into<String>) {
        self.clear();
        if !self.quiet {
            eprintln!("{} {}", "✔".green(), message.into());
        }
    }

    /// Clear the spinner and print a `! message` line to stderr.
    pub fn warn(self, message: impl Into<String>) {
        self.clear();
        if !self.quiet {
            eprintln!("{} {}", "!".yellow().bold(), message.into());
        }
    }

    fn clear(&self) {
        self.bar.finish_and_clear();
        if !self.quiet {
            set_active(None);
        }
    }
}

/// Run `f` with the active spinner hidden so its output lands on a clean line.
pub fn suspend<R>(f: impl FnOnce() -> R) -> R {
    let active = ACTIVE.lock().ok().and_then(|guard| guard.clone());
    match active {
        Some(bar) => bar.suspend(f),
        None => f(),
    }
}

fn set_active(bar: Option<ProgressBar>) {
    if let Ok(mut guard) = ACTIVE.lock() {
        *guard = bar;
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.dim} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}
