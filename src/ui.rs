//! User-facing progress output.

use std::io::{self, Write};

/// Sink for progress lines shown to the person running a build.
pub trait Ui: Send + Sync {
    /// Reports progress.
    fn say(&self, message: &str);

    /// Reports a failure.
    fn error(&self, message: &str);
}

/// Writes progress lines to standard error.
#[derive(Clone, Copy, Debug, Default)]
pub struct StderrUi;

impl Ui for StderrUi {
    fn say(&self, message: &str) {
        writeln!(io::stderr(), "==> kiln: {message}").ok();
    }

    fn error(&self, message: &str) {
        writeln!(io::stderr(), "==> kiln: error: {message}").ok();
    }
}
