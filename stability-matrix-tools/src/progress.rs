//! Terminal feedback for long-running steps.
//!
//! Nothing is drawn when the log level is below `warn` (i.e. when `--quiet` was passed) or when no
//! logger has been set up at all, which keeps test output clean.
use linya::{Bar, Progress};
use log::{debug, LevelFilter};
use std::time::{Duration, Instant};

fn feedback_enabled() -> bool {
    log::max_level() >= LevelFilter::Warn
}

/// A progress bar over a number of bytes.
pub struct ByteProgress {
    bar: Option<(Progress, Bar)>,
}

impl ByteProgress {
    #[must_use]
    pub fn new(total: u64, label: impl Into<String>) -> Self {
        if !feedback_enabled() {
            return Self::hidden();
        }
        let mut progress = Progress::new();
        let bar = progress.bar(usize::try_from(total).unwrap_or(usize::MAX), label.into());
        Self {
            bar: Some((progress, bar)),
        }
    }

    #[must_use]
    pub fn hidden() -> Self {
        Self { bar: None }
    }

    /// Sets the number of bytes processed so far.
    pub fn set(&mut self, pos: u64) {
        if let Some((progress, bar)) = self.bar.as_mut() {
            progress.set_and_draw(bar, usize::try_from(pos).unwrap_or(usize::MAX));
        }
    }
}

/// A named unit of work. Reports `[✔]` with the elapsed time when finished, or `[✘]` if dropped
/// before [`Step::finish`] was called, which is what happens when a `?` bails out mid-step.
#[derive(Debug)]
pub struct Step {
    text: String,
    started: Instant,
    finished: bool,
}

impl Step {
    #[must_use]
    pub fn start(text: impl Into<String>) -> Self {
        let text = text.into();
        debug!("starting step: {text}");
        if feedback_enabled() {
            eprintln!("{text}...");
        }
        Self {
            text,
            started: Instant::now(),
            finished: false,
        }
    }

    pub fn finish(mut self) -> Duration {
        self.finished = true;
        let elapsed = self.started.elapsed();
        if feedback_enabled() {
            eprintln!("[✔] {} ({})", self.text, format_elapsed(elapsed));
        }
        elapsed
    }
}

impl Drop for Step {
    fn drop(&mut self) {
        if !self.finished && feedback_enabled() {
            eprintln!("[✘] {}", self.text);
        }
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs < 60.0 {
        format!("{secs:.1}s")
    } else {
        format!("{}m{:02}s", elapsed.as_secs() / 60, elapsed.as_secs() % 60)
    }
}
