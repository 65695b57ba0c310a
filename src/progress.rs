//! Indexing progress reporting.
//!
//! Progress goes to **stderr** so the run summary on stdout stays parseable.
//! Human mode prints one line per processed file:
//!
//! ```text
//! demo: scanning
//! demo [ 3/12  25%] src/lib.rs
//! ```
//!
//! JSON mode prints each [`IndexProgressEvent`] as one object per line, e.g.
//! `{"event":"progress","phase":"indexing","project":"demo","n":3,"total":12,"path":"src/lib.rs"}`.

use serde::Serialize;
use std::io::Write;

/// A single progress event for an indexing run.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum IndexProgressEvent {
    /// Walking the project root. Total unknown.
    Scanning { project: String },
    /// `n` of `total` candidate files processed; `path` is the latest.
    Indexing {
        project: String,
        n: u64,
        total: u64,
        path: String,
    },
}

impl IndexProgressEvent {
    fn human_line(&self) -> String {
        match self {
            IndexProgressEvent::Scanning { project } => format!("{project}: scanning"),
            IndexProgressEvent::Indexing {
                project,
                n,
                total,
                path,
            } => {
                let width = total.to_string().len();
                format!(
                    "{project} [{n:>width$}/{total} {pct:>3}%] {path}",
                    pct = percent(*n, *total)
                )
            }
        }
    }
}

fn percent(n: u64, total: u64) -> u64 {
    if total == 0 {
        100
    } else {
        n.min(total) * 100 / total
    }
}

#[derive(Serialize)]
struct JsonLine<'a> {
    event: &'static str,
    #[serde(flatten)]
    body: &'a IndexProgressEvent,
}

/// Reports indexing progress.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: IndexProgressEvent);
}

/// Human-readable lines on stderr.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: IndexProgressEvent) {
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{}", event.human_line());
    }
}

/// One JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: IndexProgressEvent) {
        let line = JsonLine {
            event: "progress",
            body: &event,
        };
        if let Ok(json) = serde_json::to_string(&line) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{json}");
        }
    }
}

pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: IndexProgressEvent) {}
}

/// `--progress` values for `cidx index`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// `Human` when stderr is a terminal, `Off` when it is piped.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
