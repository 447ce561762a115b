//! Unified output, logging and progress UI.
//!
//! [`Notifier`] owns the two user-facing streams plus `env_logger` (text logs) and
//! `indicatif` (progress bars) under a single verbosity switch:
//! - [`Notifier::status`]: a line of progress/result output on stdout.
//! - [`Notifier::warning`] / [`Notifier::error`]: `warning: …` / `error: …` lines on stderr.
//! - [`Notifier::info`]/[`Notifier::debug`]/[`Notifier::trace`]: levelled logs.
//! - [`Notifier::create_progress_bar`]: a progress bar (Quiet mode on a terminal only).
//!
//! Each stream message is written with one `write_all` under the stream's lock, so
//! messages from concurrent tasks never interleave. A `Notifier` is `Sync` and is
//! shared by reference across workers.

use env_logger::Env;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{Level, LevelFilter, Log, Record};
use std::io::{self, IsTerminal, Write};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VerbosityLevel {
    Quiet = 0, // Progress bars, only warnings from logs
    Info = 1,  // Text logs at info level
    Debug = 2, // Text logs at debug level
    Trace = 3, // Text logs at trace level
}

impl From<u8> for VerbosityLevel {
    fn from(level: u8) -> Self {
        match level {
            0 => VerbosityLevel::Quiet,
            1 => VerbosityLevel::Info,
            2 => VerbosityLevel::Debug,
            _ => VerbosityLevel::Trace,
        }
    }
}

impl VerbosityLevel {
    pub fn to_log_level(self) -> LevelFilter {
        match self {
            VerbosityLevel::Quiet => LevelFilter::Warn,
            VerbosityLevel::Info => LevelFilter::Info,
            VerbosityLevel::Debug => LevelFilter::Debug,
            VerbosityLevel::Trace => LevelFilter::Trace,
        }
    }
}

type Stream = Mutex<Box<dyn Write + Send>>;

pub struct Notifier {
    verbosity: VerbosityLevel,
    logger: env_logger::Logger,
    out: Stream,
    err: Stream,
    multi_progress: Option<MultiProgress>,
}

impl Notifier {
    /// Writes to the process stdout/stderr.
    pub fn new(verbosity_level: u8) -> Self {
        let verbosity = VerbosityLevel::from(verbosity_level);
        let multi_progress = if verbosity == VerbosityLevel::Quiet && io::stderr().is_terminal() {
            Some(MultiProgress::with_draw_target(ProgressDrawTarget::stderr()))
        } else {
            None
        };

        Self {
            verbosity,
            logger: Self::build_logger(verbosity),
            out: Mutex::new(Box::new(io::stdout())),
            err: Mutex::new(Box::new(io::stderr())),
            multi_progress,
        }
    }

    /// Writes to the given sinks instead of the process streams. Never draws progress bars.
    pub fn with_writers<O, E>(verbosity_level: u8, out: O, err: E) -> Self
    where
        O: Write + Send + 'static,
        E: Write + Send + 'static,
    {
        let verbosity = VerbosityLevel::from(verbosity_level);
        Self {
            verbosity,
            logger: Self::build_logger(verbosity),
            out: Mutex::new(Box::new(out)),
            err: Mutex::new(Box::new(err)),
            multi_progress: None,
        }
    }

    fn build_logger(verbosity: VerbosityLevel) -> env_logger::Logger {
        env_logger::Builder::from_env(Env::default())
            .filter_level(verbosity.to_log_level())
            .build()
    }

    pub fn status(&self, message: &str) {
        self.emit(&self.out, format!("{}\n", message).as_bytes());
    }

    pub fn warning(&self, message: &str) {
        self.emit(&self.err, format!("warning: {}\n", message).as_bytes());
    }

    pub fn error(&self, message: &str) {
        self.emit(&self.err, format!("error: {}\n", message).as_bytes());
    }

    /// Copies raw bytes to stdout, e.g. the contents of an extracted file.
    pub fn write_raw(&self, bytes: &[u8]) {
        self.emit(&self.out, bytes);
    }

    fn emit(&self, stream: &Stream, bytes: &[u8]) {
        let write = || {
            let mut sink = stream.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Err(e) = sink.write_all(bytes).and_then(|_| sink.flush()) {
                log::debug!("Failed to write output: {}", e);
            }
        };
        match &self.multi_progress {
            Some(multi_progress) => multi_progress.suspend(write),
            None => write(),
        }
    }

    pub fn info(&self, message: &str) {
        self.log(Level::Info, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(Level::Debug, message);
    }

    pub fn trace(&self, message: &str) {
        self.log(Level::Trace, message);
    }

    fn log(&self, level: Level, message: &str) {
        if self.verbosity == VerbosityLevel::Quiet && level > Level::Warn {
            return;
        }
        self.logger.log(
            &Record::builder()
                .args(format_args!("{}", message))
                .level(level)
                .target(module_path!())
                .build(),
        );
    }

    pub fn create_progress_bar(&self, length: u64, message: &str) -> Option<ProgressBar> {
        let multi_progress = self.multi_progress.as_ref()?;
        let progress_style = ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}",
            )
            .ok()?
            .progress_chars("=> ");

        let progress_bar = multi_progress.add(ProgressBar::new(length));
        progress_bar.set_style(progress_style);
        progress_bar.set_message(message.to_string());
        Some(progress_bar)
    }

    pub fn use_beautiful_progress(&self) -> bool {
        self.multi_progress.is_some()
    }
}
