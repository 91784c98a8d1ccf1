//! Call-site resolution for executed queries
//!
//! Finds the first stack frame that belongs to the application: not this
//! crate, not std/async runtime/web framework internals, and not a dependency
//! checked out under the cargo registry or a vendor directory.

use serde::{Deserialize, Serialize};
use std::backtrace::Backtrace;
use std::panic::Location;
use std::path::PathBuf;

/// Frames inspected before giving up
pub const MAX_FRAMES: usize = 50;

/// Crate prefixes whose frames never count as the caller
const SKIPPED_CRATES: &[&str] = &[
    env!("CARGO_CRATE_NAME"),
    "std",
    "core",
    "alloc",
    "tokio",
    "futures",
    "futures_util",
    "futures_core",
    "axum",
    "axum_core",
    "tower",
    "tower_http",
    "hyper",
    "hyper_util",
    "tracing",
    "tracing_core",
    "tracing_subscriber",
    "sqlx",
    "sqlx_core",
    "reqwest",
];

/// Path fragments of dependency and toolchain sources
const SKIPPED_PATHS: &[&str] = &[
    "/.cargo/registry/",
    "/.cargo/git/",
    "/vendor/",
    "/rustc/",
    "/library/std/",
    "/library/core/",
    "/library/alloc/",
];

/// Resolved application call site; both fields are `None` when unknown
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl Caller {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: Some(file.into()),
            line: Some(line),
        }
    }

    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn is_known(&self) -> bool {
        self.file.is_some()
    }
}

/// One stack frame as seen by the resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub symbol: Option<String>,
    pub file: String,
    pub line: u32,
}

impl Frame {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            symbol: None,
            file: file.into(),
            line,
        }
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct CallerResolver {
    skipped_crates: Vec<String>,
    skipped_paths: Vec<String>,
    base_path: Option<PathBuf>,
    max_frames: usize,
}

impl Default for CallerResolver {
    fn default() -> Self {
        Self {
            skipped_crates: SKIPPED_CRATES.iter().map(|s| s.to_string()).collect(),
            skipped_paths: SKIPPED_PATHS.iter().map(|s| s.to_string()).collect(),
            base_path: std::env::current_dir().ok(),
            max_frames: MAX_FRAMES,
        }
    }
}

impl CallerResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also skip frames whose symbol lives in `crate_name`
    pub fn skip_crate(mut self, crate_name: impl Into<String>) -> Self {
        self.skipped_crates.push(crate_name.into());
        self
    }

    /// Also skip frames whose file path contains `fragment`
    pub fn skip_path(mut self, fragment: impl Into<String>) -> Self {
        self.skipped_paths.push(fragment.into());
        self
    }

    /// Paths under `base` are reported relative to it
    pub fn with_base_path(mut self, base: impl Into<PathBuf>) -> Self {
        self.base_path = Some(base.into());
        self
    }

    /// Pick the first application frame among the first `MAX_FRAMES` frames.
    pub fn resolve<I>(&self, frames: I) -> Caller
    where
        I: IntoIterator<Item = Frame>,
    {
        frames
            .into_iter()
            .take(self.max_frames)
            .find(|frame| !self.is_skipped(frame))
            .map(|frame| Caller {
                file: Some(self.relative(&frame.file)),
                line: Some(frame.line),
            })
            .unwrap_or_default()
    }

    /// Resolve the caller of a reporting function.
    ///
    /// `location` comes from a `#[track_caller]` entry point. With
    /// `use_backtrace` the full stack is walked instead, falling back to
    /// `location` when the backtrace carries no file information.
    pub fn capture(&self, location: &Location<'_>, use_backtrace: bool) -> Caller {
        if use_backtrace {
            let frames = backtrace_frames(self.max_frames);
            if !frames.is_empty() {
                return self.resolve(frames);
            }
        }
        self.resolve([Frame::new(location.file(), location.line())])
    }

    /// Resolve the caller from the current backtrace alone.
    ///
    /// Used where no `#[track_caller]` location exists, e.g. queries bridged
    /// from tracing events.
    pub fn capture_backtrace(&self) -> Caller {
        self.resolve(backtrace_frames(self.max_frames))
    }

    fn is_skipped(&self, frame: &Frame) -> bool {
        let normalized = frame.file.replace('\\', "/");
        if self
            .skipped_paths
            .iter()
            .any(|fragment| normalized.contains(fragment.as_str()))
        {
            return true;
        }

        match frame.symbol.as_deref().and_then(symbol_crate) {
            Some(krate) => self.skipped_crates.iter().any(|skipped| skipped == krate),
            None => false,
        }
    }

    fn relative(&self, file: &str) -> String {
        if let Some(base) = &self.base_path {
            if let Ok(stripped) = std::path::Path::new(file).strip_prefix(base) {
                return stripped.to_string_lossy().into_owned();
            }
        }
        file.to_string()
    }
}

/// Leading crate name of a demangled symbol, e.g. `tokio` for
/// `<tokio::runtime::Runtime as Drop>::drop`.
fn symbol_crate(symbol: &str) -> Option<&str> {
    let trimmed = symbol.trim_start_matches('<');
    let end = trimmed.find("::")?;
    Some(&trimmed[..end])
}

/// Frames of the current thread's stack, parsed from the std backtrace text.
fn backtrace_frames(limit: usize) -> Vec<Frame> {
    let rendered = Backtrace::force_capture().to_string();
    let mut frames = Vec::new();
    let mut symbol: Option<String> = None;

    for line in rendered.lines() {
        if frames.len() >= limit {
            break;
        }
        let line = line.trim();
        if let Some(location) = line.strip_prefix("at ") {
            if let Some(frame) = parse_location(location) {
                frames.push(Frame {
                    symbol: symbol.clone(),
                    ..frame
                });
            }
        } else if let Some((_, name)) = line.split_once(": ") {
            symbol = Some(name.to_string());
        }
    }

    frames
}

/// Parse `path/to/file.rs:LINE:COL`
fn parse_location(location: &str) -> Option<Frame> {
    let mut parts = location.rsplitn(3, ':');
    let _column = parts.next()?;
    let line = parts.next()?.parse().ok()?;
    let file = parts.next()?;
    Some(Frame::new(file, line))
}
