//! Diagnostic output for gensynth.
//!
//! Every diagnostic goes to stderr so that `gensynth plan` can write the
//! JSON plan to stdout. How much is printed depends on the level chosen on
//! the command line:
//!
//! | Flag | Level     | Prints                                   |
//! |------|-----------|------------------------------------------|
//! | `-q` | `Quiet`   | errors and the final summary             |
//! |      | `Default` | one line per rule                        |
//! | `-v` | `Verbose` | tasks, stale files removed, step timings |

use std::borrow::Cow;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

/// How much diagnostic output to print.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// Errors and the final summary only.
    Quiet = 0,
    /// One line per rule.
    Default = 1,
    /// Everything, including per-task lines and timings.
    Verbose = 2,
}

impl Verbosity {
    /// The level selected by the `-q`/`-v` flags. clap rejects both at once.
    pub fn from_flags(quiet: bool, verbose: bool) -> Self {
        match (quiet, verbose) {
            (true, _) => Self::Quiet,
            (false, true) => Self::Verbose,
            (false, false) => Self::Default,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Quiet,
            2 => Self::Verbose,
            _ => Self::Default,
        }
    }
}

/// Process-wide level; written once in `main`.
static LEVEL: AtomicU8 = AtomicU8::new(Verbosity::Default as u8);

/// Set the process-wide level from the command-line flags.
pub fn init(quiet: bool, verbose: bool) {
    LEVEL.store(Verbosity::from_flags(quiet, verbose) as u8, Ordering::Relaxed);
}

/// The current process-wide level.
pub fn level() -> Verbosity {
    Verbosity::from_u8(LEVEL.load(Ordering::Relaxed))
}

/// Whether `-v` was given.
pub fn is_verbose() -> bool {
    level() == Verbosity::Verbose
}

/// Whether `-q` was given.
pub fn is_quiet() -> bool {
    level() == Verbosity::Quiet
}

/// `eprintln!` that only prints with `-v`.
///
/// ```ignore
/// vprintln!("    {}: {}", task.name, task.description);
/// ```
macro_rules! vprintln {
    ($($arg:tt)*) => {
        if $crate::verbose::is_verbose() {
            eprintln!($($arg)*);
        }
    };
}

pub(crate) use vprintln;

/// `eprintln!` that is silenced by `-q`.
///
/// ```ignore
/// dprintln!("  Planned {} ({} tasks)", rule.name, rule.tasks.len());
/// ```
macro_rules! dprintln {
    ($($arg:tt)*) => {
        if !$crate::verbose::is_quiet() {
            eprintln!($($arg)*);
        }
    };
}

pub(crate) use dprintln;

/// Reports how long a step took when dropped, in verbose mode only.
///
/// ```ignore
/// let _t = Timer::start(format!("merge {name}"));
/// ```
pub struct Timer {
    step: Cow<'static, str>,
    start: Instant,
}

impl Timer {
    /// Start timing `step`.
    pub fn start(step: impl Into<Cow<'static, str>>) -> Self {
        Self {
            step: step.into(),
            start: Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if is_verbose() {
            eprintln!("  {} took {:.1?}", self.step, self.start.elapsed());
        }
    }
}
