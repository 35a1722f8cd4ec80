//! # Lifecycle Logging
//!
//! Verbose creation, count-change, and destruction logging for control
//! blocks. Off by default; when disabled the only cost at each lifecycle
//! event is one atomic load.
//!
//! Events go to a process-wide sink, stderr unless replaced via
//! [`set_sink`]. Writes are fire-and-forget: a failing sink never disturbs
//! the counting protocol.
//!
//! # Example
//!
//! ```rust,ignore
//! strand::log::set_enabled(true);
//! let handle = strand::make_strong(42u32);
//! drop(handle);
//! // stderr:
//! //   [strand] created u32 (block 0x55..)
//! //   [strand] destroyed u32 payload (block 0x55..)
//! //   [strand] freed block 0x55..
//! ```

use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};

/// Destination for lifecycle events.
enum Sink {
    /// Standard error (default).
    Stderr,
    /// Standard output.
    Stdout,
    /// Caller-supplied writer.
    Writer(Box<dyn Write + Send>),
}

/// Global sink slot.
static SINK: OnceLock<Mutex<Sink>> = OnceLock::new();

/// Whether lifecycle logging is enabled.
static ENABLED: AtomicBool = AtomicBool::new(false);

fn sink() -> &'static Mutex<Sink> {
    SINK.get_or_init(|| Mutex::new(Sink::Stderr))
}

/// Enable or disable lifecycle logging.
pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::SeqCst);
}

/// Check whether lifecycle logging is enabled.
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::SeqCst)
}

/// Route lifecycle events to a caller-supplied writer.
pub fn set_sink(writer: Box<dyn Write + Send>) {
    if let Ok(mut sink) = sink().lock() {
        *sink = Sink::Writer(writer);
    }
}

/// Route lifecycle events to stderr (the default).
pub fn use_stderr() {
    if let Ok(mut sink) = sink().lock() {
        *sink = Sink::Stderr;
    }
}

/// Route lifecycle events to stdout.
pub fn use_stdout() {
    if let Ok(mut sink) = sink().lock() {
        *sink = Sink::Stdout;
    }
}

/// A control block was created.
pub(crate) fn creation(block: usize, type_name: &str) {
    event(format_args!("created {} (block {:#x})", type_name, block));
}

/// A payload was destroyed.
pub(crate) fn destruction(block: usize, type_name: &str) {
    event(format_args!(
        "destroyed {} payload (block {:#x})",
        type_name, block
    ));
}

/// A counter changed to a new value.
pub(crate) fn count_change(block: usize, which: &'static str, count: usize) {
    event(format_args!(
        "block {:#x} {} count -> {}",
        block, which, count
    ));
}

/// A control block was freed.
pub(crate) fn block_freed(block: usize) {
    event(format_args!("freed block {:#x}", block));
}

fn event(args: fmt::Arguments<'_>) {
    if !is_enabled() {
        return;
    }
    if let Ok(mut sink) = sink().lock() {
        let _ = match &mut *sink {
            Sink::Stderr => writeln!(std::io::stderr(), "[strand] {}", args),
            Sink::Stdout => writeln!(std::io::stdout(), "[strand] {}", args),
            Sink::Writer(writer) => writeln!(writer, "[strand] {}", args),
        };
    }
}
