//! Ambient diagnostic logging.
//!
//! The teacher is `#![no_std]` and writes diagnostics straight to a UART
//! console through its own `printf`/`console` modules rather than an
//! external logging crate. This crate keeps that hand-rolled-macro idiom —
//! `kprintln!`/`ktrace!` writing to a pluggable sink — instead of pulling in
//! a logging framework the teacher never reaches for.

use std::io::Write;
use std::sync::Mutex;

/// Where `kprintln!`/`ktrace!` write. Defaults to stderr; tests can swap in
/// an in-memory sink to assert on emitted diagnostics.
pub static SINK: Mutex<Option<Box<dyn Write + Send>>> = Mutex::new(None);

/// Installs `sink` as the destination for future log output, replacing
/// stderr.
pub fn set_sink(sink: Box<dyn Write + Send>) {
    *SINK.lock().unwrap() = Some(sink);
}

#[doc(hidden)]
pub fn write_line(args: std::fmt::Arguments<'_>) {
    let mut guard = SINK.lock().unwrap();
    match guard.as_mut() {
        Some(sink) => {
            let _ = writeln!(sink, "{args}");
        }
        None => {
            eprintln!("{args}");
        }
    }
}

/// Prints a line to the active log sink, unconditionally.
#[macro_export]
macro_rules! kprintln {
    ($($arg:tt)*) => {
        $crate::klog::write_line(format_args!($($arg)*))
    };
}

/// Prints a line tagged as a trace-level diagnostic (commit, recovery,
/// eviction). Kept distinct from `kprintln!` so a caller can later filter
/// on the prefix without this crate needing a level-aware logger.
#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => {
        $crate::kprintln!("[trace] {}", format_args!($($arg)*))
    };
}

pub use kprintln;
pub use ktrace;
