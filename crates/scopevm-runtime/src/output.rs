//! Output sinks for the print instructions

use std::io::Write;
use std::sync::{Arc, Mutex};

/// Shared output sink
///
/// Everything the print instructions produce goes through one writer, in
/// execution order. Embedders and tests swap it for a buffer.
pub type OutputWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Writer backed by the process's stdout
pub fn stdout_writer() -> OutputWriter {
    Arc::new(Mutex::new(Box::new(std::io::stdout())))
}

/// Writer that discards everything (benchmarks)
pub fn sink_writer() -> OutputWriter {
    Arc::new(Mutex::new(Box::new(std::io::sink())))
}
