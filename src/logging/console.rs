//! Console sink shared by the logger and the audit trail
//!
//! Both write through a locked stderr handle. A console write can fail (a
//! closed pipe, a detached terminal); callers ignore the error because the
//! file sink is the durable record.

use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

/// Destination for human-readable console lines
pub trait ConsoleSink: Send + Sync + fmt::Debug {
    fn write_line(&self, line: &str) -> io::Result<()>;
}

/// Process stderr
#[derive(Debug, Default, Clone, Copy)]
pub struct Stderr;

impl ConsoleSink for Stderr {
    fn write_line(&self, line: &str) -> io::Result<()> {
        let mut handle = io::stderr().lock();
        writeln!(handle, "{}", line)?;
        handle.flush()
    }
}

pub fn stderr() -> Arc<dyn ConsoleSink> {
    Arc::new(Stderr)
}

/// Best-effort diagnostic about a sink itself; never routed through the
/// logger, which may be the thing failing
pub(crate) fn report(line: &str) {
    let _ = Stderr.write_line(line);
}
