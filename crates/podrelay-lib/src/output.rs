//! Progress and diagnostic text for the operator

use std::fmt;
use std::io::{self, Write};
use std::sync::Mutex;

/// The stdout/stderr pair a session writes human-readable progress to.
///
/// Write failures are ignored; progress text is never worth failing a
/// session over.
pub struct OutputStreams {
    out: Mutex<Box<dyn Write + Send>>,
    err: Mutex<Box<dyn Write + Send>>,
}

impl OutputStreams {
    pub fn new(out: impl Write + Send + 'static, err: impl Write + Send + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(out)),
            err: Mutex::new(Box::new(err)),
        }
    }

    /// Process stdout and stderr
    pub fn stdio() -> Self {
        Self::new(io::stdout(), io::stderr())
    }

    /// Discard everything
    pub fn discard() -> Self {
        Self::new(io::sink(), io::sink())
    }

    pub(crate) fn say(&self, line: fmt::Arguments<'_>) {
        Self::write_line(&self.out, line);
    }

    pub(crate) fn complain(&self, line: fmt::Arguments<'_>) {
        Self::write_line(&self.err, line);
    }

    fn write_line(stream: &Mutex<Box<dyn Write + Send>>, line: fmt::Arguments<'_>) {
        if let Ok(mut w) = stream.lock() {
            let _ = w.write_fmt(line);
            let _ = w.write_all(b"\n");
            let _ = w.flush();
        }
    }
}

impl Default for OutputStreams {
    fn default() -> Self {
        Self::stdio()
    }
}

impl fmt::Debug for OutputStreams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputStreams").finish_non_exhaustive()
    }
}
