use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};

/// Destination for text a module emits through `core.write`.
pub trait OutputSink {
    fn emit(&mut self, text: &str) -> io::Result<()>;
}

/// Writes each emitted string to stdout on its own line.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn emit(&mut self, text: &str) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{text}")?;
        stdout.flush()
    }
}

/// Collects emitted strings in order. Clones share the same buffer, so a
/// caller can keep one handle while the run owns the other.
#[derive(Clone, Debug, Default)]
pub struct CaptureSink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines_guard().clone()
    }

    pub fn clear(&self) {
        self.lines_guard().clear();
    }

    fn lines_guard(&self) -> MutexGuard<'_, Vec<String>> {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl OutputSink for CaptureSink {
    fn emit(&mut self, text: &str) -> io::Result<()> {
        self.lines_guard().push(text.to_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_sink_clones_share_lines() {
        let handle = CaptureSink::new();
        let mut writer = handle.clone();
        writer.emit("first").expect("emit should succeed");
        writer.emit("second").expect("emit should succeed");
        assert_eq!(handle.lines(), vec!["first", "second"]);

        handle.clear();
        assert!(writer.lines().is_empty());
    }
}
