//! Message sinks - where reassembled messages end up
//!
//! Every sink receives each message as one text line:
//!
//! ```text
//! 2020-01-01T10:10:10.123456789Z host app[1234]: daemon: [INFO]: text
//! ```

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Stdout, Write};
use std::path::{Path, PathBuf};

use sdsyslog_protocol::Payload;

use crate::error::{ReceiverError, Result};

/// Buffer size for file output
const FILE_BUFFER_SIZE: usize = 64 * 1024;

/// Destination for reassembled messages.
///
/// Writes may be buffered; the output worker calls [`flush`](MessageSink::flush)
/// periodically and once on shutdown.
pub trait MessageSink: Send {
    /// Short name for logs
    fn name(&self) -> &'static str;

    fn write(&mut self, message: &Payload) -> Result<()>;

    fn flush(&mut self) -> Result<()>;
}

/// Render a message as one newline-terminated line
pub(crate) fn format_line(message: &Payload) -> String {
    let mut line = message.format_text();
    let trimmed = line.trim_end_matches(['\n', '\r']).len();
    line.truncate(trimmed);
    line.push('\n');
    line
}

/// Appends lines to a file, creating it if needed
pub struct FileSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl FileSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| ReceiverError::Sink { sink: "file", source })?;

        Ok(Self {
            path,
            writer: BufWriter::with_capacity(FILE_BUFFER_SIZE, file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MessageSink for FileSink {
    fn name(&self) -> &'static str {
        "file"
    }

    fn write(&mut self, message: &Payload) -> Result<()> {
        self.writer
            .write_all(format_line(message).as_bytes())
            .map_err(|source| ReceiverError::Sink { sink: "file", source })
    }

    fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|source| ReceiverError::Sink { sink: "file", source })
    }
}

/// Writes lines to standard output
pub struct StdoutSink {
    stdout: Stdout,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self { stdout: io::stdout() }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageSink for StdoutSink {
    fn name(&self) -> &'static str {
        "stdout"
    }

    fn write(&mut self, message: &Payload) -> Result<()> {
        self.stdout
            .lock()
            .write_all(format_line(message).as_bytes())
            .map_err(|source| ReceiverError::Sink { sink: "stdout", source })
    }

    fn flush(&mut self) -> Result<()> {
        self.stdout
            .lock()
            .flush()
            .map_err(|source| ReceiverError::Sink { sink: "stdout", source })
    }
}
