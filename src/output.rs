use std::io;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::{Captures, Regex};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::config::RunMode;
use crate::highlight::Highlighter;
use crate::scheduler::SingleSlotTimer;

/// Quiet period after the last stderr chunk before the buffer is formatted and flushed.
pub const STDERR_FLUSH_DELAY: Duration = Duration::from_millis(10);

static ERROR_PATTERN: OnceLock<Regex> = OnceLock::new();
static URL_PATTERN: OnceLock<Regex> = OnceLock::new();

fn error_pattern() -> &'static Regex {
    ERROR_PATTERN.get_or_init(|| Regex::new(r"(?i)[a-z]{3,10}?Error").expect("valid error regex"))
}

/// A path starting at `/` and running up to the last `)` on the line, as in
/// stack frames like `at main (/srv/app/index.js:3:9)`.
fn url_pattern() -> &'static Regex {
    URL_PATTERN.get_or_init(|| Regex::new(r"(/.+)\)").expect("valid url regex"))
}

/// Which child stream a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Readable side of one of the engine's output streams.
///
/// Chunks arrive in the order the pipe forwarded them. The stream ends when
/// the engine is dropped.
#[derive(Debug)]
pub struct OutputStream {
    rx: UnboundedReceiver<Vec<u8>>,
}

impl OutputStream {
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.rx.try_recv().ok()
    }

    /// Copy every chunk into `writer`, flushing after each one.
    pub async fn pipe<W: AsyncWrite + Unpin>(mut self, mut writer: W) -> io::Result<()> {
        while let Some(chunk) = self.rx.recv().await {
            writer.write_all(&chunk).await?;
            writer.flush().await?;
        }
        Ok(())
    }
}

/// Create the sending half held by the pipe and the readable half handed to the caller.
pub fn output_channel() -> (UnboundedSender<Vec<u8>>, OutputStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, OutputStream { rx })
}

/// Turns raw stderr text into something readable: drops runtime-internal
/// noise lines and highlights error names and paths.
pub struct StderrFormatter {
    ignore: Vec<String>,
    highlighter: Arc<dyn Highlighter>,
}

impl StderrFormatter {
    pub fn new(ignore: Vec<String>, highlighter: Arc<dyn Highlighter>) -> Self {
        Self {
            ignore,
            highlighter,
        }
    }

    pub fn format(&self, text: &str) -> String {
        text.split('\n')
            .filter(|line| !self.is_noise(line))
            .map(|line| self.highlight_urls(&self.highlight_errors(line)))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn is_noise(&self, line: &str) -> bool {
        self.ignore.iter().any(|pattern| line.contains(pattern.as_str()))
    }

    fn highlight_errors(&self, line: &str) -> String {
        error_pattern()
            .replace_all(line, |caps: &Captures| self.highlighter.error(&caps[0]))
            .into_owned()
    }

    fn highlight_urls(&self, line: &str) -> String {
        url_pattern()
            .replace_all(line, |caps: &Captures| {
                format!("{})", self.highlighter.url(&caps[1]))
            })
            .into_owned()
    }
}

/// Raw stderr chunks waiting for the flush window to close.
#[derive(Debug, Default)]
pub struct ErrorFormattingBuffer {
    chunks: Vec<Vec<u8>>,
    timer: SingleSlotTimer,
}

impl ErrorFormattingBuffer {
    /// Append a chunk and restart the flush window.
    pub fn push(&mut self, chunk: Vec<u8>) {
        self.chunks.push(chunk);
        self.timer.arm(STDERR_FLUSH_DELAY);
    }

    /// Drain everything buffered so far as one string.
    pub fn take(&mut self) -> Option<String> {
        self.timer.cancel();
        if self.chunks.is_empty() {
            return None;
        }
        let bytes = std::mem::take(&mut self.chunks).concat();
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Forwards whichever child is currently attached to the engine's public
/// stdout/stderr streams.
///
/// stdout is passed through untouched. In development mode stderr is held
/// until [`STDERR_FLUSH_DELAY`] passes without a new chunk, then emitted as a
/// single formatted blob; in production mode it is passed through as-is.
pub struct OutputPipe {
    stdout: UnboundedSender<Vec<u8>>,
    stderr: UnboundedSender<Vec<u8>>,
    mode: RunMode,
    formatter: StderrFormatter,
    buffer: ErrorFormattingBuffer,
}

impl OutputPipe {
    pub fn new(
        mode: RunMode,
        formatter: StderrFormatter,
        stdout: UnboundedSender<Vec<u8>>,
        stderr: UnboundedSender<Vec<u8>>,
    ) -> Self {
        Self {
            stdout,
            stderr,
            mode,
            formatter,
            buffer: ErrorFormattingBuffer::default(),
        }
    }

    pub fn push(&mut self, stream: StreamKind, chunk: Vec<u8>) {
        match (stream, self.mode) {
            (StreamKind::Stdout, _) => {
                let _ = self.stdout.send(chunk);
            }
            (StreamKind::Stderr, RunMode::Production) => {
                let _ = self.stderr.send(chunk);
            }
            (StreamKind::Stderr, RunMode::Development) => self.buffer.push(chunk),
        }
    }

    /// The attached child closed `stream`. Anything buffered goes out now.
    pub fn end(&mut self, stream: StreamKind) {
        if stream == StreamKind::Stderr {
            self.flush_stderr();
        }
    }

    /// Resolve when the stderr flush window has closed.
    pub async fn flush_due(&mut self) {
        self.buffer.timer.fired().await;
    }

    pub fn flush_stderr(&mut self) {
        if let Some(text) = self.buffer.take() {
            let _ = self.stderr.send(self.formatter.format(&text).into_bytes());
        }
    }
}
