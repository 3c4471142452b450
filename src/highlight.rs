use std::io::IsTerminal;
use std::sync::Arc;

/// Formatting capability handed to the output pipe by whoever builds the engine.
pub trait Highlighter: Send + Sync {
    /// Emphasise an error type name such as `TypeError`.
    fn error(&self, text: &str) -> String;
    /// Emphasise a file path or URL.
    fn url(&self, text: &str) -> String;
}

/// ANSI escapes: red error names, underlined light-on-black paths.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnsiHighlighter;

impl Highlighter for AnsiHighlighter {
    fn error(&self, text: &str) -> String {
        format!("\x1b[31m{text}\x1b[39m")
    }

    fn url(&self, text: &str) -> String {
        format!("\x1b[48;2;0;0;0m\x1b[38;2;238;238;238m\x1b[4m{text}\x1b[24m\x1b[39m\x1b[49m")
    }
}

/// Leaves text untouched; used when stderr is not a terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainHighlighter;

impl Highlighter for PlainHighlighter {
    fn error(&self, text: &str) -> String {
        text.to_string()
    }

    fn url(&self, text: &str) -> String {
        text.to_string()
    }
}

/// ANSI when our own stderr is a terminal, plain otherwise.
pub fn for_stderr() -> Arc<dyn Highlighter> {
    if std::io::stderr().is_terminal() {
        Arc::new(AnsiHighlighter)
    } else {
        Arc::new(PlainHighlighter)
    }
}
