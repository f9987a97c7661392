// Operator-facing status lines.
// Colors come from crossterm and are switched off when the sink is not a
// terminal, which also keeps test buffers free of escape codes.

use std::io::{self, IsTerminal, Stderr, Write};

use crossterm::style::Stylize;

pub struct Console<W: Write> {
    sink: W,
    color: bool,
}

impl Console<Stderr> {
    pub fn stderr() -> Self {
        let sink = io::stderr();
        let color = sink.is_terminal();
        Console { sink, color }
    }
}

impl<W: Write> Console<W> {
    pub fn new(sink: W, color: bool) -> Self {
        Console { sink, color }
    }

    pub fn into_inner(self) -> W {
        self.sink
    }

    fn line(&mut self, tag: &str, paint: fn(String) -> String, message: &str) {
        let tag = if self.color {
            paint(tag.to_string())
        } else {
            tag.to_string()
        };
        // A closed stderr is not worth failing the run over.
        let _ = writeln!(self.sink, "{tag} {message}");
    }

    pub fn info(&mut self, message: &str) {
        self.line("[INFO]", |s| s.blue().to_string(), message);
    }

    pub fn success(&mut self, message: &str) {
        self.line("[SUCCESS]", |s| s.green().to_string(), message);
    }

    pub fn warn(&mut self, message: &str) {
        self.line("[WARNING]", |s| s.yellow().to_string(), message);
    }

    pub fn error(&mut self, message: &str) {
        self.line("[ERROR]", |s| s.red().bold().to_string(), message);
    }

    /// Multi-line block printed as-is, indented under the last status line.
    pub fn block(&mut self, text: &str) {
        for line in text.lines() {
            let _ = writeln!(self.sink, "    {line}");
        }
    }
}
