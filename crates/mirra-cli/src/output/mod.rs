//! Terminal output formatting.
//!
//! Human-oriented messages go to the terminal with optional ANSI colors;
//! colors are disabled when `NO_COLOR` is set or either stream is not a TTY.

use std::error::Error;
use std::io::{self, IsTerminal};

use mirra_core::error::MirraError;

const GREEN: &str = "32";
const YELLOW: &str = "33";
const RED: &str = "31";
const DIM: &str = "2";

/// Output handler for consistent terminal formatting
#[derive(Debug, Clone)]
pub struct OutputHandler {
    colors: bool,
}

impl OutputHandler {
    /// Create an output handler with detected color support
    pub fn new() -> Self {
        let colors = std::env::var_os("NO_COLOR").is_none() && io::stdout().is_terminal() && io::stderr().is_terminal();
        Self { colors }
    }

    /// Create an output handler that never emits escape codes
    pub fn plain() -> Self {
        Self { colors: false }
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.colors {
            format!("\x1b[{}m{}\x1b[0m", code, text)
        } else {
            text.to_string()
        }
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        println!("{}", message);
    }

    /// Print a secondary detail line
    pub fn detail(&self, message: &str) {
        println!("{}", self.paint(DIM, message));
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        println!("{} {}", self.paint(GREEN, "✓"), message);
    }

    /// Print a warning message
    pub fn warn(&self, message: &str) {
        eprintln!("{} {}", self.paint(YELLOW, "⚠"), message);
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        eprintln!("{} {}", self.paint(RED, "✗"), message);
    }

    /// Print a step message with emoji
    pub fn step(&self, emoji: &str, message: &str) {
        println!("{} {}", emoji, message);
    }

    /// Format an error with its suggestion and source chain
    pub fn format_error(&self, error: &MirraError) -> String {
        let mut output = format!("{}: {}", self.paint(RED, "error"), error);

        if let Some(suggestion) = error.suggestion() {
            output.push_str(&format!("\n{}: {}", self.paint(DIM, "help"), suggestion));
        }

        let mut source = error.source();
        while let Some(err) = source {
            output.push_str(&format!("\n{}: {}", self.paint(DIM, "caused by"), err));
            source = err.source();
        }

        output
    }
}

impl Default for OutputHandler {
    fn default() -> Self {
        Self::new()
    }
}
