use console::style;

/// Styled status lines.
///
/// `Output::stderr()` keeps stdout clean when it carries JSON results.
pub struct Output {
    to_stderr: bool,
}

impl Output {
    pub fn new() -> Self {
        Self { to_stderr: false }
    }

    pub fn stderr() -> Self {
        Self { to_stderr: true }
    }

    fn emit(&self, line: String) {
        if self.to_stderr {
            eprintln!("{}", line);
        } else {
            println!("{}", line);
        }
    }

    pub fn success(&self, message: &str) {
        self.emit(format!("{} {}", style("✓").green(), message));
    }

    pub fn error(&self, message: &str) {
        eprintln!("{} {}", style("✗").red(), message);
    }

    pub fn warning(&self, message: &str) {
        self.emit(format!("{} {}", style("⚠").yellow(), message));
    }

    pub fn info(&self, message: &str) {
        self.emit(format!("{} {}", style("ℹ").blue(), message));
    }

    pub fn header(&self, message: &str) {
        self.emit(format!("\n{}", style(message).bold().underlined()));
    }

    pub fn section(&self, message: &str) {
        self.emit(format!("\n{}", style(message).bold()));
        self.emit("─".repeat(40));
    }

    /// Aligned `label: value` line
    pub fn field(&self, label: &str, value: impl std::fmt::Display) {
        self.emit(format!("  {:<14} {}", style(format!("{label}:")).dim(), value));
    }

    /// Multi-line block, indented as-is
    pub fn block(&self, text: &str) {
        for line in text.lines() {
            self.emit(line.to_string());
        }
    }
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}
