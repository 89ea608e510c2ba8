use std::io::Write;

/// Abstraction over user-facing output.
///
/// Command modules use this trait instead of `println!`/`eprintln!` so that
/// `serve` can keep stdout for JSON lines only.
pub trait UserOutput: Send + Sync {
    /// Informational status message (e.g., "Seeding 4 services...")
    fn status(&self, message: &str);

    /// Success message (e.g., "web (#3): created container 0123456789ab")
    fn success(&self, message: &str);

    /// Warning message (e.g., "Could not cache nginx:1.25")
    fn warning(&self, message: &str);

    /// Error message.
    fn error(&self, message: &str);

    /// One machine-readable line.
    fn line(&self, line: &str);
}

/// Standard CLI output: stdout/stderr with ANSI colors.
pub struct CliOutput;

impl UserOutput for CliOutput {
    fn status(&self, message: &str) {
        println!("{}", message);
    }

    fn success(&self, message: &str) {
        println!("\x1b[32m{}\x1b[0m", message);
    }

    fn warning(&self, message: &str) {
        eprintln!("\x1b[33m{}\x1b[0m", message);
    }

    fn error(&self, message: &str) {
        eprintln!("\x1b[31m{}\x1b[0m", message);
    }

    fn line(&self, line: &str) {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", line).ok();
        stdout.flush().ok();
    }
}

/// Everything but machine-readable lines goes to stderr. Used by `serve`.
pub struct ServeOutput;

impl UserOutput for ServeOutput {
    fn status(&self, message: &str) {
        eprintln!("{}", message);
    }

    fn success(&self, message: &str) {
        eprintln!("{}", message);
    }

    fn warning(&self, message: &str) {
        eprintln!("{}", message);
    }

    fn error(&self, message: &str) {
        eprintln!("{}", message);
    }

    fn line(&self, line: &str) {
        CliOutput.line(line);
    }
}

/// `1536` → `1.5 KiB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
