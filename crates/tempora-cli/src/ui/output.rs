//! Formatted output utilities.

use console::{StyledObject, style};

fn line(icon: StyledObject<&str>, msg: &str) {
    println!("{} {msg}", icon.bold());
}

/// Print a success message.
pub fn success(msg: &str) {
    line(style("✓").green(), msg);
}

/// Print a warning message.
pub fn warning(msg: &str) {
    line(style("⚠").yellow(), msg);
}

/// Print an info message.
pub fn info(msg: &str) {
    line(style("ℹ").blue(), msg);
}

/// Print a section title.
pub fn header(msg: &str) {
    println!("\n{}", style(msg).bold().underlined());
}

/// Outcome of a status probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Healthy.
    Ok,
    /// Degraded or absent.
    Warning,
    /// Failed.
    Error,
}

impl HealthStatus {
    fn styled(self) -> (StyledObject<&'static str>, StyledObject<&'static str>) {
        match self {
            Self::Ok => (style("✓").green(), style("OK").green()),
            Self::Warning => (style("⚠").yellow(), style("WARNING").yellow()),
            Self::Error => (style("✗").red(), style("ERROR").red()),
        }
    }
}

/// Print one probe result, e.g. `✓ Gateway: OK - running`.
pub fn health_check(name: &str, status: HealthStatus, detail: Option<&str>) {
    let (icon, label) = status.styled();
    match detail {
        Some(detail) => println!("  {icon} {name}: {label} - {}", style(detail).dim()),
        None => println!("  {icon} {name}: {label}"),
    }
}

/// Print a key-value pair.
pub fn kv(key: &str, value: &str) {
    println!("  {}: {value}", style(key).bold());
}
