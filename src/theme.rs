//! Terminal colors for status lines and error output.
//!
//! Colors can be disabled globally with the `--no-color` flag or the
//! `NO_COLOR` environment variable. When disabled every helper returns the
//! plain text.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};

use owo_colors::{OwoColorize, Style};

/// Global color enable flag (respects NO_COLOR and --no-color).
static COLORS_ENABLED: AtomicBool = AtomicBool::new(true);

/// Disable all colors globally. Call early in `main()`.
pub fn disable_colors() {
    COLORS_ENABLED.store(false, Ordering::Relaxed);
    owo_colors::set_override(false);
}

/// Check if colors are currently enabled.
pub fn colors_enabled() -> bool {
    COLORS_ENABLED.load(Ordering::Relaxed)
}

fn paint<T: Display + ?Sized>(value: &T, style: Style) -> String {
    if colors_enabled() {
        value.style(style).to_string()
    } else {
        value.to_string()
    }
}

/// Semantic styles for status output.
///
/// Every method returns plain text once [`disable_colors`] has been called.
pub trait Themed: Display {
    /// Server role tag, blue and bold.
    fn server_tag(&self) -> String {
        paint(self, Style::new().blue().bold())
    }

    /// Interface role tag, magenta and bold.
    fn interface_tag(&self) -> String {
        paint(self, Style::new().magenta().bold())
    }

    /// Computed values.
    fn result(&self) -> String {
        paint(self, Style::new().green())
    }

    /// Request numbers and counts.
    fn count(&self) -> String {
        paint(self, Style::new().cyan())
    }

    fn warning(&self) -> String {
        paint(self, Style::new().yellow())
    }

    fn error_style(&self) -> String {
        paint(self, Style::new().red().bold())
    }

    /// Secondary text such as resource usage.
    fn muted(&self) -> String {
        paint(self, Style::new().dimmed())
    }
}

impl Themed for String {}
impl Themed for &str {}
impl Themed for u32 {}
impl Themed for u64 {}
impl Themed for usize {}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn reset_colors() {
        COLORS_ENABLED.store(true, Ordering::Relaxed);
        owo_colors::set_override(true);
    }

    #[test]
    #[serial(colors)]
    fn test_disable_colors() {
        reset_colors();
        assert!(colors_enabled());
        disable_colors();
        assert!(!colors_enabled());
        reset_colors();
    }

    #[test]
    #[serial(colors)]
    fn test_themed_with_colors() {
        reset_colors();
        let tagged = "S:".server_tag();
        assert!(tagged.contains("\x1b["), "Expected ANSI escape codes");
        assert!(tagged.contains("S:"));
        assert!(55u64.result().contains("55"));
    }

    #[test]
    #[serial(colors)]
    fn test_themed_without_colors() {
        reset_colors();
        disable_colors();

        assert_eq!("S:".server_tag(), "S:");
        assert_eq!("I:".interface_tag(), "I:");
        assert_eq!(6765u64.result(), "6765");
        assert_eq!(3usize.count(), "3");
        assert_eq!("careful".warning(), "careful");
        assert_eq!("boom".error_style(), "boom");
        assert_eq!(String::from("usage").muted(), "usage");

        reset_colors();
    }
}
