//! Operator-visible status lines.
//!
//! Both processes share the terminal, so every line carries a role tag:
//! `S:` for the server and `I:` for the interface. Lines are written to
//! stdout and flushed immediately so the two streams interleave in order.

use std::fmt::Display;
use std::io::{self, Write};

use crate::theme::Themed;

/// Which process a status line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Interface,
}

impl Role {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Server => "S:",
            Self::Interface => "I:",
        }
    }

    fn styled_tag(&self) -> String {
        match self {
            Self::Server => self.tag().server_tag(),
            Self::Interface => self.tag().interface_tag(),
        }
    }
}

/// Format a status line without printing it.
pub fn format_line(role: Role, message: impl Display) -> String {
    format!("{} {}", role.styled_tag(), message)
}

/// Print a status line. Output errors (a closed stdout) are ignored.
pub fn emit(role: Role, message: impl Display) {
    let mut out = io::stdout().lock();
    let _ = writeln!(out, "{}", format_line(role, message));
    let _ = out.flush();
}

/// Print a prompt without a trailing newline.
pub fn prompt(role: Role, message: impl Display) {
    let mut out = io::stdout().lock();
    let _ = write!(out, "{} ", format_line(role, message));
    let _ = out.flush();
}

/// Server status line.
pub fn server(message: impl Display) {
    emit(Role::Server, message);
}

/// Interface status line.
pub fn interface(message: impl Display) {
    emit(Role::Interface, message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::theme;
    use serial_test::serial;

    #[test]
    fn test_role_tags() {
        assert_eq!(Role::Server.tag(), "S:");
        assert_eq!(Role::Interface.tag(), "I:");
    }

    #[test]
    #[serial(colors)]
    fn test_format_line_plain() {
        theme::disable_colors();
        assert_eq!(
            format_line(Role::Server, "Fibonacci 10 is 55"),
            "S: Fibonacci 10 is 55"
        );
        assert_eq!(
            format_line(Role::Interface, format_args!("Sent {}", 3)),
            "I: Sent 3"
        );
    }
}
