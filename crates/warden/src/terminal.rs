// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Line-oriented host for interactive terminals.

use std::io::{BufRead, Write};

use crate::host::{HostUi, LoginRequest, Severity};

/// Prompts on stderr and reads answers from stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalHost;

impl TerminalHost {
    fn read_line(prompt: &str) -> Option<String> {
        let mut stderr = std::io::stderr();
        let _ = write!(stderr, "{prompt}");
        let _ = stderr.flush();
        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_owned()),
        }
    }

    /// Read a line with terminal echo off. Falls back to an echoed read,
    /// saying so, when echo cannot be switched off.
    fn read_secret(prompt: &str) -> Option<String> {
        let Some(guard) = EchoGuard::disable() else {
            return Self::read_line(&format!("{prompt}(input will be visible) "));
        };
        let line = Self::read_line(prompt);
        drop(guard);
        // The newline typed by the user was not echoed either.
        eprintln!();
        line
    }
}

/// Terminal echo on stdin is off while this is alive.
#[cfg(unix)]
struct EchoGuard {
    original: rustix::termios::Termios,
}

#[cfg(unix)]
impl EchoGuard {
    fn disable() -> Option<Self> {
        use rustix::termios::{tcgetattr, tcsetattr, LocalModes, OptionalActions};

        let stdin = std::io::stdin();
        let original = tcgetattr(&stdin).ok()?;
        let mut quiet = original.clone();
        quiet.local_modes.remove(LocalModes::ECHO);
        tcsetattr(&stdin, OptionalActions::Now, &quiet).ok()?;
        Some(Self { original })
    }
}

#[cfg(unix)]
impl Drop for EchoGuard {
    fn drop(&mut self) {
        let _ = rustix::termios::tcsetattr(
            std::io::stdin(),
            rustix::termios::OptionalActions::Now,
            &self.original,
        );
    }
}

#[cfg(not(unix))]
struct EchoGuard;

#[cfg(not(unix))]
impl EchoGuard {
    fn disable() -> Option<Self> {
        None
    }
}

impl HostUi for TerminalHost {
    fn prompt_credentials(&self) -> Option<LoginRequest> {
        let identifier = Self::read_line("Identifier: ").filter(|s| !s.is_empty())?;
        let secret = Self::read_secret("Secret: ").filter(|s| !s.is_empty())?;
        Some(LoginRequest { identifier, secret })
    }

    fn notify(&self, severity: Severity, message: &str) {
        let tag = match severity {
            Severity::Info => "",
            Severity::Warning => "warning: ",
            Severity::Error => "error: ",
        };
        eprintln!("{tag}{message}");
    }

    fn prompt_choice(&self, message: &str, options: &[&str]) -> Option<String> {
        eprintln!("{message}");
        for (i, option) in options.iter().enumerate() {
            eprintln!("  {}) {option}", i + 1);
        }
        let answer = Self::read_line("> ")?;
        pick(&answer, options)
    }
}

/// Match an answer by 1-based index or case-insensitive label.
pub fn pick(answer: &str, options: &[&str]) -> Option<String> {
    if let Ok(n) = answer.parse::<usize>() {
        return n.checked_sub(1).and_then(|i| options.get(i)).map(|o| (*o).to_owned());
    }
    options.iter().find(|o| o.eq_ignore_ascii_case(answer)).map(|o| (*o).to_owned())
}
