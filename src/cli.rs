/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Terminal output helpers for the report and the `list` command.

use crossterm::tty::IsTty;
use std::io::stdout;

/// Whether to colour output.
#[derive(Debug, Clone)]
pub struct ColorConfig {
    /// Escape codes are emitted only when set.
    pub enabled: bool,
}

impl ColorConfig {
    /// Create a new `ColorConfig`, auto-detecting TTY unless nocolor is true
    #[must_use]
    pub fn new(nocolor: bool) -> Self {
        Self {
            enabled: !nocolor && stdout().is_tty(),
        }
    }

    fn paint(&self, code: &str, s: &str) -> String {
        if self.enabled {
            format!("\x1b[{code}m{s}\x1b[0m")
        } else {
            s.to_string()
        }
    }

    /// Green, for passing steps
    #[must_use]
    pub fn green(&self, s: &str) -> String {
        self.paint("32", s)
    }

    /// Blue, for methods
    #[must_use]
    pub fn blue(&self, s: &str) -> String {
        self.paint("34", s)
    }

    /// Red, for failures
    #[must_use]
    pub fn red(&self, s: &str) -> String {
        self.paint("31", s)
    }

    /// Cyan, for scenario names
    #[must_use]
    pub fn cyan(&self, s: &str) -> String {
        self.paint("36", s)
    }

    /// Dim, for timings and params
    #[must_use]
    pub fn dim(&self, s: &str) -> String {
        self.paint("2", s)
    }
}

/// Get the terminal width, defaulting to 80 if unable to detect
#[must_use]
pub fn terminal_width() -> usize {
    crossterm::terminal::size().map_or(80, |(w, _)| usize::from(w))
}

/// Truncate a string to `max_len` characters, adding "..." if truncated
#[must_use]
pub fn truncate(s: &str, max_len: usize) -> String {
    if max_len <= 3 {
        return ".".repeat(max_len.min(3));
    }
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{kept}...")
    }
}
