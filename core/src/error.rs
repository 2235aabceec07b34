//! All error-related CTilde types: the diagnostic model, the shared
//! append-only diagnostic list, recoverable resolution errors, and the
//! aggregate compile failure that renders diagnostics against source code.

use crate::token::Token;
use failure::Fail;
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt::{self, Display, Formatter, Write as _};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Severity {
    Error,
    Warning,
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "Error"),
            Severity::Warning => write!(f, "Warning"),
        }
    }
}

/// A single compiler message tied to a source position. `line == 0` marks a
/// position that could not be determined; the printer falls back to the
/// compact form for it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub path: String,
    pub message: String,
    pub line: usize,
    pub column: usize,
    pub severity: Severity,
}

impl Display for Diagnostic {
    /// Compact one-line form, also used as the fallback for invalid
    /// positions.
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}({},{}): {}",
            self.severity, self.path, self.line, self.column, self.message
        )
    }
}

impl Diagnostic {
    /// Renders the full arrow-and-caret form against the source text the
    /// diagnostic points into. Positions with `line < 1` (or lines missing
    /// from the source) use the compact form instead.
    pub fn render(&self, source: Option<&str>) -> String {
        let line_text = if self.line >= 1 {
            source.and_then(|s| s.lines().nth(self.line - 1))
        } else {
            None
        };
        let line_text = match line_text {
            Some(text) => text,
            None => return self.to_string(),
        };

        let line_label = self.line.to_string();
        let gutter = " ".repeat(line_label.len());
        let mut out = String::new();
        let _ = writeln!(out, "{}: {}", self.severity, self.message);
        let _ = writeln!(
            out,
            "{}--> {}:{}:{}",
            " ".repeat(2),
            self.path,
            self.line,
            self.column
        );
        let _ = writeln!(out, "{} |", gutter);
        let _ = writeln!(out, "{} | {}", line_label, line_text);
        let _ = write!(
            out,
            "{} | {}^",
            gutter,
            " ".repeat(self.column.saturating_sub(1))
        );
        out
    }
}

/// The append-only diagnostic list shared by the parser, the analyzer and
/// the driver. Interior mutability keeps the signature burden off every
/// visitor; the compiler is single-threaded throughout.
///
/// The list can be temporarily silenced. The driver seals it once the
/// reporting stages are over, so a stray resolution during code generation
/// cannot append entries nobody will render.
#[derive(Debug, Default)]
pub struct Diagnostics {
    list: RefCell<Vec<Diagnostic>>,
    silenced: Cell<bool>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, diagnostic: Diagnostic) {
        if !self.silenced.get() {
            self.list.borrow_mut().push(diagnostic);
        }
    }

    pub fn error(
        &self,
        path: &str,
        line: usize,
        column: usize,
        message: impl Into<String>,
    ) {
        self.push(Diagnostic {
            path: path.to_string(),
            message: message.into(),
            line,
            column,
            severity: Severity::Error,
        });
    }

    pub fn error_at(&self, path: &str, token: &Token, message: impl Into<String>) {
        self.error(path, token.line, token.column, message);
    }

    pub fn warning_at(
        &self,
        path: &str,
        token: &Token,
        message: impl Into<String>,
    ) {
        self.push(Diagnostic {
            path: path.to_string(),
            message: message.into(),
            line: token.line,
            column: token.column,
            severity: Severity::Warning,
        });
    }

    pub fn len(&self) -> usize {
        self.list.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.borrow().is_empty()
    }

    /// Rolls the list back to an earlier length. Used by the parser to
    /// discard diagnostics recorded during a failed speculative parse.
    pub fn truncate(&self, len: usize) {
        self.list.borrow_mut().truncate(len);
    }

    pub fn has_errors(&self) -> bool {
        self.list
            .borrow()
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Snapshot in insertion order.
    pub fn all(&self) -> Vec<Diagnostic> {
        self.list.borrow().clone()
    }

    /// Snapshot in display order: sorted by `(path, line, column)`. The sort
    /// is stable, so diagnostics at the same position keep insertion order.
    pub fn sorted(&self) -> Vec<Diagnostic> {
        let mut list = self.all();
        list.sort_by(|a, b| {
            (&a.path, a.line, a.column).cmp(&(&b.path, b.line, b.column))
        });
        list
    }

    /// Silences the list for the lifetime of the returned guard.
    pub fn silence(&self) -> SilenceGuard<'_> {
        let previous = self.silenced.replace(true);
        SilenceGuard {
            diagnostics: self,
            previous,
        }
    }
}

pub struct SilenceGuard<'a> {
    diagnostics: &'a Diagnostics,
    previous: bool,
}

impl Drop for SilenceGuard<'_> {
    fn drop(&mut self) {
        self.diagnostics.silenced.set(self.previous);
    }
}

/// A recoverable name/type resolution error. Callers convert these into
/// diagnostics located at the offending token.
#[derive(Debug, Fail)]
pub struct ResolveError {
    pub message: String,
}

impl ResolveError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Display for ResolveError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// The aggregate failure of a compilation: every diagnostic plus the source
/// map needed to render them. This type can be formatted without any
/// external data.
#[derive(Debug, Fail)]
pub struct CompileFailure {
    diagnostics: Vec<Diagnostic>,
    sources: HashMap<String, String>,
}

impl CompileFailure {
    pub fn new(
        diagnostics: Vec<Diagnostic>,
        sources: HashMap<String, String>,
    ) -> Self {
        Self {
            diagnostics,
            sources,
        }
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }
}

impl Display for CompileFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, diagnostic) in self.diagnostics.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            let source = self.sources.get(&diagnostic.path);
            write!(f, "{}", diagnostic.render(source.map(String::as_str)))?;
        }
        Ok(())
    }
}
