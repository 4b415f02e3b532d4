//! Errors raised by every stage of the compiler.
//!
//! Syntax errors echo the offending source line with a caret under the bad
//! token. Semantic errors name the identifier and its line and column.
//! `Internal` marks a compiler defect and maps to its own exit status.

use snafu::Snafu;
use std::path::PathBuf;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CompileError {
  #[snafu(display("{line}:{column}: {message}\n{source_line}\n{marker}"))]
  WithLocation {
    line: usize,
    column: usize,
    source_line: String,
    marker: String,
    message: String,
  },

  #[snafu(display(
    "{line}:{column}: redefinition of '{name}' (first defined at {first_line}:{first_column})"
  ))]
  Redefinition {
    name: String,
    line: usize,
    column: usize,
    first_line: usize,
    first_column: usize,
  },

  #[snafu(display("{line}:{column}: undefined name '{name}'"))]
  UndefinedName {
    name: String,
    line: usize,
    column: usize,
  },

  #[snafu(display("{line}:{column}: '{name}' is a variable, not a function"))]
  NotCallable {
    name: String,
    line: usize,
    column: usize,
  },

  #[snafu(display("{line}:{column}: function '{name}' used where a variable was expected"))]
  NotAVariable {
    name: String,
    line: usize,
    column: usize,
  },

  #[snafu(display("internal error: {message}"))]
  Internal { message: String },

  #[snafu(display("could not {action} {}: {source}", path.display()))]
  Io {
    action: &'static str,
    path: PathBuf,
    source: std::io::Error,
  },
}

impl CompileError {
  /// Construct an error anchored at a specific byte offset in the source.
  pub fn at(source: &str, loc: usize, message: impl Into<String>) -> Self {
    let safe_loc = loc.min(source.len());
    let (line, column) = position(source, safe_loc);
    let line_start = source[..safe_loc].rfind('\n').map_or(0, |i| i + 1);
    let line_end = source[safe_loc..]
      .find('\n')
      .map_or(source.len(), |i| safe_loc + i);
    let marker = format!("{}^", " ".repeat(column - 1));
    Self::WithLocation {
      line,
      column,
      source_line: source[line_start..line_end].to_string(),
      marker,
      message: message.into(),
    }
  }

  /// Shorthand for a compiler defect.
  pub fn internal(message: impl Into<String>) -> Self {
    Self::Internal {
      message: message.into(),
    }
  }

  /// True when the error points at a bug in the compiler rather than the input.
  pub fn is_internal(&self) -> bool {
    matches!(self, Self::Internal { .. })
  }

  /// Process exit status the driver reports for this error.
  pub fn exit_code(&self) -> i32 {
    if self.is_internal() { 2 } else { 1 }
  }
}

/// 1-based line and column (in characters) of a byte offset.
pub fn position(source: &str, loc: usize) -> (usize, usize) {
  let before = &source[..loc.min(source.len())];
  let line = before.matches('\n').count() + 1;
  let line_start = before.rfind('\n').map_or(0, |i| i + 1);
  let column = before[line_start..].chars().count() + 1;
  (line, column)
}
