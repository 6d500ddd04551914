// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Error types for the luhp templating engine.
//!
//! This module defines [`LuhpError`], the main error enum, and helper types
//! for rich error reporting with source context.
//!
//! # Error Categories
//!
//! - **Resolution errors**: the template does not exist or lies outside the root
//! - **Parse errors**: invalid template syntax
//! - **Code errors**: an embedded `{% lua %}` block failed to compile or raised
//! - **Expression errors**: a markup expression (`{{ }}`, `{% if %}`, ...) failed
//! - **Plumbing errors**: Lua state, I/O, cache and configuration failures
//!
//! Every category maps to a request-shell outcome through [`LuhpError::status`].
//!
//! # Source Context
//!
//! Parse and code errors carry a [`SourceContext`] showing the problematic
//! template lines with line numbers and a caret pointing at the error.

use thiserror::Error;
use std::fmt;

/// Source context for enhanced error messages.
///
/// Captures a snippet of source code around an error location,
/// enabling rich error messages with line numbers and visual indicators.
#[derive(Debug, Clone)]
pub struct SourceContext {
    /// All lines from the source file.
    pub lines: Vec<String>,
    /// The line number where the error occurred (1-indexed).
    pub error_line: usize,
    /// The column number where the error occurred (1-indexed).
    pub error_column: usize,
    /// First line number of the snippet (1-indexed).
    pub snippet_start: usize,
    /// Last line number of the snippet (1-indexed).
    pub snippet_end: usize,
}

impl SourceContext {
    /// Creates a source context from source code and error location.
    ///
    /// Captures 3 lines before and after the error line for context.
    pub fn from_source(source: &str, line: usize, column: usize) -> Self {
        let lines: Vec<String> = source.lines().map(|l| l.to_string()).collect();
        let snippet_start = line.saturating_sub(3).max(1);
        let snippet_end = (line + 3).min(lines.len());

        Self {
            lines,
            error_line: line,
            error_column: column,
            snippet_start,
            snippet_end,
        }
    }

    /// Formats the source snippet with line numbers and error indicator.
    ///
    /// Returns a string like:
    /// ```text
    ///    4 | {% lua %}
    ///    5 | total = total + nil
    ///      | ^
    ///    6 | {% endlua %}
    /// ```
    pub fn format_snippet(&self) -> String {
        let mut result = String::new();

        for line_num in self.snippet_start..=self.snippet_end {
            if line_num == 0 || line_num > self.lines.len() {
                break;
            }

            let line = &self.lines[line_num - 1];
            result.push_str(&format!("{:4} | {}\n", line_num, line));

            if line_num == self.error_line {
                result.push_str(&format!("     | {}^\n", " ".repeat(self.error_column.saturating_sub(1))));
            }
        }

        result
    }
}

impl fmt::Display for SourceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_snippet())
    }
}

/// Helper struct for displaying optional source context.
pub struct OptSourceContextDisplay<'a>(pub &'a Option<SourceContext>);

impl<'a> fmt::Display for OptSourceContextDisplay<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(ctx) => write!(f, "\n{}", ctx),
            None => Ok(()),
        }
    }
}

/// Helper trait for formatting optional source context.
pub trait AsDisplay<'a> {
    /// Wraps self for Display formatting.
    fn as_display(&'a self) -> OptSourceContextDisplay<'a>;
}

impl<'a> AsDisplay<'a> for Option<SourceContext> {
    fn as_display(&'a self) -> OptSourceContextDisplay<'a> {
        OptSourceContextDisplay(self)
    }
}

/// The main error type for luhp operations.
///
/// All luhp functions return `Result<T, LuhpError>` to provide
/// detailed error information for debugging and user feedback.
#[derive(Error, Debug)]
pub enum LuhpError {
    /// The requested template does not exist.
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    /// The requested path resolves outside the template root.
    #[error("Access outside the template root is forbidden: {0}")]
    Forbidden(String),

    /// Template parsing failed due to invalid syntax.
    #[error("Parse error in {file:?}: {message} at line {line}, column {column}{}", source_context.as_display())]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Line number where the error occurred.
        line: usize,
        /// Column number where the error occurred.
        column: usize,
        /// The file path, if known.
        file: Option<String>,
        /// Source context for rich error display.
        source_context: Option<SourceContext>,
    },

    /// An embedded code block contains a Lua syntax error.
    #[error("Code block compile error in {file} at line {line}: {message}{}", source_context.as_display())]
    CodeCompileError {
        /// The template the block belongs to.
        file: String,
        /// Template line of the fault.
        line: usize,
        /// The Lua compiler message.
        message: String,
        /// Source context for error display.
        source_context: Option<SourceContext>,
    },

    /// An embedded code block raised while executing.
    #[error("Code block runtime error in {file} at line {line}: {message}{}", source_context.as_display())]
    CodeRuntimeError {
        /// The file the fault is attributed to.
        file: String,
        /// Template line of the fault.
        line: usize,
        /// The error message raised by the block.
        message: String,
        /// Lua stack trace, if available.
        lua_traceback: Option<String>,
        /// Source context for error display.
        source_context: Option<SourceContext>,
    },

    /// A markup expression failed to compile or evaluate.
    #[error("Expression error in {file} at line {line}: {message}")]
    ExpressionError {
        /// The template containing the expression.
        file: String,
        /// Template line of the expression.
        line: usize,
        /// Description of the failure.
        message: String,
    },

    /// `{% include %}` nested deeper than the configured limit.
    #[error("Include depth of {depth} exceeded while including {path}")]
    IncludeDepthExceeded {
        /// The template that could not be included.
        path: String,
        /// The configured maximum depth.
        depth: usize,
    },

    /// Lua runtime execution error outside of a code block.
    #[error("Lua execution error: {0}")]
    LuaError(#[from] mlua::Error),

    /// File I/O error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Cache operation failed.
    #[error("Cache error: {0}")]
    CacheError(String),

    /// Engine options are invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl LuhpError {
    /// HTTP-style status code a request shell should answer with.
    ///
    /// Missing templates are `404`, paths escaping the root `403`, template
    /// syntax errors `400` and every execution fault `500`.
    pub fn status(&self) -> u16 {
        match self {
            LuhpError::TemplateNotFound(_) => 404,
            LuhpError::Forbidden(_) => 403,
            LuhpError::ParseError { .. } => 400,
            _ => 500,
        }
    }

    /// Returns `true` if the error means the template does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, LuhpError::TemplateNotFound(_))
    }

    /// The `(file, line)` the error is attributed to, when known.
    pub fn location(&self) -> Option<(&str, usize)> {
        match self {
            LuhpError::ParseError { file, line, .. } => file.as_deref().map(|f| (f, *line)),
            LuhpError::CodeCompileError { file, line, .. }
            | LuhpError::CodeRuntimeError { file, line, .. }
            | LuhpError::ExpressionError { file, line, .. } => Some((file.as_str(), *line)),
            _ => None,
        }
    }
}

/// Convenience type alias for Results with [`LuhpError`].
pub type Result<T> = std::result::Result<T, LuhpError>;
