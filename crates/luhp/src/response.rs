// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Request-shell outcome of a render.
//!
//! A request shell (an HTTP server, a CGI wrapper, the CLI) hands the engine a
//! path plus initial bindings and gets back a [`Response`]: the rendered body
//! with a status, or a structured error outcome it can translate into its own
//! format.

use crate::error::LuhpError;

/// The outcome of [`Engine::respond`](crate::Engine::respond).
///
/// # Example
///
/// ```rust
/// use luhp::Response;
///
/// let page = Response::html(200, "<h1>Hello</h1>");
/// assert_eq!(page.status(), 200);
/// assert!(page.is_success());
///
/// let missing = Response::not_found("pages/nope.luhp");
/// assert_eq!(missing.status(), 404);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// A rendered page.
    Html {
        /// HTTP status code
        status: u16,
        /// Rendered body
        body: String,
    },

    /// A failed render.
    Error {
        /// HTTP status code
        status: u16,
        /// Error message, with file and line for template faults
        message: String,
    },
}

impl Response {
    /// Creates an HTML response.
    pub fn html(status: u16, body: impl Into<String>) -> Self {
        Self::Html {
            status,
            body: body.into(),
        }
    }

    /// Creates an error response.
    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self::Error {
            status,
            message: message.into(),
        }
    }

    /// Creates a 404 response for a missing template.
    pub fn not_found(path: &str) -> Self {
        Self::error(404, format!("Not Found: {}", path))
    }

    /// Maps an engine error to its outcome.
    ///
    /// The message is the error's display form, which names the template file
    /// and line for parse, code block and expression faults.
    pub fn from_error(error: &LuhpError) -> Self {
        let status = error.status();
        match error {
            LuhpError::TemplateNotFound(path) => Self::not_found(path),
            LuhpError::Forbidden(path) => Self::error(status, format!("Forbidden: {}", path)),
            other => Self::error(status, other.to_string()),
        }
    }

    /// Gets the status code.
    pub fn status(&self) -> u16 {
        match self {
            Self::Html { status, .. } | Self::Error { status, .. } => *status,
        }
    }

    /// Returns `true` for a 2xx outcome.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status())
    }

    /// The rendered body, or the error message.
    pub fn body(&self) -> &str {
        match self {
            Self::Html { body, .. } => body,
            Self::Error { message, .. } => message,
        }
    }
}

impl From<LuhpError> for Response {
    fn from(error: LuhpError) -> Self {
        Self::from_error(&error)
    }
}
