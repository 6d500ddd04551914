// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

// Warn on missing documentation for public items
#![warn(missing_docs)]

// LuhpError carries source snippets and Lua tracebacks
#![allow(clippy::result_large_err)]

//! # luhp
//!
//! Lua hypertext preprocessor: server-side templates with live Lua code
//! blocks, in the "code inline with markup" style of PHP.
//!
//! A `{% lua %} ... {% endlua %}` block runs with the same variables the
//! surrounding markup sees. Whatever it prints lands in the page at the
//! block's position, and whatever it assigns is visible to everything
//! rendered after it.
//!
//! ## Features
//!
//! - Code blocks sharing one namespace with `{{ }}`, `{% set %}`, `{% if %}`
//!   and `{% for %}` markup
//! - `print` / `echo` captured per render pass, never through process stdout
//! - Errors reported with the template file and line, inside code blocks too
//! - `require` relative to the template directory
//! - Plan caching keyed by template modification
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use luhp::{Bindings, Engine, FileSystemResolver};
//!
//! let engine = Engine::with_memory_cache(FileSystemResolver::new("./templates"), 100)?;
//!
//! // templates/hello.luhp: Hello {% lua %}print(1+1){% endlua %}!
//! let page = engine.render("hello.luhp", &Bindings::new())?;
//! assert_eq!(page.body, "Hello 2!");
//! ```

/// Abstract Syntax Tree types for templates.
pub mod ast;
/// Template parser.
pub mod parser;
/// AST to render plan transformation.
pub mod plan;
/// The shared variable namespace of a render pass.
pub mod namespace;
/// Per-render output capture.
pub mod output;
/// Embedded code block execution.
pub mod executor;
/// Render plan execution.
pub mod render;
/// Main template engine.
pub mod engine;
/// Resource resolution (filesystem).
pub mod resolver;
/// In-memory resource resolver.
pub mod memory_resolver;
/// Render plan caching.
pub mod cache;
/// Error types and reporting.
pub mod error;
/// Lua runtime extensions.
pub mod extensions;
/// Engine options.
pub mod options;
/// Request-shell outcome.
pub mod response;

pub use ast::*;
pub use parser::{parse_template, parse_template_with_context, LuhpParser, Rule};
pub use plan::*;
pub use namespace::{json_to_lua, Bindings, BlockView, Scope};
pub use output::{Capture, OutputSink};
pub use executor::{check_block, dedent, pad_to_line, CodeBlockExecutor};
pub use render::{escape_html, Rendered};
pub use engine::Engine;
pub use resolver::*;
pub use memory_resolver::MemoryResourceResolver;
pub use cache::*;
pub use error::*;
pub use options::EngineOptions;
pub use response::Response;
pub use extensions::register_json_module;

// Re-export mlua value
pub use mlua::Value;

#[cfg(test)]
mod tests;
