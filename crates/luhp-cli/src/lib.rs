// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

// Warn on missing documentation for public items
#![warn(missing_docs)]

//! luhp CLI library.
//!
//! This crate provides the command-line interface for the luhp template
//! engine: a thin caller that renders a template with bindings taken from
//! the command line, and a compile-only check for CI.
//!
//! # Usage
//!
//! This crate is primarily used through the `luhp` binary:
//!
//! ```bash
//! luhp render pages/index.luhp --var name=Ada --var count=3
//! luhp render pages/index.luhp --vars data.json --output dist/index.html
//! luhp check pages
//! ```
//!
//! # Configuration
//!
//! Projects are configured via `luhp.toml` in the working directory.

/// CLI commands (render, check).
pub mod commands;
/// Project configuration from `luhp.toml`.
pub mod config;
