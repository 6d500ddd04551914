// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! CLI command implementations.
//!
//! - `render`: Render a template to stdout or a file
//! - `check`: Compile templates and their code blocks without rendering

/// Template validation command.
pub mod check;
/// Template rendering command.
pub mod render;
