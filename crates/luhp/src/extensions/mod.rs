// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

/// JSON module for Lua.
pub mod json;
/// Template-relative module loading.
pub mod require;

pub use json::register_json_module;
pub use require::{install_require, module_path};
