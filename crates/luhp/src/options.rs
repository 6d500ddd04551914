// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Engine options.

use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_CAPACITY;
use crate::error::{LuhpError, Result};

/// Behaviour switches of an [`Engine`](crate::Engine).
///
/// Deserializable so shells can read it from their own configuration files;
/// missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Number of render plans kept in the memory cache.
    pub cache_size: usize,
    /// HTML-escape the output of `{{ }}` expressions.
    pub autoescape: bool,
    /// Drop one trailing newline from the output of each code block, so
    /// `print` inside inline markup does not break the line.
    pub trim_block_newline: bool,
    /// Maximum nesting of `{% include %}`.
    pub max_include_depth: usize,
    /// Remove `io`, `debug`, dynamic loading and most of `os` from the Lua
    /// environment.
    pub sandbox: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            cache_size: DEFAULT_CAPACITY,
            autoescape: false,
            trim_block_newline: true,
            max_include_depth: 32,
            sandbox: true,
        }
    }
}

impl EngineOptions {
    /// Checks the options for values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.cache_size == 0 {
            return Err(LuhpError::ConfigError("cache_size must be at least 1".to_string()));
        }
        if self.max_include_depth == 0 {
            return Err(LuhpError::ConfigError("max_include_depth must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Sets [`autoescape`](Self::autoescape).
    pub fn autoescape(mut self, enabled: bool) -> Self {
        self.autoescape = enabled;
        self
    }

    /// Sets [`trim_block_newline`](Self::trim_block_newline).
    pub fn trim_block_newline(mut self, enabled: bool) -> Self {
        self.trim_block_newline = enabled;
        self
    }

    /// Sets [`max_include_depth`](Self::max_include_depth).
    pub fn max_include_depth(mut self, depth: usize) -> Self {
        self.max_include_depth = depth;
        self
    }

    /// Sets [`sandbox`](Self::sandbox).
    pub fn sandbox(mut self, enabled: bool) -> Self {
        self.sandbox = enabled;
        self
    }
}
