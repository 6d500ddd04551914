// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Template resource resolution.
//!
//! This module provides the [`ResourceResolver`] trait and the filesystem
//! implementation used to locate templates and Lua modules.
//!
//! # Resolver Implementations
//!
//! - [`FileSystemResolver`]: Loads templates from a root directory (native builds)
//! - [`MemoryResourceResolver`](crate::memory_resolver::MemoryResourceResolver):
//!   Loads templates from in-memory storage (tests, embedding)
//!
//! # Resolution Algorithm
//!
//! Resolved paths are root-relative, `/`-separated identifiers such as
//! `pages/index.luhp`. They double as the file name in error messages.
//!
//! 1. **Absolute paths** (`/partials/nav.luhp`): relative to the root
//! 2. **Explicit relative** (`./nav.luhp`, `../shared/card.luhp`): relative to the importer
//! 3. **Implicit relative** (`partials/nav.luhp`): importer's directory first, then the root
//!
//! A name without extension also matches the same name with `.luhp` appended.
//! A name whose normalized path climbs above the root is [`LuhpError::Forbidden`].

use std::path::{Path, PathBuf};
use crate::error::{Result, LuhpError};

#[cfg(feature = "filesystem")]
use std::fs;

/// Extension tried for template names given without one.
pub const TEMPLATE_EXTENSION: &str = "luhp";

/// Converts a Path to a normalized string with forward slashes.
#[inline]
pub fn path_to_string<P: AsRef<Path>>(path: P) -> String {
    path.as_ref().to_string_lossy().replace('\\', "/")
}

/// A resolved template resource with its path and source code.
#[derive(Debug, Clone)]
pub struct ResolvedResource {
    /// The root-relative path of the resource.
    pub path: String,
    /// The resource source.
    pub source: String,
}

/// Trait for resolving and loading template resources.
///
/// Implement this trait to create custom template loading strategies.
/// Implementations must be thread-safe: one engine serves concurrent renders.
pub trait ResourceResolver: Send + Sync + 'static {
    /// Resolves a path and returns its source.
    ///
    /// # Arguments
    ///
    /// * `importer_path` - Resolved path of the template doing the lookup (empty for entry)
    /// * `name` - The path to resolve
    fn resolve(&self, importer_path: &str, name: &str) -> Result<ResolvedResource>;

    /// Returns the resolved path without loading the source.
    fn get_resolved_path(&self, importer_path: &str, name: &str) -> Result<String>;

    /// Returns a stamp that changes whenever the resource at `resolved_path`
    /// changes.
    fn modified(&self, resolved_path: &str) -> Result<u64>;

    /// Creates a boxed clone (for use in closures).
    fn clone_box(&self) -> Box<dyn ResourceResolver>;
}

impl Clone for Box<dyn ResourceResolver> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Joins `name` onto the directory of `importer`, resolving `.` and `..`.
///
/// A leading `/` makes `name` root-relative. Returns `None` when the path
/// climbs above the root.
pub fn join_relative(importer: &str, name: &str) -> Option<String> {
    let name = name.replace('\\', "/");
    let mut parts: Vec<String> = Vec::new();

    if !name.starts_with('/') {
        let importer = importer.replace('\\', "/");
        let mut dir: Vec<&str> = importer.split('/').filter(|c| !c.is_empty() && *c != ".").collect();
        // The importer is a file; its directory is the base
        dir.pop();
        parts.extend(dir.into_iter().map(String::from));
    }

    for component in name.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other.to_string()),
        }
    }

    Some(parts.join("/"))
}

/// Lists the resolved paths to try for `name`, in order.
///
/// # Errors
///
/// Returns [`LuhpError::Forbidden`] if `name` escapes the root.
pub fn candidate_paths(importer: &str, name: &str) -> Result<Vec<String>> {
    let forbidden = || LuhpError::Forbidden(name.to_string());

    let mut bases = Vec::with_capacity(2);
    if name.starts_with('/') || importer.is_empty() {
        bases.push(join_relative("", name).ok_or_else(forbidden)?);
    } else if name.starts_with("./") || name.starts_with("../") {
        bases.push(join_relative(importer, name).ok_or_else(forbidden)?);
    } else {
        bases.push(join_relative(importer, name).ok_or_else(forbidden)?);
        // A bare name with `..` inside may still escape from the root
        let from_root = join_relative("", name).ok_or_else(forbidden)?;
        if !bases.contains(&from_root) {
            bases.push(from_root);
        }
    }

    let mut candidates = Vec::with_capacity(bases.len() * 2);
    for base in bases.into_iter().filter(|b| !b.is_empty()) {
        let has_extension = Path::new(&base).extension().is_some();
        candidates.push(base.clone());
        if !has_extension {
            candidates.push(format!("{}.{}", base, TEMPLATE_EXTENSION));
        }
    }
    Ok(candidates)
}

/// Filesystem-based resource resolver.
///
/// Loads templates from the filesystem relative to a root directory. Paths
/// that escape the root, through `..` or through symlinks, are refused.
///
/// # Examples
///
/// ```rust,ignore
/// use luhp::FileSystemResolver;
///
/// let resolver = FileSystemResolver::new("./templates");
/// let resource = resolver.resolve("", "pages/index.luhp")?;
/// ```
#[cfg(feature = "filesystem")]
#[derive(Debug, Clone)]
pub struct FileSystemResolver {
    /// The root directory for template resolution.
    pub root_dir: PathBuf,
}

#[cfg(feature = "filesystem")]
impl FileSystemResolver {
    /// Creates a new filesystem resolver with the given root directory.
    pub fn new<P: AsRef<Path>>(root_dir: P) -> Self {
        Self {
            root_dir: root_dir.as_ref().to_path_buf(),
        }
    }

    /// The file backing a resolved path.
    pub fn full_path(&self, resolved_path: &str) -> PathBuf {
        self.root_dir.join(resolved_path)
    }

    fn resolve_internal(&self, importer_path: &str, name: &str) -> Result<(PathBuf, String)> {
        for candidate in candidate_paths(importer_path, name)? {
            let full_path = self.full_path(&candidate);
            if !full_path.is_file() {
                continue;
            }

            // Symlinks may point anywhere; compare canonical paths
            let canonical_path = fs::canonicalize(&full_path)?;
            let canonical_root = fs::canonicalize(&self.root_dir)?;
            if !canonical_path.starts_with(&canonical_root) {
                tracing::warn!("refusing '{}': it resolves outside {}", name, self.root_dir.display());
                return Err(LuhpError::Forbidden(name.to_string()));
            }

            tracing::debug!("resolved '{}' from '{}' to {}", name, importer_path, candidate);
            return Ok((full_path, candidate));
        }

        tracing::debug!("'{}' not found from '{}'", name, importer_path);
        Err(LuhpError::TemplateNotFound(name.to_string()))
    }
}

#[cfg(feature = "filesystem")]
impl ResourceResolver for FileSystemResolver {
    fn resolve(&self, importer_path: &str, name: &str) -> Result<ResolvedResource> {
        let (full_path, path) = self.resolve_internal(importer_path, name)?;
        let source = fs::read_to_string(&full_path)?;
        Ok(ResolvedResource { path, source })
    }

    fn get_resolved_path(&self, importer_path: &str, name: &str) -> Result<String> {
        let (_, path) = self.resolve_internal(importer_path, name)?;
        Ok(path)
    }

    fn modified(&self, resolved_path: &str) -> Result<u64> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let metadata = match fs::metadata(self.full_path(resolved_path)) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LuhpError::TemplateNotFound(resolved_path.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        // Length is mixed in because mtime granularity can hide quick rewrites
        let mut hasher = DefaultHasher::new();
        metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|elapsed| elapsed.as_nanos())
            .hash(&mut hasher);
        metadata.len().hash(&mut hasher);
        Ok(hasher.finish())
    }

    fn clone_box(&self) -> Box<dyn ResourceResolver> {
        Box::new(self.clone())
    }
}
