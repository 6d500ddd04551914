// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

use crate::error::{LuhpError, Result};
use crate::resolver::{candidate_paths, ResolvedResource, ResourceResolver};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct Entry {
    source: String,
    version: u64,
}

/// Memory-based resource resolver that stores templates in memory.
///
/// Clones share storage, so templates added after the resolver was handed to
/// an engine are visible to it. Every write gets a new version, which serves
/// as the modification stamp.
#[derive(Debug, Clone, Default)]
pub struct MemoryResourceResolver {
    templates: Arc<Mutex<HashMap<String, Entry>>>,
    versions: Arc<AtomicU64>,
}

impl MemoryResourceResolver {
    /// Create a new memory resource resolver
    pub fn new() -> Self {
        Self::default()
    }

    fn templates(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.templates.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds or replaces a template.
    pub fn add_template(&self, path: &str, content: impl Into<String>) {
        let version = self.versions.fetch_add(1, Ordering::Relaxed) + 1;
        self.templates().insert(
            normalize_key(path),
            Entry {
                source: content.into(),
                version,
            },
        );
    }

    /// Builder-style [`add_template`](Self::add_template).
    pub fn with_template(self, path: &str, content: impl Into<String>) -> Self {
        self.add_template(path, content);
        self
    }

    /// Remove a template from the memory resolver
    pub fn remove_template(&self, path: &str) {
        self.templates().remove(&normalize_key(path));
    }

    /// Clear all templates
    pub fn clear(&self) {
        self.templates().clear();
    }

    fn resolve_internal(&self, importer_path: &str, name: &str) -> Result<(String, Entry)> {
        let templates = self.templates();
        for candidate in candidate_paths(importer_path, name)? {
            if let Some(entry) = templates.get(&candidate) {
                return Ok((candidate, entry.clone()));
            }
        }
        Err(LuhpError::TemplateNotFound(name.to_string()))
    }
}

fn normalize_key(path: &str) -> String {
    path.replace('\\', "/").trim_start_matches("./").trim_start_matches('/').to_string()
}

impl ResourceResolver for MemoryResourceResolver {
    fn resolve(&self, importer_path: &str, name: &str) -> Result<ResolvedResource> {
        let (path, entry) = self.resolve_internal(importer_path, name)?;
        Ok(ResolvedResource {
            path,
            source: entry.source,
        })
    }

    fn get_resolved_path(&self, importer_path: &str, name: &str) -> Result<String> {
        let (path, _) = self.resolve_internal(importer_path, name)?;
        Ok(path)
    }

    fn modified(&self, resolved_path: &str) -> Result<u64> {
        self.templates()
            .get(resolved_path)
            .map(|entry| entry.version)
            .ok_or_else(|| LuhpError::TemplateNotFound(resolved_path.to_string()))
    }

    fn clone_box(&self) -> Box<dyn ResourceResolver> {
        Box::new(self.clone())
    }
}
