// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Render command: renders one template to stdout or a file.

use crate::config::Config;
use anyhow::Context;
use console::style;
use luhp::{Bindings, Engine, FileSystemResolver, MemoryCache};
use serde_json::Value as JsonValue;
use std::fs;
use std::path::{Path, PathBuf};

/// Arguments of `luhp render`.
#[derive(Debug, Default)]
pub struct RenderArgs {
    /// Template path, relative to the template root.
    pub path: String,
    /// `name=value` pairs; values are parsed as JSON when possible.
    pub vars: Vec<String>,
    /// JSON object file with initial bindings.
    pub vars_file: Option<PathBuf>,
    /// Overrides `templates.root` from `luhp.toml`.
    pub root: Option<PathBuf>,
    /// Writes the page here instead of stdout.
    pub output: Option<PathBuf>,
}

/// Parses a `--var name=value` argument.
///
/// `count=3` binds a number, `tags=["a"]` an array and `name=Ada` the
/// string `"Ada"`.
pub fn parse_var(arg: &str) -> anyhow::Result<(String, JsonValue)> {
    let (name, raw) = arg
        .split_once('=')
        .with_context(|| format!("expected name=value, got `{}`", arg))?;
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("missing variable name in `{}`", arg);
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| JsonValue::String(raw.to_string()));
    Ok((name.to_string(), value))
}

/// Builds the initial bindings: the vars file first, then `--var` pairs on
/// top of it.
pub fn collect_bindings(vars: &[String], vars_file: Option<&Path>) -> anyhow::Result<Bindings> {
    let mut bindings = match vars_file {
        Some(file) => {
            let content = fs::read_to_string(file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let value: JsonValue = serde_json::from_str(&content)
                .with_context(|| format!("{} is not valid JSON", file.display()))?;
            Bindings::from_json(value)?
        }
        None => Bindings::new(),
    };

    for arg in vars {
        let (name, value) = parse_var(arg)?;
        bindings.insert(name, value);
    }
    Ok(bindings)
}

/// Creates an engine for `root` with the configured options.
pub fn create_engine(config: &Config, root: &Path) -> anyhow::Result<Engine<FileSystemResolver>> {
    let resolver = FileSystemResolver::new(root);
    let cache = Box::new(MemoryCache::new(config.engine.cache_size));
    Ok(Engine::with_options(resolver, cache, config.engine.clone())?)
}

/// Renders `path` and returns the page body.
pub fn render_page(config: &Config, root: &Path, path: &str, bindings: &Bindings) -> anyhow::Result<String> {
    let engine = create_engine(config, root)?;
    let rendered = engine.render(path, bindings)?;
    if !rendered.exported.is_empty() {
        tracing::debug!(
            "{} assigned: {}",
            path,
            rendered.exported.iter().cloned().collect::<Vec<_>>().join(", ")
        );
    }
    Ok(rendered.body)
}

/// Runs the render command.
pub fn run(args: RenderArgs) -> anyhow::Result<()> {
    let config = Config::load()?;
    let root = args.root.clone().unwrap_or_else(|| config.templates.root.clone());
    let bindings = collect_bindings(&args.vars, args.vars_file.as_deref())?;

    let body = render_page(&config, &root, &args.path, &bindings)?;

    match args.output {
        Some(output) => {
            if let Some(parent) = output.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            fs::write(&output, &body)?;
            eprintln!(
                "{} {} -> {}",
                style("Rendered").green(),
                args.path,
                output.display()
            );
        }
        None => print!("{}", body),
    }
    Ok(())
}
