// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Check command: compiles templates and their code blocks without rendering.

use crate::commands::render::create_engine;
use crate::config::Config;
use console::style;
use luhp::{path_to_string, TEMPLATE_EXTENSION};
use std::fs;
use std::path::{Path, PathBuf};

/// Result of checking one template.
#[derive(Debug)]
pub struct CheckReport {
    /// Template path relative to the root.
    pub path: String,
    /// The error message, if the template does not compile.
    pub error: Option<String>,
}

/// Expands `paths` into template paths relative to `root`.
///
/// A directory stands for every `.luhp` file below it; no paths means the
/// whole root.
pub fn collect_templates(root: &Path, paths: &[String]) -> anyhow::Result<Vec<String>> {
    let mut templates = Vec::new();
    let requested: Vec<String> = if paths.is_empty() { vec![String::new()] } else { paths.to_vec() };

    for path in &requested {
        let full = root.join(path);
        if full.is_dir() {
            let mut found = Vec::new();
            walk(&full, &mut found)?;
            found.sort();
            for file in found {
                let relative = file.strip_prefix(root).unwrap_or(&file);
                templates.push(path_to_string(relative));
            }
        } else {
            templates.push(path.clone());
        }
    }
    Ok(templates)
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == TEMPLATE_EXTENSION) {
            out.push(path);
        }
    }
    Ok(())
}

/// Checks every template and returns one report per template.
pub fn check_templates(config: &Config, root: &Path, paths: &[String]) -> anyhow::Result<Vec<CheckReport>> {
    let engine = create_engine(config, root)?;
    let reports = collect_templates(root, paths)?
        .into_iter()
        .map(|path| {
            let error = engine.check(&path).err().map(|e| e.to_string());
            CheckReport { path, error }
        })
        .collect();
    Ok(reports)
}

/// Runs the check command.
pub fn run(paths: &[String], root: Option<PathBuf>) -> anyhow::Result<()> {
    let config = Config::load()?;
    let root = root.unwrap_or_else(|| config.templates.root.clone());

    let reports = check_templates(&config, &root, paths)?;
    let mut failed = 0;
    for report in &reports {
        match &report.error {
            None => println!("  {} {}", style("✓").green(), report.path),
            Some(error) => {
                failed += 1;
                println!("  {} {}\n{}", style("✗").red(), report.path, error);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} template(s) failed to compile", failed, reports.len());
    }
    println!("{} {} template(s)", style("Checked").green(), reports.len());
    Ok(())
}
