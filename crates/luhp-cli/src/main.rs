// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

use clap::{Parser, Subcommand};
use luhp_cli::commands;
use luhp_cli::commands::render::RenderArgs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "luhp")]
#[command(author = "Maravilla Labs")]
#[command(version)]
#[command(about = "Lua hypertext preprocessor: templates with inline Lua code blocks", long_about = None)]
struct Cli {
    /// Log level: error, warn, info, debug, trace
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a template
    Render {
        /// Template path, relative to the template root
        path: String,
        /// Initial binding as name=value (JSON values, strings otherwise)
        #[arg(long = "var", value_name = "NAME=VALUE")]
        vars: Vec<String>,
        /// JSON file with initial bindings
        #[arg(long = "vars", value_name = "FILE")]
        vars_file: Option<PathBuf>,
        /// Template root directory (overrides luhp.toml)
        #[arg(long)]
        root: Option<PathBuf>,
        /// Write the page to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Compile templates and their code blocks without rendering
    Check {
        /// Templates or directories, relative to the template root (default: all)
        paths: Vec<String>,
        /// Template root directory (overrides luhp.toml)
        #[arg(long)]
        root: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with the specified log level
    let filter = EnvFilter::try_new(&cli.log_level)
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Render { path, vars, vars_file, root, output } => {
            commands::render::run(RenderArgs { path, vars, vars_file, root, output })
        }
        Commands::Check { paths, root } => {
            commands::check::run(&paths, root)
        }
    }
}
