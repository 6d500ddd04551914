// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! AST to render plan transformation.
//!
//! This module turns the [`TemplateAst`] produced by the parser into a
//! [`RenderPlan`]: the ordered, immutable sequence of output-producing steps
//! the renderer walks for every request.
//!
//! # Transformation Steps
//!
//! 1. **Comment removal**: `{# #}` nodes produce no step
//! 2. **Literal merging**: adjacent literal text becomes one [`Step::Emit`]
//! 3. **Code block attribution**: each `{% lua %}` body becomes a [`CodeBlock`]
//!    carrying its template path and opening-tag line
//!
//! # Usage
//!
//! ```rust,ignore
//! use luhp::{parse_template, build_plan};
//!
//! let ast = parse_template(source)?;
//! let plan = build_plan(ast, "pages/index.luhp", source);
//! ```

use crate::ast::{Expression, Node, TemplateAst};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// A compiled template, ready to render.
///
/// Plans are shared through the cache as `Arc<RenderPlan>` and never mutated
/// after construction.
#[derive(Debug, Clone)]
pub struct RenderPlan {
    /// The template path the plan was compiled from.
    pub path: String,
    /// The original template source, kept for error snippets.
    pub source: String,
    /// Hash of the source for cache diagnostics.
    pub hash: u64,
    /// Top-level steps in source order.
    pub steps: Vec<Step>,
}

/// One output-producing step of a [`RenderPlan`].
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Write literal text.
    Emit(String),
    /// Evaluate an expression and write its string form.
    Output(Expression),
    /// Run an embedded code block and write its captured output.
    Code(CodeBlock),
    /// Bind a variable in the innermost scope.
    Set {
        /// Variable name.
        name: String,
        /// Value expression.
        expression: Expression,
    },
    /// Render the first branch whose condition is truthy.
    If {
        /// Conditions and their steps, in order.
        branches: Vec<(Expression, Vec<Step>)>,
        /// Steps rendered when no condition holds.
        otherwise: Option<Vec<Step>>,
    },
    /// Render the body once per item.
    For(ForLoop),
    /// Render another template against the same namespace.
    Include {
        /// Path as written in the tag.
        path: String,
        /// Line of the tag.
        line: usize,
    },
}

/// An embedded code block.
///
/// Created at compile time, never mutated; lives as long as its plan.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeBlock {
    /// Raw Lua text between the tags.
    pub code: String,
    /// Template line of the opening `{% lua %}` tag.
    pub line: usize,
    /// Path of the template that owns the block.
    pub file: String,
}

/// A `{% for %}` loop.
#[derive(Debug, Clone, PartialEq)]
pub struct ForLoop {
    /// Optional key/index binding.
    pub key: Option<String>,
    /// Value binding.
    pub value: String,
    /// Expression producing the items.
    pub iterable: Expression,
    /// Steps rendered per item.
    pub body: Vec<Step>,
    /// Steps rendered when there are no items.
    pub empty: Option<Vec<Step>>,
}

impl RenderPlan {
    /// Returns every code block of the plan in source order, nested ones included.
    pub fn code_blocks(&self) -> Vec<&CodeBlock> {
        fn collect<'a>(steps: &'a [Step], out: &mut Vec<&'a CodeBlock>) {
            for step in steps {
                match step {
                    Step::Code(block) => out.push(block),
                    Step::If { branches, otherwise } => {
                        for (_, body) in branches {
                            collect(body, out);
                        }
                        if let Some(body) = otherwise {
                            collect(body, out);
                        }
                    }
                    Step::For(for_loop) => {
                        collect(&for_loop.body, out);
                        if let Some(body) = &for_loop.empty {
                            collect(body, out);
                        }
                    }
                    _ => {}
                }
            }
        }

        let mut blocks = Vec::new();
        collect(&self.steps, &mut blocks);
        blocks
    }
}

/// Builds a render plan from a parsed template.
pub fn build_plan(ast: TemplateAst, path: &str, source: &str) -> RenderPlan {
    let mut hasher = DefaultHasher::new();
    source.hash(&mut hasher);

    RenderPlan {
        path: path.to_string(),
        source: source.to_string(),
        hash: hasher.finish(),
        steps: lower_nodes(ast.body, path),
    }
}

fn lower_nodes(nodes: Vec<Node>, path: &str) -> Vec<Step> {
    let mut steps: Vec<Step> = Vec::with_capacity(nodes.len());

    for node in nodes {
        let step = match node {
            Node::Comment => continue,
            Node::Text { content } => {
                if content.is_empty() {
                    continue;
                }
                if let Some(Step::Emit(previous)) = steps.last_mut() {
                    previous.push_str(&content);
                    continue;
                }
                Step::Emit(content)
            }
            Node::Output { expression } => Step::Output(expression),
            Node::Code { code, line } => Step::Code(CodeBlock {
                code,
                line,
                file: path.to_string(),
            }),
            Node::Set { name, expression } => Step::Set { name, expression },
            Node::If { branches, else_branch } => Step::If {
                branches: branches
                    .into_iter()
                    .map(|(condition, body)| (condition, lower_nodes(body, path)))
                    .collect(),
                otherwise: else_branch.map(|body| lower_nodes(body, path)),
            },
            Node::For {
                key,
                value,
                iterable,
                body,
                empty,
            } => Step::For(ForLoop {
                key,
                value,
                iterable,
                body: lower_nodes(body, path),
                empty: empty.map(|body| lower_nodes(body, path)),
            }),
            Node::Include { path: target, line } => Step::Include { path: target, line },
        };
        steps.push(step);
    }

    steps
}
