// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Abstract Syntax Tree (AST) types for luhp templates.
//!
//! This module defines the data structures that represent a parsed template.
//! The AST is produced by the parser and consumed by the plan builder.
//!
//! # Node Types
//!
//! The [`Node`] enum represents all template constructs:
//! - Literal text and output expressions (`{{ expr }}`)
//! - Embedded Lua code blocks (`{% lua %} ... {% endlua %}`)
//! - Markup assignments (`{% set name = expr %}`)
//! - Control flow blocks (`{% if %}`, `{% for %}`)
//! - Template inclusion (`{% include "path" %}`)
//! - Comments (`{# ... #}`), which are dropped

use serde::{Deserialize, Serialize};

/// AST node types representing template structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    /// Literal markup, copied to the output unchanged.
    Text {
        /// The text content, preserving whitespace.
        content: String,
    },
    /// An output expression `{{ expression }}`.
    Output {
        /// The Lua expression to evaluate and render.
        expression: Expression,
    },
    /// An embedded code block `{% lua %} ... {% endlua %}`.
    Code {
        /// The raw Lua source between the tags.
        code: String,
        /// Line of the opening `{% lua %}` tag.
        line: usize,
    },
    /// Markup assignment `{% set name = expression %}`.
    Set {
        /// The variable name to bind.
        name: String,
        /// The Lua expression to evaluate and assign.
        expression: Expression,
    },
    /// Conditional block `{% if %} ... {% elif %} ... {% else %} ... {% endif %}`.
    If {
        /// `(condition, body)` pairs for the `if` and every `elif`, in order.
        branches: Vec<(Expression, Vec<Node>)>,
        /// Nodes rendered when no condition is truthy.
        else_branch: Option<Vec<Node>>,
    },
    /// Iteration block `{% for value in list %}` or `{% for key, value in list %}`.
    For {
        /// Optional name bound to the key (index for sequences).
        key: Option<String>,
        /// Name bound to the current value.
        value: String,
        /// The Lua expression producing the iterable.
        iterable: Expression,
        /// Nodes rendered for each item.
        body: Vec<Node>,
        /// Nodes rendered when there are no items (`{% else %}`).
        empty: Option<Vec<Node>>,
    },
    /// Template inclusion `{% include "path" %}`.
    Include {
        /// The path as written, resolved relative to the including template.
        path: String,
        /// Line of the tag.
        line: usize,
    },
    /// Comment `{# ... #}`, stripped from output.
    Comment,
}

/// A Lua expression embedded in markup, with its template line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    /// The expression source, trimmed.
    pub source: String,
    /// Line of the tag containing the expression.
    pub line: usize,
}

impl Expression {
    /// Creates an expression from its source and line.
    pub fn new(source: impl Into<String>, line: usize) -> Self {
        Self {
            source: source.into(),
            line,
        }
    }
}

/// The root of a parsed template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateAst {
    /// The template path, if known.
    pub path: Option<String>,
    /// Top-level nodes in source order.
    pub body: Vec<Node>,
}

impl TemplateAst {
    /// Counts the embedded code blocks in the template, including nested ones.
    pub fn code_block_count(&self) -> usize {
        fn count(nodes: &[Node]) -> usize {
            nodes
                .iter()
                .map(|node| match node {
                    Node::Code { .. } => 1,
                    Node::If { branches, else_branch } => {
                        branches.iter().map(|(_, body)| count(body)).sum::<usize>()
                            + else_branch.as_deref().map(count).unwrap_or(0)
                    }
                    Node::For { body, empty, .. } => {
                        count(body) + empty.as_deref().map(count).unwrap_or(0)
                    }
                    _ => 0,
                })
                .sum()
        }
        count(&self.body)
    }
}
