// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Template parser.
//!
//! Parses template source with the pest grammar in `luhp.pest` and builds the
//! [`TemplateAst`]. Embedded `{% lua %}` bodies are kept verbatim together with
//! the line of their opening tag, which later drives error line attribution.

use pest::error::LineColLocation;
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;

use crate::ast::{Expression, Node, TemplateAst};
use crate::error::{LuhpError, Result, SourceContext};

/// The pest parser generated from `luhp.pest`.
#[derive(Parser)]
#[grammar = "luhp.pest"]
pub struct LuhpParser;

/// Parses template source into an AST.
pub fn parse_template(source: &str) -> Result<TemplateAst> {
    let mut pairs = LuhpParser::parse(Rule::template, source).map_err(|e| {
        let (line, column) = match e.line_col {
            LineColLocation::Pos(pos) => pos,
            LineColLocation::Span(start, _) => start,
        };
        LuhpError::ParseError {
            message: e.variant.message().to_string(),
            line,
            column,
            file: None,
            source_context: None,
        }
    })?;

    let mut body = Vec::new();
    if let Some(template) = pairs.next() {
        for pair in template.into_inner() {
            if pair.as_rule() == Rule::nodes {
                body = build_nodes(pair)?;
            }
        }
    }

    Ok(TemplateAst { path: None, body })
}

/// Parses template source, attaching the template name and a source snippet
/// to any parse error.
pub fn parse_template_with_context(source: &str, template_name: Option<&str>) -> Result<TemplateAst> {
    match parse_template(source) {
        Ok(mut ast) => {
            if let Some(name) = template_name {
                ast.path = Some(name.to_string());
            }
            Ok(ast)
        }
        Err(LuhpError::ParseError { message, line, column, .. }) => Err(LuhpError::ParseError {
            message,
            line,
            column,
            file: template_name.map(String::from),
            source_context: Some(SourceContext::from_source(source, line, column)),
        }),
        Err(e) => Err(e),
    }
}

fn line_of(pair: &Pair<Rule>) -> usize {
    pair.as_span().start_pos().line_col().0
}

fn build_nodes(pair: Pair<Rule>) -> Result<Vec<Node>> {
    let mut nodes = Vec::new();
    for inner in pair.into_inner() {
        let node = build_node(inner)?;
        // Adjacent text is merged so the plan emits one literal per run
        if let (Node::Text { content }, Some(Node::Text { content: previous })) = (&node, nodes.last_mut()) {
            previous.push_str(content);
            continue;
        }
        nodes.push(node);
    }
    Ok(nodes)
}

fn build_node(pair: Pair<Rule>) -> Result<Node> {
    let line = line_of(&pair);
    match pair.as_rule() {
        Rule::text => Ok(Node::Text {
            content: pair.as_str().to_string(),
        }),
        Rule::comment => Ok(Node::Comment),
        Rule::output => {
            let expr = expect_inner(pair, Rule::out_expr)?;
            Ok(Node::Output {
                expression: build_expression(&expr, line)?,
            })
        }
        Rule::code_block => {
            let code = pair
                .into_inner()
                .find(|p| p.as_rule() == Rule::code_body)
                .map(|p| p.as_str().to_string())
                .unwrap_or_default();
            Ok(Node::Code { code, line })
        }
        Rule::set_tag => {
            let mut inner = pair.into_inner();
            let name = next_of(&mut inner, Rule::ident, line)?.as_str().to_string();
            let expr = next_of(&mut inner, Rule::expr, line)?;
            Ok(Node::Set {
                name,
                expression: build_expression(&expr, line)?,
            })
        }
        Rule::if_block => build_if(pair),
        Rule::for_block => build_for(pair),
        Rule::include_tag => {
            let string = expect_inner(pair, Rule::string)?;
            let path = string
                .into_inner()
                .next()
                .map(|p| p.as_str().to_string())
                .unwrap_or_default();
            if path.is_empty() {
                return Err(syntax_error("include path must not be empty", line));
            }
            Ok(Node::Include { path, line })
        }
        other => Err(syntax_error(format!("unexpected {:?}", other), line)),
    }
}

fn build_if(pair: Pair<Rule>) -> Result<Node> {
    let line = line_of(&pair);
    let mut branches = Vec::new();
    let mut else_branch = None;
    let mut pending: Option<Expression> = None;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::if_tag => {
                let tag_line = line_of(&inner);
                let expr = expect_inner(inner, Rule::expr)?;
                pending = Some(build_expression(&expr, tag_line)?);
            }
            Rule::nodes => {
                let condition = pending
                    .take()
                    .ok_or_else(|| syntax_error("if body without condition", line))?;
                branches.push((condition, build_nodes(inner)?));
            }
            Rule::elif_clause => {
                let mut parts = inner.into_inner();
                let tag = next_of(&mut parts, Rule::elif_tag, line)?;
                let tag_line = line_of(&tag);
                let expr = expect_inner(tag, Rule::expr)?;
                let condition = build_expression(&expr, tag_line)?;
                let body = next_of(&mut parts, Rule::nodes, line)?;
                branches.push((condition, build_nodes(body)?));
            }
            Rule::else_clause => {
                let body = expect_inner(inner, Rule::nodes)?;
                else_branch = Some(build_nodes(body)?);
            }
            _ => {}
        }
    }

    Ok(Node::If { branches, else_branch })
}

fn build_for(pair: Pair<Rule>) -> Result<Node> {
    let line = line_of(&pair);
    let mut inner = pair.into_inner();

    let tag = next_of(&mut inner, Rule::for_tag, line)?;
    let mut tag_parts = tag.into_inner();
    let targets: Vec<String> = next_of(&mut tag_parts, Rule::for_targets, line)?
        .into_inner()
        .map(|p| p.as_str().to_string())
        .collect();
    let expr = next_of(&mut tag_parts, Rule::expr, line)?;
    let iterable = build_expression(&expr, line)?;

    let (key, value) = match targets.as_slice() {
        [value] => (None, value.clone()),
        [key, value] => (Some(key.clone()), value.clone()),
        _ => return Err(syntax_error("for loop needs one or two targets", line)),
    };

    let body = build_nodes(next_of(&mut inner, Rule::nodes, line)?)?;
    let empty = match inner.next() {
        Some(clause) if clause.as_rule() == Rule::else_clause => {
            Some(build_nodes(expect_inner(clause, Rule::nodes)?)?)
        }
        _ => None,
    };

    Ok(Node::For {
        key,
        value,
        iterable,
        body,
        empty,
    })
}

fn build_expression(pair: &Pair<Rule>, line: usize) -> Result<Expression> {
    let source = pair.as_str().trim();
    if source.is_empty() {
        return Err(syntax_error("expected an expression", line));
    }
    Ok(Expression::new(source, line))
}

fn expect_inner(pair: Pair<Rule>, rule: Rule) -> Result<Pair<Rule>> {
    let line = line_of(&pair);
    pair.into_inner()
        .find(|p| p.as_rule() == rule)
        .ok_or_else(|| syntax_error(format!("expected {:?}", rule), line))
}

fn next_of<'a>(
    pairs: &mut pest::iterators::Pairs<'a, Rule>,
    rule: Rule,
    line: usize,
) -> Result<Pair<'a, Rule>> {
    match pairs.next() {
        Some(pair) if pair.as_rule() == rule => Ok(pair),
        _ => Err(syntax_error(format!("expected {:?}", rule), line)),
    }
}

fn syntax_error(message: impl Into<String>, line: usize) -> LuhpError {
    LuhpError::ParseError {
        message: message.into(),
        line,
        column: 1,
        file: None,
        source_context: None,
    }
}
