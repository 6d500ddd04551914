// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Execution of render plans.
//!
//! A [`Renderer`] walks the steps of a [`RenderPlan`] in order against one
//! [`Scope`], appending literal text, expression values and code block output
//! to the page. Everything a pass needs (its output sink, its `require`, the
//! template currently being rendered) lives on the renderer, so passes running
//! on the same engine share nothing but the engine's immutable state.

use mlua::{MultiValue, Table, Value};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use crate::ast::Expression;
use crate::engine::Engine;
use crate::error::{LuhpError, Result};
use crate::executor::{error_message, CodeBlockExecutor};
use crate::extensions::install_require;
use crate::namespace::Scope;
use crate::output::OutputSink;
use crate::plan::{ForLoop, RenderPlan, Step};
use crate::resolver::ResourceResolver;

/// The result of a successful render pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rendered {
    /// The rendered page.
    pub body: String,
    /// Names code blocks propagated into the namespace during the pass.
    pub exported: BTreeSet<String>,
}

/// Renders plans for a single pass.
pub(crate) struct Renderer<'a, R: ResourceResolver> {
    engine: &'a Engine<R>,
    sink: OutputSink,
    current_template: Arc<Mutex<String>>,
    include_depth: usize,
}

impl<'a, R: ResourceResolver> Renderer<'a, R> {
    /// Prepares a pass: installs the output primitives, `require` and `_G`
    /// into the scope's outer view.
    pub(crate) fn new(engine: &'a Engine<R>, scope: &Scope, entry: &str) -> Result<Self> {
        let lua = engine.lua();
        let sink = OutputSink::new();
        sink.install(lua, scope.parent())?;
        scope.bind_globals(engine.view_factory())?;

        let current_template = Arc::new(Mutex::new(entry.to_string()));
        install_require(
            lua,
            engine.require_factory(),
            scope.parent(),
            engine.builtin_modules(),
            engine.resolver().clone_box(),
            current_template.clone(),
        )?;

        Ok(Self {
            engine,
            sink,
            current_template,
            include_depth: 0,
        })
    }

    /// Renders `plan` from start to finish.
    pub(crate) fn render(&mut self, plan: &RenderPlan, scope: &mut Scope) -> Result<String> {
        let mut out = String::with_capacity(plan.source.len());
        self.render_steps(plan, &plan.steps, scope, &mut out)?;
        Ok(out)
    }

    fn render_steps(&mut self, plan: &RenderPlan, steps: &[Step], scope: &mut Scope, out: &mut String) -> Result<()> {
        for step in steps {
            match step {
                Step::Emit(text) => out.push_str(text),
                Step::Output(expression) => self.render_output(plan, expression, scope, out)?,
                Step::Code(block) => {
                    let executor = CodeBlockExecutor::new(self.engine.lua(), self.engine.view_factory(), &self.sink)
                        .trim_block_newline(self.engine.options().trim_block_newline);
                    out.push_str(&executor.execute(block, scope, Some(&plan.source))?);
                }
                Step::Set { name, expression } => {
                    let value = self.evaluate(plan, expression, scope)?;
                    scope.assign(name, value)?;
                }
                Step::If { branches, otherwise } => {
                    let mut chosen = otherwise.as_deref();
                    for (condition, body) in branches {
                        if is_truthy(&self.evaluate(plan, condition, scope)?) {
                            chosen = Some(body.as_slice());
                            break;
                        }
                    }
                    if let Some(body) = chosen {
                        self.render_steps(plan, body, scope, out)?;
                    }
                }
                Step::For(for_loop) => self.render_for(plan, for_loop, scope, out)?,
                Step::Include { path, line } => self.render_include(plan, path, *line, scope, out)?,
            }
        }
        Ok(())
    }

    fn render_output(&mut self, plan: &RenderPlan, expression: &Expression, scope: &mut Scope, out: &mut String) -> Result<()> {
        // Output primitives called from the expression write before its value
        let capture = self.sink.capture();
        let value = self.evaluate(plan, expression, scope);
        out.push_str(&capture.finish());

        let text = self.stringify(plan, expression, value?)?;
        if self.engine.options().autoescape {
            out.push_str(&escape_html(&text));
        } else {
            out.push_str(&text);
        }
        Ok(())
    }

    fn render_for(&mut self, plan: &RenderPlan, for_loop: &ForLoop, scope: &mut Scope, out: &mut String) -> Result<()> {
        let values = self.evaluate_multi(plan, &for_loop.iterable, scope)?;
        let items = collect_items(plan, for_loop, values)?;

        if items.is_empty() {
            if let Some(empty) = &for_loop.empty {
                self.render_steps(plan, empty, scope, out)?;
            }
            return Ok(());
        }

        let length = items.len();
        for (index0, (key, value)) in items.into_iter().enumerate() {
            let frame = scope.push_frame(self.engine.lua())?;
            let result = match self.bind_iteration(&frame, for_loop, key, value, index0, length) {
                Ok(()) => self.render_steps(plan, &for_loop.body, scope, out),
                Err(e) => Err(e),
            };
            let popped = scope.pop_frame();
            result?;
            popped?;
        }
        Ok(())
    }

    fn bind_iteration(
        &self,
        frame: &Table,
        for_loop: &ForLoop,
        key: Value,
        value: Value,
        index0: usize,
        length: usize,
    ) -> Result<()> {
        frame.raw_set(for_loop.value.as_str(), value)?;
        if let Some(key_name) = &for_loop.key {
            frame.raw_set(key_name.as_str(), key)?;
        }

        let info = self.engine.lua().create_table()?;
        info.raw_set("index", index0 + 1)?;
        info.raw_set("index0", index0)?;
        info.raw_set("first", index0 == 0)?;
        info.raw_set("last", index0 + 1 == length)?;
        info.raw_set("length", length)?;
        frame.raw_set("loop", info)?;
        Ok(())
    }

    fn render_include(
        &mut self,
        plan: &RenderPlan,
        target: &str,
        line: usize,
        scope: &mut Scope,
        out: &mut String,
    ) -> Result<()> {
        let max_depth = self.engine.options().max_include_depth;
        if self.include_depth >= max_depth {
            return Err(LuhpError::IncludeDepthExceeded {
                path: target.to_string(),
                depth: max_depth,
            });
        }

        tracing::debug!("including '{}' from {}:{}", target, plan.path, line);
        let included = self.engine.compile_from(&plan.path, target)?;

        let previous = self.set_current_template(&included.path);
        self.include_depth += 1;
        let result = self.render_steps(&included, &included.steps, scope, out);
        self.include_depth -= 1;
        self.set_current_template(&previous);
        result
    }

    fn set_current_template(&self, path: &str) -> String {
        let mut current = self
            .current_template
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *current, path.to_string())
    }

    /// Evaluates `expression` in the innermost table of `scope`.
    ///
    /// Functions defined by code blocks may assign while the expression runs,
    /// so the scope is reconciled afterwards.
    fn evaluate_multi(&self, plan: &RenderPlan, expression: &Expression, scope: &mut Scope) -> Result<MultiValue> {
        let code = format!("{}return {}", "\n".repeat(expression.line.saturating_sub(1)), expression.source);
        let result = self
            .engine
            .lua()
            .load(&code)
            .set_name(format!("@{}", plan.path))
            .set_environment(scope.current().clone())
            .eval::<MultiValue>();
        scope.reconcile();
        result.map_err(|e| expression_error(plan, expression, &e))
    }

    fn evaluate(&self, plan: &RenderPlan, expression: &Expression, scope: &mut Scope) -> Result<Value> {
        Ok(self
            .evaluate_multi(plan, expression, scope)?
            .into_iter()
            .next()
            .unwrap_or(Value::Nil))
    }

    fn stringify(&self, plan: &RenderPlan, expression: &Expression, value: Value) -> Result<String> {
        match value {
            Value::Nil => Ok(String::new()),
            Value::String(s) => Ok(s.to_string_lossy().to_string()),
            other => self
                .engine
                .tostring()
                .call::<String>(other)
                .map_err(|e| expression_error(plan, expression, &e)),
        }
    }
}

fn expression_error(plan: &RenderPlan, expression: &Expression, err: &mlua::Error) -> LuhpError {
    LuhpError::ExpressionError {
        file: plan.path.clone(),
        line: expression.line,
        message: format!("`{}`: {}", expression.source, error_message(err)),
    }
}

fn is_truthy(value: &Value) -> bool {
    !matches!(value, Value::Nil | Value::Boolean(false))
}

/// Lists `(key, value)` bindings for each iteration of `for_loop`.
///
/// Sequences yield `(index, element)`. Other tables yield their entries in
/// key order; with a single loop variable it is bound to the key. Iterator
/// functions (`pairs(t)`, custom closures) are driven like a Lua generic
/// `for`.
fn collect_items(plan: &RenderPlan, for_loop: &ForLoop, values: MultiValue) -> Result<Vec<(Value, Value)>> {
    let fail = |message: String| LuhpError::ExpressionError {
        file: plan.path.clone(),
        line: for_loop.iterable.line,
        message: format!("`{}`: {}", for_loop.iterable.source, message),
    };
    let two_targets = for_loop.key.is_some();
    let mut values = values.into_iter();

    match values.next().unwrap_or(Value::Nil) {
        Value::Nil => Ok(Vec::new()),
        Value::Table(table) => table_items(&table, two_targets).map_err(|e| fail(error_message(&e))),
        Value::Function(next) => {
            let state = values.next().unwrap_or(Value::Nil);
            let mut control = values.next().unwrap_or(Value::Nil);
            let mut items = Vec::new();
            loop {
                let (key, value): (Value, Value) = next
                    .call((state.clone(), control.clone()))
                    .map_err(|e| fail(error_message(&e)))?;
                if key.is_nil() {
                    break;
                }
                control = key.clone();
                items.push(if two_targets { (key, value) } else { (Value::Nil, key) });
            }
            Ok(items)
        }
        other => Err(fail(format!("cannot iterate over a {} value", other.type_name()))),
    }
}

fn table_items(table: &Table, two_targets: bool) -> mlua::Result<Vec<(Value, Value)>> {
    let length = table.raw_len();
    let mut entries = Vec::new();
    for pair in table.clone().pairs::<Value, Value>() {
        entries.push(pair?);
    }

    if entries.len() == length {
        let mut items = Vec::with_capacity(length);
        for index in 1..=length {
            items.push((Value::Integer(index as i64), table.raw_get::<Value>(index)?));
        }
        return Ok(items);
    }

    entries.sort_by(|(a, _), (b, _)| compare_keys(a, b));
    Ok(entries
        .into_iter()
        .map(|(key, value)| if two_targets { (key, value) } else { (Value::Nil, key) })
        .collect())
}

fn compare_keys(a: &Value, b: &Value) -> Ordering {
    fn number(value: &Value) -> Option<f64> {
        match value {
            Value::Integer(i) => Some(*i as f64),
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Integer(_) | Value::Number(_) => 0,
            Value::String(_) => 1,
            _ => 2,
        }
    }

    match (a, b) {
        (Value::String(x), Value::String(y)) => x.to_string_lossy().cmp(&y.to_string_lossy()),
        _ => match (number(a), number(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => rank(a).cmp(&rank(b)),
        },
    }
}

/// Escapes text for inclusion in HTML.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<a href=\"x\">Tom & 'Jerry'</a>"), "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#x27;Jerry&#x27;&lt;/a&gt;");
    }

    #[test]
    fn test_truthiness_follows_lua() {
        assert!(!is_truthy(&Value::Nil));
        assert!(!is_truthy(&Value::Boolean(false)));
        assert!(is_truthy(&Value::Integer(0)));
    }

    #[test]
    fn test_table_items_sorts_map_keys() {
        let lua = mlua::Lua::new();
        let table: Table = lua.load("return { b = 2, a = 1, [3] = 'x' }").eval().unwrap();
        let keys: Vec<String> = table_items(&table, false)
            .unwrap()
            .into_iter()
            .map(|(_, key)| lua.globals().get::<mlua::Function>("tostring").unwrap().call::<String>(key).unwrap())
            .collect();
        assert_eq!(keys, vec!["3", "a", "b"]);

        let sequence: Table = lua.load("return { 'x', 'y' }").eval().unwrap();
        let items = table_items(&sequence, true).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].0, Value::Integer(2));
    }
}
