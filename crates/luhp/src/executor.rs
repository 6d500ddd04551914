// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Execution of embedded `{% lua %}` code blocks.
//!
//! For each block the executor:
//!
//! 1. removes the indentation common to all of its lines, so a block indented
//!    to follow the surrounding markup is still plain top-level code;
//! 2. prepends blank lines so Lua line numbers equal template line numbers,
//!    and names the chunk after the template file;
//! 3. opens a capture on the render pass's [`OutputSink`];
//! 4. runs the chunk against a [`BlockView`](crate::namespace::BlockView) of
//!    the render's [`Scope`];
//! 5. reconciles the assigned names back into the scope, on success and on
//!    failure alike, then returns the captured text or the error.

use lazy_static::lazy_static;
use mlua::{Function, Lua, Table};
use regex::Regex;

use crate::error::{LuhpError, Result, SourceContext};
use crate::namespace::Scope;
use crate::output::OutputSink;
use crate::plan::CodeBlock;

lazy_static! {
    /// `<chunk>:<line>: <message>` as produced by the Lua compiler and `error()`.
    static ref LUA_LOCATION: Regex =
        Regex::new(r"^(?P<file>[^\n]*?):(?P<line>\d+): (?P<message>(?s:.*))$").unwrap();

    /// One `\t<chunk>:<line>: in ...` frame of a Lua traceback.
    static ref TRACEBACK_FRAME: Regex =
        Regex::new(r"^\s+(?P<file>[^\s\[][^\n]*?):(?P<line>\d+):").unwrap();
}

const TRACEBACK_MARKER: &str = "\nstack traceback:";

/// Removes the leading whitespace common to every non-blank line.
///
/// Whitespace-only lines do not take part in the computation and come out
/// empty. The number of lines never changes.
pub fn dedent(text: &str) -> String {
    let mut margin: Option<&str> = None;

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let indent = &line[..line.len() - line.trim_start().len()];
        margin = Some(match margin {
            None => indent,
            Some(current) => common_prefix(current, indent),
        });
    }

    let margin = margin.unwrap_or("");
    let mut result = String::with_capacity(text.len());
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            result.push('\n');
        }
        if line.trim().is_empty() {
            if line.ends_with('\r') {
                result.push('\r');
            }
            continue;
        }
        result.push_str(line.strip_prefix(margin).unwrap_or(line));
    }
    result
}

fn common_prefix<'a>(a: &'a str, b: &str) -> &'a str {
    let len = a
        .char_indices()
        .zip(b.chars())
        .find(|((_, x), y)| x != y)
        .map(|((i, _), _)| i)
        .unwrap_or_else(|| a.len().min(b.len()));
    &a[..len]
}

/// Prefixes `code` with `line - 1` newlines so its first line is reported as
/// template line `line`.
pub fn pad_to_line(code: &str, line: usize) -> String {
    let padding = line.saturating_sub(1);
    let mut padded = String::with_capacity(padding + code.len());
    padded.extend(std::iter::repeat('\n').take(padding));
    padded.push_str(code);
    padded
}

/// Runs code blocks for one render pass.
pub struct CodeBlockExecutor<'a> {
    lua: &'a Lua,
    view_factory: &'a Function,
    sink: &'a OutputSink,
    trim_block_newline: bool,
}

impl<'a> CodeBlockExecutor<'a> {
    /// Creates an executor writing through `sink`.
    ///
    /// `view_factory` is the engine's compiled block view factory.
    pub fn new(lua: &'a Lua, view_factory: &'a Function, sink: &'a OutputSink) -> Self {
        Self {
            lua,
            view_factory,
            sink,
            trim_block_newline: true,
        }
    }

    /// Controls whether one trailing newline is removed from block output.
    pub fn trim_block_newline(mut self, enabled: bool) -> Self {
        self.trim_block_newline = enabled;
        self
    }

    /// Executes `block` against `scope` and returns its captured output.
    ///
    /// `source` is the owning template's text, used for error snippets.
    ///
    /// # Errors
    ///
    /// - [`LuhpError::CodeCompileError`] if the block is not valid Lua
    /// - [`LuhpError::CodeRuntimeError`] if the block raises
    ///
    /// Both carry the template file and the template line of the fault.
    pub fn execute(&self, block: &CodeBlock, scope: &mut Scope, source: Option<&str>) -> Result<String> {
        tracing::debug!("executing code block {}:{}", block.file, block.line);

        let view = scope.block_view(self.view_factory)?;
        let function = load_block(self.lua, block, source, Some(view.env()))?;

        let capture = self.sink.capture();
        let outcome = function.call::<()>(());
        let mut captured = capture.finish();

        scope.reconcile();

        match outcome {
            Ok(()) => {
                if self.trim_block_newline && captured.ends_with('\n') {
                    captured.pop();
                    if captured.ends_with('\r') {
                        captured.pop();
                    }
                }
                Ok(captured)
            }
            Err(e) => {
                let fault = LuaFault::from_error(&e, block);
                tracing::debug!(
                    "code block {}:{} failed, discarding {} bytes of output",
                    block.file,
                    block.line,
                    captured.len()
                );
                Err(LuhpError::CodeRuntimeError {
                    source_context: fault.source_context(block, source),
                    file: fault.file,
                    line: fault.line,
                    message: fault.message,
                    lua_traceback: fault.traceback,
                })
            }
        }
    }
}

/// Compiles `block` without running it.
///
/// # Errors
///
/// [`LuhpError::CodeCompileError`] at the template line of the syntax error.
pub fn check_block(lua: &Lua, block: &CodeBlock, source: Option<&str>) -> Result<()> {
    load_block(lua, block, source, None).map(|_| ())
}

fn load_block(lua: &Lua, block: &CodeBlock, source: Option<&str>, env: Option<&Table>) -> Result<Function> {
    let code = pad_to_line(&dedent(&block.code), block.line);
    let mut chunk = lua.load(&code).set_name(format!("@{}", block.file));
    if let Some(env) = env {
        chunk = chunk.set_environment(env.clone());
    }
    chunk.into_function().map_err(|e| {
        let fault = LuaFault::from_error(&e, block);
        LuhpError::CodeCompileError {
            source_context: fault.source_context(block, source),
            file: fault.file,
            line: fault.line,
            message: fault.message,
        }
    })
}

/// A Lua error broken down into template coordinates.
#[derive(Debug)]
struct LuaFault {
    file: String,
    line: usize,
    message: String,
    traceback: Option<String>,
}

impl LuaFault {
    fn from_error(err: &mlua::Error, block: &CodeBlock) -> Self {
        let (raw, traceback) = describe(err);
        let (message, mut traceback) = match raw.split_once(TRACEBACK_MARKER) {
            Some((message, rest)) => (message.to_string(), Some(format!("stack traceback:{}", rest))),
            None => (raw, traceback),
        };
        if traceback.as_deref().is_some_and(|t| t.trim().is_empty()) {
            traceback = None;
        }

        match LUA_LOCATION.captures(&message) {
            Some(caps) => {
                let chunk = &caps["file"];
                let line = caps["line"].parse().unwrap_or(block.line);
                // Lua shortens long chunk names to "...<tail>"
                let file = if chunk == block.file || chunk.starts_with("...") {
                    block.file.clone()
                } else {
                    chunk.to_string()
                };
                Self {
                    file,
                    line,
                    message: caps["message"].to_string(),
                    traceback,
                }
            }
            // Raised from a Rust callback or with a non-string value
            None => Self {
                file: block.file.clone(),
                line: traceback
                    .as_deref()
                    .and_then(|t| frame_line(t, &block.file))
                    .unwrap_or(block.line),
                message,
                traceback,
            },
        }
    }

    fn source_context(&self, block: &CodeBlock, source: Option<&str>) -> Option<SourceContext> {
        if self.file != block.file {
            return None;
        }
        source.map(|s| SourceContext::from_source(s, self.line, 1))
    }
}

/// Line of the innermost traceback frame that runs in `file`.
fn frame_line(traceback: &str, file: &str) -> Option<usize> {
    traceback.lines().find_map(|frame| {
        let caps = TRACEBACK_FRAME.captures(frame)?;
        let chunk = &caps["file"];
        let same_file = chunk == file || chunk.strip_prefix("...").is_some_and(|tail| file.ends_with(tail));
        if same_file {
            caps["line"].parse().ok()
        } else {
            None
        }
    })
}

/// The message of a Lua error without its location prefix and traceback.
pub(crate) fn error_message(err: &mlua::Error) -> String {
    let (raw, _) = describe(err);
    let message = raw.split(TRACEBACK_MARKER).next().unwrap_or_default();
    match LUA_LOCATION.captures(message) {
        Some(caps) => caps["message"].to_string(),
        None => message.to_string(),
    }
}

/// Extracts the message and traceback from an mlua error, unwrapping
/// callback layers.
fn describe(err: &mlua::Error) -> (String, Option<String>) {
    match err {
        mlua::Error::RuntimeError(message) => (message.clone(), None),
        mlua::Error::SyntaxError { message, .. } => (message.clone(), None),
        mlua::Error::CallbackError { traceback, cause } => {
            let (message, inner) = describe(cause);
            (message, inner.or_else(|| Some(traceback.clone())))
        }
        other => (other.to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::{Bindings, BLOCK_VIEW_FACTORY};

    struct Fixture {
        lua: Lua,
        factory: Function,
        sink: OutputSink,
        scope: Scope,
    }

    fn fixture() -> Fixture {
        let lua = Lua::new();
        let factory = lua.load(BLOCK_VIEW_FACTORY).into_function().unwrap();
        let sink = OutputSink::new();
        let scope = Scope::new(&lua, &lua.globals(), &Bindings::new()).unwrap();
        sink.install(&lua, scope.parent()).unwrap();
        Fixture { lua, factory, sink, scope }
    }

    fn block(code: &str, line: usize) -> CodeBlock {
        CodeBlock {
            code: code.to_string(),
            line,
            file: "pages/index.luhp".to_string(),
        }
    }

    #[test]
    fn test_dedent_strips_common_margin() {
        let text = "\n    if x then\n      print(x)\n    end\n  ";
        assert_eq!(dedent(text), "\nif x then\n  print(x)\nend\n");
    }

    #[test]
    fn test_dedent_keeps_unindented_first_line() {
        assert_eq!(dedent("x = 1\n    y = 2"), "x = 1\n    y = 2");
        assert_eq!(dedent("\tx = 1\n\t\ty = 2"), "x = 1\n\ty = 2");
        assert_eq!(dedent(""), "");
    }

    #[test]
    fn test_pad_to_line() {
        assert_eq!(pad_to_line("x", 1), "x");
        assert_eq!(pad_to_line("x", 3), "\n\nx");
    }

    #[test]
    fn test_execute_captures_print() {
        let mut f = fixture();
        let executor = CodeBlockExecutor::new(&f.lua, &f.factory, &f.sink);
        let out = executor.execute(&block("print(1+1)", 1), &mut f.scope, None).unwrap();
        assert_eq!(out, "2");
        assert_eq!(f.sink.depth(), 0);
    }

    #[test]
    fn test_trailing_newline_kept_when_disabled() {
        let mut f = fixture();
        let executor = CodeBlockExecutor::new(&f.lua, &f.factory, &f.sink).trim_block_newline(false);
        let out = executor.execute(&block("print('a') print('b')", 1), &mut f.scope, None).unwrap();
        assert_eq!(out, "a\nb\n");
    }

    #[test]
    fn test_indented_block_runs() {
        let mut f = fixture();
        let executor = CodeBlockExecutor::new(&f.lua, &f.factory, &f.sink);
        let code = "\n        local s = [[\n        kept]]\n        echo(s)\n    ";
        let out = executor.execute(&block(code, 4), &mut f.scope, None).unwrap();
        assert_eq!(out, "kept");
    }

    #[test]
    fn test_runtime_error_reports_template_line() {
        let mut f = fixture();
        let executor = CodeBlockExecutor::new(&f.lua, &f.factory, &f.sink);
        let source = "<h1>x</h1>\n<p>\n{% lua %}\nprint('partial')\nerror('boom')\n{% endlua %}\n</p>";
        let err = executor
            .execute(&block("\nprint('partial')\nerror('boom')\n", 3), &mut f.scope, Some(source))
            .unwrap_err();
        match err {
            LuhpError::CodeRuntimeError { file, line, message, source_context, .. } => {
                assert_eq!(file, "pages/index.luhp");
                assert_eq!(line, 5);
                assert_eq!(message, "boom");
                assert_eq!(source_context.unwrap().error_line, 5);
            }
            other => panic!("expected runtime error, got {:?}", other),
        }
        assert_eq!(f.sink.depth(), 0);
    }

    #[test]
    fn test_syntax_error_reports_template_line() {
        let mut f = fixture();
        let executor = CodeBlockExecutor::new(&f.lua, &f.factory, &f.sink);
        let err = executor
            .execute(&block("\nx = = 1\n", 7), &mut f.scope, None)
            .unwrap_err();
        match err {
            LuhpError::CodeCompileError { file, line, .. } => {
                assert_eq!(file, "pages/index.luhp");
                assert_eq!(line, 8);
            }
            other => panic!("expected compile error, got {:?}", other),
        }
    }

    #[test]
    fn test_assignments_before_fault_are_reconciled() {
        let mut f = fixture();
        let executor = CodeBlockExecutor::new(&f.lua, &f.factory, &f.sink);
        let result = executor.execute(&block("done = 1\nerror('late')", 1), &mut f.scope, None);
        assert!(result.is_err());
        assert!(f.scope.exported().contains("done"));
    }

    #[test]
    fn test_check_block_compiles_without_running() {
        let f = fixture();
        assert!(check_block(&f.lua, &block("error('never runs')", 1), None).is_ok());

        let err = check_block(&f.lua, &block("if x then", 3), None).unwrap_err();
        assert!(matches!(err, LuhpError::CodeCompileError { line: 3, .. }), "got {:?}", err);
    }

    #[test]
    fn test_callback_fault_reports_calling_line() {
        let mut f = fixture();
        let fail = f
            .lua
            .create_function(|_, ()| Err::<(), _>(mlua::Error::RuntimeError("decode failed".to_string())))
            .unwrap();
        f.scope.parent().raw_set("fail", fail).unwrap();

        let executor = CodeBlockExecutor::new(&f.lua, &f.factory, &f.sink);
        let err = executor
            .execute(&block("\nx = 1\ny = 2\nfail()\n", 2), &mut f.scope, None)
            .unwrap_err();
        match err {
            LuhpError::CodeRuntimeError { file, line, message, .. } => {
                assert_eq!(file, "pages/index.luhp");
                assert_eq!(line, 5);
                assert!(message.contains("decode failed"), "message: {}", message);
            }
            other => panic!("expected runtime error, got {:?}", other),
        }
    }

    #[test]
    fn test_non_string_error_value_reports_raising_line() {
        let mut f = fixture();
        let executor = CodeBlockExecutor::new(&f.lua, &f.factory, &f.sink);
        let err = executor
            .execute(&block("\nlocal ok = 1\nerror({ code = 1 })\n", 2), &mut f.scope, None)
            .unwrap_err();
        assert_eq!(err.location(), Some(("pages/index.luhp", 4)));
    }

    #[test]
    fn test_frame_line_matches_block_file_only() {
        let traceback = "stack traceback:\n\t[C]: in function 'error'\n\tlib/util.lua:3: in function 'util.fail'\n\tpages/index.luhp:7: in main chunk\n\t[C]: in ?";
        assert_eq!(frame_line(traceback, "pages/index.luhp"), Some(7));
        assert_eq!(frame_line(traceback, "lib/util.lua"), Some(3));
        assert_eq!(frame_line("\t...s/long/path/index.luhp:9: in main chunk", "deep/pages/long/path/index.luhp"), Some(9));
        assert_eq!(frame_line(traceback, "other.luhp"), None);
    }
}
