// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Per-render output capture.
//!
//! Code blocks produce markup by calling `print`, `echo` or `write`. Those
//! primitives never touch the process stdout: every render pass owns an
//! [`OutputSink`], and the primitives installed for that pass write into
//! whichever [`Capture`] is currently open on it.
//!
//! A capture is a scope guard. Opening one pushes a fresh buffer; finishing
//! it (or dropping it on an error path) pops that buffer again, so the
//! previous target is restored on every exit path.

use mlua::{Function, Lua, Table, Value, Variadic};
use std::sync::{Arc, Mutex, MutexGuard};

/// Capture target for the output primitives of one render pass.
///
/// Cloning yields another handle to the same sink.
#[derive(Debug, Clone, Default)]
pub struct OutputSink {
    buffers: Arc<Mutex<Vec<String>>>,
}

impl OutputSink {
    /// Creates a sink with no capture open.
    pub fn new() -> Self {
        Self::default()
    }

    fn buffers(&self) -> MutexGuard<'_, Vec<String>> {
        // A panic while holding the lock leaves plain strings behind, still usable
        self.buffers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Opens a capture. Output written until the capture ends goes into it.
    pub fn capture(&self) -> Capture<'_> {
        let mut buffers = self.buffers();
        buffers.push(String::new());
        Capture {
            sink: self,
            depth: buffers.len(),
            finished: false,
        }
    }

    /// Appends text to the innermost open capture.
    ///
    /// Returns `false` (and drops the text) when no capture is open.
    pub fn write(&self, text: &str) -> bool {
        match self.buffers().last_mut() {
            Some(buffer) => {
                buffer.push_str(text);
                true
            }
            None => false,
        }
    }

    /// Number of open captures.
    pub fn depth(&self) -> usize {
        self.buffers().len()
    }

    fn close(&self, depth: usize) -> String {
        let mut buffers = self.buffers();
        // Inner captures that were leaked are folded away with their owner
        let mut captured = String::new();
        while buffers.len() >= depth {
            match buffers.pop() {
                Some(buffer) => captured = buffer,
                None => break,
            }
        }
        captured
    }

    /// Installs `print`, `echo` and `write` into `target`, bound to this sink.
    ///
    /// - `print(...)`: arguments through `tostring`, tab-separated, newline-terminated
    /// - `echo(...)` / `write(...)`: arguments through `tostring`, concatenated
    pub fn install(&self, lua: &Lua, target: &Table) -> mlua::Result<()> {
        let tostring: Function = lua.globals().get("tostring")?;

        let sink = self.clone();
        let to_str = tostring.clone();
        let print = lua.create_function(move |_, args: Variadic<Value>| {
            let mut line = join_values(&to_str, &args, "\t")?;
            line.push('\n');
            if !sink.write(&line) {
                tracing::debug!("print outside of a code block dropped: {:?}", line);
            }
            Ok(())
        })?;
        target.raw_set("print", print)?;

        let sink = self.clone();
        let echo = lua.create_function(move |_, args: Variadic<Value>| {
            let text = join_values(&tostring, &args, "")?;
            if !sink.write(&text) {
                tracing::debug!("echo outside of a code block dropped: {:?}", text);
            }
            Ok(())
        })?;
        target.raw_set("echo", echo.clone())?;
        target.raw_set("write", echo)?;

        Ok(())
    }
}

fn join_values(tostring: &Function, values: &[Value], separator: &str) -> mlua::Result<String> {
    let mut parts = Vec::with_capacity(values.len());
    for value in values {
        let text = match value {
            Value::String(s) => s.to_string_lossy().to_string(),
            other => tostring.call::<String>(other.clone())?,
        };
        parts.push(text);
    }
    Ok(parts.join(separator))
}

/// An open capture on an [`OutputSink`].
///
/// Call [`finish`](Capture::finish) to take the captured text. Dropping an
/// unfinished capture discards its text and restores the previous target.
#[must_use = "dropping a capture discards its output"]
pub struct Capture<'a> {
    sink: &'a OutputSink,
    depth: usize,
    finished: bool,
}

impl Capture<'_> {
    /// Closes the capture and returns everything written into it.
    pub fn finish(mut self) -> String {
        self.finished = true;
        self.sink.close(self.depth)
    }
}

impl Drop for Capture<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let discarded = self.sink.close(self.depth);
            if !discarded.is_empty() {
                tracing::debug!("discarded {} bytes of captured output", discarded.len());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_without_capture_is_dropped() {
        let sink = OutputSink::new();
        assert!(!sink.write("lost"));
        let capture = sink.capture();
        assert!(sink.write("kept"));
        assert_eq!(capture.finish(), "kept");
        assert_eq!(sink.depth(), 0);
    }

    #[test]
    fn test_nested_captures_restore_outer_target() {
        let sink = OutputSink::new();
        let outer = sink.capture();
        sink.write("a");
        {
            let inner = sink.capture();
            sink.write("b");
            assert_eq!(inner.finish(), "b");
        }
        sink.write("c");
        assert_eq!(outer.finish(), "ac");
    }

    #[test]
    fn test_dropped_capture_restores_target() {
        let sink = OutputSink::new();
        let outer = sink.capture();
        {
            let _inner = sink.capture();
            sink.write("never seen");
        }
        sink.write("x");
        assert_eq!(outer.finish(), "x");
    }

    #[test]
    fn test_print_and_echo_formatting() {
        let lua = Lua::new();
        let env = lua.create_table().unwrap();
        let sink = OutputSink::new();
        sink.install(&lua, &env).unwrap();

        let capture = sink.capture();
        lua.load("print(1 + 1, 'two', nil, true) echo('a', 1.5) write('!')")
            .set_environment(env)
            .exec()
            .unwrap();
        assert_eq!(capture.finish(), "2\ttwo\tnil\ttrue\na1.5!");
    }
}
