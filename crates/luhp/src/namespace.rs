// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! The shared variable namespace of a render pass.
//!
//! Every render pass owns one [`Scope`]. Markup expressions, `{% set %}` and
//! embedded code blocks all read and write through it, so a value assigned
//! in a code block is seen by everything rendered after the block.
//!
//! # Layout
//!
//! Lookups walk a chain of Lua tables, innermost first:
//!
//! ```text
//! loop frames  ->  vars  ->  parent  ->  engine base environment
//! ```
//!
//! - `vars` is the namespace proper: top-level assignments of code blocks and
//!   top-level `{% set %}` land here.
//! - `parent` is the outer view: the caller's initial [`Bindings`], the output
//!   primitives and `require`.
//! - loop frames hold `{% for %}` bindings and `{% set %}` made inside a loop.
//!
//! # Reconciliation
//!
//! A code block runs against a [`BlockView`]: reads go through the chain,
//! assignments go to `vars` and are recorded in one table per scope. Views
//! always resolve through the chain active at the time of the read, so a
//! function defined in one block and called from a later one sees the loop
//! frames of the caller. [`Scope::reconcile`] drains the recorded names,
//! copies each value over any loop-frame binding of the same name, so the
//! frame does not keep serving a stale value, and adds the name to the
//! exported set.
//!
//! `_G` of a pass is a view as well (see [`Scope::bind_globals`]), and the
//! metatables of the chain are hidden from Lua, so nothing a pass does can
//! reach the engine's base environment.

use mlua::{Function, Lua, LuaSerdeExt, SerializeOptions, Table, Value};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{LuhpError, Result};

/// Lua source of the block view factory.
///
/// Called with `(vars, state, written)`, returns the view table. `state.chain`
/// is the innermost table of the scope; `written` collects assigned names
/// until the next reconciliation. Kept in Lua so closures defined by a block
/// and stored in the namespace stay collectable.
pub(crate) const BLOCK_VIEW_FACTORY: &str = r#"
local vars, state, written = ...
return setmetatable({}, {
  __index = function(_, name)
    if written[name] then
      return rawget(vars, name)
    end
    return state.chain[name]
  end,
  __newindex = function(_, name, value)
    rawset(vars, name, value)
    written[name] = true
  end,
  __metatable = false,
})
"#;

/// Initial variable bindings supplied by the caller of a render.
///
/// Values are JSON so request shells can pass request metadata, session data
/// or configuration without knowing about Lua.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bindings(BTreeMap<String, JsonValue>);

impl Bindings {
    /// Creates an empty set of bindings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Inserts a binding, returning the previous value for the name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<JsonValue>) -> Option<JsonValue> {
        self.0.insert(name.into(), value.into())
    }

    /// Builds bindings from a JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`LuhpError::ConfigError`] if the value is not an object.
    pub fn from_json(value: JsonValue) -> Result<Self> {
        match value {
            JsonValue::Object(map) => Ok(map.into_iter().collect()),
            JsonValue::Null => Ok(Self::new()),
            other => Err(LuhpError::ConfigError(format!(
                "bindings must be a JSON object, got {}",
                other
            ))),
        }
    }

    /// Returns the value bound to `name`.
    pub fn get(&self, name: &str) -> Option<&JsonValue> {
        self.0.get(name)
    }

    /// Iterates over the bindings in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.0.iter()
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no bindings.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, JsonValue)> for Bindings {
    fn from_iter<I: IntoIterator<Item = (String, JsonValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Converts JSON into a Lua value, mapping `null` to `nil`.
pub fn json_to_lua(lua: &Lua, value: &JsonValue) -> mlua::Result<Value> {
    let options = SerializeOptions::new()
        .serialize_none_to_null(false)
        .serialize_unit_to_null(false);
    lua.to_value_with(value, options)
}

/// Creates a metatable whose `__index` falls back to `parent`.
///
/// The metatable is hidden from `getmetatable` and locked against
/// `setmetatable`.
pub(crate) fn chained_to(lua: &Lua, parent: &Table) -> mlua::Result<Table> {
    let meta = lua.create_table()?;
    meta.raw_set("__index", parent.clone())?;
    meta.raw_set("__metatable", false)?;
    Ok(meta)
}

/// The variable scope of one render pass.
#[derive(Debug)]
pub struct Scope {
    vars: Table,
    parent: Table,
    frames: Vec<Table>,
    // `chain`: innermost table, shared with every block view
    state: Table,
    written: Table,
    exported: BTreeSet<String>,
}

impl Scope {
    /// Creates a fresh scope whose outer view holds `bindings` and falls back
    /// to `base`.
    pub fn new(lua: &Lua, base: &Table, bindings: &Bindings) -> Result<Self> {
        let parent = lua.create_table()?;
        parent.set_metatable(Some(chained_to(lua, base)?));
        for (name, value) in bindings.iter() {
            parent.raw_set(name.as_str(), json_to_lua(lua, value)?)?;
        }

        let vars = lua.create_table()?;
        vars.set_metatable(Some(chained_to(lua, &parent)?));

        let state = lua.create_table()?;
        state.raw_set("chain", vars.clone())?;

        Ok(Self {
            vars,
            parent,
            frames: Vec::new(),
            state,
            written: lua.create_table()?,
            exported: BTreeSet::new(),
        })
    }

    /// The shared namespace table.
    pub fn vars(&self) -> &Table {
        &self.vars
    }

    /// The outer view: initial bindings and per-pass helpers.
    pub fn parent(&self) -> &Table {
        &self.parent
    }

    /// Names propagated back from code blocks so far.
    pub fn exported(&self) -> &BTreeSet<String> {
        &self.exported
    }

    /// Consumes the scope, returning the exported names.
    pub fn into_exported(self) -> BTreeSet<String> {
        self.exported
    }

    /// Number of active loop frames.
    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    /// The innermost table of the chain: the environment markup evaluates in.
    pub fn current(&self) -> &Table {
        self.frames.last().unwrap_or(&self.vars)
    }

    /// Pushes a loop frame chained to the current innermost table.
    pub fn push_frame(&mut self, lua: &Lua) -> Result<Table> {
        let frame = lua.create_table()?;
        frame.set_metatable(Some(chained_to(lua, self.current())?));
        self.state.raw_set("chain", frame.clone())?;
        self.frames.push(frame.clone());
        Ok(frame)
    }

    /// Pops the innermost loop frame.
    pub fn pop_frame(&mut self) -> Result<Option<Table>> {
        let frame = self.frames.pop();
        self.state.raw_set("chain", self.current().clone())?;
        Ok(frame)
    }

    /// Binds `name` in the innermost table (the `{% set %}` semantics).
    pub fn assign(&self, name: &str, value: Value) -> Result<()> {
        self.current().raw_set(name, value)?;
        Ok(())
    }

    /// Resolves `name` through the whole chain.
    pub fn lookup(&self, name: &str) -> Result<Value> {
        Ok(self.current().get(name)?)
    }

    /// Creates the environment a code block executes against.
    ///
    /// `factory` is the compiled [`BLOCK_VIEW_FACTORY`].
    pub fn block_view(&self, factory: &Function) -> Result<BlockView> {
        let env: Table = factory.call((self.vars.clone(), self.state.clone(), self.written.clone()))?;
        Ok(BlockView { env })
    }

    /// Points `_G` of the pass at a view of this scope.
    ///
    /// `_G.name = value` then assigns into the namespace like `name = value`
    /// does, instead of into the engine's base environment.
    pub fn bind_globals(&self, factory: &Function) -> Result<()> {
        let view = self.block_view(factory)?;
        self.parent.raw_set("_G", view.env)?;
        Ok(())
    }

    /// Propagates the values assigned through any view since the last call
    /// into the loop frames that shadow them, and records the names as
    /// exported. Returns the names, sorted.
    ///
    /// Best effort: a Lua error while touching one name is logged and the
    /// remaining names are still processed.
    pub fn reconcile(&mut self) -> Vec<String> {
        let written = self.take_written();
        for name in &written {
            let value: Value = match self.vars.raw_get(name.as_str()) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!("cannot read '{}' from the namespace: {}", name, e);
                    continue;
                }
            };

            for frame in self.frames.iter().rev() {
                let bound = matches!(frame.raw_get::<Value>(name.as_str()), Ok(v) if !v.is_nil());
                if bound {
                    tracing::trace!("reconciling loop binding '{}'", name);
                    if let Err(e) = frame.raw_set(name.as_str(), value.clone()) {
                        tracing::warn!("cannot update loop binding '{}': {}", name, e);
                    }
                }
            }

            if !value.is_nil() {
                self.exported.insert(name.clone());
            }
        }
        written
    }

    fn take_written(&self) -> Vec<String> {
        let mut names = Vec::new();
        for pair in self.written.clone().pairs::<Value, Value>() {
            match pair {
                Ok((Value::String(name), _)) => names.push(name.to_string_lossy().to_string()),
                Ok(_) => {}
                Err(e) => tracing::warn!("cannot read assigned names: {}", e),
            }
        }
        for name in &names {
            if let Err(e) = self.written.raw_set(name.as_str(), Value::Nil) {
                tracing::warn!("cannot clear assigned name '{}': {}", name, e);
            }
        }
        names.sort();
        names
    }
}

/// Environment of one code block execution.
pub struct BlockView {
    env: Table,
}

impl BlockView {
    /// The table to use as the chunk's `_ENV`.
    pub fn env(&self) -> &Table {
        &self.env
    }
}
