// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! JSON module registration for Lua.
//!
//! Provides `json.encode`, `json.decode`, `json.encode_pretty`, and `json.null`.

use mlua::{Lua, LuaSerdeExt, Result as LuaResult, Table, Value};

fn create_json_module(lua: &Lua) -> LuaResult<Table> {
    let module = lua.create_table()?;

    let encode = lua.create_function(|_, value: Value| {
        serde_json::to_string(&value).map_err(|err| mlua::Error::external(format!("JSON encode error: {}", err)))
    })?;
    module.set("encode", encode)?;

    let encode_pretty = lua.create_function(|_, value: Value| {
        serde_json::to_string_pretty(&value)
            .map_err(|err| mlua::Error::external(format!("JSON encode error: {}", err)))
    })?;
    module.set("encode_pretty", encode_pretty)?;

    let decode = lua.create_function(|lua, json_str: String| {
        match serde_json::from_str::<serde_json::Value>(&json_str) {
            Ok(json_value) => lua.to_value(&json_value),
            Err(err) => Err(mlua::Error::external(format!("JSON decode error: {}", err))),
        }
    })?;
    module.set("decode", decode)?;

    // Lua has no null; decode maps JSON null to this sentinel and encode maps it back
    module.set("null", lua.null())?;

    Ok(module)
}

/// Registers the json module as a global and in `package.loaded`.
///
/// After this, code blocks can use `json.encode(...)` directly or obtain the
/// module with `require("json")`.
///
/// # Example
///
/// ```rust,ignore
/// use mlua::Lua;
/// use luhp::extensions::json::register_json_module;
///
/// let lua = Lua::new();
/// register_json_module(&lua)?;
/// ```
pub fn register_json_module(lua: &Lua) -> LuaResult<()> {
    let module = create_json_module(lua)?;
    let globals = lua.globals();
    globals.set("json", module.clone())?;

    let package: Table = globals.get("package")?;
    let loaded: Table = package.get("loaded")?;
    loaded.set("json", module)?;

    Ok(())
}
