// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Template-relative `require` for code blocks.
//!
//! Each render pass gets its own `require`. A name is looked up in the pass's
//! module table, then among the preloaded libraries (`string`, `table`,
//! `json`, ...), and finally through the engine's resolver: `lib.util` becomes
//! `lib/util.lua`, searched in the directory of the template being rendered
//! and then at the resolver root.
//!
//! Modules run in their own environment that falls back to the pass's outer
//! view, so `print` inside a module still writes into the page while the
//! template's variables stay out of reach. Loaded modules are cached for the
//! rest of the pass only.

use mlua::{Function, Lua, Table};
use std::sync::{Arc, Mutex};

use crate::resolver::ResourceResolver;

/// Lua source of the `require` factory.
///
/// Called with `(compile, outer, builtins)`, returns the `require` function.
pub(crate) const REQUIRE_FACTORY: &str = r#"
local compile, outer, builtins = ...
local loaded = {}
local outer_meta = { __index = outer }

local function require(name)
  if type(name) ~= "string" then
    error("bad argument #1 to 'require' (string expected, got " .. type(name) .. ")", 2)
  end
  local cached = loaded[name]
  if cached ~= nil then
    return cached
  end
  local builtin = builtins[name]
  if builtin ~= nil then
    return builtin
  end

  local env = setmetatable({}, outer_meta)
  local chunk, detail, level = compile(name, env)
  if not chunk then
    error(detail, level)
  end
  local result = chunk(name, detail)
  if result == nil then
    result = true
  end
  loaded[name] = result
  return result
end

return require
"#;

/// Maps a module name to the resource path it is loaded from.
///
/// `lib.util` becomes `lib/util.lua`; names that already end in `.lua` or
/// contain a `/` are used as paths.
pub fn module_path(name: &str) -> String {
    if name.ends_with(".lua") {
        name.to_string()
    } else if name.contains('/') {
        format!("{}.lua", name)
    } else {
        format!("{}.lua", name.replace('.', "/"))
    }
}

/// Installs `require` into `target` for one render pass.
///
/// `current_template` holds the resolved path of the template being rendered;
/// module lookups start in its directory.
pub fn install_require(
    lua: &Lua,
    factory: &Function,
    target: &Table,
    builtins: &Table,
    resolver: Box<dyn ResourceResolver>,
    current_template: Arc<Mutex<String>>,
) -> mlua::Result<()> {
    // Returns (chunk, path) or (nil, message, error level)
    let compile = lua.create_function(move |lua, (name, env): (String, Table)| {
        let importer = current_template
            .lock()
            .map(|current| current.clone())
            .unwrap_or_default();

        let resolved = match resolver.resolve(&importer, &module_path(&name)) {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::debug!("module '{}' not found from '{}': {}", name, importer, e);
                return Ok((None, format!("module '{}' not found: {}", name, e), 2));
            }
        };

        tracing::debug!("loading module '{}' from {}", name, resolved.path);
        match lua
            .load(&resolved.source)
            .set_name(format!("@{}", resolved.path))
            .set_environment(env)
            .into_function()
        {
            Ok(chunk) => Ok((Some(chunk), resolved.path, 0)),
            // Syntax errors already carry the module's file and line
            Err(mlua::Error::SyntaxError { message, .. }) => Ok((None, message, 0)),
            Err(e) => Err(e),
        }
    })?;

    let require: Function = factory.call((compile, target.clone(), builtins.clone()))?;
    target.raw_set("require", require)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_resolver::MemoryResourceResolver;

    fn setup(resolver: MemoryResourceResolver, current: &str) -> (Lua, Table) {
        let lua = Lua::new();
        let factory = lua.load(REQUIRE_FACTORY).into_function().unwrap();
        let outer = lua.create_table().unwrap();
        let builtins: Table = lua.globals().get::<Table>("package").unwrap().get("loaded").unwrap();
        install_require(
            &lua,
            &factory,
            &outer,
            &builtins,
            Box::new(resolver),
            Arc::new(Mutex::new(current.to_string())),
        )
        .unwrap();
        let meta = lua.create_table().unwrap();
        meta.raw_set("__index", lua.globals()).unwrap();
        outer.set_metatable(Some(meta));
        (lua, outer)
    }

    #[test]
    fn test_module_path() {
        assert_eq!(module_path("helpers"), "helpers.lua");
        assert_eq!(module_path("lib.util"), "lib/util.lua");
        assert_eq!(module_path("./lib/util"), "./lib/util.lua");
        assert_eq!(module_path("lib/util.lua"), "lib/util.lua");
    }

    #[test]
    fn test_require_relative_to_template_and_cached() {
        let resolver = MemoryResourceResolver::new()
            .with_template("pages/index.luhp", "")
            .with_template("pages/helpers.lua", "counter = (counter or 0) + 1\nreturn { n = counter }");
        let (lua, outer) = setup(resolver, "pages/index.luhp");

        let same: bool = lua
            .load("local a = require('helpers') local b = require('helpers') return a == b and a.n == 1")
            .set_environment(outer)
            .eval()
            .unwrap();
        assert!(same);
    }

    #[test]
    fn test_builtins_and_missing_modules() {
        let (lua, outer) = setup(MemoryResourceResolver::new(), "index.luhp");
        let is_string: bool = lua
            .load("return require('string') == string")
            .set_environment(outer.clone())
            .eval()
            .unwrap();
        assert!(is_string);

        let err = lua
            .load("require('missing')")
            .set_name("@index.luhp")
            .set_environment(outer)
            .exec()
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("index.luhp:1:"), "{}", message);
        assert!(message.contains("module 'missing' not found"), "{}", message);
    }
}
