// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! luhp template engine for compiling and rendering templates.
//!
//! This module provides the core [`Engine`] type that handles the complete
//! template lifecycle: resolution, parsing, plan building, caching, and
//! rendering.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use luhp::{Bindings, Engine, FileSystemResolver};
//!
//! let resolver = FileSystemResolver::new("./templates");
//! let engine = Engine::with_memory_cache(resolver, 100)?;
//!
//! let bindings = Bindings::new().with("name", "World");
//! let page = engine.render("hello.luhp", &bindings)?;
//! println!("{}", page.body);
//! ```
//!
//! # Architecture
//!
//! The engine coordinates several subsystems:
//!
//! - **Resolver**: Locates template files by path (filesystem or memory)
//! - **Parser**: Converts template source into an AST
//! - **Plan**: Lowers the AST into the ordered steps of a [`RenderPlan`]
//! - **Cache**: Stores plans per template version
//! - **Lua Runtime**: Evaluates expressions and runs code blocks
//!
//! # Thread Safety
//!
//! An engine can be shared between threads. Every render pass builds its own
//! namespace, output sink and module table, so concurrent passes never see
//! each other's variables or output. Inside a pass `_G` is a view of the
//! pass's namespace, never the engine's globals. Access to the Lua state is
//! serialized by mlua.

use crate::cache::{plan_key, Cache, MemoryCache};
use crate::error::Result;
use crate::executor::check_block;
use crate::extensions::register_json_module;
use crate::extensions::require::REQUIRE_FACTORY;
use crate::namespace::{Bindings, Scope, BLOCK_VIEW_FACTORY};
use crate::options::EngineOptions;
use crate::parser::parse_template_with_context;
use crate::plan::{build_plan, RenderPlan};
use crate::render::{Rendered, Renderer};
use crate::resolver::ResourceResolver;
use crate::response::Response;
use mlua::{Function, Lua, Table};
use std::sync::Arc;

/// Main luhp template engine.
///
/// The engine is generic over the resource resolver type `R`, allowing
/// different template loading strategies (filesystem, memory, ...).
///
/// # Examples
///
/// ```rust,ignore
/// use luhp::{Bindings, Engine, MemoryResourceResolver, MemoryCache};
///
/// let resolver = MemoryResourceResolver::new();
/// resolver.add_template("hello.luhp", "Hello {% lua %}print(1+1){% endlua %}!");
///
/// let engine = Engine::new(resolver, Box::new(MemoryCache::new(100)))?;
/// assert_eq!(engine.render("hello.luhp", &Bindings::new())?.body, "Hello 2!");
/// ```
#[derive(Debug)]
pub struct Engine<R: ResourceResolver> {
    resolver: R,
    cache: Box<dyn Cache>,
    lua: Lua,
    base_env: Table,
    builtin_modules: Table,
    tostring: Function,
    view_factory: Function,
    require_factory: Function,
    options: EngineOptions,
}

impl<R: ResourceResolver> Engine<R> {
    /// Returns a reference to the resolver used by this engine.
    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Returns the engine options.
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Returns the engine's Lua state.
    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// The environment every render pass falls back to.
    pub fn base_env(&self) -> &Table {
        &self.base_env
    }

    pub(crate) fn builtin_modules(&self) -> &Table {
        &self.builtin_modules
    }

    pub(crate) fn tostring(&self) -> &Function {
        &self.tostring
    }

    pub(crate) fn view_factory(&self) -> &Function {
        &self.view_factory
    }

    pub(crate) fn require_factory(&self) -> &Function {
        &self.require_factory
    }

    /// Sandboxes the Lua environment by disabling dangerous functions and libraries.
    ///
    /// This removes access to:
    /// - `io` library (file I/O)
    /// - `debug` library (introspection)
    /// - `load`, `loadstring`, `loadfile`, `dofile` (dynamic code execution)
    /// - the global `require` and `package.loadlib` (module loading goes
    ///   through the resolver instead)
    /// - Most of `os` library (keeps only `os.date`, `os.time`, `os.clock`, `os.difftime`)
    fn sandbox_lua(lua: &Lua, globals: &Table) -> Result<()> {
        let os_table: Table = globals.get("os")?;
        let safe_os = lua.create_table()?;
        for name in ["date", "time", "clock", "difftime"] {
            let function: Function = os_table.get(name)?;
            safe_os.set(name, function)?;
        }

        globals.set("io", mlua::Value::Nil)?;
        globals.set("debug", mlua::Value::Nil)?;

        for name in ["load", "loadstring", "loadfile", "dofile", "require"] {
            globals.set(name, mlua::Value::Nil)?;
        }
        let package: Table = globals.get("package")?;
        package.set("loadlib", mlua::Value::Nil)?;

        globals.set("os", safe_os)?;

        Ok(())
    }

    /// Creates a new engine with the given resolver and cache and default
    /// options.
    ///
    /// # Errors
    ///
    /// Returns an error if the Lua runtime fails to initialize.
    pub fn new(resolver: R, cache: Box<dyn Cache>) -> Result<Self> {
        Self::with_options(resolver, cache, EngineOptions::default())
    }

    /// Creates a new engine with explicit options.
    ///
    /// # Errors
    ///
    /// Returns [`LuhpError::ConfigError`](crate::LuhpError::ConfigError) for invalid options, or an error if
    /// the Lua runtime fails to initialize.
    pub fn with_options(resolver: R, cache: Box<dyn Cache>, options: EngineOptions) -> Result<Self> {
        options.validate()?;

        let lua = Lua::new();
        let globals = lua.globals();

        let tostring: Function = globals.get("tostring")?;
        let view_factory = lua.load(BLOCK_VIEW_FACTORY).set_name("=luhp:block_view").into_function()?;
        let require_factory = lua.load(REQUIRE_FACTORY).set_name("=luhp:require").into_function()?;

        register_json_module(&lua)?;
        if options.sandbox {
            Self::sandbox_lua(&lua, &globals)?;
        }

        let package: Table = globals.get("package")?;
        let builtin_modules: Table = package.get("loaded")?;
        // Passes see their own `_G`; the shared globals stay unreachable
        builtin_modules.raw_set("_G", mlua::Value::Nil)?;

        tracing::debug!("engine initialized (sandbox: {}, autoescape: {})", options.sandbox, options.autoescape);

        Ok(Self {
            resolver,
            cache,
            base_env: globals,
            builtin_modules,
            tostring,
            view_factory,
            require_factory,
            lua,
            options,
        })
    }

    /// Creates a new engine with an in-memory LRU cache.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let resolver = FileSystemResolver::new("./templates");
    /// let engine = Engine::with_memory_cache(resolver, 100)?;
    /// ```
    pub fn with_memory_cache(resolver: R, cache_size: usize) -> Result<Self> {
        let options = EngineOptions {
            cache_size,
            ..EngineOptions::default()
        };
        Self::with_options(resolver, Box::new(MemoryCache::new(cache_size)), options)
    }

    /// Compiles the template at `path` (relative to the resolver root).
    ///
    /// Plans are cached per template version: the cache key carries the
    /// resolver's modification stamp, so an edited template is recompiled on
    /// the next call.
    ///
    /// # Errors
    ///
    /// - [`LuhpError::TemplateNotFound`](crate::LuhpError::TemplateNotFound) / [`LuhpError::Forbidden`](crate::LuhpError::Forbidden) from the resolver
    /// - [`LuhpError::ParseError`](crate::LuhpError::ParseError) for invalid template syntax
    pub fn compile(&self, path: &str) -> Result<Arc<RenderPlan>> {
        self.compile_from("", path)
    }

    /// Compiles the template `name` as seen from the template `importer`.
    pub fn compile_from(&self, importer: &str, name: &str) -> Result<Arc<RenderPlan>> {
        let resolved_path = self.resolver.get_resolved_path(importer, name)?;
        let stamp = self.resolver.modified(&resolved_path)?;
        let key = plan_key(&resolved_path, stamp);

        if let Some(plan) = self.cache.get(&key)? {
            tracing::debug!("plan cache hit for {} (source {:016x})", resolved_path, plan.hash);
            return Ok(plan);
        }
        tracing::debug!("plan cache miss for {}, compiling", resolved_path);

        let resolved = self.resolver.resolve(importer, name)?;
        let plan = Arc::new(self.compile_source(&resolved.path, &resolved.source)?);
        tracing::debug!("caching plan for {} (source {:016x})", resolved_path, plan.hash);
        self.cache.set(&key, plan.clone())?;
        Ok(plan)
    }

    /// Compiles template source without touching the resolver or the cache.
    ///
    /// `name` is used in error messages and as the base for includes.
    pub fn compile_source(&self, name: &str, source: &str) -> Result<RenderPlan> {
        let ast = parse_template_with_context(source, Some(name))?;
        let plan = build_plan(ast, name, source);
        tracing::trace!("compiled {} into {} steps", name, plan.steps.len());
        Ok(plan)
    }

    /// Compiles `path` and every code block in it without rendering.
    ///
    /// Includes and `require`d modules are resolved at render time and are
    /// not followed.
    ///
    /// # Errors
    ///
    /// Any error of [`compile`](Self::compile), or
    /// [`LuhpError::CodeCompileError`](crate::LuhpError::CodeCompileError) for the first block that is
    /// not valid Lua.
    pub fn check(&self, path: &str) -> Result<Arc<RenderPlan>> {
        let plan = self.compile(path)?;
        for block in plan.code_blocks() {
            check_block(&self.lua, block, Some(&plan.source))?;
        }
        Ok(plan)
    }

    /// Renders the template at `path` with the given initial bindings.
    ///
    /// # Errors
    ///
    /// Any compile error, or the first code block or expression fault.
    /// Partial output of a failed pass is never returned.
    pub fn render(&self, path: &str, bindings: &Bindings) -> Result<Rendered> {
        let plan = self.compile(path)?;
        self.render_plan(&plan, bindings)
    }

    /// Renders an already compiled plan in a fresh namespace.
    pub fn render_plan(&self, plan: &RenderPlan, bindings: &Bindings) -> Result<Rendered> {
        let mut scope = Scope::new(&self.lua, &self.base_env, bindings)?;
        let mut renderer = Renderer::new(self, &scope, &plan.path)?;
        let body = renderer.render(plan, &mut scope)?;

        let exported = scope.into_exported();
        tracing::debug!("rendered {} ({} bytes, {} exported)", plan.path, body.len(), exported.len());
        Ok(Rendered { body, exported })
    }

    /// Compiles and renders template source directly, bypassing the cache.
    pub fn render_source(&self, name: &str, source: &str, bindings: &Bindings) -> Result<Rendered> {
        let plan = self.compile_source(name, source)?;
        self.render_plan(&plan, bindings)
    }

    /// Renders `path` for a request shell.
    ///
    /// Never fails: errors are mapped to their outcome with
    /// [`Response::from_error`].
    pub fn respond(&self, path: &str, bindings: &Bindings) -> Response {
        match self.render(path, bindings) {
            Ok(rendered) => Response::html(200, rendered.body),
            Err(e) => {
                if e.status() >= 500 {
                    tracing::error!("rendering {} failed: {}", path, e);
                } else {
                    tracing::debug!("rendering {} refused: {}", path, e);
                }
                Response::from_error(&e)
            }
        }
    }

    /// Returns `true` if the current version of `path` is cached.
    pub fn cache_contains(&self, path: &str) -> bool {
        let key = self
            .resolver
            .get_resolved_path("", path)
            .and_then(|resolved| Ok(plan_key(&resolved, self.resolver.modified(&resolved)?)));
        match key {
            Ok(key) => self.cache.contains_key(&key),
            Err(_) => false,
        }
    }

    /// Clears the plan cache.
    pub fn clear_cache(&self) -> Result<()> {
        self.cache.clear()
    }
}
