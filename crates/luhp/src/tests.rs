// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

use crate::*;
use serde_json::json;
#[cfg(feature = "filesystem")]
use std::fs;
#[cfg(feature = "filesystem")]
use std::path::Path;
#[cfg(feature = "filesystem")]
use tempfile::TempDir;

// Helper function to create an engine with memory cache for tests
#[cfg(feature = "filesystem")]
fn create_engine<P: AsRef<Path>>(root_dir: P) -> Result<Engine<FileSystemResolver>> {
    let resolver = FileSystemResolver::new(root_dir);
    Engine::with_memory_cache(resolver, 100)
}

fn memory_engine(templates: &[(&str, &str)]) -> Engine<MemoryResourceResolver> {
    let resolver = MemoryResourceResolver::new();
    for (path, source) in templates {
        resolver.add_template(path, *source);
    }
    Engine::with_memory_cache(resolver, 100).unwrap()
}

fn render_str(source: &str, bindings: &Bindings) -> Result<Rendered> {
    memory_engine(&[]).render_source("inline.luhp", source, bindings)
}

#[cfg(feature = "filesystem")]
fn write(dir: &TempDir, path: &str, content: &str) {
    let full = dir.path().join(path);
    if let Some(parent) = full.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(full, content).unwrap();
}

#[cfg(test)]
mod code_block_tests {
    use super::*;

    #[test]
    fn test_template_without_blocks_renders_unchanged() {
        let source = "<h1>Hi</h1>\n<p>{ not a tag } 100% done</p>\n";
        let rendered = render_str(source, &Bindings::new()).unwrap();
        assert_eq!(rendered.body, source);
        assert!(rendered.exported.is_empty());
    }

    #[test]
    fn test_block_output_replaces_block() {
        let rendered = render_str("Hello {% lua %}print(1+1){% endlua %}!", &Bindings::new()).unwrap();
        assert_eq!(rendered.body, "Hello 2!");
    }

    #[test]
    fn test_before_block_after_ordering() {
        let rendered = render_str("A{% lua %}echo('B'){% endlua %}C", &Bindings::new()).unwrap();
        assert_eq!(rendered.body, "ABC");
    }

    #[test]
    fn test_blocks_share_state() {
        let rendered = render_str("{% lua %}x = 5{% endlua %}{% lua %}print(x*2){% endlua %}", &Bindings::new()).unwrap();
        assert_eq!(rendered.body, "10");
        assert!(rendered.exported.contains("x"));
    }

    #[test]
    fn test_assignment_visible_after_not_before() {
        let rendered = render_str("{{ x }}|{% lua %}x = 'set'{% endlua %}|{{ x }}", &Bindings::new()).unwrap();
        assert_eq!(rendered.body, "||set");
    }

    #[test]
    fn test_block_overrides_initial_binding() {
        let bindings = Bindings::new().with("x", 1);
        let rendered = render_str("{{ x }}{% lua %}x = x + 1{% endlua %}{{ x }}", &bindings).unwrap();
        assert_eq!(rendered.body, "12");
        assert_eq!(rendered.exported.iter().collect::<Vec<_>>(), vec!["x"]);
    }

    #[test]
    fn test_locals_stay_in_block() {
        let rendered = render_str(
            "{% lua %}local secret = 1\nshared = 2\ngone = nil{% endlua %}[{{ secret }}][{{ shared }}]",
            &Bindings::new(),
        )
        .unwrap();
        assert_eq!(rendered.body, "[][2]");
        assert_eq!(rendered.exported.iter().collect::<Vec<_>>(), vec!["shared"]);
    }

    #[test]
    fn test_functions_defined_in_blocks_are_callable_from_markup() {
        let rendered = render_str(
            "{% lua %}\n    function double(n)\n      return n * 2\n    end\n{% endlua %}{{ double(21) }}",
            &Bindings::new(),
        )
        .unwrap();
        assert_eq!(rendered.body, "42");
    }

    #[test]
    fn test_markup_set_is_visible_to_blocks() {
        let bindings = Bindings::new().with("name", "ada");
        let rendered = render_str(
            "{% set greeting = 'hi ' .. name %}{% lua %}print(greeting:upper()){% endlua %}",
            &bindings,
        )
        .unwrap();
        assert_eq!(rendered.body, "HI ADA");
    }

    #[test]
    fn test_indented_block_in_markup() {
        let source = "<ul>\n  {% lua %}\n    for i = 1, 3 do\n      echo('<li>', i, '</li>')\n    end\n  {% endlua %}\n</ul>";
        let rendered = render_str(source, &Bindings::new()).unwrap();
        assert_eq!(rendered.body, "<ul>\n  <li>1</li><li>2</li><li>3</li>\n</ul>");
    }

    #[test]
    fn test_output_primitives_in_expressions() {
        let rendered = render_str("[{{ echo('side') }}]", &Bindings::new()).unwrap();
        assert_eq!(rendered.body, "[side]");
    }
}

#[cfg(test)]
mod namespace_tests {
    use super::*;

    #[test]
    fn test_loop_binding_reconciled_after_block() {
        let bindings = Bindings::new().with("items", json!([1, 2, 3]));
        let rendered = render_str(
            "{% for item in items %}{% lua %}item = item * 10{% endlua %}{{ item }},{% endfor %}{{ item }}",
            &bindings,
        )
        .unwrap();
        assert_eq!(rendered.body, "10,20,30,30");
    }

    #[test]
    fn test_function_defined_earlier_updates_loop_binding() {
        let rendered = render_str(
            "{% lua %}function bump() n = (n or 0) + 1 end{% endlua %}\
             {% for i in {1, 2} %}{% set n = 0 %}{% lua %}bump(){% endlua %}[{{ n }}]{% endfor %}",
            &Bindings::new(),
        )
        .unwrap();
        assert_eq!(rendered.body, "[1][1]");
        assert!(rendered.exported.contains("bump"));
        assert!(rendered.exported.contains("n"));
    }

    #[test]
    fn test_function_called_from_markup_is_reconciled() {
        let rendered = render_str(
            "{% lua %}function inc() count = (count or 0) + 1 return '' end{% endlua %}\
             {% for i in {1, 2, 3} %}{{ inc() }}{% endfor %}{{ count }}",
            &Bindings::new(),
        )
        .unwrap();
        assert_eq!(rendered.body, "3");
        assert!(rendered.exported.contains("count"));
    }

    #[test]
    fn test_loop_table_and_else() {
        let bindings = Bindings::new().with("letters", json!(["a", "b"])).with("none", json!([]));
        let rendered = render_str(
            "{% for n in letters %}{{ loop.index }}:{{ n }}{% if not loop.last %},{% endif %}{% endfor %}\
             |{% for n in none %}x{% else %}empty{% endfor %}",
            &bindings,
        )
        .unwrap();
        assert_eq!(rendered.body, "1:a,2:b|empty");
    }

    #[test]
    fn test_for_over_map_and_iterator() {
        let bindings = Bindings::new().with("user", json!({ "name": "Ada", "age": 36 }));
        let rendered = render_str(
            "{% for k, v in user %}{{ k }}={{ v }};{% endfor %}|{% for k in user %}{{ k }} {% endfor %}\
             |{% lua %}nums = { 3, 4 }{% endlua %}{% for i, v in ipairs(nums) %}{{ i * v }}{% endfor %}",
            &bindings,
        )
        .unwrap();
        assert_eq!(rendered.body, "age=36;name=Ada;|age name |38");
    }

    #[test]
    fn test_for_over_scalar_is_expression_error() {
        let err = render_str("{% for x in 42 %}{% endfor %}", &Bindings::new()).unwrap_err();
        assert!(matches!(err, LuhpError::ExpressionError { line: 1, .. }));
    }

    #[test]
    fn test_if_branches_follow_block_assignments() {
        let rendered = render_str(
            "{% lua %}role = 'admin'{% endlua %}{% if role == 'user' %}U{% elif role == 'admin' %}A{% else %}?{% endif %}",
            &Bindings::new(),
        )
        .unwrap();
        assert_eq!(rendered.body, "A");
    }

    #[test]
    fn test_nested_json_bindings() {
        let bindings = Bindings::new().with("user", json!({ "name": "Ada", "tags": ["x", "y"], "nick": null }));
        let rendered = render_str("{{ user.name }} {{ #user.tags }} [{{ user.nick }}]", &bindings).unwrap();
        assert_eq!(rendered.body, "Ada 2 []");
    }

    #[test]
    fn test_autoescape_applies_to_expressions_only() {
        let engine = Engine::with_options(
            MemoryResourceResolver::new(),
            Box::new(MemoryCache::new(10)),
            EngineOptions::default().autoescape(true),
        )
        .unwrap();
        let rendered = engine
            .render_source("a.luhp", "{{ '<b>' }}{% lua %}echo('<i>'){% endlua %}", &Bindings::new())
            .unwrap();
        assert_eq!(rendered.body, "&lt;b&gt;<i>");
    }
}

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    #[cfg(feature = "filesystem")]
    fn test_runtime_fault_reports_file_and_line() {
        let temp_dir = TempDir::new().unwrap();
        write(
            &temp_dir,
            "pages/index.luhp",
            "<h1>Title</h1>\n{% lua %}\nlocal t = nil\nprint(t.field)\n{% endlua %}\n",
        );

        let engine = create_engine(temp_dir.path()).unwrap();
        let err = engine.render("pages/index.luhp", &Bindings::new()).unwrap_err();
        match &err {
            LuhpError::CodeRuntimeError { file, line, message, .. } => {
                assert_eq!(file, "pages/index.luhp");
                assert_eq!(*line, 4);
                assert!(message.contains("attempt to index a nil value"), "{}", message);
            }
            other => panic!("expected runtime error, got {:?}", other),
        }
        assert_eq!(err.location(), Some(("pages/index.luhp", 4)));
    }

    #[test]
    fn test_compile_fault_reports_line() {
        let err = render_str("one\ntwo\n{% lua %}\nx = = 1\n{% endlua %}", &Bindings::new()).unwrap_err();
        assert!(matches!(err, LuhpError::CodeCompileError { line: 4, .. }), "{:?}", err);
    }

    #[test]
    fn test_expression_fault_reports_line() {
        let err = render_str("a\n\n{{ missing.field }}", &Bindings::new()).unwrap_err();
        match err {
            LuhpError::ExpressionError { file, line, message } => {
                assert_eq!(file, "inline.luhp");
                assert_eq!(line, 3);
                assert!(message.starts_with("`missing.field`"));
            }
            other => panic!("expected expression error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = render_str("a\n{% if x %}never closed", &Bindings::new()).unwrap_err();
        match err {
            LuhpError::ParseError { file, .. } => assert_eq!(file.as_deref(), Some("inline.luhp")),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_fault_in_included_template_names_that_template() {
        let engine = memory_engine(&[
            ("index.luhp", "top\n{% include \"partials/bad.luhp\" %}"),
            ("partials/bad.luhp", "<p>\n{% lua %}error('inner'){% endlua %}</p>"),
        ]);
        let err = engine.render("index.luhp", &Bindings::new()).unwrap_err();
        assert_eq!(err.location(), Some(("partials/bad.luhp", 2)));
    }

    #[test]
    fn test_callback_fault_reports_calling_line() {
        let err = render_str("a\n{% lua %}\nx = 1\ny = 2\njson.decode('{')\n{% endlua %}", &Bindings::new())
            .unwrap_err();
        assert_eq!(err.location(), Some(("inline.luhp", 5)));
        assert!(err.to_string().contains("JSON decode error"), "{}", err);

        let err = render_str("a\n{% lua %}\nx = 1\nerror({ code = 1 })\n{% endlua %}", &Bindings::new())
            .unwrap_err();
        assert_eq!(err.location(), Some(("inline.luhp", 4)));
    }

    #[test]
    fn test_sandbox_removes_dangerous_globals() {
        let rendered = render_str(
            "{% lua %}print(io == nil, os.execute == nil, load == nil, type(os.time())){% endlua %}",
            &Bindings::new(),
        )
        .unwrap();
        assert_eq!(rendered.body, "true\ttrue\ttrue\tnumber");
    }
}

#[cfg(test)]
mod engine_tests {
    use super::*;

    #[test]
    #[cfg(feature = "filesystem")]
    fn test_cache_invalidated_on_modification() {
        let temp_dir = TempDir::new().unwrap();
        write(&temp_dir, "page.luhp", "v{% lua %}print(1){% endlua %}");

        let engine = create_engine(temp_dir.path()).unwrap();
        assert_eq!(engine.render("page.luhp", &Bindings::new()).unwrap().body, "v1");
        assert!(engine.cache_contains("page.luhp"));

        let first = engine.compile("page.luhp").unwrap();
        let again = engine.compile("page.luhp").unwrap();
        assert!(std::sync::Arc::ptr_eq(&first, &again));

        write(&temp_dir, "page.luhp", "version {% lua %}print(2){% endlua %}");
        assert!(!engine.cache_contains("page.luhp"));
        assert_eq!(engine.render("page.luhp", &Bindings::new()).unwrap().body, "version 2");
        let recompiled = engine.compile("page.luhp").unwrap();
        assert_ne!(recompiled.hash, first.hash);
        assert!(std::sync::Arc::ptr_eq(&recompiled, &engine.compile("page.luhp").unwrap()));

        engine.clear_cache().unwrap();
        assert!(!engine.cache_contains("page.luhp"));
    }

    #[test]
    #[cfg(feature = "filesystem")]
    fn test_require_relative_to_template_directory() {
        let temp_dir = TempDir::new().unwrap();
        write(
            &temp_dir,
            "pages/helpers.lua",
            "local M = {}\nfunction M.greet(name)\n  return 'hi ' .. name\nend\nfunction M.fail()\n  error('module fault')\nend\nreturn M\n",
        );
        write(
            &temp_dir,
            "pages/index.luhp",
            "{% lua %}helpers = require('helpers'){% endlua %}{{ helpers.greet('ada') }}",
        );
        write(&temp_dir, "pages/broken.luhp", "{% lua %}require('helpers').fail(){% endlua %}");

        let engine = create_engine(temp_dir.path()).unwrap();
        assert_eq!(engine.render("pages/index.luhp", &Bindings::new()).unwrap().body, "hi ada");

        let err = engine.render("pages/broken.luhp", &Bindings::new()).unwrap_err();
        assert_eq!(err.location(), Some(("pages/helpers.lua", 6)));
    }

    #[test]
    fn test_require_json_module() {
        let rendered = render_str(
            "{% lua %}local json = require('json')\necho(json.encode({ ok = true })){% endlua %}",
            &Bindings::new(),
        )
        .unwrap();
        assert_eq!(rendered.body, r#"{"ok":true}"#);
    }

    #[test]
    fn test_include_shares_namespace() {
        let engine = memory_engine(&[
            (
                "pages/home.luhp",
                "{% lua %}title = 'Home'{% endlua %}{% include \"partials/nav.luhp\" %}{{ nav_seen }}",
            ),
            ("partials/nav.luhp", "{% lua %}nav_seen = true{% endlua %}<nav>{{ title }}</nav>"),
        ]);
        let rendered = engine.render("pages/home.luhp", &Bindings::new()).unwrap();
        assert_eq!(rendered.body, "<nav>Home</nav>true");
        assert!(rendered.exported.contains("nav_seen"));
    }

    #[test]
    fn test_include_recursion_is_bounded() {
        let engine = memory_engine(&[("loop.luhp", "x{% include \"loop.luhp\" %}")]);
        let err = engine.render("loop.luhp", &Bindings::new()).unwrap_err();
        assert!(matches!(err, LuhpError::IncludeDepthExceeded { depth: 32, .. }));
    }

    #[test]
    fn test_respond_outcomes() {
        let engine = memory_engine(&[
            ("ok.luhp", "Hello {{ name }}"),
            ("bad_syntax.luhp", "{% for %}"),
            ("fault.luhp", "\n{% lua %}error('boom'){% endlua %}"),
        ]);
        let bindings = Bindings::new().with("name", "World");

        assert_eq!(engine.respond("ok.luhp", &bindings), Response::html(200, "Hello World"));
        assert_eq!(engine.respond("missing.luhp", &bindings).status(), 404);
        assert_eq!(engine.respond("../escape.luhp", &bindings).status(), 403);
        assert_eq!(engine.respond("bad_syntax.luhp", &bindings).status(), 400);

        let fault = engine.respond("fault.luhp", &bindings);
        assert_eq!(fault.status(), 500);
        assert!(fault.body().contains("fault.luhp at line 2"), "{}", fault.body());
    }

    #[test]
    fn test_concurrent_passes_do_not_leak() {
        let engine = memory_engine(&[(
            "page.luhp",
            "{% lua %}mine = who .. ';'{% endlua %}{% lua %}for i = 1, 50 do echo(mine) end{% endlua %}",
        )]);

        std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|n| {
                    let engine = &engine;
                    s.spawn(move || {
                        let who = format!("t{}", n);
                        let bindings = Bindings::new().with("who", who.clone());
                        let mut bodies = Vec::new();
                        for _ in 0..10 {
                            bodies.push(engine.render("page.luhp", &bindings).unwrap().body);
                        }
                        (who, bodies)
                    })
                })
                .collect();

            for handle in handles {
                let (who, bodies) = handle.join().unwrap();
                let expected = format!("{};", who).repeat(50);
                for body in bodies {
                    assert_eq!(body, expected);
                }
            }
        });
    }

    #[test]
    fn test_global_table_is_private_to_each_pass() {
        let engine = memory_engine(&[
            ("a.luhp", "{% lua %}_G.leak = 'x'{% endlua %}[{{ leak }}]"),
            ("b.luhp", "[{{ leak }}]{% lua %}print(package.loaded._G == nil, getmetatable(_G)){% endlua %}"),
        ]);

        let first = engine.render("a.luhp", &Bindings::new()).unwrap();
        assert_eq!(first.body, "[x]");
        assert!(first.exported.contains("leak"));

        let second = engine.render("b.luhp", &Bindings::new()).unwrap();
        assert_eq!(second.body, "[]true\tfalse");
        assert!(engine.base_env().raw_get::<Value>("leak").unwrap().is_nil());
    }

    #[test]
    fn test_passes_start_with_fresh_namespace() {
        let engine = memory_engine(&[("page.luhp", "[{{ counter }}]{% lua %}counter = (counter or 0) + 1{% endlua %}")]);
        assert_eq!(engine.render("page.luhp", &Bindings::new()).unwrap().body, "[]");
        assert_eq!(engine.render("page.luhp", &Bindings::new()).unwrap().body, "[]");
    }

    #[test]
    fn test_check_finds_block_syntax_errors_without_running() {
        let engine = memory_engine(&[
            ("ok.luhp", "{% lua %}error('only at render time'){% endlua %}"),
            ("bad.luhp", "<ul>\n{% for i in items %}\n{% lua %}\nprint(i +){% endlua %}\n{% endfor %}</ul>"),
        ]);
        assert!(engine.check("ok.luhp").is_ok());

        match engine.check("bad.luhp").unwrap_err() {
            LuhpError::CodeCompileError { file, line, .. } => {
                assert_eq!(file, "bad.luhp");
                assert_eq!(line, 4);
            }
            other => panic!("expected compile error, got {:?}", other),
        }
        assert!(engine.check("missing.luhp").unwrap_err().is_not_found());
    }
}
