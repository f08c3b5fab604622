//! One function per wire command.

use std::collections::HashSet;
use std::sync::Arc;

use super::dispatch::Context;
use crate::introspect::classify::{classify, render_outline, render_structure};
use crate::introspect::{
    encoder, scan, scanner, trace, walker, FrameIndexError, ThreadSelector, Visit,
};
use crate::runtime::{
    attr, exec as runtime_exec, is_internal_name, repr::pformat_mapping, Frame, Value,
};
use crate::{Error, Result};

const BUILTIN_TYPES: &[&str] = &[
    "bool", "bytes", "dict", "float", "int", "list", "object", "set", "str", "tuple", "type",
];

fn python_bool(b: bool) -> &'static str {
    if b {
        "True"
    } else {
        "False"
    }
}

fn describe_value(name: &str, value: &Value) -> String {
    format!(
        "{}:\n  Type: {}\n  Value: {}",
        name,
        value.type_name(),
        value.repr()
    )
}

fn walk_cap(ctx: &Context) -> usize {
    ctx.settings.walker_max_depth
}

fn frame_index(payload: &str) -> Result<i64> {
    payload
        .trim()
        .parse()
        .map_err(|_| Error::NotFound("Error: Frame index must be an integer".to_string()))
}

fn main_frame(ctx: &Context, index: i64) -> Result<Arc<Frame>> {
    walker::frame_at(&ctx.runtime, index, walk_cap(ctx)).map_err(|e| Error::NotFound(e.to_string()))
}

fn dump_unit(ctx: &Context, stem: &str, unit: &crate::runtime::CodeUnit) -> Result<String> {
    let path = encoder::write_image(
        &ctx.settings.dump_directory,
        stem,
        &ctx.settings.dump_extension,
        unit,
    )?;
    Ok(path.display().to_string())
}

pub fn structure(ctx: &Context, _: &str) -> Result<String> {
    Ok(render_structure(&classify(ctx.runtime.entry_module())))
}

pub fn outline(ctx: &Context, _: &str) -> Result<String> {
    Ok(render_outline(ctx.runtime.entry_module()))
}

pub fn dump(ctx: &Context, payload: &str) -> Result<String> {
    let expr = payload.trim();
    if is_internal_name(expr) {
        return Ok("Skipped agent-internal object".to_string());
    }
    let value = attr::resolve_expression(&ctx.runtime, expr)?;
    let image = encoder::encode_value(&value)?;
    let path = encoder::save_image(
        &ctx.settings.dump_directory,
        expr,
        &ctx.settings.dump_extension,
        &image,
    )?;
    Ok(format!("Bytecode dumped to {}", path.display()))
}

pub fn dis(ctx: &Context, payload: &str) -> Result<String> {
    let expr = payload.trim();
    if is_internal_name(expr) {
        return Ok("Invalid object for disassembly".to_string());
    }
    let value = attr::resolve_expression(&ctx.runtime, expr)?;
    match encoder::code_of(&value) {
        Ok(unit) => Ok(encoder::disassemble(&unit)),
        Err(_) => Ok("Invalid object for disassembly".to_string()),
    }
}

pub fn getvar(ctx: &Context, payload: &str) -> Result<String> {
    let name = payload.trim();
    classify(ctx.runtime.entry_module())
        .lookup_value(name)
        .map(|v| describe_value(name, &v))
        .ok_or_else(|| Error::NotFound(format!("Variable '{}' not found", name)))
}

pub fn objects_type(ctx: &Context, payload: &str) -> Result<String> {
    let wanted = payload.trim();
    if !BUILTIN_TYPES.contains(&wanted) {
        return Err(Error::NotFound(format!(
            "Error: Type '{}' is not a valid built-in type.",
            wanted
        )));
    }
    let mut lines = vec![format!("Variables of type {} in module:", wanted)];
    let before = lines.len();
    for (name, value) in classify(ctx.runtime.entry_module()).values() {
        if value.type_name() == wanted {
            lines.push(describe_value(&name, &value));
        }
    }
    if lines.len() == before {
        lines.push(format!("No variables of type {} found.", wanted));
    }
    Ok(lines.join("\n"))
}

/// Walk `a.b.c`, instantiating any type met on the way before descending.
pub fn search(ctx: &Context, payload: &str) -> Result<String> {
    let parts = attr::split_dotted(payload)?;
    let Some(mut current) = ctx.runtime.get_global(parts[0]) else {
        return Err(Error::NotFound(format!("'{}' not found", parts[0])));
    };
    for part in &parts[1..] {
        if let Value::Type(t) = &current {
            current = runtime_exec::instantiate(t)?;
        }
        current = attr::getattr(&current, part)?;
    }
    Ok(current.repr())
}

pub fn searchattr(ctx: &Context, payload: &str) -> Result<String> {
    let name = payload.trim();
    let contents = classify(ctx.runtime.entry_module());
    let class = contents
        .find_type(name)
        .ok_or_else(|| Error::NotFound(format!("Class '{}' not found", name)))?;
    let instance = runtime_exec::instantiate(class)?;

    let mut class_attrs = class.attrs.snapshot();
    class_attrs.push(("__module__".to_string(), Value::str(&class.module)));
    let instance_attrs = match &instance {
        Value::Instance(i) => i.attrs.snapshot(),
        _ => Vec::new(),
    };
    Ok(format!(
        "Class '{}' attributes:\n{}\n\n\nInstance attributes:\n{}\n",
        name,
        pformat_mapping(&class_attrs),
        pformat_mapping(&instance_attrs)
    ))
}

pub fn exec(ctx: &Context, payload: &str) -> Result<String> {
    if !ctx.settings.exec_enabled {
        tracing::warn!("Refusing exec request, code execution is disabled");
        return Err(Error::ExecDisabled);
    }
    runtime_exec::exec_source(&ctx.runtime, payload)?;
    Ok("Code injected successfully".to_string())
}

pub fn capture(ctx: &Context, _: &str) -> Result<String> {
    let unit = walker::module_frame(&ctx.runtime, walk_cap(ctx))
        .map(|f| Arc::clone(f.code()))
        .or_else(|| ctx.runtime.entry_module().code.clone())
        .ok_or_else(|| Error::NotFound("No module frame found".to_string()))?;
    let path = dump_unit(ctx, "module", &unit)?;
    Ok(format!("Bytecode dumped to {}", path))
}

pub fn modules(ctx: &Context, _: &str) -> Result<String> {
    Ok(format!(
        "Loaded modules:\n{}",
        ctx.runtime.loaded_modules().join("\n")
    ))
}

pub fn backtrace(_: &Context, _: &str) -> Result<String> {
    Ok(format!("Call stack:\n{}", trace::agent_call_chain().join("\n")))
}

pub fn threads(ctx: &Context, _: &str) -> Result<String> {
    let lines: Vec<String> = ctx
        .runtime
        .threads()
        .enumerate()
        .iter()
        .filter(|t| !is_internal_name(&t.name))
        .map(|t| format!("[{}] {} (daemon={})", t.ident, t.name, python_bool(t.daemon)))
        .collect();
    Ok(format!("Active threads:\n{}", lines.join("\n")))
}

pub fn tokens(ctx: &Context, _: &str) -> Result<String> {
    let contents = classify(ctx.runtime.entry_module());
    let mut hits: Vec<(String, String)> = Vec::new();

    let record = |label: &str, path: &str, text: &str, hits: &mut Vec<(String, String)>| {
        for pattern in ctx.secrets.classify(text) {
            hits.push((pattern.to_string(), format!("{} {}: {}", label, path, text)));
        }
    };

    for (name, value) in &contents.variables {
        match value.as_str() {
            Some(text) => record("Variable", name, text, &mut hits),
            None => {
                scan(value, name, |visit: &Visit<'_, Value>| {
                    if let Some(text) = visit.value.as_str() {
                        record("Variable", visit.path, text, &mut hits);
                    }
                    false
                });
            }
        }
    }

    for (name, class) in &contents.types {
        let instance = match runtime_exec::instantiate(class) {
            Ok(instance) => instance,
            Err(e) => {
                tracing::debug!("Skipping {} in token scan: {}", name, e);
                continue;
            }
        };
        for root in [instance, Value::Type(Arc::clone(class))] {
            scan(&root, name, |visit: &Visit<'_, Value>| {
                let dunder = visit.edge.is_some_and(|e| e.starts_with("__"));
                if let (false, Some(text)) = (dunder, visit.value.as_str()) {
                    record("Class", visit.path, text, &mut hits);
                }
                false
            });
        }
    }

    let mut seen = HashSet::new();
    hits.retain(|hit| seen.insert(hit.clone()));

    let groups: Vec<String> = ctx
        .secrets
        .names()
        .filter_map(|pattern| {
            let lines: Vec<&str> = hits
                .iter()
                .filter(|(p, _)| p == pattern)
                .map(|(_, line)| line.as_str())
                .collect();
            (!lines.is_empty()).then(|| format!("Found {}:\n{}", pattern, lines.join("\n")))
        })
        .collect();

    if groups.is_empty() {
        Ok("No tokens found of any type".to_string())
    } else {
        Ok(groups.join("\n\n"))
    }
}

pub fn locals(ctx: &Context, _: &str) -> Result<String> {
    let Some(frames) = walker::frames(&ctx.runtime, ThreadSelector::Main, walk_cap(ctx)) else {
        return Ok("no non-module frames found".to_string());
    };
    let mut out = String::new();
    for (i, frame) in frames.iter().filter(|f| !f.is_module_level()).enumerate() {
        out.push_str(&format!("frame {}:  {}\n", i + 1, frame.qualname()));
        out.push_str(&pformat_mapping(&frame.locals().snapshot()));
        out.push('\n');
    }
    if out.is_empty() {
        out.push_str("no non-module frames found");
    }
    Ok(out)
}

pub fn globals(ctx: &Context, _: &str) -> Result<String> {
    Ok(format!(
        "{}\n",
        pformat_mapping(&ctx.runtime.globals().snapshot())
    ))
}

/// Every thread, every frame, every local: by name, then through the value.
pub fn findvar(ctx: &Context, payload: &str) -> Result<String> {
    let target = payload.trim();
    let mut results = Vec::new();

    for (tid, top) in ctx.runtime.threads().current_frames() {
        for frame in walker::walk(top, walk_cap(ctx)) {
            if frame.qualname().split('.').any(is_internal_name) {
                continue;
            }
            let location = format!(
                "[TID {}] {} ({}:{})",
                tid,
                frame.qualname(),
                frame.code().filename,
                frame.lineno()
            );
            for (name, value) in frame.locals().snapshot() {
                if name.contains(target) {
                    results.push(format!("{}: {} = {}", location, name, value.repr()));
                }
                for hit in scan(&value, &name, scanner::name_or_text_contains::<Value>(target)) {
                    results.push(format!("{}: {} = {}", location, hit.path, hit.repr));
                }
            }
        }
    }

    if results.is_empty() {
        Err(Error::NotFound(format!(
            "Variable or attribute '{}' not found",
            target
        )))
    } else {
        Ok(results.join("\n"))
    }
}

pub fn fnames(ctx: &Context, _: &str) -> Result<String> {
    let frames = walker::frames(&ctx.runtime, ThreadSelector::Main, walk_cap(ctx))
        .ok_or_else(|| Error::NotFound("No frames found".to_string()))?;
    let lines: Vec<String> = frames
        .iter()
        .enumerate()
        .map(|(i, f)| format!("[{}] {}", i, f.qualname()))
        .collect();
    Ok(format!("Stack frames:\n{}", lines.join("\n")))
}

pub fn fsdump(ctx: &Context, _: &str) -> Result<String> {
    let frames = walker::frames(&ctx.runtime, ThreadSelector::Main, walk_cap(ctx))
        .ok_or_else(|| Error::NotFound(FrameIndexError::NoFrames.to_string()))?;
    for (i, frame) in frames.iter().enumerate() {
        dump_unit(ctx, &format!("{}_{}", i, frame.name()), frame.code())?;
    }
    Ok(format!("Dumped {} frames", frames.len()))
}

pub fn fdump(ctx: &Context, payload: &str) -> Result<String> {
    let index = frame_index(payload)?;
    let frame = main_frame(ctx, index)?;
    let path = dump_unit(ctx, frame.name(), frame.code())?;
    Ok(format!("Frame {} dumped to {}", index, path))
}

pub fn fdis(ctx: &Context, payload: &str) -> Result<String> {
    let frame = main_frame(ctx, frame_index(payload)?)?;
    Ok(encoder::disassemble(frame.code()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentSettings;
    use crate::runtime::{CodeUnit, Function, Module, Namespace, Runtime, TypeDef};
    use tempfile::tempdir;

    fn ctx_with(settings: AgentSettings) -> Context {
        let runtime = Runtime::new(Module::new("__main__"));
        runtime.threads().register(1, "MainThread", false);
        runtime.threads().set_main(1);
        runtime.threads().register(2, "_stackscope_server", true);
        Context::new(Arc::new(runtime), settings)
    }

    fn ctx() -> Context {
        ctx_with(AgentSettings::default())
    }

    fn func(name: &str) -> Value {
        Value::Function(Arc::new(Function::new(
            "__main__",
            CodeUnit::builder(name, "app.py", 3).build(),
        )))
    }

    #[test]
    fn test_getvar_excludes_types_and_callables() {
        let ctx = ctx();
        ctx.runtime.set_global("count", Value::Int(0));
        ctx.runtime.set_global("main", func("main"));
        ctx.runtime
            .set_global("Bot", Value::Type(Arc::new(TypeDef::new("Bot", "__main__"))));

        assert_eq!(
            getvar(&ctx, "count").unwrap(),
            "count:\n  Type: int\n  Value: 0"
        );
        assert_eq!(
            getvar(&ctx, "main").unwrap_err().to_string(),
            "Variable 'main' not found"
        );
        assert!(getvar(&ctx, "Bot").is_err());
    }

    #[test]
    fn test_objects_type() {
        let ctx = ctx();
        ctx.runtime.set_global("a", Value::Int(1));
        ctx.runtime.set_global("flag", Value::Bool(true));
        ctx.runtime.set_global("s", Value::str("x"));

        let out = objects_type(&ctx, "int").unwrap();
        assert!(out.starts_with("Variables of type int in module:\na:"));
        assert!(!out.contains("flag"));
        assert!(objects_type(&ctx, "float")
            .unwrap()
            .ends_with("No variables of type float found."));
        assert_eq!(
            objects_type(&ctx, "Widget").unwrap_err().to_string(),
            "Error: Type 'Widget' is not a valid built-in type."
        );
    }

    #[test]
    fn test_search_instantiates_types() {
        let ctx = ctx();
        let config = TypeDef::new("Config", "__main__")
            .with_defaults(vec![("db", Value::dict(vec![("host", Value::str("db1"))]))]);
        ctx.runtime.set_global("Config", Value::Type(Arc::new(config)));
        ctx.runtime.set_global(
            "Strict",
            Value::Type(Arc::new(TypeDef::new("Strict", "__main__").requiring(&["url"]))),
        );

        assert_eq!(search(&ctx, "Config.db").unwrap(), "{'host': 'db1'}");
        assert_eq!(
            search(&ctx, "nothing.here").unwrap_err().to_string(),
            "'nothing' not found"
        );
        let err = search(&ctx, "Strict.url").unwrap_err();
        assert!(!err.is_literal());
        assert!(err.to_string().contains("missing 1 required positional argument: 'url'"));
    }

    #[test]
    fn test_searchattr() {
        let ctx = ctx();
        let class = TypeDef::new("Config", "__main__")
            .with_attr("retries", Value::Int(3))
            .with_defaults(vec![("token", Value::str("t"))]);
        ctx.runtime.set_global("Config", Value::Type(Arc::new(class)));

        let out = searchattr(&ctx, "Config").unwrap();
        assert!(out.starts_with("Class 'Config' attributes:\n{'__module__': '__main__', 'retries': 3}"));
        assert!(out.ends_with("Instance attributes:\n{'token': 't'}\n"));
        assert_eq!(
            searchattr(&ctx, "Missing").unwrap_err().to_string(),
            "Class 'Missing' not found"
        );
    }

    #[test]
    fn test_exec_gate() {
        let gated = ctx_with(AgentSettings {
            exec_enabled: false,
            ..AgentSettings::default()
        });
        assert!(matches!(exec(&gated, "x = 1"), Err(Error::ExecDisabled)));
        assert!(gated.runtime.get_global("x").is_none());

        let enabled = ctx();
        assert_eq!(exec(&enabled, "x = 1").unwrap(), "Code injected successfully");
        assert!(matches!(enabled.runtime.get_global("x"), Some(Value::Int(1))));
    }

    struct RecordingInjector {
        seen: Arc<std::sync::Mutex<Vec<String>>>,
        refuse: bool,
    }

    impl runtime_exec::CodeInjector for RecordingInjector {
        fn exec(&self, source: &str, globals: &Namespace) -> Result<()> {
            self.seen.lock().unwrap().push(source.to_string());
            if self.refuse {
                return Err(Error::fault("PermissionError", "injection refused by host"));
            }
            globals.set("injected", Value::Bool(true));
            Ok(())
        }
    }

    #[test]
    fn test_exec_routes_through_installed_injector() {
        for refuse in [false, true] {
            let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
            let runtime = Runtime::new(Module::new("__main__")).with_injector(Box::new(
                RecordingInjector {
                    seen: Arc::clone(&seen),
                    refuse,
                },
            ));
            let ctx = Context::new(Arc::new(runtime), AgentSettings::default());

            let result = exec(&ctx, "while True: pass");
            assert_eq!(*seen.lock().unwrap(), vec!["while True: pass".to_string()]);
            if refuse {
                assert_eq!(
                    result.unwrap_err().to_string(),
                    "PermissionError: injection refused by host"
                );
                assert!(ctx.runtime.get_global("injected").is_none());
            } else {
                assert_eq!(result.unwrap(), "Code injected successfully");
                assert!(matches!(ctx.runtime.get_global("injected"), Some(Value::Bool(true))));
            }
        }
    }

    #[test]
    fn test_deeply_nested_value_is_reported() {
        let ctx = ctx();
        let mut source = String::from("x = []\n");
        for _ in 0..100_000 {
            source.push_str("x = [x]\n");
        }
        assert_eq!(exec(&ctx, &source).unwrap(), "Code injected successfully");

        let shown = getvar(&ctx, "x").unwrap();
        assert!(shown.starts_with("x:\n  Type: list\n  Value: [[["), "{}", &shown[..40]);
        assert!(shown.contains("[...]"));
        assert!(globals(&ctx, "").unwrap().starts_with("{'x': [[["));
        assert!(objects_type(&ctx, "list").unwrap().contains("[...]"));

        assert_eq!(exec(&ctx, "x = 0").unwrap(), "Code injected successfully");
        assert_eq!(getvar(&ctx, "x").unwrap(), "x:\n  Type: int\n  Value: 0");
    }

    #[test]
    fn test_threads_hide_agent() {
        let out = threads(&ctx(), "").unwrap();
        assert_eq!(out, "Active threads:\n[1] MainThread (daemon=False)");
    }

    #[test]
    fn test_tokens_group_by_pattern() {
        let ctx = ctx();
        ctx.runtime
            .set_global("bot", Value::str("12345678:abcdefghij0123456789ABCDEFGHI12"));
        ctx.runtime.set_global("nope", Value::str("not-a-token"));
        ctx.runtime.set_global(
            "cfg",
            Value::dict(vec![("leak", Value::str("1234567890:abcd_-12"))]),
        );
        let class = TypeDef::new("Settings", "__main__")
            .with_defaults(vec![("api", Value::str("987654321:zzzzzzzz"))]);
        ctx.runtime.set_global("Settings", Value::Type(Arc::new(class)));

        let out = tokens(&ctx, "").unwrap();
        assert_eq!(
            out,
            "Found Telegram bot tokens:\n\
             Variable bot: 12345678:abcdefghij0123456789ABCDEFGHI12\n\n\
             Found leak api tokens:\n\
             Variable cfg['leak']: 1234567890:abcd_-12\n\
             Class Settings.api: 987654321:zzzzzzzz"
        );
        assert!(!out.contains("not-a-token"));
    }

    #[test]
    fn test_tokens_none_found() {
        assert_eq!(tokens(&ctx(), "").unwrap(), "No tokens found of any type");
    }

    #[test]
    fn test_frame_commands() {
        let dir = tempdir().unwrap();
        let ctx = ctx_with(AgentSettings {
            dump_directory: dir.path().to_path_buf(),
            ..AgentSettings::default()
        });
        let module_code = CodeUnit::builder("<module>", "app.py", 1).build();
        let main_code = CodeUnit::builder("main", "app.py", 4).build();
        let _m = ctx.runtime.enter(1, module_code, Namespace::new()).unwrap();
        let _f = ctx
            .runtime
            .enter(1, main_code, Namespace::from_pairs([("n", Value::Int(5))]))
            .unwrap();

        assert_eq!(fnames(&ctx, "").unwrap(), "Stack frames:\n[0] main\n[1] <module>");
        assert_eq!(locals(&ctx, "").unwrap(), "frame 1:  main\n{'n': 5}\n");
        assert_eq!(
            fdump(&ctx, "5").unwrap_err().to_string(),
            "Error: Frame index 5 out of range (max index: 1)"
        );
        assert_eq!(
            fdis(&ctx, "x").unwrap_err().to_string(),
            "Error: Frame index must be an integer"
        );
        assert!(fdump(&ctx, "0").unwrap().starts_with("Frame 0 dumped to "));
        assert!(fdump(&ctx, " +1").unwrap().starts_with("Frame 1 dumped to "));
        assert!(dir.path().join("main.scu").exists());
        assert_eq!(fsdump(&ctx, "").unwrap(), "Dumped 2 frames");
        assert!(dir.path().join("1__module_.scu").exists());
        assert!(capture(&ctx, "").unwrap().ends_with("module.scu"));
    }

    #[test]
    fn test_no_frames() {
        let ctx = ctx();
        assert_eq!(fnames(&ctx, "").unwrap_err().to_string(), "No frames found");
        assert_eq!(
            fdump(&ctx, "0").unwrap_err().to_string(),
            "Error: Main thread frame not found"
        );
        assert_eq!(
            capture(&ctx, "").unwrap_err().to_string(),
            "No module frame found"
        );
    }

    #[test]
    fn test_dis_and_dump_targets() {
        let dir = tempdir().unwrap();
        let ctx = ctx_with(AgentSettings {
            dump_directory: dir.path().to_path_buf(),
            ..AgentSettings::default()
        });
        ctx.runtime.set_global("main", func("main"));
        ctx.runtime.set_global("n", Value::Int(1));

        assert!(dis(&ctx, "main").unwrap().is_empty());
        assert_eq!(dis(&ctx, "n").unwrap(), "Invalid object for disassembly");
        assert!(matches!(dump(&ctx, "n"), Err(Error::InvalidTarget(_))));
        assert!(!dir.path().join("n.scu").exists());
        assert!(dump(&ctx, "main").unwrap().starts_with("Bytecode dumped to "));
        assert!(dir.path().join("main.scu").exists());
        assert_eq!(
            dump(&ctx, "_stackscope_agent").unwrap(),
            "Skipped agent-internal object"
        );
    }
}
