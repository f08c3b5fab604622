use std::sync::Arc;

use super::value::BoundMethod;
use super::{Runtime, Value};
use crate::{Error, Result};

/// Attribute lookup with the runtime's resolution order: instance attributes,
/// then class attributes (functions bind to the receiver).
pub fn getattr(value: &Value, name: &str) -> Result<Value> {
    let found = match value {
        Value::Instance(inst) => match name {
            "__class__" => Some(Value::Type(Arc::clone(&inst.class))),
            _ => inst.attrs.get(name).or_else(|| {
                inst.class.attrs.get(name).map(|attr| match attr {
                    Value::Function(function) => Value::Method(Arc::new(BoundMethod {
                        receiver: value.clone(),
                        function,
                    })),
                    other => other,
                })
            }),
        },
        Value::Type(t) => match name {
            "__name__" => Some(Value::str(&t.name)),
            "__module__" => Some(Value::str(&t.module)),
            _ => t.attrs.get(name),
        },
        Value::Module(m) => match name {
            "__name__" => Some(Value::str(&m.name)),
            _ => m.globals.get(name),
        },
        Value::Function(f) => match name {
            "__name__" => Some(Value::str(&f.name)),
            "__qualname__" => Some(Value::str(&f.qualname)),
            "__module__" => Some(Value::str(&f.module)),
            _ => None,
        },
        Value::Method(m) => match name {
            "__self__" => Some(m.receiver.clone()),
            "__func__" => Some(Value::Function(Arc::clone(&m.function))),
            "__name__" => Some(Value::str(&m.function.name)),
            _ => None,
        },
        Value::Thread(t) => match name {
            "name" => Some(Value::str(&t.name)),
            "ident" => Some(Value::Int(t.ident as i64)),
            "daemon" => Some(Value::Bool(t.daemon)),
            _ => None,
        },
        _ => None,
    };
    found.ok_or_else(|| Error::attribute(&value.type_name(), name))
}

pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_alphanumeric())
}

/// Split a dotted expression, rejecting anything that is not `ident(.ident)*`.
pub fn split_dotted(expr: &str) -> Result<Vec<&str>> {
    let parts: Vec<&str> = expr.trim().split('.').collect();
    if parts.iter().all(|p| is_identifier(p)) {
        Ok(parts)
    } else {
        Err(Error::fault(
            "SyntaxError",
            format!("invalid syntax: {:?}", expr.trim()),
        ))
    }
}

/// Resolve `a.b.c` against the entry module's globals.
pub fn resolve_expression(runtime: &Runtime, expr: &str) -> Result<Value> {
    let parts = split_dotted(expr)?;
    let mut current = runtime.get_global(parts[0]).ok_or_else(|| {
        Error::fault("NameError", format!("name '{}' is not defined", parts[0]))
    })?;
    for part in &parts[1..] {
        current = getattr(&current, part)?;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{CodeUnit, Function, Instance, Module, Namespace, TypeDef};

    fn class_with_method() -> Arc<TypeDef> {
        let code = CodeUnit::builder("connect", "bot.py", 3)
            .qualname("Bot.connect")
            .build();
        Arc::new(
            TypeDef::new("Bot", "__main__")
                .with_method(Arc::new(Function::new("__main__", code)))
                .with_attr("retries", Value::Int(3)),
        )
    }

    #[test]
    fn test_instance_attrs_shadow_class_attrs() {
        let class = class_with_method();
        let inst = Value::Instance(Arc::new(Instance {
            class,
            attrs: Namespace::from_pairs([("retries", Value::Int(9))]),
        }));

        assert!(matches!(getattr(&inst, "retries").unwrap(), Value::Int(9)));
        assert!(matches!(getattr(&inst, "connect").unwrap(), Value::Method(_)));
        assert!(matches!(getattr(&inst, "__class__").unwrap(), Value::Type(_)));
    }

    #[test]
    fn test_missing_attribute_is_fault() {
        let err = getattr(&Value::Int(1), "real").unwrap_err();
        assert_eq!(
            err.to_string(),
            "AttributeError: 'int' object has no attribute 'real'"
        );
    }

    #[test]
    fn test_resolve_expression_walks_modules() {
        let runtime = Runtime::new(Module::new("__main__"));
        let helper = Module::new("helpers");
        helper.globals.set("VERSION", Value::str("1.2"));
        runtime.set_global("helpers", Value::Module(Arc::new(helper)));
        runtime.set_global("Bot", Value::Type(class_with_method()));

        let v = resolve_expression(&runtime, "helpers.VERSION").unwrap();
        assert_eq!(v.as_str(), Some("1.2"));
        assert!(matches!(
            resolve_expression(&runtime, "Bot.connect").unwrap(),
            Value::Function(_)
        ));
        assert!(resolve_expression(&runtime, "missing").is_err());
        assert!(resolve_expression(&runtime, "a b").is_err());
    }

    #[test]
    fn test_identifiers() {
        assert!(is_identifier("_private"));
        assert!(is_identifier("x1"));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("a-b"));
    }
}
