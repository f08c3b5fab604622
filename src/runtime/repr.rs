use super::{read_lock, Value};

const PFORMAT_WIDTH: usize = 80;

/// Containers nested deeper than this print as an elided marker.
pub const MAX_REPR_DEPTH: usize = 200;

pub fn repr(value: &Value) -> String {
    let mut out = String::new();
    let mut active = Vec::new();
    write_repr(value, &mut out, &mut active);
    out
}

fn write_repr(value: &Value, out: &mut String, active: &mut Vec<usize>) {
    // Containers currently being rendered further up are elided, so
    // self-referencing structures terminate. So is anything past the depth cap.
    if let Some(id) = value.identity() {
        if active.len() >= MAX_REPR_DEPTH || active.contains(&id) {
            out.push_str(match value {
                Value::List(_) => "[...]",
                Value::Dict(_) | Value::Set(_) => "{...}",
                Value::Tuple(_) => "(...)",
                _ => "...",
            });
            return;
        }
    }

    match value {
        Value::None => out.push_str("None"),
        Value::Bool(true) => out.push_str("True"),
        Value::Bool(false) => out.push_str("False"),
        Value::Int(n) => out.push_str(&n.to_string()),
        Value::Float(f) => out.push_str(&repr_float(*f)),
        Value::Str(s) => out.push_str(&repr_str(s)),
        Value::Bytes(b) => out.push_str(&repr_bytes(b)),
        Value::List(items) => {
            let items = read_lock(items).clone();
            write_seq(value, &items, "[", "]", false, out, active);
        }
        Value::Tuple(items) => {
            write_seq(value, items, "(", ")", items.len() == 1, out, active);
        }
        Value::Set(items) => {
            let items = read_lock(items).clone();
            if items.is_empty() {
                out.push_str("set()");
            } else {
                write_seq(value, &items, "{", "}", false, out, active);
            }
        }
        Value::Dict(pairs) => {
            let pairs = read_lock(pairs).clone();
            active.extend(value.identity());
            out.push('{');
            for (i, (k, v)) in pairs.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_repr(k, out, active);
                out.push_str(": ");
                write_repr(v, out, active);
            }
            out.push('}');
            active.pop();
        }
        Value::Instance(inst) => out.push_str(&format!(
            "<{}.{} object at {:#x}>",
            inst.class.module,
            inst.class.name,
            value.identity().unwrap_or(0)
        )),
        Value::Type(t) => out.push_str(&format!("<class '{}.{}'>", t.module, t.name)),
        Value::Function(f) => out.push_str(&format!(
            "<function {} at {:#x}>",
            f.qualname,
            value.identity().unwrap_or(0)
        )),
        Value::Method(m) => {
            out.push_str(&format!("<bound method {} of ", m.function.qualname));
            write_repr(&m.receiver, out, active);
            out.push('>');
        }
        Value::Module(m) => out.push_str(&format!("<module '{}'>", m.name)),
        Value::Thread(t) => {
            let state = if t.daemon { "started daemon" } else { "started" };
            out.push_str(&format!("<Thread({}, {} {})>", t.name, state, t.ident));
        }
    }
}

fn write_seq(
    container: &Value,
    items: &[Value],
    open: &str,
    close: &str,
    trailing_comma: bool,
    out: &mut String,
    active: &mut Vec<usize>,
) {
    active.extend(container.identity());
    out.push_str(open);
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_repr(item, out, active);
    }
    if trailing_comma {
        out.push(',');
    }
    out.push_str(close);
    active.pop();
}

pub fn repr_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        (if f > 0.0 { "inf" } else { "-inf" }).to_string()
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

/// Quote a string the way the runtime prints it: single quotes unless the
/// text contains a single quote and no double quote.
pub fn repr_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

pub fn repr_bytes(b: &[u8]) -> String {
    let mut out = String::with_capacity(b.len() + 3);
    out.push_str("b'");
    for &byte in b {
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'\'' => out.push_str("\\'"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(byte as char),
            _ => out.push_str(&format!("\\x{:02x}", byte)),
        }
    }
    out.push('\'');
    out
}

/// Pretty-print a name mapping: keys sorted, one line when it fits,
/// otherwise one entry per line.
pub fn pformat_mapping(entries: &[(String, Value)]) -> String {
    let mut rendered: Vec<(String, String)> = entries
        .iter()
        .map(|(k, v)| (repr_str(k), v.repr()))
        .collect();
    rendered.sort_by(|a, b| a.0.cmp(&b.0));

    let items: Vec<String> = rendered
        .iter()
        .map(|(k, v)| format!("{}: {}", k, v))
        .collect();

    let single = format!("{{{}}}", items.join(", "));
    if single.chars().count() <= PFORMAT_WIDTH {
        return single;
    }
    format!("{{{}}}", items.join(",\n "))
}
