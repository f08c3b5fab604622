//! The one place where code runs inside the host runtime.
//!
//! `exec` text and no-argument construction both go through here, so a host
//! can swap the injector (or refuse to install one) without touching the
//! command dispatcher.

use std::sync::Arc;

use super::value::{release, Constructor, Instance, TypeDef};
use super::{attr, Namespace, Runtime, Value};
use crate::{Error, Result};

/// Brackets may nest this deep inside one expression.
pub const MAX_EXPR_NESTING: usize = 200;

/// Executes source text against a namespace.
pub trait CodeInjector: Send + Sync {
    fn exec(&self, source: &str, globals: &Namespace) -> Result<()>;
}

/// Run `source` in the entry module's namespace with the runtime's injector.
pub fn exec_source(runtime: &Runtime, source: &str) -> Result<()> {
    tracing::info!(bytes = source.len(), "Injecting code into entry module");
    runtime.injector().exec(source, runtime.globals())
}

/// Call `class` with no arguments.
pub fn instantiate(class: &Arc<TypeDef>) -> Result<Value> {
    match &class.constructor {
        Constructor::Defaults(defaults) => Ok(Value::Instance(Arc::new(Instance {
            class: Arc::clone(class),
            attrs: Namespace::from_pairs(defaults.iter().cloned()),
        }))),
        Constructor::RequiresArgs(params) => {
            let quoted: Vec<String> = params.iter().map(|p| format!("'{}'", p)).collect();
            let listed = match quoted.len() {
                0 => String::new(),
                1 => quoted[0].clone(),
                n => format!("{} and {}", quoted[..n - 1].join(", "), quoted[n - 1]),
            };
            let noun = if params.len() == 1 { "argument" } else { "arguments" };
            Err(Error::fault(
                "TypeError",
                format!(
                    "{}.__init__() missing {} required positional {}: {}",
                    class.name,
                    params.len(),
                    noun,
                    listed
                ),
            ))
        }
    }
}

/// Line-oriented statement injector: `name = <expr>`, `del name`, `pass`.
///
/// Expressions are literals (numbers, quoted strings, `b'..'`, `True`,
/// `False`, `None`, lists, tuples, dicts, sets) or dotted references to
/// existing globals.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssignmentInjector;

impl CodeInjector for AssignmentInjector {
    fn exec(&self, source: &str, globals: &Namespace) -> Result<()> {
        for (i, raw) in source.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line == "pass" {
                continue;
            }
            match parse_statement(line, i + 1, globals)? {
                Statement::Assign(name, value) => globals.set(name, value),
                Statement::Delete(name, lineno) => match globals.remove(&name) {
                    Some(old) => release(old),
                    None => {
                        return Err(Error::fault(
                            "NameError",
                            format!("name '{}' is not defined (line {})", name, lineno),
                        ));
                    }
                },
            }
        }
        Ok(())
    }
}

enum Statement {
    Assign(String, Value),
    Delete(String, usize),
}

fn syntax_error(lineno: usize, line: &str) -> Error {
    Error::fault("SyntaxError", format!("invalid syntax (line {}): {}", lineno, line))
}

fn parse_statement(line: &str, lineno: usize, globals: &Namespace) -> Result<Statement> {
    if let Some(target) = line.strip_prefix("del ") {
        let target = target.trim();
        if !attr::is_identifier(target) {
            return Err(syntax_error(lineno, line));
        }
        return Ok(Statement::Delete(target.to_string(), lineno));
    }

    let Some((target, expr)) = line.split_once('=') else {
        return Err(syntax_error(lineno, line));
    };
    let target = target.trim();
    if !attr::is_identifier(target) || expr.starts_with('=') {
        return Err(syntax_error(lineno, line));
    }

    let mut parser = ExprParser {
        src: expr.as_bytes(),
        pos: 0,
        depth: 0,
        lineno,
        globals,
    };
    let value = parser
        .expr()
        .map_err(|e| e.unwrap_or_else(|| syntax_error(lineno, line)))?;
    parser.skip_ws();
    if parser.pos != parser.src.len() {
        return Err(syntax_error(lineno, line));
    }
    Ok(Statement::Assign(target.to_string(), value))
}

/// `Err(None)` is a plain syntax error; `Err(Some(e))` carries a more
/// specific fault (e.g. an unknown name).
type ParseResult<T> = std::result::Result<T, Option<Error>>;

struct ExprParser<'a> {
    src: &'a [u8],
    pos: usize,
    depth: usize,
    lineno: usize,
    globals: &'a Namespace,
}

impl ExprParser<'_> {
    fn skip_ws(&mut self) {
        while self.pos < self.src.len() && self.src[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn eat(&mut self, b: u8) -> bool {
        self.skip_ws();
        if self.peek() == Some(b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expr(&mut self) -> ParseResult<Value> {
        self.skip_ws();
        match self.peek() {
            Some(b'[') => self.nested(|p| {
                let (items, _) = p.items(b']')?;
                Ok(Value::list(items))
            }),
            Some(b'(') => self.nested(|p| {
                let (mut items, trailing_comma) = p.items(b')')?;
                if items.len() == 1 && !trailing_comma {
                    Ok(items.remove(0))
                } else {
                    Ok(Value::tuple(items))
                }
            }),
            Some(b'{') => self.nested(Self::brace),
            Some(b'\'') | Some(b'"') => self.string().map(Value::str),
            Some(b'b') if matches!(self.src.get(self.pos + 1), Some(b'\'') | Some(b'"')) => {
                self.pos += 1;
                self.string().map(Value::bytes)
            }
            Some(c) if c == b'-' || c.is_ascii_digit() => self.number(),
            Some(c) if c == b'_' || c.is_ascii_alphabetic() => self.reference(),
            _ => Err(None),
        }
    }

    /// Step past an opening bracket and parse its contents one level deeper.
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        if self.depth >= MAX_EXPR_NESTING {
            return Err(Some(Error::fault(
                "SyntaxError",
                format!("too many nested parentheses (line {})", self.lineno),
            )));
        }
        self.pos += 1;
        self.depth += 1;
        let parsed = parse(self);
        self.depth -= 1;
        parsed
    }

    /// Comma-separated expressions up to `close`; reports a trailing comma.
    fn items(&mut self, close: u8) -> ParseResult<(Vec<Value>, bool)> {
        let mut items = Vec::new();
        let mut trailing_comma = false;
        loop {
            if self.eat(close) {
                return Ok((items, trailing_comma));
            }
            items.push(self.expr()?);
            trailing_comma = self.eat(b',');
            if !trailing_comma {
                return if self.eat(close) {
                    Ok((items, false))
                } else {
                    Err(None)
                };
            }
        }
    }

    fn brace(&mut self) -> ParseResult<Value> {
        if self.eat(b'}') {
            return Ok(Value::dict::<Value>(Vec::new()));
        }
        let first = self.expr()?;
        if self.eat(b':') {
            let mut pairs = vec![(first, self.expr()?)];
            while self.eat(b',') {
                if self.eat(b'}') {
                    return Ok(Value::dict(pairs));
                }
                let k = self.expr()?;
                if !self.eat(b':') {
                    return Err(None);
                }
                pairs.push((k, self.expr()?));
            }
            return if self.eat(b'}') { Ok(Value::dict(pairs)) } else { Err(None) };
        }
        let mut items = vec![first];
        while self.eat(b',') {
            if self.eat(b'}') {
                return Ok(Value::set(items));
            }
            items.push(self.expr()?);
        }
        if self.eat(b'}') { Ok(Value::set(items)) } else { Err(None) }
    }

    fn string(&mut self) -> ParseResult<String> {
        let quote = self.peek().ok_or(None)?;
        self.pos += 1;
        let mut out = Vec::new();
        while let Some(c) = self.peek() {
            self.pos += 1;
            match c {
                c if c == quote => {
                    return String::from_utf8(out).map_err(|_| None);
                }
                b'\\' => {
                    let esc = self.peek().ok_or(None)?;
                    self.pos += 1;
                    out.push(match esc {
                        b'n' => b'\n',
                        b't' => b'\t',
                        b'r' => b'\r',
                        b'0' => 0,
                        other => other,
                    });
                }
                other => out.push(other),
            }
        }
        Err(None)
    }

    fn number(&mut self) -> ParseResult<Value> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || matches!(c, b'.' | b'e' | b'E' | b'_') {
                self.pos += 1;
            } else if matches!(c, b'+' | b'-')
                && matches!(self.src.get(self.pos - 1), Some(b'e') | Some(b'E'))
            {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text: String = std::str::from_utf8(&self.src[start..self.pos])
            .map_err(|_| None)?
            .replace('_', "");
        if let Ok(n) = text.parse::<i64>() {
            return Ok(Value::Int(n));
        }
        text.parse::<f64>().map(Value::Float).map_err(|_| None)
    }

    fn reference(&mut self) -> ParseResult<Value> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == b'_' || c == b'.' || c.is_ascii_alphanumeric() {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).map_err(|_| None)?;
        match text {
            "None" => return Ok(Value::None),
            "True" => return Ok(Value::Bool(true)),
            "False" => return Ok(Value::Bool(false)),
            _ => {}
        }
        let parts = attr::split_dotted(text).map_err(|_| None)?;
        let mut current = self.globals.get(parts[0]).ok_or_else(|| {
            Some(Error::fault(
                "NameError",
                format!("name '{}' is not defined", parts[0]),
            ))
        })?;
        for part in &parts[1..] {
            current = attr::getattr(&current, part).map_err(Some)?;
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> (Namespace, Result<()>) {
        let ns = Namespace::new();
        let result = AssignmentInjector.exec(source, &ns);
        (ns, result)
    }

    #[test]
    fn test_assign_literals() {
        let (ns, result) = run(
            "x = 1\nname = 'hi'\n# comment\nratio = -2.5\nflags = [True, None, b'ok']\npass",
        );
        result.unwrap();
        assert!(matches!(ns.get("x"), Some(Value::Int(1))));
        assert_eq!(ns.get("name").unwrap().as_str(), Some("hi"));
        assert!(matches!(ns.get("ratio"), Some(Value::Float(f)) if f == -2.5));
        assert_eq!(ns.get("flags").unwrap().repr(), "[True, None, b'ok']");
    }

    #[test]
    fn test_containers_and_references() {
        let (ns, result) = run("a = {'k': (1,), 'v': {2, 3}}\nb = a\nt = (4)");
        result.unwrap();
        assert_eq!(ns.get("a").unwrap().repr(), "{'k': (1,), 'v': {2, 3}}");
        assert_eq!(ns.get("a").unwrap().identity(), ns.get("b").unwrap().identity());
        assert!(matches!(ns.get("t"), Some(Value::Int(4))));
    }

    #[test]
    fn test_delete() {
        let (ns, result) = run("x = 1\ndel x");
        result.unwrap();
        assert!(!ns.contains("x"));

        let (_, result) = run("del nothing");
        assert!(result.unwrap_err().to_string().starts_with("NameError"));
    }

    #[test]
    fn test_syntax_error_stops_at_line() {
        let (ns, result) = run("x = 1\nwhile True: pass\ny = 2");
        let err = result.unwrap_err();
        assert!(err.to_string().contains("line 2"));
        assert!(ns.contains("x"));
        assert!(!ns.contains("y"));
    }

    #[test]
    fn test_nesting_limit() {
        let ok = format!("x = {}{}", "[".repeat(MAX_EXPR_NESTING), "]".repeat(MAX_EXPR_NESTING));
        let (ns, result) = run(&ok);
        result.unwrap();
        assert!(ns.contains("x"));

        let deep = format!("y = {}{}", "[".repeat(200_000), "]".repeat(200_000));
        let (ns, result) = run(&format!("a = 1\n{}", deep));
        assert_eq!(
            result.unwrap_err().to_string(),
            "SyntaxError: too many nested parentheses (line 2)"
        );
        assert!(ns.contains("a"));
        assert!(!ns.contains("y"));

        let (_, result) = run(&format!("z = {}", "({".repeat(MAX_EXPR_NESTING)));
        assert!(result.unwrap_err().to_string().contains("too many nested parentheses"));
    }

    #[test]
    fn test_unknown_reference() {
        let (_, result) = run("x = undefined_thing");
        assert_eq!(
            result.unwrap_err().to_string(),
            "NameError: name 'undefined_thing' is not defined"
        );
    }

    #[test]
    fn test_instantiate_defaults_and_required_args() {
        let plain = Arc::new(TypeDef::new("Cfg", "__main__").with_defaults(vec![("debug", Value::Bool(false))]));
        match instantiate(&plain).unwrap() {
            Value::Instance(inst) => assert!(inst.attrs.contains("debug")),
            other => panic!("unexpected {:?}", other),
        }

        let strict = Arc::new(TypeDef::new("Client", "__main__").requiring(&["host", "port"]));
        let err = instantiate(&strict).unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: Client.__init__() missing 2 required positional arguments: 'host' and 'port'"
        );
    }
}
