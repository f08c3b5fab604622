use std::sync::{Arc, PoisonError, RwLock};

use super::code::CodeUnit;
use super::{read_lock, Namespace};

/// A value living in the host runtime.
///
/// Leaves (`None` through `Bytes`) are immutable and carry no identity.
/// Every other variant is a shared handle whose identity is the address of
/// its allocation.
#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Bytes(Arc<[u8]>),
    List(Arc<RwLock<Vec<Value>>>),
    Tuple(Arc<[Value]>),
    Set(Arc<RwLock<Vec<Value>>>),
    Dict(Arc<RwLock<Vec<(Value, Value)>>>),
    Instance(Arc<Instance>),
    Type(Arc<TypeDef>),
    Function(Arc<Function>),
    Method(Arc<BoundMethod>),
    Module(Arc<Module>),
    Thread(Arc<ThreadHandle>),
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Self {
        Value::Str(Arc::from(s.as_ref()))
    }

    pub fn bytes(b: impl AsRef<[u8]>) -> Self {
        Value::Bytes(Arc::from(b.as_ref()))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Arc::new(RwLock::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Arc::from(items))
    }

    pub fn set(items: Vec<Value>) -> Self {
        Value::Set(Arc::new(RwLock::new(items)))
    }

    pub fn dict<K: Into<Value>>(pairs: Vec<(K, Value)>) -> Self {
        let pairs = pairs.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Value::Dict(Arc::new(RwLock::new(pairs)))
    }

    /// Address of the shared allocation; `None` for leaves.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Value::None
            | Value::Bool(_)
            | Value::Int(_)
            | Value::Float(_)
            | Value::Str(_)
            | Value::Bytes(_) => None,
            Value::List(v) | Value::Set(v) => Some(Arc::as_ptr(v) as *const () as usize),
            Value::Tuple(v) => Some(Arc::as_ptr(v) as *const () as usize),
            Value::Dict(v) => Some(Arc::as_ptr(v) as *const () as usize),
            Value::Instance(v) => Some(Arc::as_ptr(v) as usize),
            Value::Type(v) => Some(Arc::as_ptr(v) as usize),
            Value::Function(v) => Some(Arc::as_ptr(v) as usize),
            Value::Method(v) => Some(Arc::as_ptr(v) as usize),
            Value::Module(v) => Some(Arc::as_ptr(v) as usize),
            Value::Thread(v) => Some(Arc::as_ptr(v) as usize),
        }
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::None => "NoneType".to_string(),
            Value::Bool(_) => "bool".to_string(),
            Value::Int(_) => "int".to_string(),
            Value::Float(_) => "float".to_string(),
            Value::Str(_) => "str".to_string(),
            Value::Bytes(_) => "bytes".to_string(),
            Value::List(_) => "list".to_string(),
            Value::Tuple(_) => "tuple".to_string(),
            Value::Set(_) => "set".to_string(),
            Value::Dict(_) => "dict".to_string(),
            Value::Instance(i) => i.class.name.clone(),
            Value::Type(_) => "type".to_string(),
            Value::Function(_) => "function".to_string(),
            Value::Method(_) => "method".to_string(),
            Value::Module(_) => "module".to_string(),
            Value::Thread(_) => "Thread".to_string(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn repr(&self) -> String {
        super::repr::repr(self)
    }
}

/// Drop `value` in a loop rather than once per nesting level.
///
/// Containers owned solely by this handle are emptied onto a work list
/// before they are freed, so a chain like `[[[...]]]` of any length unwinds
/// without growing the stack. Shared containers only lose a reference.
pub(crate) fn release(value: Value) {
    let mut pending = vec![value];
    while let Some(value) = pending.pop() {
        match value {
            Value::List(items) | Value::Set(items) => {
                if let Ok(lock) = Arc::try_unwrap(items) {
                    pending.extend(lock.into_inner().unwrap_or_else(PoisonError::into_inner));
                }
            }
            Value::Dict(pairs) => {
                if let Ok(lock) = Arc::try_unwrap(pairs) {
                    for (k, v) in lock.into_inner().unwrap_or_else(PoisonError::into_inner) {
                        pending.push(k);
                        pending.push(v);
                    }
                }
            }
            Value::Tuple(mut items) => {
                if let Some(slots) = Arc::get_mut(&mut items) {
                    pending.extend(slots.iter_mut().map(|v| std::mem::replace(v, Value::None)));
                }
            }
            _ => {}
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::str(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.repr())
    }
}

/// How a type builds an instance when called with no arguments.
#[derive(Clone, Debug)]
pub enum Constructor {
    /// Instance attributes assigned by the no-argument constructor.
    Defaults(Vec<(String, Value)>),
    /// Parameters the constructor insists on; calling with none is a fault.
    RequiresArgs(Vec<String>),
}

#[derive(Debug)]
pub struct TypeDef {
    pub name: String,
    pub module: String,
    pub bases: Vec<String>,
    pub attrs: Namespace,
    pub constructor: Constructor,
}

impl TypeDef {
    pub fn new(name: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            bases: vec!["object".to_string()],
            attrs: Namespace::new(),
            constructor: Constructor::Defaults(Vec::new()),
        }
    }

    pub fn with_bases(mut self, bases: &[&str]) -> Self {
        self.bases = bases.iter().map(|b| b.to_string()).collect();
        self
    }

    pub fn with_attr(self, name: &str, value: Value) -> Self {
        self.attrs.set(name, value);
        self
    }

    pub fn with_method(self, function: Arc<Function>) -> Self {
        self.attrs.set(function.name.clone(), Value::Function(function));
        self
    }

    pub fn with_defaults(mut self, defaults: Vec<(&str, Value)>) -> Self {
        self.constructor = Constructor::Defaults(
            defaults.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        );
        self
    }

    pub fn requiring(mut self, params: &[&str]) -> Self {
        self.constructor =
            Constructor::RequiresArgs(params.iter().map(|p| p.to_string()).collect());
        self
    }

    /// Functions defined directly on the type, in definition order.
    pub fn methods(&self) -> Vec<(String, Arc<Function>)> {
        self.attrs
            .snapshot()
            .into_iter()
            .filter_map(|(name, v)| match v {
                Value::Function(f) => Some((name, f)),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug)]
pub struct Instance {
    pub class: Arc<TypeDef>,
    pub attrs: Namespace,
}

#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub qualname: String,
    pub module: String,
    pub code: Arc<CodeUnit>,
}

impl Function {
    pub fn new(module: impl Into<String>, code: Arc<CodeUnit>) -> Self {
        Self {
            name: code.name.clone(),
            qualname: code.qualname.clone(),
            module: module.into(),
            code,
        }
    }
}

#[derive(Debug)]
pub struct BoundMethod {
    pub receiver: Value,
    pub function: Arc<Function>,
}

#[derive(Debug)]
pub struct Module {
    pub name: String,
    pub globals: Namespace,
    /// Top-level code unit, when the module was loaded from compiled code.
    pub code: Option<Arc<CodeUnit>>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            globals: Namespace::new(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: Arc<CodeUnit>) -> Self {
        self.code = Some(code);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadHandle {
    pub ident: u64,
    pub name: String,
    pub daemon: bool,
}

/// Child layout of a value, as seen by generic walkers.
pub enum Shape<V> {
    Leaf,
    Named(Vec<(String, V)>),
    Keyed(Vec<(V, V)>),
    Indexed(Vec<V>),
}

/// Capability interface the scanner and classifier are written against.
pub trait Introspectable: Sized {
    fn identity(&self) -> Option<usize>;
    fn shape(&self) -> Shape<Self>;
    fn as_text(&self) -> Option<&str>;
    fn repr(&self) -> String;
}

impl Introspectable for Value {
    fn identity(&self) -> Option<usize> {
        Value::identity(self)
    }

    fn shape(&self) -> Shape<Self> {
        match self {
            Value::Instance(i) => Shape::Named(i.attrs.snapshot()),
            Value::Type(t) => Shape::Named(t.attrs.snapshot()),
            Value::Module(m) => Shape::Named(m.globals.snapshot()),
            Value::Thread(t) => Shape::Named(vec![
                ("name".to_string(), Value::str(&t.name)),
                ("ident".to_string(), Value::Int(t.ident as i64)),
                ("daemon".to_string(), Value::Bool(t.daemon)),
            ]),
            Value::Dict(d) => Shape::Keyed(read_lock(d).clone()),
            Value::List(l) | Value::Set(l) => Shape::Indexed(read_lock(l).clone()),
            Value::Tuple(t) => Shape::Indexed(t.to_vec()),
            _ => Shape::Leaf,
        }
    }

    fn as_text(&self) -> Option<&str> {
        self.as_str()
    }

    fn repr(&self) -> String {
        Value::repr(self)
    }
}
