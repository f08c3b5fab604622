use std::sync::Arc;

use crate::runtime::{
    is_internal_name, Function, Module, ThreadHandle, TypeDef, Value,
};

/// Top-level names of a module, split into disjoint categories.
#[derive(Debug, Default)]
pub struct ModuleContents {
    pub types: Vec<(String, Arc<TypeDef>)>,
    pub callables: Vec<(String, Arc<Function>)>,
    pub modules: Vec<(String, Arc<Module>)>,
    pub threads: Vec<(String, Arc<ThreadHandle>)>,
    pub variables: Vec<(String, Value)>,
}

impl ModuleContents {
    /// Variable, then sub-module, then thread with this name.
    pub fn lookup_value(&self, name: &str) -> Option<Value> {
        find(&self.variables, name)
            .cloned()
            .or_else(|| find(&self.modules, name).map(|m| Value::Module(Arc::clone(m))))
            .or_else(|| find(&self.threads, name).map(|t| Value::Thread(Arc::clone(t))))
    }

    pub fn find_type(&self, name: &str) -> Option<&Arc<TypeDef>> {
        find(&self.types, name)
    }

    /// Every variable, sub-module and thread as plain values, in that order.
    pub fn values(&self) -> Vec<(String, Value)> {
        let mut out = self.variables.clone();
        out.extend(
            self.modules
                .iter()
                .map(|(n, m)| (n.clone(), Value::Module(Arc::clone(m)))),
        );
        out.extend(
            self.threads
                .iter()
                .map(|(n, t)| (n.clone(), Value::Thread(Arc::clone(t)))),
        );
        out
    }
}

fn find<'a, T>(entries: &'a [(String, T)], name: &str) -> Option<&'a T> {
    entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
}

/// True for values that belong to the agent rather than the program.
fn is_agent_item(value: &Value) -> bool {
    match value {
        Value::Type(t) => is_internal_name(&t.name),
        Value::Instance(i) => is_internal_name(&i.class.name),
        Value::Function(f) => f.qualname.split('.').any(is_internal_name),
        Value::Method(m) => m.function.qualname.split('.').any(is_internal_name),
        Value::Thread(t) => is_internal_name(&t.name),
        _ => false,
    }
}

/// Classify `module`'s globals as they are right now.
pub fn classify(module: &Module) -> ModuleContents {
    let mut contents = ModuleContents::default();
    for (name, value) in module.globals.snapshot() {
        if is_internal_name(&name) || is_agent_item(&value) {
            continue;
        }
        match value {
            Value::Type(t) if t.module == module.name => contents.types.push((name, t)),
            Value::Function(f) if f.module == module.name => contents.callables.push((name, f)),
            Value::Module(m) => contents.modules.push((name, m)),
            Value::Thread(t) => contents.threads.push((name, t)),
            other => contents.variables.push((name, other)),
        }
    }
    contents
}

struct Node {
    label: String,
    children: Vec<Node>,
}

impl Node {
    fn leaf(label: String) -> Self {
        Self {
            label,
            children: Vec::new(),
        }
    }
}

fn render_node(node: &Node, prefix: &str, is_last: bool, out: &mut String) {
    out.push_str(prefix);
    out.push_str(if is_last { "└── " } else { "├── " });
    out.push_str(&node.label);
    out.push('\n');
    let child_prefix = format!("{}{}", prefix, if is_last { "    " } else { "│   " });
    let n = node.children.len();
    for (i, child) in node.children.iter().enumerate() {
        render_node(child, &child_prefix, i + 1 == n, out);
    }
}

/// Box-drawing tree: classes with their methods, then functions, modules,
/// threads and variables.
pub fn render_structure(contents: &ModuleContents) -> String {
    let mut nodes = Vec::new();
    for (name, t) in &contents.types {
        let mut methods: Vec<String> = t.methods().into_iter().map(|(m, _)| m).collect();
        methods.sort();
        nodes.push(Node {
            label: format!("{} (class)", name),
            children: methods
                .into_iter()
                .map(|m| Node::leaf(format!("{} (class method)", m)))
                .collect(),
        });
    }
    let flat = [
        (contents.callables.iter().map(|(n, _)| n).collect::<Vec<_>>(), "function"),
        (contents.modules.iter().map(|(n, _)| n).collect(), "module"),
        (contents.threads.iter().map(|(n, _)| n).collect(), "thread"),
        (contents.variables.iter().map(|(n, _)| n).collect(), "variable"),
    ];
    for (names, kind) in flat {
        nodes.extend(names.into_iter().map(|n| Node::leaf(format!("{} ({})", n, kind))));
    }

    let mut out = String::from("Module\n");
    let n = nodes.len();
    for (i, node) in nodes.iter().enumerate() {
        render_node(node, "", i + 1 == n, &mut out);
    }
    out
}

const OUTLINE_VALUE_WIDTH: usize = 50;

/// Pseudo-source listing of what the module itself defines.
pub fn render_outline(module: &Module) -> String {
    let mut out: Vec<String> = Vec::new();
    for (name, value) in module.globals.snapshot() {
        if name.starts_with("__") || is_internal_name(&name.to_lowercase()) || is_agent_item(&value) {
            continue;
        }
        match &value {
            Value::Type(t) if t.module == module.name => {
                out.push(format!("class {}({}):", name, t.bases.join(", ")));
                let mut methods: Vec<String> = t
                    .methods()
                    .into_iter()
                    .map(|(m, _)| m)
                    .filter(|m| !m.starts_with("__"))
                    .collect();
                methods.sort();
                for m in methods {
                    out.push(format!("    def {}(...):", m));
                }
                out.push(String::new());
            }
            Value::Function(f) if f.module == module.name => {
                out.push(format!("def {}(...):", name));
                out.push(String::new());
            }
            Value::Int(_) | Value::Float(_) | Value::Str(_) | Value::List(_) | Value::Dict(_) => {
                let shown = value.as_str().map(str::to_string).unwrap_or_else(|| value.repr());
                if shown.chars().count() < OUTLINE_VALUE_WIDTH {
                    out.push(format!("{} = {}", name, value.repr()));
                } else {
                    out.push(format!("{} = ...", name));
                }
            }
            _ => {}
        }
    }
    out.join("\n")
}
