use std::collections::HashSet;

use crate::runtime::{Introspectable, Shape};

/// One hit: where it was found and what it looks like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanMatch {
    pub path: String,
    pub repr: String,
}

/// What the predicate sees for each child edge.
pub struct Visit<'a, V> {
    pub path: &'a str,
    /// Attribute name or string key; `None` for indexed children and
    /// non-text keys.
    pub edge: Option<&'a str>,
    pub value: &'a V,
}

struct Pending<V> {
    path: String,
    edge: Option<String>,
    value: V,
}

/// Walk everything reachable from `root` depth-first, in child order,
/// reporting every edge the predicate accepts.
///
/// Each composite is expanded at most once per call (identity-keyed visited
/// set), so cyclic graphs terminate. There is no depth bound beyond that.
pub fn scan<V, P>(root: &V, prefix: &str, mut predicate: P) -> Vec<ScanMatch>
where
    V: Introspectable,
    P: FnMut(&Visit<'_, V>) -> bool,
{
    let mut visited = HashSet::new();
    let mut matches = Vec::new();
    let mut stack = Vec::new();

    if let Some(id) = root.identity() {
        visited.insert(id);
    }
    push_children(&mut stack, prefix, root);

    while let Some(item) = stack.pop() {
        let visit = Visit {
            path: &item.path,
            edge: item.edge.as_deref(),
            value: &item.value,
        };
        if predicate(&visit) {
            matches.push(ScanMatch {
                path: item.path.clone(),
                repr: item.value.repr(),
            });
        }
        let Some(id) = item.value.identity() else {
            continue;
        };
        if visited.insert(id) {
            push_children(&mut stack, &item.path, &item.value);
        }
    }
    matches
}

fn push_children<V: Introspectable>(stack: &mut Vec<Pending<V>>, prefix: &str, value: &V) {
    let children: Vec<Pending<V>> = match value.shape() {
        Shape::Leaf => return,
        Shape::Named(attrs) => attrs
            .into_iter()
            .map(|(name, v)| Pending {
                path: format!("{}.{}", prefix, name),
                edge: Some(name),
                value: v,
            })
            .collect(),
        Shape::Keyed(entries) => entries
            .into_iter()
            .map(|(k, v)| Pending {
                path: format!("{}[{}]", prefix, k.repr()),
                edge: k.as_text().map(str::to_string),
                value: v,
            })
            .collect(),
        Shape::Indexed(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, v)| Pending {
                path: format!("{}[{}]", prefix, i),
                edge: None,
                value: v,
            })
            .collect(),
    };
    // Reverse so the first child is popped first.
    stack.extend(children.into_iter().rev());
}

/// Matches an edge whose name, or whose string value, contains `needle`.
pub fn name_or_text_contains<V: Introspectable>(
    needle: &str,
) -> impl FnMut(&Visit<'_, V>) -> bool + '_ {
    move |visit| {
        visit.edge.is_some_and(|e| e.contains(needle))
            || visit.value.as_text().is_some_and(|t| t.contains(needle))
    }
}
