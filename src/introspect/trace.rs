use std::path::Path;

/// One resolved native frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    /// Demangled path without the hash suffix.
    pub symbol: String,
    /// Last path segment of `symbol`, closures folded into their parent.
    pub name: String,
    pub file: String,
    pub line: u32,
}

const NOISE: &[&str] = &["backtrace::", "std::backtrace", "std::panicking", "std::panic::"];

/// Current call chain, oldest first. Frames without symbol or line
/// information are skipped.
#[inline(never)]
pub fn capture() -> Vec<TraceFrame> {
    let bt = backtrace::Backtrace::new();
    let mut frames = Vec::new();
    for frame in bt.frames() {
        for symbol in frame.symbols() {
            let (Some(name), Some(file), Some(line)) =
                (symbol.name(), symbol.filename(), symbol.lineno())
            else {
                continue;
            };
            let symbol = format!("{:#}", name);
            if NOISE.iter().any(|n| symbol.starts_with(n)) {
                continue;
            }
            frames.push(TraceFrame {
                name: short_name(&symbol),
                symbol,
                file: file.display().to_string(),
                line,
            });
        }
    }
    frames.reverse();
    frames
}

fn short_name(symbol: &str) -> String {
    symbol
        .split("::")
        .filter(|seg| !seg.starts_with("{{"))
        .last()
        .unwrap_or(symbol)
        .to_string()
}

/// `parent/file` form of a source path.
pub fn short_path(path: &str) -> String {
    let p = Path::new(path);
    let file = p
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string());
    match p.parent().and_then(|d| d.file_name()) {
        Some(dir) => format!("{}/{}", dir.to_string_lossy(), file),
        None => file,
    }
}

/// `[ERROR] message` followed by one `> [name] file:line` row per frame.
pub fn format_fault(message: &str, frames: &[TraceFrame]) -> String {
    let mut lines = vec![format!("[ERROR] {}", message)];
    lines.extend(
        frames
            .iter()
            .map(|f| format!("> [{}] {}:{}", f.name, short_path(&f.file), f.line)),
    );
    lines.join("\n")
}

/// The command-handling call path with the agent's own frames removed,
/// oldest first, as `name (file:line)`.
pub fn agent_call_chain() -> Vec<String> {
    capture()
        .into_iter()
        .filter(|f| !f.symbol.contains(concat!(env!("CARGO_CRATE_NAME"), "::")))
        .map(|f| format!("{} ({}:{})", f.name, f.file, f.line))
        .collect()
}
