use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use super::code::CodeUnit;
use super::value::{Module, ThreadHandle};
use super::{read_lock, write_lock, Namespace};

/// Idents handed out by [`ThreadRegistry::register_anonymous`] start here,
/// far away from anything a host is likely to use.
const ANONYMOUS_IDENT_BASE: u64 = 1 << 48;

/// One activation record of a running callable.
pub struct Frame {
    code: Arc<CodeUnit>,
    module: Arc<Module>,
    locals: Namespace,
    back: Weak<Frame>,
    thread: u64,
    lasti: AtomicU32,
    lineno: AtomicU32,
}

impl Frame {
    pub fn code(&self) -> &Arc<CodeUnit> {
        &self.code
    }

    pub fn name(&self) -> &str {
        &self.code.name
    }

    pub fn qualname(&self) -> &str {
        &self.code.qualname
    }

    pub fn module(&self) -> &Arc<Module> {
        &self.module
    }

    pub fn locals(&self) -> &Namespace {
        &self.locals
    }

    /// The calling frame, if it is still alive.
    pub fn caller(&self) -> Option<Arc<Frame>> {
        self.back.upgrade()
    }

    pub fn thread_ident(&self) -> u64 {
        self.thread
    }

    pub fn lasti(&self) -> u32 {
        self.lasti.load(Ordering::Relaxed)
    }

    pub fn lineno(&self) -> u32 {
        self.lineno.load(Ordering::Relaxed)
    }

    /// Record the instruction about to execute; the line follows from the
    /// code unit's line table.
    pub fn advance(&self, lasti: u32) {
        self.lasti.store(lasti, Ordering::Relaxed);
        self.lineno
            .store(self.code.line_for_offset(lasti), Ordering::Relaxed);
    }

    pub fn is_module_level(&self) -> bool {
        self.code.name == "<module>"
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("name", &self.code.qualname)
            .field("file", &self.code.filename)
            .field("line", &self.lineno())
            .field("thread", &self.thread)
            .finish()
    }
}

struct ThreadState {
    handle: Arc<ThreadHandle>,
    stack: Vec<Arc<Frame>>,
}

/// Live threads and their frame stacks. Each thread's stack owns its frames;
/// frames only point weakly at their callers.
#[derive(Default)]
pub struct ThreadRegistry {
    threads: RwLock<BTreeMap<u64, ThreadState>>,
    main: RwLock<Option<u64>>,
    next_anonymous: AtomicU64,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, ident: u64, name: &str, daemon: bool) -> Arc<ThreadHandle> {
        let handle = Arc::new(ThreadHandle {
            ident,
            name: name.to_string(),
            daemon,
        });
        write_lock(&self.threads).insert(
            ident,
            ThreadState {
                handle: Arc::clone(&handle),
                stack: Vec::new(),
            },
        );
        handle
    }

    /// Register a thread that has no host-assigned ident.
    pub fn register_anonymous(&self, name: &str, daemon: bool) -> Arc<ThreadHandle> {
        let ident = ANONYMOUS_IDENT_BASE + self.next_anonymous.fetch_add(1, Ordering::Relaxed);
        self.register(ident, name, daemon)
    }

    pub fn unregister(&self, ident: u64) {
        write_lock(&self.threads).remove(&ident);
        let mut main = write_lock(&self.main);
        if *main == Some(ident) {
            *main = None;
        }
    }

    pub fn set_main(&self, ident: u64) {
        *write_lock(&self.main) = Some(ident);
    }

    pub fn main_ident(&self) -> Option<u64> {
        *read_lock(&self.main)
    }

    /// Topmost frame of every thread that currently has one, taken under a
    /// single lock acquisition.
    pub fn current_frames(&self) -> BTreeMap<u64, Arc<Frame>> {
        read_lock(&self.threads)
            .iter()
            .filter_map(|(ident, state)| state.stack.last().map(|f| (*ident, Arc::clone(f))))
            .collect()
    }

    pub fn top_frame(&self, ident: u64) -> Option<Arc<Frame>> {
        read_lock(&self.threads)
            .get(&ident)
            .and_then(|s| s.stack.last().cloned())
    }

    pub fn enumerate(&self) -> Vec<Arc<ThreadHandle>> {
        read_lock(&self.threads)
            .values()
            .map(|s| Arc::clone(&s.handle))
            .collect()
    }

    pub fn handle(&self, ident: u64) -> Option<Arc<ThreadHandle>> {
        read_lock(&self.threads)
            .get(&ident)
            .map(|s| Arc::clone(&s.handle))
    }

    pub(crate) fn push(
        &self,
        ident: u64,
        module: Arc<Module>,
        code: Arc<CodeUnit>,
        locals: Namespace,
    ) -> Option<Arc<Frame>> {
        let mut threads = write_lock(&self.threads);
        let state = threads.get_mut(&ident)?;
        let back = state
            .stack
            .last()
            .map(Arc::downgrade)
            .unwrap_or_default();
        let first_line = code.first_line;
        let frame = Arc::new(Frame {
            code,
            module,
            locals,
            back,
            thread: ident,
            lasti: AtomicU32::new(0),
            lineno: AtomicU32::new(first_line),
        });
        state.stack.push(Arc::clone(&frame));
        Some(frame)
    }

    pub(crate) fn pop(&self, frame: &Arc<Frame>) {
        let mut threads = write_lock(&self.threads);
        if let Some(state) = threads.get_mut(&frame.thread) {
            if let Some(pos) = state.stack.iter().rposition(|f| Arc::ptr_eq(f, frame)) {
                state.stack.remove(pos);
            }
        }
    }
}

/// Keeps a frame on its thread's stack; dropping the guard pops it.
pub struct FrameGuard {
    registry: Arc<ThreadRegistry>,
    frame: Arc<Frame>,
}

impl FrameGuard {
    pub(crate) fn new(registry: Arc<ThreadRegistry>, frame: Arc<Frame>) -> Self {
        Self { registry, frame }
    }

    pub fn frame(&self) -> &Arc<Frame> {
        &self.frame
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        self.registry.pop(&self.frame);
    }
}
