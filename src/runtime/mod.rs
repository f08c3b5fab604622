//! Object model of the host runtime the agent introspects.

pub mod attr;
mod code;
pub mod exec;
mod frame;
mod namespace;
pub mod repr;
mod value;

pub use code::{CodeBuilder, CodeUnit, Constant, Instruction, OperandKind, Opcode, COMPARE_OPS};
pub use exec::{AssignmentInjector, CodeInjector};
pub use frame::{Frame, FrameGuard, ThreadRegistry};
pub use namespace::Namespace;
pub use value::{
    BoundMethod, Constructor, Function, Instance, Introspectable, Module, Shape, ThreadHandle,
    TypeDef, Value,
};

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, RwLock};

/// Names carrying this prefix belong to the agent and are never reported as
/// program state.
pub const INTERNAL_PREFIX: &str = "_stackscope";

pub fn is_internal_name(name: &str) -> bool {
    name.starts_with(INTERNAL_PREFIX)
}

/// Acquire a read lock, recovering from poisoned state.
pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

/// Acquire a write lock, recovering from poisoned state.
pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

/// The host program's process-wide state, as exposed to the agent.
pub struct Runtime {
    entry: Arc<Module>,
    modules: RwLock<BTreeMap<String, Arc<Module>>>,
    threads: Arc<ThreadRegistry>,
    injector: Box<dyn CodeInjector>,
}

impl Runtime {
    pub fn new(entry: Module) -> Self {
        let entry = Arc::new(entry);
        let mut modules = BTreeMap::new();
        modules.insert(entry.name.clone(), Arc::clone(&entry));
        Self {
            entry,
            modules: RwLock::new(modules),
            threads: Arc::new(ThreadRegistry::new()),
            injector: Box::new(AssignmentInjector),
        }
    }

    pub fn with_injector(mut self, injector: Box<dyn CodeInjector>) -> Self {
        self.injector = injector;
        self
    }

    pub fn entry_module(&self) -> &Arc<Module> {
        &self.entry
    }

    pub fn globals(&self) -> &Namespace {
        &self.entry.globals
    }

    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.entry.globals.get(name)
    }

    pub fn set_global(&self, name: &str, value: Value) {
        self.entry.globals.set(name, value);
    }

    pub fn register_module(&self, module: Arc<Module>) {
        write_lock(&self.modules).insert(module.name.clone(), module);
    }

    pub fn module(&self, name: &str) -> Option<Arc<Module>> {
        read_lock(&self.modules).get(name).cloned()
    }

    /// Names of all loaded modules, sorted.
    pub fn loaded_modules(&self) -> Vec<String> {
        read_lock(&self.modules).keys().cloned().collect()
    }

    pub fn threads(&self) -> &Arc<ThreadRegistry> {
        &self.threads
    }

    /// Push a frame running `code` in the entry module onto `thread`'s stack.
    pub fn enter(
        &self,
        thread: u64,
        code: Arc<CodeUnit>,
        locals: Namespace,
    ) -> crate::Result<FrameGuard> {
        self.enter_in(thread, Arc::clone(&self.entry), code, locals)
    }

    pub fn enter_in(
        &self,
        thread: u64,
        module: Arc<Module>,
        code: Arc<CodeUnit>,
        locals: Namespace,
    ) -> crate::Result<FrameGuard> {
        let frame = self
            .threads
            .push(thread, module, code, locals)
            .ok_or_else(|| crate::Error::NotFound(format!("Thread {} is not registered", thread)))?;
        Ok(FrameGuard::new(Arc::clone(&self.threads), frame))
    }

    pub(crate) fn injector(&self) -> &dyn CodeInjector {
        self.injector.as_ref()
    }
}

static GLOBAL_RUNTIME: OnceLock<Arc<Runtime>> = OnceLock::new();

/// Publish the host runtime for the no-argument agent entry point.
/// Returns false if one was already installed.
pub fn install(runtime: Arc<Runtime>) -> bool {
    GLOBAL_RUNTIME.set(runtime).is_ok()
}

pub fn global() -> Option<Arc<Runtime>> {
    GLOBAL_RUNTIME.get().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_module_is_loaded() {
        let runtime = Runtime::new(Module::new("__main__"));
        runtime.register_module(Arc::new(Module::new("json")));
        runtime.register_module(Arc::new(Module::new("abc")));
        assert_eq!(runtime.loaded_modules(), vec!["__main__", "abc", "json"]);
    }

    #[test]
    fn test_frame_guard_pops_on_drop() {
        let runtime = Runtime::new(Module::new("__main__"));
        runtime.threads().register(1, "MainThread", false);
        let code = CodeUnit::builder("<module>", "app.py", 1).build();

        {
            let guard = runtime.enter(1, code, Namespace::new()).unwrap();
            assert!(guard.frame().is_module_level());
            assert!(runtime.threads().top_frame(1).is_some());
        }
        assert!(runtime.threads().top_frame(1).is_none());
    }

    #[test]
    fn test_enter_unknown_thread() {
        let runtime = Runtime::new(Module::new("__main__"));
        let code = CodeUnit::builder("f", "app.py", 1).build();
        assert!(runtime.enter(42, code, Namespace::new()).is_err());
    }

    #[test]
    fn test_internal_names() {
        assert!(is_internal_name("_stackscope_server"));
        assert!(!is_internal_name("_private"));
    }
}
