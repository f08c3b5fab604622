use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::handlers;
use crate::config::AgentSettings;
use crate::introspect::{trace, SecretMatcher};
use crate::runtime::Runtime;
use crate::{Error, Result};

/// Everything a handler may touch.
pub struct Context {
    pub runtime: Arc<Runtime>,
    pub settings: AgentSettings,
    pub secrets: SecretMatcher,
}

impl Context {
    pub fn new(runtime: Arc<Runtime>, settings: AgentSettings) -> Self {
        let secrets = SecretMatcher::with_extra(&settings.token_patterns);
        Self {
            runtime,
            settings,
            secrets,
        }
    }
}

pub type Handler = fn(&Context, &str) -> Result<String>;

/// Server-side command names and their handlers.
pub static COMMANDS: &[(&str, Handler)] = &[
    ("structure", handlers::structure),
    ("struct", handlers::outline),
    ("dump", handlers::dump),
    ("dis", handlers::dis),
    ("getvar", handlers::getvar),
    ("objects-type", handlers::objects_type),
    ("search", handlers::search),
    ("searchattr", handlers::searchattr),
    ("exec", handlers::exec),
    ("capture", handlers::capture),
    ("modules", handlers::modules),
    ("backtrace", handlers::backtrace),
    ("threads", handlers::threads),
    ("tokens", handlers::tokens),
    ("locals", handlers::locals),
    ("globals", handlers::globals),
    ("findvar", handlers::findvar),
    ("fnames", handlers::fnames),
    ("fsdump", handlers::fsdump),
    ("fdump", handlers::fdump),
    ("fdis", handlers::fdis),
];

/// `command:payload`; without a colon the whole text is the command.
pub fn split_request(request: &str) -> (&str, &str) {
    request.split_once(':').unwrap_or((request, ""))
}

pub struct Dispatcher {
    ctx: Context,
    table: Vec<(&'static str, Handler)>,
}

impl Dispatcher {
    pub fn new(ctx: Context) -> Self {
        Self::with_table(ctx, COMMANDS.to_vec())
    }

    pub fn with_table(ctx: Context, table: Vec<(&'static str, Handler)>) -> Self {
        Self { ctx, table }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Run one request to completion. Never fails: unknown commands, errors
    /// and panics all come back as response text.
    pub fn dispatch(&self, request: &str) -> String {
        let (name, payload) = split_request(request);
        let Some(handler) = self
            .table
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, h)| *h)
        else {
            tracing::debug!("Unknown command: {:?}", name);
            return Error::UnknownCommand(name.to_string()).to_string();
        };

        tracing::debug!(command = name, payload_len = payload.len(), "Dispatching");
        match catch_unwind(AssertUnwindSafe(|| handler(&self.ctx, payload))) {
            Ok(Ok(text)) => text,
            Ok(Err(e)) if e.is_literal() => e.to_string(),
            Ok(Err(e)) => {
                tracing::warn!("Command {} failed: {}", name, e);
                trace::format_fault(&e.to_string(), &trace::capture())
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_string());
                tracing::warn!("Command {} panicked: {}", name, message);
                trace::format_fault(&format!("Panic: {}", message), &trace::capture())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Module;

    fn ctx() -> Context {
        Context::new(
            Arc::new(Runtime::new(Module::new("__main__"))),
            AgentSettings::default(),
        )
    }

    fn echo(_: &Context, payload: &str) -> Result<String> {
        Ok(format!("echo {}", payload))
    }

    fn other(_: &Context, _: &str) -> Result<String> {
        Ok("other".to_string())
    }

    fn faulty(_: &Context, _: &str) -> Result<String> {
        Err(Error::fault("TypeError", "boom"))
    }

    fn missing(_: &Context, payload: &str) -> Result<String> {
        Err(Error::NotFound(format!("Variable '{}' not found", payload)))
    }

    fn panicky(_: &Context, _: &str) -> Result<String> {
        panic!("exploded")
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::with_table(
            ctx(),
            vec![
                ("echo", echo as Handler),
                ("other", other as Handler),
                ("faulty", faulty as Handler),
                ("missing", missing as Handler),
                ("panicky", panicky as Handler),
            ],
        )
    }

    #[test]
    fn test_split_request() {
        assert_eq!(split_request("getvar:x"), ("getvar", "x"));
        assert_eq!(split_request("exec:a = 'b:c'"), ("exec", "a = 'b:c'"));
        assert_eq!(split_request("modules"), ("modules", ""));
        assert_eq!(split_request("globals:"), ("globals", ""));
    }

    #[test]
    fn test_routes_to_registered_handler_only() {
        let d = dispatcher();
        assert_eq!(d.dispatch("echo:hi:there"), "echo hi:there");
        assert_eq!(d.dispatch("other:hi"), "other");
        assert_eq!(d.dispatch("Echo:hi"), "Unknown command: Echo");
        assert_eq!(d.dispatch("nope"), "Unknown command: nope");
    }

    #[test]
    fn test_fault_boundary() {
        let d = dispatcher();
        assert!(d.dispatch("faulty:").starts_with("[ERROR] TypeError: boom"));
        assert_eq!(d.dispatch("missing:q"), "Variable 'q' not found");
        assert!(d.dispatch("panicky:").starts_with("[ERROR] Panic: exploded"));
        // Still serving after a panic.
        assert_eq!(d.dispatch("echo:ok"), "echo ok");
    }

    #[test]
    fn test_command_table_is_unique() {
        let mut names: Vec<&str> = COMMANDS.iter().map(|(n, _)| *n).collect();
        assert_eq!(names.len(), 21);
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 21);
    }
}
