//! The in-process agent: command table, handlers and the wire listener.
//!
//! The host calls [`start`] (or [`stackscope_agent_start`] across an FFI
//! boundary) with no arguments. It returns as soon as the listener is bound;
//! serving happens on a dedicated thread with its own tokio runtime, so the
//! host's threads are never borrowed.

pub mod dispatch;
pub mod handlers;
pub mod server;

pub use dispatch::{Context, Dispatcher, Handler, COMMANDS};
pub use server::WireServer;

use std::net::SocketAddr;
use std::sync::{mpsc, Arc};

use crate::config::{self, AgentSettings};
use crate::runtime::{self, Runtime};
use crate::{Error, Result};

/// Name of the listener thread; the prefix keeps it out of `threads`.
pub const SERVER_THREAD_NAME: &str = "_stackscope_server";
const WORKER_THREAD_NAME: &str = "_stackscope_worker";

#[derive(Debug, Clone)]
pub struct AgentHandle {
    addr: SocketAddr,
    thread_ident: u64,
}

impl AgentHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Ident under which the listener registered itself with the host.
    pub fn thread_ident(&self) -> u64 {
        self.thread_ident
    }
}

pub struct Agent;

impl Agent {
    /// Bind the listener on a dedicated thread and return once it accepts.
    pub fn spawn(runtime: Arc<Runtime>, settings: AgentSettings) -> Result<AgentHandle> {
        let addr = settings.socket_addr()?;
        let dispatcher = Dispatcher::new(Context::new(Arc::clone(&runtime), settings));
        let (tx, rx) = mpsc::channel::<Result<SocketAddr>>();

        std::thread::Builder::new()
            .name(SERVER_THREAD_NAME.to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(2)
                    .thread_name(WORKER_THREAD_NAME)
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = tx.send(Err(e.into()));
                        return;
                    }
                };
                rt.block_on(async move {
                    let server = match WireServer::bind(addr, dispatcher).await {
                        Ok(server) => server,
                        Err(e) => {
                            let _ = tx.send(Err(e));
                            return;
                        }
                    };
                    let _ = tx.send(server.local_addr());
                    if let Err(e) = server.run().await {
                        tracing::error!("Agent listener stopped: {}", e);
                    }
                });
            })?;

        let addr = rx
            .recv()
            .map_err(|_| Error::Connection("agent thread exited before binding".to_string()))??;
        let handle = runtime
            .threads()
            .register_anonymous(SERVER_THREAD_NAME, true);
        tracing::info!("Agent attached on {} (thread {})", addr, handle.ident);

        Ok(AgentHandle {
            addr,
            thread_ident: handle.ident,
        })
    }
}

/// Best-effort stderr logging; a host that already installed a subscriber
/// keeps its own.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .try_init();
}

/// No-argument entry point: attach to the globally installed runtime with
/// settings resolved from the working directory.
pub fn start() -> Result<AgentHandle> {
    init_logging();
    let runtime = runtime::global()
        .ok_or_else(|| Error::NotFound("No host runtime installed".to_string()))?;
    let cwd = std::env::current_dir().ok();
    let settings = config::resolve(cwd.as_deref());
    Agent::spawn(runtime, settings)
}

/// C ABI wrapper around [`start`]. Returns 0 on success, -1 on failure.
#[no_mangle]
pub extern "C" fn stackscope_agent_start() -> i32 {
    match start() {
        Ok(_) => 0,
        Err(e) => {
            tracing::error!("Agent failed to start: {}", e);
            -1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Module;

    #[test]
    fn test_spawn_registers_hidden_daemon_thread() {
        let runtime = Arc::new(Runtime::new(Module::new("__main__")));
        let settings = AgentSettings {
            server_address: "127.0.0.1".to_string(),
            server_port: 0,
            ..AgentSettings::default()
        };
        let handle = Agent::spawn(Arc::clone(&runtime), settings).unwrap();

        assert_ne!(handle.local_addr().port(), 0);
        let thread = runtime.threads().handle(handle.thread_ident()).unwrap();
        assert_eq!(thread.name, SERVER_THREAD_NAME);
        assert!(thread.daemon);
    }

    #[test]
    fn test_spawn_reports_bind_failure() {
        let runtime = Arc::new(Runtime::new(Module::new("__main__")));
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let settings = AgentSettings {
            server_address: "127.0.0.1".to_string(),
            server_port: blocker.local_addr().unwrap().port(),
            ..AgentSettings::default()
        };
        assert!(Agent::spawn(runtime, settings).is_err());
    }
}
