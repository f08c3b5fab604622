#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use stackscope::agent::Agent;
use stackscope::client;
use stackscope::config::AgentSettings;
use stackscope::demo::DemoHost;
use tempfile::{tempdir, TempDir};

/// A demo host with a live agent on an ephemeral loopback port.
pub struct Fixture {
    pub host: DemoHost,
    pub addr: SocketAddr,
    pub dump_dir: TempDir,
}

pub fn start_agent() -> Fixture {
    start_agent_with(|_| {})
}

pub fn start_agent_with(adjust: impl FnOnce(&mut AgentSettings)) -> Fixture {
    let dump_dir = tempdir().unwrap();
    let mut settings = AgentSettings {
        server_address: "127.0.0.1".to_string(),
        server_port: 0,
        dump_directory: dump_dir.path().to_path_buf(),
        ..AgentSettings::default()
    };
    adjust(&mut settings);

    let host = DemoHost::build().unwrap();
    let handle = Agent::spawn(Arc::clone(&host.runtime), settings).unwrap();
    Fixture {
        host,
        addr: handle.local_addr(),
        dump_dir,
    }
}

impl Fixture {
    pub async fn send(&self, command: &str, payload: &str) -> String {
        client::send_command(self.addr, command, payload, Duration::from_secs(5))
            .await
            .unwrap()
    }
}
