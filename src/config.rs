use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const MAX_REQUEST_LIMIT: usize = 64 * 1024 * 1024;
pub const MAX_WALK_DEPTH: usize = 1_000_000;

/// A named secret pattern added on top of the built-in token patterns.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenPattern {
    pub name: String,
    pub pattern: String,
}

/// All configurable settings with their defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSettings {
    pub server_address: String,
    pub server_port: u16,
    pub max_request_bytes: usize,
    pub dump_directory: PathBuf,
    pub dump_extension: String,
    pub walker_max_depth: usize,
    pub exec_enabled: bool,
    pub client_timeout_ms: u64,
    pub token_patterns: Vec<TokenPattern>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            server_address: "127.1.4.88".to_string(),
            server_port: 1161,
            max_request_bytes: 1024 * 1024,
            dump_directory: PathBuf::from("."),
            dump_extension: "scu".to_string(),
            walker_max_depth: 4096,
            exec_enabled: true,
            client_timeout_ms: 3_000,
            token_patterns: Vec::new(),
        }
    }
}

impl AgentSettings {
    pub fn socket_addr(&self) -> crate::Result<SocketAddr> {
        format!("{}:{}", self.server_address, self.server_port)
            .parse()
            .map_err(|e| {
                crate::Error::NotFound(format!(
                    "Invalid server address '{}:{}': {}",
                    self.server_address, self.server_port, e
                ))
            })
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }
}

/// Raw JSON representation; all fields optional for partial overrides.
#[derive(Debug, Deserialize, Default)]
struct SettingsFile {
    #[serde(rename = "server.address")]
    server_address: Option<String>,
    #[serde(rename = "server.port")]
    server_port: Option<u16>,
    #[serde(rename = "server.maxRequestBytes")]
    max_request_bytes: Option<usize>,
    #[serde(rename = "dump.directory")]
    dump_directory: Option<PathBuf>,
    #[serde(rename = "dump.extension")]
    dump_extension: Option<String>,
    #[serde(rename = "walker.maxDepth")]
    walker_max_depth: Option<usize>,
    #[serde(rename = "exec.enabled")]
    exec_enabled: Option<bool>,
    #[serde(rename = "client.timeoutMs")]
    client_timeout_ms: Option<u64>,
    #[serde(rename = "tokens.patterns")]
    token_patterns: Option<Vec<TokenPattern>>,
}

/// Resolve settings: defaults → user global → project-local.
pub fn resolve(project_root: Option<&Path>) -> AgentSettings {
    let global_path = dirs::home_dir().map(|h| h.join(".stackscope/settings.json"));
    let project_path = project_root.map(|r| r.join(".stackscope/settings.json"));
    resolve_with_paths(global_path.as_deref(), project_path.as_deref())
}

fn resolve_with_paths(global_path: Option<&Path>, project_path: Option<&Path>) -> AgentSettings {
    let mut settings = AgentSettings::default();

    if let Some(path) = global_path {
        apply_file(&mut settings, path);
    }
    if let Some(path) = project_path {
        apply_file(&mut settings, path);
    }

    settings
}

fn apply_file(settings: &mut AgentSettings, path: &Path) {
    let Ok(content) = std::fs::read_to_string(path) else { return };
    let Ok(file) = serde_json::from_str::<SettingsFile>(&content) else {
        tracing::warn!("Invalid settings file, ignoring: {}", path.display());
        return;
    };

    if let Some(v) = file.server_address {
        if v.trim().is_empty() {
            tracing::warn!("server.address is empty, using default");
        } else {
            settings.server_address = v;
        }
    }
    if let Some(v) = file.server_port {
        settings.server_port = v;
    }
    if let Some(v) = file.max_request_bytes {
        if v > 0 && v <= MAX_REQUEST_LIMIT {
            settings.max_request_bytes = v;
        } else {
            tracing::warn!(
                "server.maxRequestBytes ({}) out of range (1..{}), using default",
                v, MAX_REQUEST_LIMIT
            );
        }
    }
    if let Some(v) = file.dump_directory {
        settings.dump_directory = v;
    }
    if let Some(v) = file.dump_extension {
        let v = v.trim_start_matches('.').to_string();
        if !v.is_empty() && v.chars().all(|c| c.is_ascii_alphanumeric()) {
            settings.dump_extension = v;
        } else {
            tracing::warn!("dump.extension ({:?}) is not alphanumeric, using default", v);
        }
    }
    if let Some(v) = file.walker_max_depth {
        if v > 0 && v <= MAX_WALK_DEPTH {
            settings.walker_max_depth = v;
        } else {
            tracing::warn!(
                "walker.maxDepth ({}) out of range (1..{}), using default",
                v, MAX_WALK_DEPTH
            );
        }
    }
    if let Some(v) = file.exec_enabled {
        settings.exec_enabled = v;
    }
    if let Some(v) = file.client_timeout_ms {
        if (100..=600_000).contains(&v) {
            settings.client_timeout_ms = v;
        } else {
            tracing::warn!(
                "client.timeoutMs ({}) out of range (100..600000), using default",
                v
            );
        }
    }
    if let Some(v) = file.token_patterns {
        settings.token_patterns = v;
    }
}
