use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// A named variable, type, frame or thread could not be resolved.
    #[error("{0}")]
    NotFound(String),

    /// Raised by code running inside the host runtime (construction, attribute
    /// lookup, injected statements). Rendered with a call trace.
    #[error("{kind}: {message}")]
    Fault { kind: String, message: String },

    #[error("Invalid target for encoding: {0}")]
    InvalidTarget(String),

    #[error("Image format error: {0}")]
    Image(String),

    #[error("Code execution is disabled")]
    ExecDisabled,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl Error {
    pub fn fault(kind: &str, message: impl Into<String>) -> Self {
        Error::Fault {
            kind: kind.to_string(),
            message: message.into(),
        }
    }

    pub fn attribute(type_name: &str, attr: &str) -> Self {
        Self::fault(
            "AttributeError",
            format!("'{}' object has no attribute '{}'", type_name, attr),
        )
    }

    /// Protocol, resolution and encoding errors are reported as their literal
    /// message; everything else goes through the fault trace.
    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            Error::UnknownCommand(_)
                | Error::NotFound(_)
                | Error::InvalidTarget(_)
                | Error::ExecDisabled
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
