pub mod agent;
pub mod client;
pub mod config;
pub mod demo;
pub mod error;
pub mod introspect;
pub mod runtime;

pub use error::{Error, Result};
