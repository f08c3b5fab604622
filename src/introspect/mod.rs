//! Read-only views over the host runtime: stacks, object graphs, module
//! contents and code units.

pub mod classify;
pub mod encoder;
pub mod scanner;
pub mod secrets;
pub mod trace;
pub mod walker;

pub use classify::{classify, ModuleContents};
pub use scanner::{scan, ScanMatch, Visit};
pub use secrets::SecretMatcher;
pub use walker::{FrameIndexError, ThreadSelector};
