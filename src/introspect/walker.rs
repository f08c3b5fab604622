use std::sync::Arc;

use crate::runtime::{Frame, Runtime};

/// Which thread's stack to walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadSelector {
    Main,
    Id(u64),
}

impl ThreadSelector {
    fn ident(self, runtime: &Runtime) -> Option<u64> {
        match self {
            ThreadSelector::Main => runtime.threads().main_ident(),
            ThreadSelector::Id(ident) => Some(ident),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameIndexError {
    NoFrames,
    OutOfRange { index: i64, max: usize },
}

impl std::fmt::Display for FrameIndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameIndexError::NoFrames => write!(f, "Error: Main thread frame not found"),
            FrameIndexError::OutOfRange { index, max } => write!(
                f,
                "Error: Frame index {} out of range (max index: {})",
                index, max
            ),
        }
    }
}

/// Follow caller links from `top` until they run out, innermost first.
/// Stops after `cap` frames so a corrupted chain cannot hang the agent.
pub fn walk(top: Arc<Frame>, cap: usize) -> Vec<Arc<Frame>> {
    let mut out = Vec::new();
    let mut current = Some(top);
    while let Some(frame) = current {
        if out.len() >= cap {
            tracing::warn!(
                thread = frame.thread_ident(),
                cap,
                "Frame chain exceeds walk limit, truncating"
            );
            break;
        }
        current = frame.caller();
        out.push(frame);
    }
    out
}

/// Frames of the selected thread, innermost first. `None` when the thread
/// has no registered top frame.
pub fn frames(runtime: &Runtime, selector: ThreadSelector, cap: usize) -> Option<Vec<Arc<Frame>>> {
    let ident = selector.ident(runtime)?;
    let top = runtime.threads().current_frames().remove(&ident)?;
    Some(walk(top, cap))
}

/// The frame at `index` (0 = innermost) on the main thread.
pub fn frame_at(
    runtime: &Runtime,
    index: i64,
    cap: usize,
) -> Result<Arc<Frame>, FrameIndexError> {
    let stack = frames(runtime, ThreadSelector::Main, cap).ok_or(FrameIndexError::NoFrames)?;
    let max = stack.len().saturating_sub(1);
    usize::try_from(index)
        .ok()
        .and_then(|i| stack.into_iter().nth(i))
        .ok_or(FrameIndexError::OutOfRange { index, max })
}

/// The main thread's module-level frame.
pub fn module_frame(runtime: &Runtime, cap: usize) -> Option<Arc<Frame>> {
    frames(runtime, ThreadSelector::Main, cap)?
        .into_iter()
        .find(|f| f.is_module_level())
}
