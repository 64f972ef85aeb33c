//! Built-in tools shipped with the runtime: workspace file access and
//! shell execution (§4.4 built-in tool set).

mod files;
mod shell;

pub use files::{EditFileTool, ListDirTool, ReadFileTool, SearchFilesTool, WriteFileTool};
pub use shell::ShellTool;

use std::path::Path;

use crate::registry::ToolRegistry;

/// Registers the full built-in tool set, rooted at `workspace`, into
/// `registry`. A convenience for gateway wiring; callers that only want a
/// subset can register the individual tool types directly.
pub fn register_builtin_tools(registry: &mut ToolRegistry, workspace: impl AsRef<Path>) {
    let workspace = workspace.as_ref();
    registry.register(Box::new(ReadFileTool::new(workspace)));
    registry.register(Box::new(WriteFileTool::new(workspace)));
    registry.register(Box::new(EditFileTool::new(workspace)));
    registry.register(Box::new(ListDirTool::new(workspace)));
    registry.register(Box::new(SearchFilesTool::new(workspace)));
    registry.register(Box::new(ShellTool::new(workspace)));
}
