//! Tool Registry (C4, §4.4): the `Tool` trait, schema validation, the
//! per-tool rate limiter, and the built-in tool set (workspace file access
//! and shell execution).

pub mod builtin;
pub mod registry;
pub mod schema;

pub use builtin::{
    register_builtin_tools, EditFileTool, ListDirTool, ReadFileTool, SearchFilesTool, ShellTool,
    WriteFileTool,
};
pub use registry::{Tool, ToolRegistry};
pub use schema::validate_arguments;
