//! Workspace file tools: `read_file`, `write_file`, `edit_file`, `list_dir`.
//!
//! Grounded in `clawlet/tools/files.py`. The original resolves symlinks with
//! `Path.resolve(strict=...)` and then checks the resolved path is still
//! beneath `allowed_dir`; `canonicalize_within` below is the same two-step
//! check expressed with `std::fs::canonicalize`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sa_runtime_domain::envelope::ToolResult;
use serde_json::json;

use crate::registry::Tool;

/// Resolves `requested` against `workspace`, following symlinks, and
/// confirms the result stays inside `workspace`. When `must_exist` is
/// false (write targets that may not exist yet) only the deepest existing
/// ancestor is canonicalized, matching the Python tool's symlink-safe
/// write path.
fn resolve_within(workspace: &Path, requested: &str, must_exist: bool) -> Result<PathBuf, String> {
    let workspace_root = std::fs::canonicalize(workspace)
        .map_err(|e| format!("workspace directory error: {e}"))?;

    let candidate = {
        let p = Path::new(requested);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            workspace_root.join(p)
        }
    };

    let resolved = if must_exist {
        std::fs::canonicalize(&candidate)
            .map_err(|_| format!("Path not found: {requested}"))?
    } else if candidate.exists() {
        std::fs::canonicalize(&candidate)
            .map_err(|_| format!("Path not found: {requested}"))?
    } else {
        let mut probe = candidate.parent().unwrap_or(&candidate).to_path_buf();
        while !probe.exists() {
            let Some(parent) = probe.parent() else {
                return Err(format!("Path resolution error: {requested}"));
            };
            probe = parent.to_path_buf();
        }
        let resolved_parent = std::fs::canonicalize(&probe)
            .map_err(|e| format!("Path resolution error: {e}"))?;
        let relative_tail = candidate
            .parent()
            .and_then(|p| p.strip_prefix(&probe).ok())
            .unwrap_or_else(|| Path::new(""));
        let file_name = candidate
            .file_name()
            .ok_or_else(|| format!("Path not found: {requested}"))?;
        resolved_parent.join(relative_tail).join(file_name)
    };

    if !resolved.starts_with(&workspace_root) {
        return Err("Access denied: path points outside allowed directory".to_string());
    }

    Ok(resolved)
}

pub struct ReadFileTool {
    workspace: PathBuf,
}

impl ReadFileTool {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self { workspace: workspace.into() }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }
    fn description(&self) -> &str {
        "Read the contents of a file from the workspace."
    }
    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {"path": {"type": "string", "description": "Path to the file to read"}},
            "required": ["path"],
        })
    }
    async fn execute(&self, arguments: serde_json::Value) -> ToolResult {
        let Some(path) = arguments.get("path").and_then(|v| v.as_str()) else {
            return ToolResult::failure("missing required parameter: path");
        };
        let resolved = match resolve_within(&self.workspace, path, true) {
            Ok(p) => p,
            Err(e) => return ToolResult::failure(e),
        };
        match tokio::fs::read_to_string(&resolved).await {
            Ok(content) => ToolResult {
                success: true,
                output: content.clone(),
                error: None,
                data: Some(json!({"path": resolved.display().to_string(), "size": content.len()})),
            },
            Err(e) => ToolResult::failure(e.to_string()),
        }
    }
}

pub struct WriteFileTool {
    workspace: PathBuf,
}

impl WriteFileTool {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self { workspace: workspace.into() }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }
    fn description(&self) -> &str {
        "Write content to a file in the workspace, creating parent directories as needed."
    }
    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path to the file to write"},
                "content": {"type": "string", "description": "Content to write to the file"},
            },
            "required": ["path", "content"],
        })
    }
    async fn execute(&self, arguments: serde_json::Value) -> ToolResult {
        let (Some(path), Some(content)) = (
            arguments.get("path").and_then(|v| v.as_str()),
            arguments.get("content").and_then(|v| v.as_str()),
        ) else {
            return ToolResult::failure("missing required parameter: path or content");
        };
        let resolved = match resolve_within(&self.workspace, path, false) {
            Ok(p) => p,
            Err(e) => return ToolResult::failure(e),
        };
        if let Some(parent) = resolved.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolResult::failure(format!("failed to create parent directories: {e}"));
            }
        }
        match tokio::fs::write(&resolved, content).await {
            Ok(()) => ToolResult {
                success: true,
                output: format!("Successfully wrote {} bytes to {path}", content.len()),
                error: None,
                data: Some(json!({"path": resolved.display().to_string(), "size": content.len()})),
            },
            Err(e) => ToolResult::failure(e.to_string()),
        }
    }
}

pub struct EditFileTool {
    workspace: PathBuf,
}

impl EditFileTool {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self { workspace: workspace.into() }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }
    fn description(&self) -> &str {
        "Edit a file by replacing the first occurrence of specific text with new text."
    }
    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path to the file to edit"},
                "old_text": {"type": "string", "description": "Text to find and replace"},
                "new_text": {"type": "string", "description": "Text to replace with"},
            },
            "required": ["path", "old_text", "new_text"],
        })
    }
    async fn execute(&self, arguments: serde_json::Value) -> ToolResult {
        let (Some(path), Some(old_text), Some(new_text)) = (
            arguments.get("path").and_then(|v| v.as_str()),
            arguments.get("old_text").and_then(|v| v.as_str()),
            arguments.get("new_text").and_then(|v| v.as_str()),
        ) else {
            return ToolResult::failure("missing required parameter: path, old_text, or new_text");
        };
        let resolved = match resolve_within(&self.workspace, path, true) {
            Ok(p) => p,
            Err(e) => return ToolResult::failure(e),
        };
        let content = match tokio::fs::read_to_string(&resolved).await {
            Ok(c) => c,
            Err(e) => return ToolResult::failure(e.to_string()),
        };
        if !content.contains(old_text) {
            let preview: String = old_text.chars().take(50).collect();
            return ToolResult::failure(format!("Text not found in file: {preview}..."));
        }
        let new_content = content.replacen(old_text, new_text, 1);
        match tokio::fs::write(&resolved, &new_content).await {
            Ok(()) => ToolResult {
                success: true,
                output: format!("Successfully edited {path}"),
                error: None,
                data: Some(json!({"path": resolved.display().to_string()})),
            },
            Err(e) => ToolResult::failure(e.to_string()),
        }
    }
}

pub struct ListDirTool {
    workspace: PathBuf,
}

impl ListDirTool {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self { workspace: workspace.into() }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }
    fn description(&self) -> &str {
        "List the contents of a directory in the workspace."
    }
    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path to the directory to list (defaults to the workspace root)"},
            },
            "required": [],
        })
    }
    async fn execute(&self, arguments: serde_json::Value) -> ToolResult {
        let path = arguments.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let resolved = match resolve_within(&self.workspace, path, true) {
            Ok(p) => p,
            Err(e) => return ToolResult::failure(e),
        };
        if !resolved.is_dir() {
            return ToolResult::failure(format!("Not a directory: {path}"));
        }
        let mut entries = match tokio::fs::read_dir(&resolved).await {
            Ok(r) => r,
            Err(e) => return ToolResult::failure(e.to_string()),
        };
        let mut items = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let is_dir = entry.path().is_dir();
                    let kind = if is_dir { "dir" } else { "file" };
                    items.push(format!("{} ({kind})", entry.file_name().to_string_lossy()));
                }
                Ok(None) => break,
                Err(e) => return ToolResult::failure(e.to_string()),
            }
        }
        items.sort();
        let count = items.len();
        let output = if items.is_empty() {
            "(empty directory)".to_string()
        } else {
            items.join("\n")
        };
        ToolResult {
            success: true,
            output,
            error: None,
            data: Some(json!({"path": resolved.display().to_string(), "count": count})),
        }
    }
}

pub struct SearchFilesTool {
    workspace: PathBuf,
}

impl SearchFilesTool {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self { workspace: workspace.into() }
    }
}

const MAX_SEARCH_MATCHES: usize = 200;

fn walk_text_files(root: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(root) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.file_name().and_then(|n| n.to_str()) == Some(".git") {
            continue;
        }
        if path.is_dir() {
            walk_text_files(&path, out);
        } else {
            out.push(path);
        }
    }
}

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        "search_files"
    }
    fn description(&self) -> &str {
        "Search workspace files for a regular expression pattern."
    }
    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {"type": "string", "description": "Regular expression to search for"},
                "path": {"type": "string", "description": "Directory to search (defaults to the workspace root)"},
            },
            "required": ["pattern"],
        })
    }
    async fn execute(&self, arguments: serde_json::Value) -> ToolResult {
        let Some(pattern) = arguments.get("pattern").and_then(|v| v.as_str()) else {
            return ToolResult::failure("missing required parameter: pattern");
        };
        let path = arguments.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let root = match resolve_within(&self.workspace, path, true) {
            Ok(p) => p,
            Err(e) => return ToolResult::failure(e),
        };
        let regex = match regex::Regex::new(pattern) {
            Ok(r) => r,
            Err(e) => return ToolResult::failure(format!("invalid pattern: {e}")),
        };

        let mut files = Vec::new();
        walk_text_files(&root, &mut files);

        let mut matches = Vec::new();
        'files: for file in &files {
            let Ok(content) = std::fs::read_to_string(file) else {
                continue;
            };
            for (lineno, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    let rel = file.strip_prefix(&self.workspace).unwrap_or(file);
                    matches.push(format!("{}:{}: {}", rel.display(), lineno + 1, line.trim()));
                    if matches.len() >= MAX_SEARCH_MATCHES {
                        break 'files;
                    }
                }
            }
        }

        let count = matches.len();
        let output = if matches.is_empty() {
            "(no matches)".to_string()
        } else {
            matches.join("\n")
        };
        ToolResult {
            success: true,
            output,
            error: None,
            data: Some(json!({"count": count})),
        }
    }
}
