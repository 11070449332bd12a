//! File operations skill: read, write, and list under one base path.
//!
//! Paths are normalized component-by-component before touching the
//! filesystem; anything that would resolve outside the base is refused.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Skill, ToolDefinition, ToolResult};

pub const TOOL_READ_FILE: &str = "read_file";
pub const TOOL_WRITE_FILE: &str = "write_file";
pub const TOOL_LIST_FILES: &str = "list_files";

pub struct FileSkill {
    base: PathBuf,
    write_extensions: Option<Vec<String>>,
}

impl FileSkill {
    pub fn new(base: PathBuf, write_extensions: Option<Vec<String>>) -> Self {
        Self {
            base,
            write_extensions: write_extensions.map(|exts| {
                exts.into_iter()
                    .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                    .collect()
            }),
        }
    }

    /// Resolves a relative path against the base, refusing anything that
    /// escapes it. Normalization walks the components so `a/../../x` is
    /// caught without consulting the filesystem.
    fn resolve(&self, raw: &str) -> Result<PathBuf, String> {
        let path = Path::new(raw);
        if path.is_absolute() {
            return Err(format!("absolute paths are not allowed: '{raw}'"));
        }
        let mut depth: i32 = 0;
        let mut clean = PathBuf::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => {
                    depth += 1;
                    clean.push(part);
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(format!("path escapes the base directory: '{raw}'"));
                    }
                    clean.pop();
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(format!("absolute paths are not allowed: '{raw}'"));
                }
            }
        }
        Ok(self.base.join(clean))
    }

    fn extension_allowed(&self, path: &Path) -> bool {
        match &self.write_extensions {
            None => true,
            Some(allowed) => path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| allowed.iter().any(|a| a == &e.to_ascii_lowercase()))
                .unwrap_or(false),
        }
    }

    async fn read(&self, raw: &str) -> ToolResult {
        let path = match self.resolve(raw) {
            Ok(p) => p,
            Err(e) => return ToolResult::fail(e),
        };
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => ToolResult::ok(json!({"path": raw, "content": content})),
            Err(e) => ToolResult::fail(format!("read '{raw}': {e}")),
        }
    }

    async fn write(&self, raw: &str, content: &str) -> ToolResult {
        let path = match self.resolve(raw) {
            Ok(p) => p,
            Err(e) => return ToolResult::fail(e),
        };
        if !self.extension_allowed(&path) {
            return ToolResult::fail(format!(
                "extension of '{raw}' is not on the write allow-list"
            ));
        }
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolResult::fail(format!("create parent of '{raw}': {e}"));
            }
        }
        match tokio::fs::write(&path, content).await {
            Ok(()) => ToolResult::ok(json!({"path": raw, "bytes_written": content.len()})),
            Err(e) => ToolResult::fail(format!("write '{raw}': {e}")),
        }
    }

    async fn list(&self, raw: &str) -> ToolResult {
        let path = match self.resolve(raw) {
            Ok(p) => p,
            Err(e) => return ToolResult::fail(e),
        };
        let mut dir = match tokio::fs::read_dir(&path).await {
            Ok(dir) => dir,
            Err(e) => return ToolResult::fail(format!("list '{raw}': {e}")),
        };
        let mut entries = Vec::new();
        while let Ok(Some(entry)) = dir.next_entry().await {
            let kind = match entry.file_type().await {
                Ok(t) if t.is_dir() => "dir",
                Ok(_) => "file",
                Err(_) => "unknown",
            };
            entries.push(json!({
                "name": entry.file_name().to_string_lossy(),
                "type": kind,
            }));
        }
        entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
        ToolResult::ok(json!({"path": raw, "entries": entries}))
    }
}

#[async_trait]
impl Skill for FileSkill {
    fn name(&self) -> &str {
        "file_ops"
    }

    fn description(&self) -> &str {
        "Read, write, and list files under the working directory"
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let path_property = json!({
            "type": "string",
            "description": "Path relative to the working directory."
        });
        vec![
            ToolDefinition {
                name: TOOL_READ_FILE.to_string(),
                description: "Read a text file.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {"path": path_property},
                    "required": ["path"],
                    "additionalProperties": false
                }),
            },
            ToolDefinition {
                name: TOOL_WRITE_FILE.to_string(),
                description: "Write a text file, creating parent directories.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "path": path_property,
                        "content": {"type": "string"}
                    },
                    "required": ["path", "content"],
                    "additionalProperties": false
                }),
            },
            ToolDefinition {
                name: TOOL_LIST_FILES.to_string(),
                description: "List directory entries.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "path": {
                            "type": "string",
                            "description": "Directory relative to the working directory; default is the working directory itself.",
                            "default": "."
                        }
                    },
                    "additionalProperties": false
                }),
            },
        ]
    }

    async fn execute(&self, tool_name: &str, arguments: &Value) -> ToolResult {
        let path = arguments.get("path").and_then(Value::as_str);
        match tool_name {
            TOOL_READ_FILE => match path {
                Some(p) => self.read(p).await,
                None => ToolResult::fail("missing 'path' argument"),
            },
            TOOL_WRITE_FILE => {
                let content = arguments.get("content").and_then(Value::as_str);
                match (path, content) {
                    (Some(p), Some(c)) => self.write(p, c).await,
                    _ => ToolResult::fail("missing 'path' or 'content' argument"),
                }
            }
            TOOL_LIST_FILES => self.list(path.unwrap_or(".")).await,
            other => ToolResult::fail(format!("unknown tool '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skill_in(dir: &Path) -> FileSkill {
        FileSkill::new(dir.to_path_buf(), None)
    }

    #[test]
    fn resolve_rejects_escapes_and_absolutes() {
        let skill = skill_in(Path::new("/tmp/base"));
        assert!(skill.resolve("../etc/passwd").is_err());
        assert!(skill.resolve("a/../../etc/passwd").is_err());
        assert!(skill.resolve("/etc/passwd").is_err());
        assert!(skill.resolve("..").is_err());

        // Internal `..` that stays inside the base is fine.
        assert_eq!(
            skill.resolve("a/../b.txt").unwrap(),
            PathBuf::from("/tmp/base/b.txt")
        );
        assert_eq!(
            skill.resolve("./notes/x.md").unwrap(),
            PathBuf::from("/tmp/base/notes/x.md")
        );
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let skill = skill_in(dir.path());
        let written = skill.write("notes/hello.txt", "hi there").await;
        assert!(written.success);

        let read = skill.read("notes/hello.txt").await;
        assert!(read.success);
        assert_eq!(read.output["content"], "hi there");

        let listed = skill.list("notes").await;
        assert!(listed.success);
        assert_eq!(listed.output["entries"][0]["name"], "hello.txt");
    }

    #[tokio::test]
    async fn write_allowlist_blocks_other_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let skill = FileSkill::new(dir.path().to_path_buf(), Some(vec!["md".to_string()]));
        assert!(skill.write("ok.md", "x").await.success);
        let blocked = skill.write("bad.sh", "x").await;
        assert!(!blocked.success);
        assert!(blocked.error.unwrap().contains("allow-list"));
        // No extension at all is also refused.
        assert!(!skill.write("noext", "x").await.success);
    }

    #[tokio::test]
    async fn read_missing_file_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let result = skill_in(dir.path()).read("nope.txt").await;
        assert!(!result.success);
    }
}
