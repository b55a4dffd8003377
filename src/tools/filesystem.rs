//! 沙箱文件系统工具
//!
//! SafeFs 绑定 root_dir，所有路径经 resolve 校验必须在 root 下（禁止 ../ 逃逸）；
//! read_file / list_files / edit_file / delete_file 基于 SafeFs 提供文件能力。

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use walkdir::WalkDir;

use crate::tools::{ParamType, Tool, ToolInput, ToolSchema};

/// 列目录时跳过的目录
const IGNORED_DIRS: &[&str] = &[".git", "target", "__pycache__", ".venv", ".idea", "node_modules"];

/// 沙箱文件系统：绑定根目录，resolve 校验路径在根下，防止路径逃逸
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        Self { root_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 解析已存在的路径（跟随符号链接后仍须在根下）
    pub fn resolve(&self, path: &str) -> Result<PathBuf, String> {
        let lexical = self.resolve_lexical(path)?;
        let canonical = lexical
            .canonicalize()
            .map_err(|_| format!("File not found at path '{}'.", path))?;
        if canonical.starts_with(&self.root_dir) {
            Ok(canonical)
        } else {
            Err(format!("Access denied: path '{}' is outside the workspace.", path))
        }
    }

    /// 解析写入目标：最近的已存在祖先（含目标本身）跟随符号链接后仍须在根下
    pub fn resolve_for_write(&self, path: &str) -> Result<PathBuf, String> {
        let lexical = self.resolve_lexical(path)?;
        let existing = lexical
            .ancestors()
            .find(|p| p.symlink_metadata().is_ok())
            .unwrap_or(self.root_dir.as_path());
        let inside = existing
            .canonicalize()
            .map(|c| c.starts_with(&self.root_dir))
            .unwrap_or(false);
        if inside {
            Ok(lexical)
        } else {
            Err(format!("Access denied: path '{}' is outside the workspace.", path))
        }
    }

    /// 按词法规范化路径（不要求存在）
    pub fn resolve_lexical(&self, path: &str) -> Result<PathBuf, String> {
        let raw = Path::new(path);
        let rel = if raw.is_absolute() {
            raw.strip_prefix(&self.root_dir)
                .map_err(|_| format!("Access denied: path '{}' is outside the workspace.", path))?
        } else {
            raw
        };
        let mut out = self.root_dir.clone();
        for comp in rel.components() {
            match comp {
                Component::Normal(c) => out.push(c),
                Component::CurDir => {}
                Component::ParentDir => {
                    if out == self.root_dir {
                        return Err(format!(
                            "Access denied: path '{}' is outside the workspace.",
                            path
                        ));
                    }
                    out.pop();
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(format!("Invalid path '{}'.", path));
                }
            }
        }
        Ok(out)
    }

    fn display(&self, path: &Path) -> String {
        path.strip_prefix(&self.root_dir)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string()
    }
}

fn str_arg<'a>(input: &'a ToolInput, key: &str) -> Option<&'a str> {
    input.get(key).and_then(|v| v.as_str())
}

/// read_file：读取文件内容
pub struct ReadFileTool {
    fs: SafeFs,
}

impl ReadFileTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "read_file",
            "Read the contents of a file. Use it to see what is inside a file.",
        )
        .required("path", ParamType::String, "File path relative to the workspace root.")
    }

    async fn execute(&self, input: &ToolInput) -> Result<String, String> {
        let path = str_arg(input, "path").unwrap_or_default();
        tracing::debug!(path = %path, "read_file");
        let resolved = self.fs.resolve(path)?;
        tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| format!("Could not read file '{}': {}", path, e))
    }
}

/// list_files：递归列出目录
pub struct ListFilesTool {
    fs: SafeFs,
}

impl ListFilesTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "list_files",
            "Recursively list files and directories to understand the project structure. Defaults to the workspace root.",
        )
        .optional("path", ParamType::String, "Directory, e.g. '.' or 'src/agents'.")
        .optional("pattern", ParamType::String, "Glob filter on relative file paths, e.g. '**/*.rs'.")
    }

    async fn execute(&self, input: &ToolInput) -> Result<String, String> {
        let path = str_arg(input, "path").unwrap_or(".");
        let base = self.fs.resolve(path)?;
        if !base.is_dir() {
            return Err(format!("Path '{}' is not a directory or does not exist.", path));
        }
        let pattern = match str_arg(input, "pattern") {
            Some(p) => Some(glob::Pattern::new(p).map_err(|e| format!("Invalid pattern '{}': {}", p, e))?),
            None => None,
        };

        let mut lines = Vec::new();
        let walker = WalkDir::new(&base)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                !(e.file_type().is_dir() && IGNORED_DIRS.contains(&name.as_ref()))
            });
        for entry in walker {
            let entry = entry.map_err(|e| format!("Could not list '{}': {}", path, e))?;
            let rel = entry.path().strip_prefix(&base).unwrap_or(entry.path());
            if let Some(p) = &pattern {
                if entry.file_type().is_dir() || !p.matches_path(rel) {
                    continue;
                }
                lines.push(rel.to_string_lossy().to_string());
                continue;
            }
            let indent = "    ".repeat(entry.depth());
            let suffix = if entry.file_type().is_dir() { "/" } else { "" };
            lines.push(format!("{}{}{}", indent, entry.file_name().to_string_lossy(), suffix));
        }
        Ok(format!(
            "Contents of directory '{}':\n{}",
            self.fs.display(&base),
            lines.join("\n")
        ))
    }
}

/// edit_file：覆盖 / 追加 / 替换片段
pub struct EditFileTool {
    fs: SafeFs,
}

impl EditFileTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "edit_file",
            "Create or edit a file. Modes: 'overwrite' (default, replaces the whole file), \
             'append' (adds content to the end), 'replace' (replaces the first occurrence of old_text with content).",
        )
        .required("path", ParamType::String, "File path relative to the workspace root.")
        .required("content", ParamType::String, "New content (or replacement text in 'replace' mode).")
        .optional("mode", ParamType::String, "overwrite | append | replace")
        .optional("old_text", ParamType::String, "Fragment to replace; required in 'replace' mode.")
    }

    async fn execute(&self, input: &ToolInput) -> Result<String, String> {
        let path = str_arg(input, "path").unwrap_or_default();
        let content = str_arg(input, "content").unwrap_or_default();
        let mode = str_arg(input, "mode").unwrap_or("overwrite");
        let target = self.fs.resolve_for_write(path)?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("Failed to create parent directory: {}", e))?;
        }

        match mode {
            "overwrite" => {
                tokio::fs::write(&target, content)
                    .await
                    .map_err(|e| format!("Could not write file '{}': {}", path, e))?;
                Ok(format!("File '{}' saved ({} bytes).", path, content.len()))
            }
            "append" => {
                let mut existing = tokio::fs::read_to_string(&target).await.unwrap_or_default();
                existing.push_str(content);
                tokio::fs::write(&target, &existing)
                    .await
                    .map_err(|e| format!("Could not write file '{}': {}", path, e))?;
                Ok(format!("Appended {} bytes to '{}'.", content.len(), path))
            }
            "replace" => {
                let old = str_arg(input, "old_text")
                    .ok_or_else(|| "Mode 'replace' requires 'old_text'.".to_string())?;
                let existing = tokio::fs::read_to_string(&target)
                    .await
                    .map_err(|_| format!("File not found at path '{}'.", path))?;
                if !existing.contains(old) {
                    return Err(format!("Fragment not found in '{}'.", path));
                }
                let updated = existing.replacen(old, content, 1);
                tokio::fs::write(&target, updated)
                    .await
                    .map_err(|e| format!("Could not write file '{}': {}", path, e))?;
                Ok(format!("Replaced fragment in '{}'.", path))
            }
            other => Err(format!("Unknown mode '{}'. Use overwrite, append or replace.", other)),
        }
    }
}

/// delete_file：删除文件（不可逆）
pub struct DeleteFileTool {
    fs: SafeFs,
}

impl DeleteFileTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new("delete_file", "Delete a file. This cannot be undone.")
            .required("path", ParamType::String, "File path relative to the workspace root.")
    }

    async fn execute(&self, input: &ToolInput) -> Result<String, String> {
        let path = str_arg(input, "path").unwrap_or_default();
        let target = self
            .fs
            .resolve(path)
            .map_err(|_| format!("File '{}' not found and cannot be deleted.", path))?;
        if !target.is_file() {
            return Err(format!("File '{}' not found and cannot be deleted.", path));
        }
        tokio::fs::remove_file(&target)
            .await
            .map_err(|e| format!("Could not delete file '{}': {}", path, e))?;
        Ok(format!("File '{}' deleted.", path))
    }
}
