//! run_tests 工具：在工作目录下运行配置好的测试命令
//!
//! 测试失败是正常结果（返回 Ok，文本中带 FAILED），只有命令无法启动或超时才返回 Err。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use crate::tools::{ParamType, Tool, ToolInput, ToolSchema};

pub struct RunTestsTool {
    project_root: PathBuf,
    command: Vec<String>,
    timeout_secs: u64,
}

impl RunTestsTool {
    /// command 为程序名加固定参数，例如 ["cargo", "test"]
    pub fn new(project_root: impl AsRef<Path>, command: Vec<String>) -> Self {
        Self {
            project_root: project_root.as_ref().to_path_buf(),
            command,
            timeout_secs: 300,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

#[async_trait]
impl Tool for RunTestsTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "run_tests",
            "Run the project's test suite and report PASSED or FAILED with the captured output.",
        )
        .optional("path", ParamType::String, "Test file or test filter to pass to the test command.")
    }

    async fn execute(&self, input: &ToolInput) -> Result<String, String> {
        let (program, fixed_args) = self
            .command
            .split_first()
            .ok_or_else(|| "No test command configured.".to_string())?;

        let mut cmd = Command::new(program);
        cmd.args(fixed_args);
        cmd.current_dir(&self.project_root);
        if let Some(path) = input.get("path").and_then(|v| v.as_str()) {
            if !path.is_empty() {
                cmd.arg(path);
            }
        }
        cmd.kill_on_drop(true);

        let output = tokio::time::timeout(
            tokio::time::Duration::from_secs(self.timeout_secs),
            cmd.output(),
        )
        .await
        .map_err(|_| "Test execution timed out".to_string())?
        .map_err(|e| format!("Failed to run tests: {}", e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);

        let mut result = format!(
            "Test Result: {}\nExit Code: {}\n\n",
            if output.status.success() { "PASSED" } else { "FAILED" },
            exit_code
        );
        if !stdout.is_empty() {
            result.push_str("STDOUT:\n");
            result.push_str(&stdout);
            result.push('\n');
        }
        if !stderr.is_empty() {
            result.push_str("STDERR:\n");
            result.push_str(&stderr);
        }
        Ok(result)
    }
}
