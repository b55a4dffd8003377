pub mod builtin;
pub mod echo;
pub mod error;
pub mod executor;
pub mod filesystem;
pub mod registry;
pub mod schema;
pub mod test_run;

pub use builtin::{builtin_registry, BuiltinTool};
pub use echo::EchoTool;
pub use error::ToolError;
pub use executor::{ToolCall, ToolExecutor, ToolRequest};
pub use filesystem::{DeleteFileTool, EditFileTool, ListFilesTool, ReadFileTool, SafeFs};
pub use registry::{Tool, ToolRegistry};
pub use schema::{tool_call_schema_json, ParamSpec, ParamType, ToolInput, ToolSchema};
pub use test_run::RunTestsTool;
