//! RCode built-in tools
//!
//! File, directory, search, shell, git, and web tools implementing the
//! core [`Tool`](rcode_core::tool::Tool) contract. Register them all with
//! [`register_builtin_tools`] at startup.

pub mod dir_tools;
pub mod file_tools;
pub mod git_tools;
pub mod search_tools;
pub mod shell_tools;
pub mod web_tools;

use std::sync::Arc;

use rcode_core::retry::RetryPolicy;
use rcode_core::tool::ToolRegistry;

pub use dir_tools::{
    ListDirectoryTool, MakeDirectoryTool, MovePathTool, RemovePathTool, TreeDirectoryTool,
};
pub use file_tools::{EditFileTool, ReadFileTool, WriteFileTool};
pub use git_tools::git_tools;
pub use search_tools::SearchFilesTool;
pub use shell_tools::ShellCommandTool;
pub use web_tools::WebFetchTool;

/// Register every built-in tool with its retry-policy category
pub fn register_builtin_tools(registry: &mut ToolRegistry) {
    // Filesystem tools retry under the short filesystem policy
    registry.register(Arc::new(ReadFileTool));
    registry.register(Arc::new(WriteFileTool));
    registry.register(Arc::new(EditFileTool));
    registry.register(Arc::new(ListDirectoryTool));
    registry.register(Arc::new(TreeDirectoryTool));
    registry.register(Arc::new(MakeDirectoryTool));
    registry.register(Arc::new(RemovePathTool));
    registry.register(Arc::new(MovePathTool));
    registry.register(Arc::new(SearchFilesTool));
    for name in [
        "read_file",
        "write_file",
        "edit_file",
        "list_directory",
        "tree_directory",
        "make_directory",
        "remove_path",
        "move_path",
        "search_files",
    ] {
        registry.set_retry_policy(name, RetryPolicy::filesystem());
    }

    // Process-backed tools run once; their effects are not safely repeatable
    registry.register(Arc::new(ShellCommandTool));
    registry.set_retry_policy("shell_command", RetryPolicy::none());
    for tool in git_tools() {
        let name = tool.definition().name;
        registry.register(tool);
        registry.set_retry_policy(name, RetryPolicy::none());
    }

    // Network tools get the longer network policy
    registry.register(Arc::new(WebFetchTool::new()));
    registry.set_retry_policy("web_fetch", RetryPolicy::network());
}
