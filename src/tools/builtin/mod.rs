//! Built-in tools: file access, shell execution, and web fetch.

pub mod file;
pub mod shell;
pub mod web_fetch;

pub use file::{FileReadTool, FileWriteTool};
pub use shell::ShellTool;
pub use web_fetch::WebFetchTool;
