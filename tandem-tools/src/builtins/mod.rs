//! Builtin tools.

mod bash;
mod edit_file;
mod glob;
mod grep;
mod list_dir;
mod read_file;
mod web;
mod write_file;

pub use bash::BashTool;
pub use edit_file::EditFileTool;
pub use glob::GlobTool;
pub use grep::GrepTool;
pub use list_dir::ListDirectoryTool;
pub use read_file::ReadFileTool;
pub use web::{WebFetchTool, WebSearchTool};
pub use write_file::WriteFileTool;
