//! Execution context and path sandbox.
//!
//! Every file-touching tool resolves paths through [`ToolContext`], which
//! confines access to the workspace (plus explicitly allowed extra paths).
//! Containment is checked on canonicalized paths with component-wise
//! `starts_with`, never string prefixes, so `/work` can not leak into
//! `/workspace-other`.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::error::{ToolError, ToolResult};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ToolContext {
    workspace: PathBuf,
    allowed_paths: Vec<PathBuf>,
    pub environment: HashMap<String, String>,
    pub timeout: Duration,
}

impl ToolContext {
    /// Create a context rooted at `workspace`, which must exist.
    pub fn new(workspace: impl AsRef<Path>) -> ToolResult<Self> {
        Ok(Self {
            workspace: workspace.as_ref().canonicalize()?,
            allowed_paths: Vec::new(),
            environment: HashMap::new(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Grant access to a path outside the workspace.
    pub fn allow_path(mut self, path: impl AsRef<Path>) -> ToolResult<Self> {
        self.allowed_paths.push(path.as_ref().canonicalize()?);
        Ok(self)
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.environment = env;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Resolve a raw path argument inside the sandbox.
    ///
    /// Relative paths are taken from the workspace root. The target does
    /// not need to exist (write_file creates files), but its nearest
    /// existing ancestor must resolve inside an allowed root.
    pub fn resolve_path(&self, raw: &str) -> ToolResult<PathBuf> {
        let candidate = Path::new(raw);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.workspace.join(candidate)
        };

        let resolved = canonicalize_lenient(&joined)?;
        if resolved
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(ToolError::PathEscape(joined));
        }
        if self.is_allowed(&resolved) {
            Ok(resolved)
        } else {
            Err(ToolError::PathEscape(resolved))
        }
    }

    fn is_allowed(&self, path: &Path) -> bool {
        path.starts_with(&self.workspace)
            || self.allowed_paths.iter().any(|root| path.starts_with(root))
    }

    /// Workspace-relative form for display, falling back to the full path.
    pub fn display_path(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.workspace)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Canonicalize a path that may not exist yet: resolve the nearest
/// existing ancestor, then re-append the missing tail.
fn canonicalize_lenient(path: &Path) -> ToolResult<PathBuf> {
    if path.exists() {
        return Ok(path.canonicalize()?);
    }

    let mut existing = path;
    let mut tail = Vec::new();
    loop {
        if existing.exists() {
            break;
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent;
            }
            _ => return Err(ToolError::PathEscape(path.to_path_buf())),
        }
    }

    let mut resolved = existing.canonicalize()?;
    for name in tail.iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}
