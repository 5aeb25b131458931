//! External tool invocation with a typed contract.
//!
//! Every tool the pipeline drives (filesystem formatters, loaders, the
//! footer signer, the descriptor linker, the archive utility) goes through
//! [`Cmd`]. Binaries are resolved against an explicit [`ToolPath`]; there is
//! no process-wide search list.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Ordered list of directories that hold the packaging tools.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolPath {
    dirs: Vec<PathBuf>,
}

impl ToolPath {
    pub fn new<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            dirs: dirs.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a colon-separated directory list, skipping empty segments.
    pub fn parse(list: &str) -> Self {
        Self::new(list.split(':').filter(|s| !s.is_empty()))
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Resolve `tool` to the first matching executable in the list.
    ///
    /// Absolute tool names are used as-is when they exist.
    pub fn find(&self, tool: &str) -> Result<PathBuf> {
        let joined = std::env::join_paths(&self.dirs).unwrap_or_else(|_| OsString::new());
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        which::which_in(tool, Some(joined), cwd).map_err(|_| Error::ToolNotFound {
            tool: tool.to_string(),
            searched: self.display(),
        })
    }

    fn display(&self) -> String {
        self.dirs
            .iter()
            .map(|d| d.display().to_string())
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// Result of a tool execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit code, or -1 if terminated by signal.
    pub code: i32,
    /// Captured stdout followed by captured stderr.
    pub output: String,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    pub fn output_trimmed(&self) -> &str {
        self.output.trim()
    }
}

/// Builder for one tool invocation.
#[derive(Debug, Clone)]
pub struct Cmd {
    tool: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    accepted_codes: Vec<i32>,
}

impl Cmd {
    pub fn new(tool: impl AsRef<str>) -> Self {
        Self {
            tool: tool.as_ref().to_string(),
            args: Vec::new(),
            envs: Vec::new(),
            accepted_codes: vec![0],
        }
    }

    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    /// Set an extra environment variable on top of the inherited environment.
    pub fn env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.envs
            .push((key.as_ref().to_string(), value.as_ref().to_string()));
        self
    }

    /// Replace the accepted exit-code set (default `{0}`).
    pub fn accept_codes(mut self, codes: &[i32]) -> Self {
        self.accepted_codes = codes.to_vec();
        self
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn arg_list(&self) -> &[String] {
        &self.args
    }

    /// Command line as printed in diagnostics.
    pub fn command_line(&self) -> String {
        std::iter::once(self.tool.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Resolve the tool, run it to completion and check its exit code.
    pub fn run(self, tools: &ToolPath) -> Result<CommandResult> {
        let binary = tools.find(&self.tool)?;
        debug!("Running: {} {}", binary.display(), self.args.join(" "));

        let output = Command::new(&binary)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .output()
            .map_err(|e| Error::ExternalToolFailed {
                command: self.command_line(),
                code: -1,
                output: format!("Failed to execute '{}': {}", binary.display(), e),
            })?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        let result = CommandResult {
            code: output.status.code().unwrap_or(-1),
            output: text,
        };

        if !self.accepted_codes.contains(&result.code) {
            return Err(Error::ExternalToolFailed {
                command: self.command_line(),
                code: result.code,
                output: result.output_trimmed().to_string(),
            });
        }
        if !result.success() {
            warn!(
                "{} exited with tolerated code {}",
                self.tool, result.code
            );
        }
        if !result.output_trimmed().is_empty() {
            debug!("{}", result.output_trimmed());
        }

        Ok(result)
    }
}
