//! Preflight checks.
//!
//! Resolves every tool the selected configuration will invoke before the
//! first one runs, so a missing tool fails the build with nothing written.

use std::path::PathBuf;

use tracing::debug;

use crate::config::{BuildArgs, FsType, PayloadType};
use crate::error::Result;
use crate::process::ToolPath;

/// A tool the build will invoke, with what it is needed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequiredTool {
    pub name: &'static str,
    pub purpose: &'static str,
}

const fn tool(name: &'static str, purpose: &'static str) -> RequiredTool {
    RequiredTool { name, purpose }
}

/// Tools needed for `args`, in the order the pipeline first runs them.
pub fn required_tools(args: &BuildArgs) -> Vec<RequiredTool> {
    let mut tools = Vec::new();

    match args.payload_type {
        PayloadType::Image => match args.payload_fs_type {
            FsType::Ext4 => tools.extend([
                tool("mke2fs", "format the ext4 payload"),
                tool("sefcontext_compile", "compile file contexts"),
                tool("e2fsdroid", "load the ext4 payload"),
                tool("resize2fs", "shrink the ext4 payload"),
            ]),
            FsType::F2fs => tools.extend([
                tool("make_f2fs", "format the f2fs payload"),
                tool("sload_f2fs", "load the f2fs payload"),
            ]),
            FsType::Erofs => tools.push(tool("make_erofs", "build the erofs payload")),
        },
        PayloadType::Zip => tools.push(tool("soong_zip", "build the zip payload")),
    }

    if args.signs_payload() {
        tools.push(tool("avbtool", "sign the payload"));
    }
    if !args.payload_only {
        tools.push(tool("aapt2", "link the application descriptor"));
    }

    tools
}

/// Resolve every tool in `required`, failing on the first missing one.
pub fn check_tools(required: &[RequiredTool], tools: &ToolPath) -> Result<Vec<PathBuf>> {
    required
        .iter()
        .map(|t| {
            let path = tools.find(t.name)?;
            debug!("{} ({}): {}", t.name, t.purpose, path.display());
            Ok(path)
        })
        .collect()
}

/// Check that everything `args` needs is on its tool path.
pub fn run(args: &BuildArgs) -> Result<()> {
    check_tools(&required_tools(args), &args.tool_path)?;
    Ok(())
}
