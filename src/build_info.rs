//! Build-info record: the inputs a build consumed, for reproducing it later.
//!
//! A previous record can also be fed back in with `--build_info` to supply
//! defaults for options that are not given explicitly.

use std::fs;
use std::path::Path;

use prost::Message;

use crate::config::{BuildArgs, PayloadType};
use crate::error::{Error, IoContext, Result};

/// File name of the record inside the container.
pub const BUILD_INFO_NAME: &str = "apex_build_info.pb";

/// Wire representation of `apex_build_info.proto`.
#[derive(Clone, PartialEq, Message)]
pub struct ApexBuildInfo {
    #[prost(string, tag = "1")]
    pub apexer_command_line: String,
    #[prost(bytes = "vec", tag = "2")]
    pub file_contexts: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub canned_fs_config: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub android_manifest: Vec<u8>,
    #[prost(string, tag = "5")]
    pub min_sdk_version: String,
    #[prost(string, tag = "6")]
    pub target_sdk_version: String,
    #[prost(bool, tag = "7")]
    pub no_hashtree: bool,
    #[prost(string, tag = "8")]
    pub override_apk_package_name: String,
    #[prost(string, tag = "9")]
    pub logging_parent: String,
    #[prost(string, tag = "10")]
    pub payload_fs_type: String,
}

/// Load a record written by a previous build.
pub fn load(path: &Path) -> Result<ApexBuildInfo> {
    if !path.exists() {
        return Err(Error::InvalidInput(format!(
            "Build info file '{}' does not exist",
            path.display()
        )));
    }
    let bytes = fs::read(path).io_context("Cannot read build info file", path)?;
    ApexBuildInfo::decode(bytes.as_slice()).map_err(|e| {
        Error::InvalidInput(format!(
            "Build info file '{}' is not valid: {}",
            path.display(),
            e
        ))
    })
}

/// Inputs the record captures, already resolved by the pipeline.
pub struct RecordedInputs<'a> {
    pub file_contexts: Option<&'a [u8]>,
    /// Ownership table after placeholder substitution.
    pub canned_fs_config: Option<&'a [u8]>,
    /// Descriptor as supplied or synthesized.
    pub android_manifest: &'a [u8],
}

/// Build the record for this invocation.
pub fn generate(args: &BuildArgs, inputs: &RecordedInputs) -> ApexBuildInfo {
    let mut info = ApexBuildInfo {
        android_manifest: inputs.android_manifest.to_vec(),
        no_hashtree: args.no_hashtree,
        ..Default::default()
    };

    if args.include_cmd_line_in_build_info {
        info.apexer_command_line = list_repr(&args.command_line);
    }
    if let Some(bytes) = inputs.file_contexts {
        info.file_contexts = bytes.to_vec();
    }
    if let Some(bytes) = inputs.canned_fs_config {
        info.canned_fs_config = bytes.to_vec();
    }
    if let Some(v) = &args.target_sdk_version {
        info.target_sdk_version = v.clone();
    }
    if let Some(v) = &args.min_sdk_version {
        info.min_sdk_version = v.clone();
    }
    if let Some(v) = &args.override_apk_package_name {
        info.override_apk_package_name = v.clone();
    }
    if let Some(v) = &args.logging_parent {
        info.logging_parent = v.clone();
    }
    if args.payload_type == PayloadType::Image {
        info.payload_fs_type = args.payload_fs_type.as_str().to_string();
    }

    info
}

/// Render `items` the way the build system prints an argument list, e.g.
/// `['apexer', '--force']`.
fn list_repr(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|s| str_repr(s)).collect();
    format!("[{}]", quoted.join(", "))
}

/// Single-quoted unless the text holds a `'` and no `"`.
fn str_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_control() => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Serialize `info` into `dir` and return the written path.
pub fn write(dir: &Path, info: &ApexBuildInfo) -> Result<std::path::PathBuf> {
    let path = dir.join(BUILD_INFO_NAME);
    fs::write(&path, info.encode_to_vec()).io_context("Cannot write", &path)?;
    Ok(path)
}
