//! Payload image signing.
//!
//! Appends a verified-boot footer (and, unless suppressed, a hash tree) to the
//! image with avbtool, then shrinks the declared partition to the smallest
//! block-aligned size that still holds the footer plus one block of slack.

use std::path::Path;

use regex::Regex;
use tracing::{debug, info};

use crate::common::{round_up, BLOCK_SIZE};
use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::process::{Cmd, ToolPath};

const ALGORITHM: &str = "SHA256_RSA4096";
const HASH_ALGORITHM: &str = "sha256";

/// What the footer is keyed by and how it is produced.
#[derive(Debug, Clone)]
pub struct SigningParams<'a> {
    pub key: &'a Path,
    pub key_name: String,
    pub salt: String,
    pub no_hashtree: bool,
    pub extra_args: &'a [String],
}

impl<'a> SigningParams<'a> {
    pub fn new(
        manifest: &Manifest,
        key: &'a Path,
        check_key_name: bool,
        no_hashtree: bool,
        extra_args: &'a [String],
    ) -> Self {
        Self {
            key,
            key_name: key_name(manifest, key, check_key_name),
            salt: manifest.digest_hex(),
            no_hashtree,
            extra_args,
        }
    }
}

/// Label recorded as the `apex.key` property.
///
/// The key file's stem when key names are checked, the package name otherwise.
pub fn key_name(manifest: &Manifest, key: &Path, check_key_name: bool) -> String {
    if !check_key_name {
        return manifest.name().to_string();
    }
    key.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| manifest.name().to_string())
}

/// Footer location as reported by `avbtool info_image`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VbmetaInfo {
    pub offset: u64,
    pub size: u64,
}

fn field(report: &str, label: &str) -> Option<u64> {
    let re = Regex::new(&format!(r"{}:\s*([0-9]+)", regex::escape(label))).ok()?;
    re.captures(report)?.get(1)?.as_str().parse().ok()
}

impl VbmetaInfo {
    /// Parse the `VBMeta offset:` and `VBMeta size:` lines of a report.
    pub fn parse(report: &str) -> Option<Self> {
        Some(Self {
            offset: field(report, "VBMeta offset")?,
            size: field(report, "VBMeta size")?,
        })
    }

    /// Smallest block-aligned partition holding the footer, plus one block.
    pub fn partition_size(&self) -> u64 {
        round_up(self.offset + self.size, BLOCK_SIZE) + BLOCK_SIZE
    }
}

fn footer_cmd(img: &Path, params: &SigningParams) -> Cmd {
    let mut cmd = Cmd::new("avbtool")
        .arg("add_hashtree_footer")
        .arg("--do_not_generate_fec")
        .args(["--algorithm", ALGORITHM])
        .args(["--hash_algorithm", HASH_ALGORITHM])
        .arg("--key")
        .arg_path(params.key)
        .args(["--prop", &format!("apex.key:{}", params.key_name)])
        .args(["--salt", &params.salt])
        .arg("--image")
        .arg_path(img);
    if params.no_hashtree {
        cmd = cmd.arg("--no_hashtree");
    }
    cmd.args(params.extra_args)
}

fn signing_failed(img: &Path) -> impl FnOnce(Error) -> Error + '_ {
    move |err| match err {
        Error::ExternalToolFailed { output, code, .. } => Error::SigningFailed {
            image: img.to_path_buf(),
            reason: format!("avbtool exited with code {code}: {output}"),
        },
        other => other,
    }
}

/// Query the footer location of a signed image.
pub fn info_image(img: &Path, tools: &ToolPath) -> Result<VbmetaInfo> {
    let result = Cmd::new("avbtool")
        .arg("info_image")
        .arg("--image")
        .arg_path(img)
        .run(tools)
        .map_err(signing_failed(img))?;
    VbmetaInfo::parse(&result.output).ok_or_else(|| Error::SigningFailed {
        image: img.to_path_buf(),
        reason: "info_image did not report the VBMeta offset and size".into(),
    })
}

/// Attach the footer and shrink the partition around it.
pub fn sign_image(img: &Path, params: &SigningParams, tools: &ToolPath) -> Result<()> {
    info!("Signing payload with key '{}'", params.key_name);
    debug!("Salt: {}", params.salt);

    footer_cmd(img, params).run(tools).map_err(signing_failed(img))?;

    let vbmeta = info_image(img, tools)?;
    let partition_size = vbmeta.partition_size();
    debug!(
        "VBMeta at {}+{}, resizing to {}",
        vbmeta.offset, vbmeta.size, partition_size
    );

    Cmd::new("avbtool")
        .arg("resize_image")
        .arg("--image")
        .arg_path(img)
        .args(["--partition_size", &partition_size.to_string()])
        .run(tools)
        .map_err(signing_failed(img))?;
    Ok(())
}
