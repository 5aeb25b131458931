//! Payload construction.
//!
//! Image payloads are filesystem images built by one of three backends:
//! - [`ext4`] - journal-less ext4 via mke2fs/e2fsdroid, shrunk afterwards
//! - [`f2fs`] - pre-allocated f2fs via make_f2fs/sload_f2fs
//! - [`erofs`] - lz4hc-compressed erofs via make_erofs
//!
//! Zip payloads are plain archives of the staged tree and manifests.
//!
//! Every identifier, seed and timestamp handed to the backends is a fixed
//! constant so repeated builds of the same input are byte-identical.

pub mod erofs;
pub mod ext4;
pub mod f2fs;

use std::path::{Path, PathBuf};

use tracing::info;
use uuid::Uuid;

use crate::common::dir_size;
use crate::config::FsType;
use crate::error::Result;
use crate::process::{Cmd, ToolPath};

pub const PAYLOAD_IMAGE_NAME: &str = "apex_payload.img";
pub const PAYLOAD_ZIP_NAME: &str = "apex_payload.zip";

const MIB: u64 = 1024 * 1024;
const UUID_NAME: &str = "www.android.com";

/// Filesystem UUID (and ext4 hash seed) used for every image.
pub fn deterministic_uuid() -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, UUID_NAME.as_bytes()).to_string()
}

/// Image size in MiB: whole MiB of staged data plus `margin_mb`.
pub fn image_size_mb(staging_dir: &Path, margin_mb: u64) -> Result<u64> {
    Ok(dir_size(staging_dir)? / MIB + margin_mb)
}

/// Directories and policy files an image backend reads.
#[derive(Debug, Clone, Copy)]
pub struct ImageSources<'a> {
    pub staging_dir: &'a Path,
    pub manifests_dir: &'a Path,
    /// Scratch space inside the build workspace.
    pub work_dir: &'a Path,
    pub file_contexts: &'a Path,
    pub canned_fs_config: &'a Path,
}

/// Build an unsigned image at `img` with the chosen backend.
pub fn create_image(fs_type: FsType, sources: &ImageSources, img: &Path, tools: &ToolPath) -> Result<()> {
    info!("Creating {} payload image", fs_type.as_str());
    match fs_type {
        FsType::Ext4 => ext4::build(sources, img, tools),
        FsType::F2fs => f2fs::build(sources, img, tools),
        FsType::Erofs => erofs::build(sources, img, tools),
    }
}

/// Archive the staged tree and the manifests into `content_dir`.
pub fn create_zip_payload(
    staging_dir: &Path,
    manifests_dir: &Path,
    content_dir: &Path,
    tools: &ToolPath,
) -> Result<PathBuf> {
    let out = content_dir.join(PAYLOAD_ZIP_NAME);
    info!("Creating zip payload");
    zip_payload_cmd(staging_dir, manifests_dir, &out).run(tools)?;
    Ok(out)
}

fn zip_payload_cmd(staging_dir: &Path, manifests_dir: &Path, out: &Path) -> Cmd {
    Cmd::new("soong_zip")
        .arg("-o")
        .arg_path(out)
        .arg("-C")
        .arg_path(staging_dir)
        .arg("-D")
        .arg_path(staging_dir)
        .arg("-C")
        .arg_path(manifests_dir)
        .arg("-D")
        .arg_path(manifests_dir)
}
