//! erofs payload backend.
//!
//! make_erofs takes a single source directory, so the manifests and the
//! staged tree are merged into one root first.

use std::fs::{self, OpenOptions};
use std::path::Path;

use tracing::debug;

use super::{deterministic_uuid, ImageSources};
use crate::common::{copy_tree_contents, BLOCK_SIZE};
use crate::error::{IoContext, Result};
use crate::process::{Cmd, ToolPath};

pub fn build(sources: &ImageSources, img: &Path, tools: &ToolPath) -> Result<()> {
    let merged = sources.work_dir.join("tmp_input_dir");
    fs::create_dir(&merged).io_context("Cannot create", &merged)?;
    copy_tree_contents(sources.manifests_dir, &merged)?;
    copy_tree_contents(sources.staging_dir, &merged)?;

    Cmd::new("make_erofs")
        .args(["-z", "lz4hc"])
        .arg("--fs-config-file")
        .arg_path(sources.canned_fs_config)
        .arg("--file-contexts")
        .arg_path(sources.file_contexts)
        .args(["-U", &deterministic_uuid()])
        .args(["-T", "0"])
        .arg_path(img)
        .arg_path(&merged)
        .run(tools)?;

    fs::remove_dir_all(&merged).io_context("Cannot remove", &merged)?;

    pad_minimum_image(img)
}

/// Grow a one-block image to two blocks.
///
/// The smallest erofs image is a single block, and the footer signer cannot
/// build a hash tree for it.
pub fn pad_minimum_image(img: &Path) -> Result<()> {
    let len = fs::metadata(img).io_context("Cannot stat", img)?.len();
    if len == BLOCK_SIZE {
        debug!("Padding {} to {} bytes", img.display(), 2 * BLOCK_SIZE);
        let file = OpenOptions::new()
            .write(true)
            .open(img)
            .io_context("Cannot open", img)?;
        file.set_len(2 * BLOCK_SIZE).io_context("Cannot resize", img)?;
    }
    Ok(())
}
