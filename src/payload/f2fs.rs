//! f2fs payload backend.

use std::fs::File;
use std::path::Path;

use super::{deterministic_uuid, image_size_mb, ImageSources, MIB};
use crate::error::{IoContext, Result};
use crate::process::{Cmd, ToolPath};

/// make_f2fs refuses images much smaller than this, so it is added on top of
/// the staged data.
pub const SIZE_MARGIN_MB: u64 = 100;

/// sload_f2fs exits 1 on some loads that still produce a usable image.
/// Treated as a benign partial load; no other tool gets this allowance.
const SLOAD_ACCEPTED_CODES: &[i32] = &[0, 1];

pub fn build(sources: &ImageSources, img: &Path, tools: &ToolPath) -> Result<()> {
    let size_mb = image_size_mb(sources.staging_dir, SIZE_MARGIN_MB)?;
    preallocate(img, size_mb * MIB)?;

    Cmd::new("make_f2fs")
        .args(["-g", "android"])
        .args(["-U", &deterministic_uuid()])
        .args(["-T", "0"])
        .arg("-r")
        .arg_path(img)
        .run(tools)?;

    for dir in [sources.manifests_dir, sources.staging_dir] {
        sload_cmd(dir, sources, img).run(tools)?;
    }
    Ok(())
}

fn preallocate(img: &Path, len: u64) -> Result<()> {
    let file = File::create(img).io_context("Cannot create", img)?;
    file.set_len(len).io_context("Cannot allocate", img)?;
    Ok(())
}

fn sload_cmd(dir: &Path, sources: &ImageSources, img: &Path) -> Cmd {
    Cmd::new("sload_f2fs")
        .arg("-C")
        .arg_path(sources.canned_fs_config)
        .arg("-f")
        .arg_path(dir)
        .arg("-s")
        .arg_path(sources.file_contexts)
        .args(["-T", "0"])
        .arg_path(img)
        .accept_codes(SLOAD_ACCEPTED_CODES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_preallocate_sets_length() {
        let temp = TempDir::new().unwrap();
        let img = temp.path().join("apex_payload.img");
        preallocate(&img, 100 * MIB).unwrap();
        assert_eq!(std::fs::metadata(&img).unwrap().len(), 100 * MIB);
    }

    #[test]
    fn test_sload_command() {
        let sources = ImageSources {
            staging_dir: Path::new("/w/input"),
            manifests_dir: Path::new("/w/manifests"),
            work_dir: Path::new("/w"),
            file_contexts: Path::new("/in/file_contexts"),
            canned_fs_config: Path::new("/w/canned_fs_config"),
        };
        let cmd = sload_cmd(sources.manifests_dir, &sources, Path::new("/w/img"));
        assert_eq!(
            cmd.command_line(),
            "sload_f2fs -C /w/canned_fs_config -f /w/manifests -s /in/file_contexts -T 0 /w/img"
        );
    }
}
