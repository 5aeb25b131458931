//! ext4 payload backend.
//!
//! The image is read-only once mounted, so it is formatted without a journal,
//! filled with e2fsdroid and then shrunk to the smallest size that holds it.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use super::{deterministic_uuid, image_size_mb, ImageSources};
use crate::common::{count_entries, BLOCK_SIZE};
use crate::error::{IoContext, Result};
use crate::process::{Cmd, ToolPath};

/// Headroom for filesystem metadata on top of the staged data.
pub const SIZE_MARGIN_MB: u64 = 16;
/// Inodes ext4 reserves for itself.
pub const RESERVED_INODES: u64 = 11;

const MKE2FS_CONF: &str = include_str!("mke2fs.conf");

fn fake_time(cmd: Cmd) -> Cmd {
    cmd.env("E2FSPROGS_FAKE_TIME", "1")
}

pub fn build(sources: &ImageSources, img: &Path, tools: &ToolPath) -> Result<()> {
    let size_mb = image_size_mb(sources.staging_dir, SIZE_MARGIN_MB)?;
    let inode_count = count_entries(sources.staging_dir)?
        + count_entries(sources.manifests_dir)?
        + RESERVED_INODES;

    let mut conf: NamedTempFile = tempfile::Builder::new()
        .suffix("mke2fs.conf")
        .tempfile_in(sources.work_dir)
        .io_context("Cannot create mke2fs.conf in", sources.work_dir)?;
    let written = conf.write_all(MKE2FS_CONF.as_bytes()).and_then(|_| conf.flush());
    written.io_context("Cannot write", conf.path())?;

    mke2fs_cmd(img, inode_count, size_mb, &deterministic_uuid())
        .env("MKE2FS_CONFIG", conf.path().to_string_lossy())
        .run(tools)?;

    let compiled = sources.work_dir.join("file_contexts.bin");
    Cmd::new("sefcontext_compile")
        .arg("-o")
        .arg_path(&compiled)
        .arg_path(sources.file_contexts)
        .run(tools)?;

    for dir in [sources.staging_dir, sources.manifests_dir] {
        e2fsdroid_cmd(dir, &compiled, sources.canned_fs_config, img).run(tools)?;
    }

    fake_time(Cmd::new("resize2fs").arg("-M").arg_path(img)).run(tools)?;
    Ok(())
}

fn mke2fs_cmd(img: &Path, inode_count: u64, size_mb: u64, uuid: &str) -> Cmd {
    fake_time(
        Cmd::new("mke2fs")
            .args(["-O", "^has_journal"])
            .args(["-b", &BLOCK_SIZE.to_string()])
            .args(["-m", "0"])
            .args(["-t", "ext4"])
            .args(["-I", "256"])
            .args(["-N", &inode_count.to_string()])
            .args(["-U", uuid])
            .args(["-E", &format!("hash_seed={uuid}")])
            .arg_path(img)
            .arg(format!("{size_mb}M")),
    )
}

fn e2fsdroid_cmd(dir: &Path, compiled_contexts: &Path, canned_fs_config: &Path, img: &Path) -> Cmd {
    fake_time(
        Cmd::new("e2fsdroid")
            .arg("-e")
            .arg("-f")
            .arg_path(dir)
            .args(["-T", "0"])
            .arg("-S")
            .arg_path(compiled_contexts)
            .arg("-C")
            .arg_path(canned_fs_config)
            .args(["-a", "/"])
            .arg("-s")
            .arg_path(img),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mke2fs_command() {
        let cmd = mke2fs_cmd(Path::new("/w/apex_payload.img"), 12, 16, "u-u-i-d");
        assert_eq!(
            cmd.command_line(),
            "mke2fs -O ^has_journal -b 4096 -m 0 -t ext4 -I 256 -N 12 -U u-u-i-d \
             -E hash_seed=u-u-i-d /w/apex_payload.img 16M"
        );
    }

    #[test]
    fn test_e2fsdroid_command() {
        let cmd = e2fsdroid_cmd(
            Path::new("/w/input"),
            Path::new("/w/file_contexts.bin"),
            Path::new("/w/canned_fs_config"),
            Path::new("/w/img"),
        );
        assert_eq!(
            cmd.command_line(),
            "e2fsdroid -e -f /w/input -T 0 -S /w/file_contexts.bin -C /w/canned_fs_config -a / -s /w/img"
        );
    }

    #[test]
    fn test_embedded_config_matches_block_size() {
        assert!(MKE2FS_CONF.contains("[defaults]"));
        assert!(MKE2FS_CONF.contains("blocksize = 4096"));
    }
}
