//! Final container assembly.
//!
//! The linked descriptor package and the content directory are zipped
//! separately and then merged into the output. Every merged entry gets a fixed
//! timestamp and permission bits, and the payload image's data is aligned to
//! a block boundary so it can be mapped straight out of the archive.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::config::DEFAULT_MIN_SDK_VERSION;
use crate::error::{Error, IoContext, Result, ZipContext};
use crate::payload::PAYLOAD_IMAGE_NAME;
use crate::process::{Cmd, ToolPath};

/// Alignment of the payload image's data within the container.
pub const PAYLOAD_ALIGNMENT: u16 = 4096;
/// Permission bits of every container entry.
pub const ENTRY_MODE: u32 = 0o644;

const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

/// Inputs of the descriptor linker.
#[derive(Debug, Clone)]
pub struct LinkInputs<'a> {
    pub descriptor: &'a Path,
    pub version_code: &'a str,
    pub version_name: Option<&'a str>,
    pub package_override: Option<&'a str>,
    pub target_sdk_version: Option<&'a str>,
    pub min_sdk_version: Option<&'a str>,
    pub assets_dir: Option<&'a Path>,
    pub android_jar: &'a Path,
}

fn link_cmd(inputs: &LinkInputs, apk: &Path) -> Cmd {
    let mut cmd = Cmd::new("aapt2")
        .arg("link")
        .arg("--manifest")
        .arg_path(inputs.descriptor);
    if let Some(package) = inputs.package_override {
        cmd = cmd.args(["--rename-manifest-package", package]);
    }
    cmd = cmd.args(["--version-code", inputs.version_code]);
    if let Some(name) = inputs.version_name {
        cmd = cmd.args(["--version-name", name]);
    }
    if let Some(target) = inputs.target_sdk_version {
        cmd = cmd.args(["--target-sdk-version", target]);
    }
    cmd = cmd.args([
        "--min-sdk-version",
        inputs.min_sdk_version.unwrap_or(DEFAULT_MIN_SDK_VERSION),
    ]);
    if let Some(assets) = inputs.assets_dir {
        cmd = cmd.arg("-A").arg_path(assets);
    }
    cmd.arg("-o").arg_path(apk).arg("-I").arg_path(inputs.android_jar)
}

/// Link the descriptor into a package at `apk`.
pub fn link_descriptor(inputs: &LinkInputs, apk: &Path, tools: &ToolPath) -> Result<()> {
    info!("Linking application descriptor");
    link_cmd(inputs, apk).run(tools)?;
    Ok(())
}

fn entry_name(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn compression_for(name: &str) -> CompressionMethod {
    if name == PAYLOAD_IMAGE_NAME {
        CompressionMethod::Stored
    } else {
        CompressionMethod::Deflated
    }
}

/// Zip the files of `content_dir` into `out`.
///
/// Entries are added in sorted order. The payload image is stored; everything
/// else is deflated.
pub fn create_content_zip(content_dir: &Path, out: &Path) -> Result<PathBuf> {
    let file = File::create(out).io_context("Cannot create", out)?;
    let mut zip = ZipWriter::new(file);

    for entry in WalkDir::new(content_dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Io {
            context: "Cannot walk",
            path: e.path().unwrap_or(content_dir).to_path_buf(),
            source: e.into(),
        })?;
        if entry.file_type().is_dir() {
            continue;
        }
        let rel = entry.path().strip_prefix(content_dir).unwrap_or(entry.path());
        let name = entry_name(rel);
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        let options = FileOptions::default()
            .compression_method(compression_for(&name))
            .large_file(size >= ZIP64_THRESHOLD);

        debug!("Adding {name} to content zip");
        zip.start_file(name, options).zip_context(out)?;
        let mut src = File::open(entry.path()).io_context("Cannot open", entry.path())?;
        io::copy(&mut src, &mut zip).io_context("Cannot write", out)?;
    }

    zip.finish().zip_context(out)?;
    Ok(out.to_path_buf())
}

fn copy_entries<W: Write + io::Seek>(zip: &mut ZipWriter<W>, source: &Path, out: &Path) -> Result<()> {
    let file = File::open(source).io_context("Cannot open", source)?;
    let mut archive = ZipArchive::new(file).zip_context(source)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).zip_context(source)?;
        let name = entry.name().to_string();
        let options = FileOptions::default()
            .compression_method(entry.compression())
            .last_modified_time(DateTime::default())
            .unix_permissions(ENTRY_MODE)
            .large_file(entry.size() >= ZIP64_THRESHOLD);

        if entry.is_dir() {
            zip.add_directory(name, options).zip_context(out)?;
            continue;
        }

        if name == PAYLOAD_IMAGE_NAME {
            zip.start_file_aligned(name, options, PAYLOAD_ALIGNMENT)
                .zip_context(out)?;
        } else {
            zip.start_file(name, options).zip_context(out)?;
        }
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data).io_context("Cannot read entry of", source)?;
        zip.write_all(&data).io_context("Cannot write", out)?;
    }
    Ok(())
}

/// Merge `sources` into `output`, in order.
///
/// Written next to `output` and renamed into place, so a failed merge leaves
/// no partial container behind.
pub fn merge_zips(sources: &[&Path], output: &Path) -> Result<()> {
    let parent = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let tmp = NamedTempFile::new_in(parent).io_context("Cannot create temporary file in", parent)?;
    let mut zip = ZipWriter::new(tmp);

    for source in sources {
        debug!("Merging {}", source.display());
        copy_entries(&mut zip, source, output)?;
    }

    let tmp = zip.finish().zip_context(output)?;
    tmp.persist(output).map_err(|e| Error::Io {
        context: "Cannot write",
        path: output.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_zip(path: &Path, entries: &[(&str, &[u8], CompressionMethod)]) {
        let mut zip = ZipWriter::new(File::create(path).unwrap());
        for (name, data, method) in entries {
            let options = FileOptions::default()
                .compression_method(*method)
                .last_modified_time(DateTime::from_date_and_time(2020, 5, 17, 10, 0, 0).unwrap())
                .unix_permissions(0o755);
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    fn entry_names(archive: &mut ZipArchive<File>) -> Vec<String> {
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn test_link_command_defaults_min_sdk() {
        let inputs = LinkInputs {
            descriptor: Path::new("/w/AndroidManifest.xml"),
            version_code: "7",
            version_name: None,
            package_override: None,
            target_sdk_version: None,
            min_sdk_version: None,
            assets_dir: None,
            android_jar: Path::new("/sdk/android.jar"),
        };
        assert_eq!(
            link_cmd(&inputs, Path::new("/w/apex.apk")).command_line(),
            "aapt2 link --manifest /w/AndroidManifest.xml --version-code 7 \
             --min-sdk-version 29 -o /w/apex.apk -I /sdk/android.jar"
        );
    }

    #[test]
    fn test_link_command_all_options() {
        let inputs = LinkInputs {
            descriptor: Path::new("/w/AndroidManifest.xml"),
            version_code: "7",
            version_name: Some("7.0"),
            package_override: Some("com.example.apk"),
            target_sdk_version: Some("34"),
            min_sdk_version: Some("30"),
            assets_dir: Some(Path::new("/assets")),
            android_jar: Path::new("/sdk/android.jar"),
        };
        assert_eq!(
            link_cmd(&inputs, Path::new("/w/apex.apk")).command_line(),
            "aapt2 link --manifest /w/AndroidManifest.xml --rename-manifest-package com.example.apk \
             --version-code 7 --version-name 7.0 --target-sdk-version 34 --min-sdk-version 30 \
             -A /assets -o /w/apex.apk -I /sdk/android.jar"
        );
    }

    #[test]
    fn test_content_zip_stores_payload_only() {
        let temp = TempDir::new().unwrap();
        let content = temp.path().join("content");
        fs::create_dir(&content).unwrap();
        fs::write(content.join(PAYLOAD_IMAGE_NAME), vec![0u8; 8192]).unwrap();
        fs::write(content.join("apex_manifest.pb"), b"manifest").unwrap();
        fs::write(content.join("apex_pubkey"), b"key").unwrap();

        let out = create_content_zip(&content, &temp.path().join("apex.zip")).unwrap();
        let mut archive = ZipArchive::new(File::open(out).unwrap()).unwrap();
        let names = entry_names(&mut archive);
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names.len(), 3);
        assert_eq!(names, sorted);

        assert_eq!(
            archive.by_name(PAYLOAD_IMAGE_NAME).unwrap().compression(),
            CompressionMethod::Stored
        );
        assert_eq!(
            archive.by_name("apex_manifest.pb").unwrap().compression(),
            CompressionMethod::Deflated
        );
    }

    #[test]
    fn test_merge_normalizes_and_aligns() {
        let temp = TempDir::new().unwrap();
        let apk = temp.path().join("apex.apk");
        let content = temp.path().join("apex.zip");
        write_zip(
            &apk,
            &[
                ("AndroidManifest.xml", &b"<manifest/>"[..], CompressionMethod::Deflated),
                ("resources.arsc", &b"odd-length"[..], CompressionMethod::Stored),
            ],
        );
        let payload = vec![0x5au8; 12288];
        write_zip(
            &content,
            &[
                ("apex_manifest.pb", &b"pb"[..], CompressionMethod::Deflated),
                (PAYLOAD_IMAGE_NAME, &payload[..], CompressionMethod::Stored),
            ],
        );

        let out = temp.path().join("out.apex");
        merge_zips(&[&apk, &content], &out).unwrap();

        let mut archive = ZipArchive::new(File::open(&out).unwrap()).unwrap();
        let names = entry_names(&mut archive);
        assert_eq!(
            names,
            ["AndroidManifest.xml", "resources.arsc", "apex_manifest.pb", PAYLOAD_IMAGE_NAME]
        );

        for i in 0..archive.len() {
            let entry = archive.by_index(i).unwrap();
            assert_eq!(entry.last_modified().year(), 1980);
            assert_eq!(entry.unix_mode().unwrap() & 0o777, ENTRY_MODE);
        }

        let mut img = archive.by_name(PAYLOAD_IMAGE_NAME).unwrap();
        assert_eq!(img.compression(), CompressionMethod::Stored);
        assert_eq!(img.data_start() % PAYLOAD_ALIGNMENT as u64, 0);
        let mut data = Vec::new();
        img.read_to_end(&mut data).unwrap();
        assert_eq!(data, payload);
    }

    #[test]
    fn test_merge_is_deterministic() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("a.zip");
        write_zip(&src, &[("a.txt", &b"hello"[..], CompressionMethod::Deflated)]);

        let first = temp.path().join("one.apex");
        let second = temp.path().join("two.apex");
        merge_zips(&[&src], &first).unwrap();
        merge_zips(&[&src], &second).unwrap();
        assert_eq!(fs::read(first).unwrap(), fs::read(second).unwrap());
    }

    #[test]
    fn test_failed_merge_leaves_no_output() {
        let temp = TempDir::new().unwrap();
        let bogus = temp.path().join("not-a-zip");
        fs::write(&bogus, b"garbage").unwrap();
        let out = temp.path().join("out.apex");
        assert!(merge_zips(&[&bogus], &out).is_err());
        assert!(!out.exists());
    }
}
