//! Build workspace and staging of the input tree.
//!
//! Each build owns one temporary root holding:
//!
//! ```text
//! <tmp>/
//! ├── input/       staged copy of INPUT_DIR, placeholder rewritten
//! ├── manifests/   apex_manifest.pb (+ .json), loaded into the image
//! └── content/     payload, manifest, pubkey, build info: zipped last
//! ```
//!
//! The root is removed when the [`Workspace`] drops, on success and on every
//! error path.

use std::fs;
use std::path::{Component, Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;
use walkdir::WalkDir;

use crate::common::copy_entry;
use crate::error::{Error, IoContext, Result};

/// Exclusively owned temporary tree for one build.
pub struct Workspace {
    root: TempDir,
    content_dir: PathBuf,
    manifests_dir: PathBuf,
}

impl Workspace {
    pub fn new() -> Result<Self> {
        let root = tempfile::Builder::new()
            .prefix("apexer.")
            .tempdir()
            .io_context("Cannot create work directory in", &std::env::temp_dir())?;

        let content_dir = root.path().join("content");
        fs::create_dir(&content_dir).io_context("Cannot create", &content_dir)?;
        let manifests_dir = root.path().join("manifests");
        fs::create_dir(&manifests_dir).io_context("Cannot create", &manifests_dir)?;

        debug!("Work directory: {}", root.path().display());
        Ok(Self {
            root,
            content_dir,
            manifests_dir,
        })
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    pub fn content_dir(&self) -> &Path {
        &self.content_dir
    }

    pub fn manifests_dir(&self) -> &Path {
        &self.manifests_dir
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.path().join("input")
    }
}

/// Result of staging.
#[derive(Debug, Clone)]
pub struct Staged {
    /// Staged copy of the input tree.
    pub input_dir: PathBuf,
    /// Rewritten ownership table, when one was given.
    pub canned_fs_config: Option<PathBuf>,
}

/// Reject versions that could not safely appear in a path component.
pub fn validate_version(version: &str) -> Result<()> {
    let safe = !version.is_empty()
        && version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if !safe {
        return Err(Error::UnsafeVersionString(version.to_string()));
    }
    Ok(())
}

fn replace_in_path(rel: &Path, placeholder: &str, version: &str) -> PathBuf {
    match rel.to_str() {
        Some(s) if !placeholder.is_empty() => PathBuf::from(s.replace(placeholder, version)),
        _ => rel.to_path_buf(),
    }
}

/// Copy `input_dir` into `staging_dir`, rewriting the placeholder.
///
/// The placeholder is replaced in every directory component of a file's
/// relative path; file names are left alone. Symlinks are copied as links.
pub fn stage_input(input_dir: &Path, staging_dir: &Path, placeholder: &str, version: &str) -> Result<()> {
    validate_version(version)?;
    fs::create_dir_all(staging_dir).io_context("Cannot create", staging_dir)?;

    for entry in WalkDir::new(input_dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Io {
            context: "Cannot walk",
            path: e.path().unwrap_or(input_dir).to_path_buf(),
            source: e.into(),
        })?;
        if entry.file_type().is_dir() {
            continue;
        }

        let rel = entry.path().strip_prefix(input_dir).unwrap_or(entry.path());
        let parent = rel.parent().unwrap_or(Path::new(""));
        let parent = replace_in_path(parent, placeholder, version);
        if parent
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(Error::InvalidInput(format!(
                "Staged path '{}' leaves the staging directory",
                parent.display()
            )));
        }

        let dest_dir = staging_dir.join(&parent);
        fs::create_dir_all(&dest_dir).io_context("Cannot create", &dest_dir)?;
        copy_entry(entry.path(), &dest_dir.join(entry.file_name()))?;
    }

    Ok(())
}

/// Rewrite the placeholder inside the ownership table, writing the result to
/// `work_dir/canned_fs_config`.
pub fn rewrite_canned_fs_config(
    table: &Path,
    work_dir: &Path,
    placeholder: &str,
    version: &str,
) -> Result<PathBuf> {
    validate_version(version)?;
    let content = fs::read_to_string(table).io_context("Cannot read", table)?;
    let rewritten = if placeholder.is_empty() {
        content
    } else {
        content.replace(placeholder, version)
    };
    let out = work_dir.join("canned_fs_config");
    fs::write(&out, rewritten).io_context("Cannot write", &out)?;
    Ok(out)
}

/// Validate the version, rewrite the ownership table and stage the input.
pub fn prepare(
    workspace: &Workspace,
    input_dir: &Path,
    canned_fs_config: Option<&Path>,
    placeholder: &str,
    version: &str,
) -> Result<Staged> {
    validate_version(version)?;

    let canned_fs_config = canned_fs_config
        .map(|table| rewrite_canned_fs_config(table, workspace.path(), placeholder, version))
        .transpose()?;

    let staging_dir = workspace.staging_dir();
    stage_input(input_dir, &staging_dir, placeholder, version)?;

    Ok(Staged {
        input_dir: staging_dir,
        canned_fs_config,
    })
}
