//! The packaging pipeline.
//!
//! Stages run strictly in order and each one starts only after the previous
//! one succeeded:
//!
//! ```text
//! Validating -> Staging -> ImageBuilding -> Signing -> Assembling -> Done
//! ```
//!
//! Validation touches nothing but the inputs. Everything after it happens in
//! a temporary [`Workspace`] that is removed however the build ends, and the
//! output is only ever written by an atomic rename.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::build_info::{self, RecordedInputs};
use crate::config::{self, BuildArgs, Options, PayloadType};
use crate::container::{self, LinkInputs};
use crate::error::{Error, IoContext, Result};
use crate::manifest::{self, android, Manifest};
use crate::payload::{self, ImageSources, PAYLOAD_IMAGE_NAME};
use crate::preflight;
use crate::signing::{self, SigningParams};
use crate::staging::{self, Workspace};
use crate::timing::Timer;

/// Name of the public key inside the container.
pub const PUBKEY_NAME: &str = "apex_pubkey";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    Staging,
    ImageBuilding,
    Signing,
    Assembling,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validating => "validating",
            Stage::Staging => "staging",
            Stage::ImageBuilding => "building payload",
            Stage::Signing => "signing",
            Stage::Assembling => "assembling",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

struct Progress {
    stage: Stage,
    timer: Option<Timer>,
}

impl Progress {
    fn new() -> Self {
        Self {
            stage: Stage::Validating,
            timer: Some(Timer::start("validating")),
        }
    }

    fn enter(&mut self, stage: Stage, label: &'static str) {
        if let Some(timer) = self.timer.take() {
            timer.finish();
        }
        info!("Stage: {}", stage);
        self.stage = stage;
        if stage != Stage::Done {
            self.timer = Some(Timer::start(label));
        }
    }
}

/// Build the container (or bare payload) described by `options`.
///
/// Returns the path of the written output.
pub fn run(options: Options) -> Result<PathBuf> {
    let mut progress = Progress::new();
    let result = build(options, &mut progress);
    if let Err(err) = &result {
        debug!("Build failed while {}: {}", progress.stage, err);
    }
    result
}

/// Copy `src` over `dst` through a temporary sibling of `dst`.
fn install_file(src: &Path, dst: &Path) -> Result<()> {
    let parent = match dst.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(parent).io_context("Cannot create temporary file in", parent)?;
    let mut source = fs::File::open(src).io_context("Cannot open", src)?;
    std::io::copy(&mut source, tmp.as_file_mut()).io_context("Cannot write", dst)?;
    tmp.persist(dst).map_err(|e| Error::Io {
        context: "Cannot write",
        path: dst.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

fn build(options: Options, progress: &mut Progress) -> Result<PathBuf> {
    let args = config::load_build_args(options)?;
    let manifest = Manifest::load(&args.manifest)?;
    staging::validate_version(&manifest.version_code())?;
    preflight::run(&args)?;

    progress.enter(Stage::Staging, "staging");
    let ws = Workspace::new()?;
    let descriptor = android::prepare_descriptor(
        ws.path(),
        &manifest,
        args.android_manifest.as_ref(),
        args.test_only,
        args.logging_parent.as_deref(),
    )?;

    let json = args.manifest_json.as_deref();
    manifest::write_manifest_files(ws.manifests_dir(), &manifest, json)?;
    manifest::write_manifest_files(ws.content_dir(), &manifest, json)?;

    let (file_contexts, table) = match &args.image {
        Some(image) => (
            Some(image.file_contexts.materialize(ws.path(), "file_contexts.in")?),
            Some(image.canned_fs_config.materialize(ws.path(), "canned_fs_config.in")?),
        ),
        None => (args.zip_file_contexts.clone(), args.zip_canned_fs_config.clone()),
    };
    let staged = staging::prepare(
        &ws,
        &args.input_dir,
        table.as_deref(),
        &args.apex_version_placeholder,
        &manifest.version_code(),
    )?;

    progress.enter(Stage::ImageBuilding, "payload");
    let payload = match (args.payload_type, &file_contexts, &staged.canned_fs_config) {
        (PayloadType::Image, Some(file_contexts), Some(canned_fs_config)) => {
            let img = ws.content_dir().join(PAYLOAD_IMAGE_NAME);
            let sources = ImageSources {
                staging_dir: &staged.input_dir,
                manifests_dir: ws.manifests_dir(),
                work_dir: ws.path(),
                file_contexts: file_contexts.as_path(),
                canned_fs_config: canned_fs_config.as_path(),
            };
            payload::create_image(args.payload_fs_type, &sources, &img, &args.tool_path)?;
            img
        }
        (PayloadType::Image, _, _) => {
            return Err(Error::MissingRequiredInput {
                what: "--file_contexts and --canned_fs_config arguments",
                hint: "image payloads need both",
            })
        }
        (PayloadType::Zip, _, _) => payload::create_zip_payload(
            &staged.input_dir,
            ws.manifests_dir(),
            ws.content_dir(),
            &args.tool_path,
        )?,
    };

    if args.signs_payload() {
        progress.enter(Stage::Signing, "signing");
        sign(&args, &manifest, &payload)?;
    }

    if args.payload_only {
        install_file(&payload, &args.output)?;
        progress.enter(Stage::Done, "done");
        info!("Created {}", args.output.display());
        return Ok(args.output);
    }

    progress.enter(Stage::Assembling, "assembling");
    if let Some(pubkey) = &args.pubkey {
        let dst = ws.content_dir().join(PUBKEY_NAME);
        fs::copy(pubkey, &dst).io_context("Cannot copy public key to", &dst)?;
    }

    if args.include_build_info {
        let labels = file_contexts
            .as_deref()
            .map(|p| fs::read(p).io_context("Cannot read", p))
            .transpose()?;
        let table = staged
            .canned_fs_config
            .as_deref()
            .map(|p| fs::read(p).io_context("Cannot read", p))
            .transpose()?;
        let info = build_info::generate(
            &args,
            &RecordedInputs {
                file_contexts: labels.as_deref(),
                canned_fs_config: table.as_deref(),
                android_manifest: &descriptor.source,
            },
        );
        build_info::write(ws.content_dir(), &info)?;
    }

    let apk = ws.path().join("apex.apk");
    container::link_descriptor(
        &LinkInputs {
            descriptor: &descriptor.path,
            version_code: &manifest.version_code(),
            version_name: manifest.version_name(),
            package_override: args.override_apk_package_name.as_deref(),
            target_sdk_version: args.target_sdk_version.as_deref(),
            min_sdk_version: args.min_sdk_version.as_deref(),
            assets_dir: args.assets_dir.as_deref(),
            android_jar: &args.android_jar_path,
        },
        &apk,
        &args.tool_path,
    )?;

    let content_zip = container::create_content_zip(ws.content_dir(), &ws.path().join("apex.zip"))?;
    container::merge_zips(&[&apk, &content_zip], &args.output)?;

    progress.enter(Stage::Done, "done");
    info!("Created {}", args.output.display());
    Ok(args.output)
}

fn sign(args: &BuildArgs, manifest: &Manifest, img: &Path) -> Result<()> {
    let key = args.key.as_deref().ok_or(Error::MissingRequiredInput {
        what: "--key {keyfile} argument",
        hint: "image payloads are signed unless --unsigned_payload is set",
    })?;
    let params = SigningParams::new(
        manifest,
        key,
        !args.do_not_check_keyname,
        args.no_hashtree,
        &args.signing_args,
    );
    signing::sign_image(img, &params, &args.tool_path)
}
