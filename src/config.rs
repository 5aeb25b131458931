//! Build options and their resolution into immutable build arguments.
//!
//! Options come from the command line. A build-info record from an earlier
//! build may fill in options that were not given explicitly; explicit values
//! always win. [`resolve`] performs that layering once, before the pipeline
//! starts, and the resulting [`BuildArgs`] is read-only from then on.

use std::fs;
use std::path::{Path, PathBuf};

use clap::ValueEnum;

use crate::build_info::{self, ApexBuildInfo};
use crate::error::{Error, IoContext, Result};
use crate::process::ToolPath;

pub const DEFAULT_MANIFEST: &str = "apex_manifest.pb";
pub const DEFAULT_ANDROID_JAR: &str = "prebuilts/sdk/current/public/android.jar";
pub const DEFAULT_VERSION_PLACEHOLDER: &str = "__APEX_VERSION_PLACEHOLDER__";
/// minSdkVersion handed to the descriptor linker when none is configured.
pub const DEFAULT_MIN_SDK_VERSION: &str = "29";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum PayloadType {
    #[default]
    Image,
    Zip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum FsType {
    #[default]
    Ext4,
    F2fs,
    Erofs,
}

impl FsType {
    pub fn as_str(self) -> &'static str {
        match self {
            FsType::Ext4 => "ext4",
            FsType::F2fs => "f2fs",
            FsType::Erofs => "erofs",
        }
    }
}

/// Where an input file's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    /// A file given on the command line.
    File(PathBuf),
    /// Bytes carried by a build-info record.
    Record(Vec<u8>),
}

impl InputSource {
    pub fn read(&self) -> Result<Vec<u8>> {
        match self {
            InputSource::File(path) => fs::read(path).io_context("Cannot read", path),
            InputSource::Record(bytes) => Ok(bytes.clone()),
        }
    }

    /// Path to show in diagnostics, `fallback` for record-backed inputs.
    pub fn display_path(&self, fallback: &Path) -> PathBuf {
        match self {
            InputSource::File(path) => path.clone(),
            InputSource::Record(_) => fallback.to_path_buf(),
        }
    }

    /// Return a path holding the bytes, writing record-backed inputs to
    /// `dir/name`.
    pub fn materialize(&self, dir: &Path, name: &str) -> Result<PathBuf> {
        match self {
            InputSource::File(path) => Ok(path.clone()),
            InputSource::Record(bytes) => {
                let path = dir.join(name);
                fs::write(&path, bytes).io_context("Cannot write", &path)?;
                Ok(path)
            }
        }
    }
}

/// Options as given by the caller.
#[derive(Debug, Clone)]
pub struct Options {
    pub force: bool,
    pub manifest: PathBuf,
    pub manifest_json: Option<PathBuf>,
    pub android_manifest: Option<PathBuf>,
    pub logging_parent: Option<String>,
    pub assets_dir: Option<PathBuf>,
    pub file_contexts: Option<PathBuf>,
    pub canned_fs_config: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub pubkey: Option<PathBuf>,
    pub signing_args: Option<String>,
    pub input_dir: PathBuf,
    pub output: PathBuf,
    pub payload_type: PayloadType,
    pub payload_fs_type: FsType,
    pub override_apk_package_name: Option<String>,
    pub no_hashtree: bool,
    pub android_jar_path: PathBuf,
    pub tool_path: ToolPath,
    pub target_sdk_version: Option<String>,
    pub min_sdk_version: Option<String>,
    pub do_not_check_keyname: bool,
    pub include_build_info: bool,
    pub include_cmd_line_in_build_info: bool,
    pub build_info: Option<PathBuf>,
    pub payload_only: bool,
    pub unsigned_payload_only: bool,
    pub unsigned_payload: bool,
    pub test_only: bool,
    pub apex_version_placeholder: String,
    /// The literal invocation, recorded on request.
    pub command_line: Vec<String>,
}

impl Options {
    /// Options with every flag at its default.
    pub fn new(input_dir: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            force: false,
            manifest: PathBuf::from(DEFAULT_MANIFEST),
            manifest_json: None,
            android_manifest: None,
            logging_parent: None,
            assets_dir: None,
            file_contexts: None,
            canned_fs_config: None,
            key: None,
            pubkey: None,
            signing_args: None,
            input_dir: input_dir.into(),
            output: output.into(),
            payload_type: PayloadType::default(),
            payload_fs_type: FsType::default(),
            override_apk_package_name: None,
            no_hashtree: false,
            android_jar_path: PathBuf::from(DEFAULT_ANDROID_JAR),
            tool_path: ToolPath::default(),
            target_sdk_version: None,
            min_sdk_version: None,
            do_not_check_keyname: false,
            include_build_info: false,
            include_cmd_line_in_build_info: false,
            build_info: None,
            payload_only: false,
            unsigned_payload_only: false,
            unsigned_payload: false,
            test_only: false,
            apex_version_placeholder: DEFAULT_VERSION_PLACEHOLDER.to_string(),
            command_line: Vec::new(),
        }
    }
}

/// Inputs only image payloads consume; present iff the payload is an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInputs {
    pub file_contexts: InputSource,
    pub canned_fs_config: InputSource,
}

/// Fully resolved, read-only configuration for one build.
#[derive(Debug, Clone)]
pub struct BuildArgs {
    pub manifest: PathBuf,
    pub manifest_json: Option<PathBuf>,
    pub android_manifest: Option<InputSource>,
    pub logging_parent: Option<String>,
    pub assets_dir: Option<PathBuf>,
    pub image: Option<ImageInputs>,
    /// Ownership table for zip payloads, if one was given.
    pub zip_canned_fs_config: Option<PathBuf>,
    /// Labels for zip payloads. Only ever recorded in the build info.
    pub zip_file_contexts: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub pubkey: Option<PathBuf>,
    pub signing_args: Vec<String>,
    pub input_dir: PathBuf,
    pub output: PathBuf,
    pub payload_type: PayloadType,
    pub payload_fs_type: FsType,
    pub override_apk_package_name: Option<String>,
    pub no_hashtree: bool,
    pub android_jar_path: PathBuf,
    pub tool_path: ToolPath,
    pub target_sdk_version: Option<String>,
    pub min_sdk_version: Option<String>,
    pub do_not_check_keyname: bool,
    pub include_build_info: bool,
    pub include_cmd_line_in_build_info: bool,
    pub payload_only: bool,
    pub unsigned_payload: bool,
    pub test_only: bool,
    pub apex_version_placeholder: String,
    pub command_line: Vec<String>,
}

impl BuildArgs {
    /// True when the payload image gets an integrity footer.
    pub fn signs_payload(&self) -> bool {
        self.payload_type == PayloadType::Image && !self.unsigned_payload
    }
}

fn require_file(what: &str, path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(Error::InvalidInput(format!(
            "{} '{}' does not exist",
            what,
            path.display()
        )));
    }
    if !path.is_file() {
        return Err(Error::InvalidInput(format!(
            "{} '{}' is not a file",
            what,
            path.display()
        )));
    }
    Ok(())
}

/// Filesystem checks on explicitly given inputs and the output path.
pub fn check_inputs(options: &Options) -> Result<()> {
    require_file("Manifest file", &options.manifest)?;

    if let Some(path) = &options.android_manifest {
        require_file("Android Manifest file", path)?;
    }

    if !options.input_dir.exists() {
        return Err(Error::InvalidInput(format!(
            "Input directory '{}' does not exist",
            options.input_dir.display()
        )));
    }
    if !options.input_dir.is_dir() {
        return Err(Error::InvalidInput(format!(
            "Input directory '{}' is not a directory",
            options.input_dir.display()
        )));
    }

    if !options.force && options.output.exists() {
        return Err(Error::OutputAlreadyExists(options.output.clone()));
    }

    Ok(())
}

fn non_empty(s: &str) -> Option<String> {
    Some(s.to_string()).filter(|s| !s.is_empty())
}

fn fallback(
    explicit: Option<String>,
    record: Option<&ApexBuildInfo>,
    pick: fn(&ApexBuildInfo) -> &str,
) -> Option<String> {
    explicit.or_else(|| record.and_then(|r| non_empty(pick(r))))
}

fn record_bytes(record: Option<&ApexBuildInfo>, pick: fn(&ApexBuildInfo) -> &Vec<u8>) -> Option<InputSource> {
    record.map(|r| InputSource::Record(pick(r).clone()))
}

/// Layer explicit options over an optional fallback record.
///
/// Performs no I/O. Fails when a required input has neither an explicit
/// value nor a fallback.
pub fn resolve(options: Options, record: Option<&ApexBuildInfo>) -> Result<BuildArgs> {
    let payload_only = options.payload_only || options.unsigned_payload_only;
    let unsigned_payload = options.unsigned_payload || options.unsigned_payload_only;

    let android_manifest = match options.android_manifest {
        Some(path) => Some(InputSource::File(path)),
        None => record
            .filter(|r| !r.android_manifest.is_empty())
            .map(|r| InputSource::Record(r.android_manifest.clone())),
    };

    let image = match options.payload_type {
        PayloadType::Zip => None,
        PayloadType::Image => {
            if options.key.is_none() && !unsigned_payload {
                return Err(Error::MissingRequiredInput {
                    what: "--key {keyfile} argument",
                    hint: "image payloads are signed unless --unsigned_payload is set",
                });
            }
            let file_contexts = options
                .file_contexts
                .clone()
                .map(InputSource::File)
                .or_else(|| record_bytes(record, |r| &r.file_contexts))
                .ok_or(Error::MissingRequiredInput {
                    what: "--file_contexts {contexts} argument",
                    hint: "pass it explicitly or via a --build_info argument",
                })?;
            let canned_fs_config = options
                .canned_fs_config
                .clone()
                .map(InputSource::File)
                .or_else(|| record_bytes(record, |r| &r.canned_fs_config))
                .ok_or(Error::MissingRequiredInput {
                    what: "--canned_fs_config {config} argument",
                    hint: "pass it explicitly or via a --build_info argument",
                })?;
            Some(ImageInputs {
                file_contexts,
                canned_fs_config,
            })
        }
    };

    let signing_args = match &options.signing_args {
        None => Vec::new(),
        Some(raw) => shlex::split(raw).ok_or_else(|| {
            Error::InvalidInput(format!("Cannot parse --signing_args '{}'", raw))
        })?,
    };

    Ok(BuildArgs {
        manifest: options.manifest,
        manifest_json: options.manifest_json,
        android_manifest,
        logging_parent: fallback(options.logging_parent, record, |r| r.logging_parent.as_str()),
        assets_dir: options.assets_dir,
        image,
        zip_canned_fs_config: match options.payload_type {
            PayloadType::Zip => options.canned_fs_config,
            PayloadType::Image => None,
        },
        zip_file_contexts: match options.payload_type {
            PayloadType::Zip => options.file_contexts,
            PayloadType::Image => None,
        },
        key: options.key,
        pubkey: options.pubkey,
        signing_args,
        input_dir: options.input_dir,
        output: options.output,
        payload_type: options.payload_type,
        payload_fs_type: options.payload_fs_type,
        override_apk_package_name: fallback(options.override_apk_package_name, record, |r| {
            r.override_apk_package_name.as_str()
        }),
        no_hashtree: options.no_hashtree || record.is_some_and(|r| r.no_hashtree),
        android_jar_path: options.android_jar_path,
        tool_path: options.tool_path,
        target_sdk_version: fallback(options.target_sdk_version, record, |r| r.target_sdk_version.as_str()),
        min_sdk_version: fallback(options.min_sdk_version, record, |r| r.min_sdk_version.as_str()),
        do_not_check_keyname: options.do_not_check_keyname,
        include_build_info: options.include_build_info,
        include_cmd_line_in_build_info: options.include_cmd_line_in_build_info,
        payload_only,
        unsigned_payload,
        test_only: options.test_only,
        apex_version_placeholder: options.apex_version_placeholder,
        command_line: options.command_line,
    })
}

/// Validate `options` against the filesystem and resolve them.
pub fn load_build_args(options: Options) -> Result<BuildArgs> {
    let record = options
        .build_info
        .as_deref()
        .map(build_info::load)
        .transpose()?;
    check_inputs(&options)?;
    resolve(options, record.as_ref())
}
