//! apexer - APEX packager.
//!
//! Turns a prepared directory plus an apex manifest into a signed APEX
//! container (or just its payload image).

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use apexer::config::{
    FsType, Options, PayloadType, DEFAULT_ANDROID_JAR, DEFAULT_MANIFEST, DEFAULT_VERSION_PLACEHOLDER,
};
use apexer::process::ToolPath;

#[derive(Parser)]
#[command(name = "apexer")]
#[command(about = "Create an APEX file")]
struct Cli {
    /// Force overwriting of OUTPUT if it exists
    #[arg(short, long)]
    force: bool,

    /// Log debug output
    #[arg(short, long)]
    verbose: bool,

    /// Path to the APEX manifest file (.pb)
    #[arg(long, default_value = DEFAULT_MANIFEST)]
    manifest: PathBuf,

    /// Path to the APEX manifest file (Q compatible .json)
    #[arg(long = "manifest_json")]
    manifest_json: Option<PathBuf>,

    /// Path to the AndroidManifest file. Generated if omitted
    #[arg(long = "android_manifest")]
    android_manifest: Option<PathBuf>,

    /// Logging parent added to the AndroidManifest
    #[arg(long = "logging_parent")]
    logging_parent: Option<String>,

    /// Directory containing assets to put in the APEX
    #[arg(long = "assets_dir")]
    assets_dir: Option<PathBuf>,

    /// Labels of the files in the image (file_contexts)
    #[arg(long = "file_contexts")]
    file_contexts: Option<PathBuf>,

    /// Ownership and permissions of the files in the image
    #[arg(long = "canned_fs_config")]
    canned_fs_config: Option<PathBuf>,

    /// Private key used to sign the payload
    #[arg(long)]
    key: Option<PathBuf>,

    /// Public key embedded as apex_pubkey
    #[arg(long)]
    pubkey: Option<PathBuf>,

    /// Extra arguments for avbtool, shell-quoted
    #[arg(long = "signing_args", allow_hyphen_values = true)]
    signing_args: Option<String>,

    /// Type of the payload
    #[arg(long = "payload_type", value_enum, default_value_t = PayloadType::Image)]
    payload_type: PayloadType,

    /// Filesystem of an image payload
    #[arg(long = "payload_fs_type", value_enum, default_value_t = FsType::Ext4)]
    payload_fs_type: FsType,

    /// Package name the linked descriptor is renamed to
    #[arg(long = "override_apk_package_name")]
    override_apk_package_name: Option<String>,

    /// Do not build a hash tree for the payload
    #[arg(long = "no_hashtree")]
    no_hashtree: bool,

    /// Path to android.jar
    #[arg(long = "android_jar_path", default_value = DEFAULT_ANDROID_JAR)]
    android_jar_path: PathBuf,

    /// Colon-separated directories holding the packaging tools
    #[arg(long = "apexer_tool_path", env = "APEXER_TOOL_PATH")]
    apexer_tool_path: String,

    /// Target SDK version passed to the descriptor linker
    #[arg(long = "target_sdk_version")]
    target_sdk_version: Option<String>,

    /// Min SDK version passed to the descriptor linker
    #[arg(long = "min_sdk_version")]
    min_sdk_version: Option<String>,

    /// Use the manifest name as the key name instead of the key file name
    #[arg(long = "do_not_check_keyname")]
    do_not_check_keyname: bool,

    /// Embed apex_build_info.pb in the APEX
    #[arg(long = "include_build_info")]
    include_build_info: bool,

    /// Record the command line in apex_build_info.pb
    #[arg(long = "include_cmd_line_in_build_info")]
    include_cmd_line_in_build_info: bool,

    /// Build info of a previous build, used for options not given here
    #[arg(long = "build_info")]
    build_info: Option<PathBuf>,

    /// Write only the payload to OUTPUT
    #[arg(long = "payload_only")]
    payload_only: bool,

    /// Write only the unsigned payload to OUTPUT
    #[arg(long = "unsigned_payload_only")]
    unsigned_payload_only: bool,

    /// Skip signing the payload
    #[arg(long = "unsigned_payload")]
    unsigned_payload: bool,

    /// Mark the APEX as test-only in the generated AndroidManifest
    #[arg(long = "test_only")]
    test_only: bool,

    /// Placeholder replaced with the APEX version in staged paths
    #[arg(long = "apex_version_placeholder", default_value = DEFAULT_VERSION_PLACEHOLDER)]
    apex_version_placeholder: String,

    /// Directory with the content of the APEX
    input_dir: PathBuf,

    /// Path of the APEX file to create
    output: PathBuf,
}

impl Cli {
    fn into_options(self, command_line: Vec<String>) -> Options {
        Options {
            force: self.force,
            manifest: self.manifest,
            manifest_json: self.manifest_json,
            android_manifest: self.android_manifest,
            logging_parent: self.logging_parent,
            assets_dir: self.assets_dir,
            file_contexts: self.file_contexts,
            canned_fs_config: self.canned_fs_config,
            key: self.key,
            pubkey: self.pubkey,
            signing_args: self.signing_args,
            input_dir: self.input_dir,
            output: self.output,
            payload_type: self.payload_type,
            payload_fs_type: self.payload_fs_type,
            override_apk_package_name: self.override_apk_package_name,
            no_hashtree: self.no_hashtree,
            android_jar_path: self.android_jar_path,
            tool_path: ToolPath::parse(&self.apexer_tool_path),
            target_sdk_version: self.target_sdk_version,
            min_sdk_version: self.min_sdk_version,
            do_not_check_keyname: self.do_not_check_keyname,
            include_build_info: self.include_build_info,
            include_cmd_line_in_build_info: self.include_cmd_line_in_build_info,
            build_info: self.build_info,
            payload_only: self.payload_only,
            unsigned_payload_only: self.unsigned_payload_only,
            unsigned_payload: self.unsigned_payload,
            test_only: self.test_only,
            apex_version_placeholder: self.apex_version_placeholder,
            command_line,
        }
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| format!("apexer={level}"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli, command_line: Vec<String>) -> Result<()> {
    apexer::run(cli.into_options(command_line))?;
    Ok(())
}

fn main() -> ExitCode {
    // Load .env if present
    dotenvy::dotenv().ok();

    let command_line: Vec<String> = std::env::args().collect();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli, command_line) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            println!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
