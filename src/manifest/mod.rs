//! APEX manifest loading and validation.
//!
//! The manifest is a protobuf message. It is loaded once per build and never
//! mutated; the exact bytes read from disk are what lands in the payload and
//! the container, so fields this crate does not model survive untouched.

pub mod android;

use std::fs;
use std::path::{Path, PathBuf};

use prost::Message;
use sha2::{Digest, Sha256};

use crate::error::{Error, IoContext, Result};

/// File name of the serialized manifest inside the image and the container.
pub const MANIFEST_PB_NAME: &str = "apex_manifest.pb";
/// File name of the JSON compatibility mirror.
pub const MANIFEST_JSON_NAME: &str = "apex_manifest.json";

/// Wire representation of `apex_manifest.proto`.
#[derive(Clone, PartialEq, Message)]
pub struct ApexManifest {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(int64, tag = "2")]
    pub version: i64,
    #[prost(string, tag = "3")]
    pub pre_install_hook: String,
    #[prost(string, tag = "4")]
    pub post_install_hook: String,
    #[prost(string, tag = "5")]
    pub version_name: String,
    #[prost(bool, tag = "6")]
    pub no_code: bool,
    #[prost(string, repeated, tag = "7")]
    pub provide_native_libs: Vec<String>,
    #[prost(string, repeated, tag = "8")]
    pub require_native_libs: Vec<String>,
    #[prost(string, repeated, tag = "9")]
    pub jni_libs: Vec<String>,
    #[prost(string, repeated, tag = "10")]
    pub require_shared_apex_libs: Vec<String>,
    #[prost(bool, tag = "11")]
    pub provide_shared_apex_libs: bool,
    #[prost(bool, tag = "13")]
    pub supports_rebootless_update: bool,
}

/// A validated manifest together with its serialized form.
#[derive(Debug, Clone)]
pub struct Manifest {
    proto: ApexManifest,
    bytes: Vec<u8>,
}

impl Manifest {
    /// Read and validate the manifest at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).io_context("Cannot read manifest file", path)?;
        Self::from_bytes(path, bytes)
    }

    /// Validate already-read manifest bytes. `path` is only used in errors.
    pub fn from_bytes(path: &Path, bytes: Vec<u8>) -> Result<Self> {
        let invalid = |reason: String| Error::ManifestInvalid {
            path: path.to_path_buf(),
            reason,
        };

        let proto = ApexManifest::decode(bytes.as_slice()).map_err(|e| invalid(e.to_string()))?;

        if proto.name.is_empty() {
            return Err(invalid("'name' field is required.".into()));
        }
        if proto.version == 0 {
            return Err(invalid("'version' field is required.".into()));
        }
        if proto.no_code && (!proto.pre_install_hook.is_empty() || !proto.post_install_hook.is_empty()) {
            return Err(invalid(
                "noCode can't be true when either preInstallHook or postInstallHook is set".into(),
            ));
        }

        Ok(Self { proto, bytes })
    }

    /// Encode `proto` and validate the result.
    pub fn from_proto(proto: ApexManifest) -> Result<Self> {
        let bytes = proto.encode_to_vec();
        Self::from_bytes(Path::new("<memory>"), bytes)
    }

    pub fn name(&self) -> &str {
        &self.proto.name
    }

    pub fn version(&self) -> i64 {
        self.proto.version
    }

    /// Version rendered the way it appears in paths and the descriptor.
    pub fn version_code(&self) -> String {
        self.proto.version.to_string()
    }

    pub fn version_name(&self) -> Option<&str> {
        Some(self.proto.version_name.as_str()).filter(|s| !s.is_empty())
    }

    /// Serialized manifest bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Hex SHA-256 of the serialized manifest.
    pub fn digest_hex(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }
}

/// Write the serialized manifest (and the JSON mirror, if any) into `dir`.
pub fn write_manifest_files(
    dir: &Path,
    manifest: &Manifest,
    json_mirror: Option<&Path>,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();

    let pb = dir.join(MANIFEST_PB_NAME);
    fs::write(&pb, manifest.bytes()).io_context("Cannot write", &pb)?;
    written.push(pb);

    if let Some(src) = json_mirror {
        let dst = dir.join(MANIFEST_JSON_NAME);
        fs::copy(src, &dst).io_context("Cannot copy manifest mirror to", &dst)?;
        written.push(dst);
    }

    Ok(written)
}
