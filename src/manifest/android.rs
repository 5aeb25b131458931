//! AndroidManifest.xml handling for the outer descriptor package.
//!
//! The descriptor is either supplied by the caller (and must name the same
//! package as the APEX manifest) or synthesized from the APEX manifest.

use std::fs;
use std::path::{Path, PathBuf};

use roxmltree::{Document, Node};
use tracing::debug;

use super::Manifest;
use crate::config::InputSource;
use crate::error::{Error, IoContext, Result};

pub const ANDROID_NS: &str = "http://schemas.android.com/apk/res/android";
pub const LOGGING_PARENT_KEY: &str = "android.content.pm.LOGGING_PARENT";
pub const DESCRIPTOR_NAME: &str = "AndroidManifest.xml";

/// Descriptor prepared for linking.
#[derive(Debug, Clone)]
pub struct Descriptor {
    /// Descriptor as supplied or synthesized, before logging-parent injection.
    pub source: Vec<u8>,
    /// File handed to the descriptor linker.
    pub path: PathBuf,
}

/// Render a minimal descriptor for an APEX with no embedded code.
pub fn render_descriptor(package: &str, version: i64, test_only: bool) -> String {
    let test_only_attribute = if test_only {
        r#"android:testOnly="true""#
    } else {
        ""
    };
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<manifest xmlns:android="{ns}"
  package="{package}" android:versionCode="{version}">
  <!-- APEX does not have classes.dex -->
  <application android:hasCode="false" {test_only_attribute}/>
</manifest>
"#,
        ns = ANDROID_NS,
        package = escape_attr(package),
    )
}

fn parse<'a>(path: &Path, text: &'a str) -> Result<Document<'a>> {
    Document::parse(text).map_err(|e| Error::ManifestInvalid {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Fail unless the descriptor's `package` attribute equals `package`.
pub fn validate_package(path: &Path, text: &str, package: &str) -> Result<()> {
    let doc = parse(path, text)?;
    let declared = doc.root_element().attribute("package").ok_or_else(|| Error::ManifestInvalid {
        path: path.to_path_buf(),
        reason: "<manifest> has no package attribute".into(),
    })?;
    if declared != package {
        return Err(Error::PackageNameMismatch {
            path: path.to_path_buf(),
            descriptor_package: declared.to_string(),
            manifest_package: package.to_string(),
        });
    }
    Ok(())
}

/// Self-check for a synthesized descriptor: `testOnly` must survive rendering.
pub fn validate_generated(path: &Path, text: &str, test_only: bool) -> Result<()> {
    if !test_only {
        return Ok(());
    }
    let doc = parse(path, text)?;
    let value = application_elements(doc.root_element())
        .next()
        .and_then(|app| app.attribute((ANDROID_NS, "testOnly")));
    if value != Some("true") {
        return Err(Error::ManifestInvalid {
            path: path.to_path_buf(),
            reason: "testOnly attribute must be equal to true.".into(),
        });
    }
    Ok(())
}

fn application_elements<'a, 'input>(
    manifest: Node<'a, 'input>,
) -> impl Iterator<Item = Node<'a, 'input>> {
    manifest
        .children()
        .filter(|n| n.is_element() && n.has_tag_name("application"))
}

/// Add a logging-parent `<meta-data>` element under `<application>`.
///
/// Returns the text unchanged when the key is already present.
pub fn add_logging_parent(path: &Path, text: &str, value: &str) -> Result<String> {
    let doc = parse(path, text)?;
    let root = doc.root_element();
    let apps: Vec<_> = application_elements(root).collect();
    if apps.len() > 1 {
        return Err(Error::ManifestInvalid {
            path: path.to_path_buf(),
            reason: "found multiple <application> tags".into(),
        });
    }

    let meta = format!(
        r#"<meta-data android:name="{}" android:value="{}" />"#,
        LOGGING_PARENT_KEY,
        escape_attr(value)
    );

    match apps.first() {
        Some(app) => {
            let present = app.children().any(|c| {
                c.is_element()
                    && c.has_tag_name("meta-data")
                    && c.attribute((ANDROID_NS, "name")) == Some(LOGGING_PARENT_KEY)
            });
            if present {
                return Ok(text.to_string());
            }
            Ok(insert_child(text, *app, &meta))
        }
        None => {
            let indent = indent_of(text, root.range().start);
            let app = format!("<application>\n{indent}    {meta}\n{indent}  </application>");
            Ok(insert_child(text, root, &app))
        }
    }
}

/// Insert `child` as the last child of `node`, one indent level deeper.
fn insert_child(text: &str, node: Node, child: &str) -> String {
    let range = node.range();
    let element = &text[range.clone()];
    let indent = indent_of(text, range.start);
    let child_indent = format!("{indent}  ");

    if let Some(head) = element.strip_suffix("/>") {
        let tag = node.tag_name().name();
        format!(
            "{}{}>\n{child_indent}{child}\n{indent}</{tag}>{}",
            &text[..range.start],
            head.trim_end(),
            &text[range.end..]
        )
    } else {
        let close = element.rfind("</").unwrap_or(element.len());
        let at = range.start + element[..close].trim_end().len();
        format!("{}\n{child_indent}{child}{}", &text[..at], &text[at..])
    }
}

fn indent_of(text: &str, pos: usize) -> String {
    let line_start = text[..pos].rfind('\n').map_or(0, |i| i + 1);
    text[line_start..pos]
        .chars()
        .take_while(|c| c.is_whitespace())
        .collect()
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Produce the descriptor to link, writing it into `work_dir`.
pub fn prepare_descriptor(
    work_dir: &Path,
    manifest: &Manifest,
    supplied: Option<&InputSource>,
    test_only: bool,
    logging_parent: Option<&str>,
) -> Result<Descriptor> {
    let path = work_dir.join(DESCRIPTOR_NAME);

    let source = match supplied {
        None => {
            debug!("Creating AndroidManifest {}", path.display());
            let text = render_descriptor(manifest.name(), manifest.version(), test_only);
            validate_generated(&path, &text, test_only)?;
            text.into_bytes()
        }
        Some(input) => {
            let bytes = input.read()?;
            let origin = input.display_path(&path);
            let text = String::from_utf8_lossy(&bytes);
            validate_package(&origin, &text, manifest.name())?;
            bytes
        }
    };

    let linked = match logging_parent {
        Some(value) => {
            let text = String::from_utf8_lossy(&source);
            add_logging_parent(&path, &text, value)?.into_bytes()
        }
        None => source.clone(),
    };
    fs::write(&path, &linked).io_context("Cannot write", &path)?;

    Ok(Descriptor { source, path })
}
