//! Metadata injection into produced model files
//!
//! Every model file carries the building's identifiers, anchor and
//! provenance in a form its format tolerates:
//! - `.obj`: a block of `#` comment lines at the top
//! - `.dae`: an XML comment after the XML declaration
//! - `.gltf`: `asset.extras.polycity`
//!
//! Injection replaces a previously injected block, so rewriting a file
//! twice leaves it as if written once.

use super::CapabilityError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

const OBJ_BEGIN: &str = "# polycity-metadata-begin";
const OBJ_END: &str = "# polycity-metadata-end";
const DAE_OPEN: &str = "<!-- polycity-metadata ";
const DAE_CLOSE: &str = "-->";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetadata {
    pub id: String,
    pub id_original: String,
    /// `[longitude, latitude]`
    pub origin: [f64; 2],
    pub elevation: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub places: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
}

/// Rewrite `path` with `metadata` injected
///
/// Returns `false` (file untouched) for formats without a metadata slot.
pub async fn inject(path: &Path, metadata: &ModelMetadata) -> Result<bool, CapabilityError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    let rewrite: fn(&str, &ModelMetadata) -> Result<String, CapabilityError> =
        match extension.as_deref() {
            Some("obj") => inject_obj,
            Some("dae") => inject_dae,
            Some("gltf") => inject_gltf,
            _ => return Ok(false),
        };

    let content = tokio::fs::read_to_string(path).await?;
    let updated = rewrite(&content, metadata)?;
    tokio::fs::write(path, updated).await?;
    Ok(true)
}

fn to_json(metadata: &ModelMetadata) -> Result<String, CapabilityError> {
    serde_json::to_string(metadata).map_err(|e| CapabilityError::Parse(e.to_string()))
}

pub fn inject_obj(content: &str, metadata: &ModelMetadata) -> Result<String, CapabilityError> {
    let mut body = Vec::new();
    let mut in_block = false;
    for line in content.lines() {
        match line {
            OBJ_BEGIN => in_block = true,
            OBJ_END => in_block = false,
            _ if !in_block => body.push(line),
            _ => {}
        }
    }

    let mut out = format!("{}\n# {}\n{}\n", OBJ_BEGIN, to_json(metadata)?, OBJ_END);
    for line in body {
        out.push_str(line);
        out.push('\n');
    }
    Ok(out)
}

pub fn inject_dae(content: &str, metadata: &ModelMetadata) -> Result<String, CapabilityError> {
    let mut stripped = content.to_string();
    if let Some(start) = stripped.find(DAE_OPEN) {
        if let Some(len) = stripped[start..].find(DAE_CLOSE) {
            let mut end = start + len + DAE_CLOSE.len();
            if stripped[end..].starts_with('\n') {
                end += 1;
            }
            stripped.replace_range(start..end, "");
        }
    }

    // "--" may not appear inside an XML comment
    let mut json = to_json(metadata)?;
    while json.contains("--") {
        json = json.replace("--", "- -");
    }
    let comment = format!("{}{} {}\n", DAE_OPEN, json, DAE_CLOSE);

    let insert_at = if stripped.trim_start().starts_with("<?xml") {
        stripped
            .find("?>")
            .map(|i| {
                let after = i + 2;
                if stripped[after..].starts_with('\n') {
                    after + 1
                } else {
                    after
                }
            })
            .unwrap_or(0)
    } else {
        0
    };

    let mut out = String::with_capacity(stripped.len() + comment.len() + 1);
    out.push_str(&stripped[..insert_at]);
    if insert_at > 0 && !stripped[..insert_at].ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&comment);
    out.push_str(&stripped[insert_at..]);
    Ok(out)
}

pub fn inject_gltf(content: &str, metadata: &ModelMetadata) -> Result<String, CapabilityError> {
    let mut document: Value = serde_json::from_str(content)
        .map_err(|e| CapabilityError::Parse(format!("glTF is not JSON: {}", e)))?;
    let metadata =
        serde_json::to_value(metadata).map_err(|e| CapabilityError::Parse(e.to_string()))?;

    let root = document
        .as_object_mut()
        .ok_or_else(|| CapabilityError::Parse("glTF root is not an object".to_string()))?;
    let asset = root
        .entry("asset")
        .or_insert_with(|| serde_json::json!({ "version": "2.0" }));
    let asset = asset
        .as_object_mut()
        .ok_or_else(|| CapabilityError::Parse("glTF asset is not an object".to_string()))?;
    let extras = asset
        .entry("extras")
        .or_insert_with(|| Value::Object(Default::default()));
    let extras = extras
        .as_object_mut()
        .ok_or_else(|| CapabilityError::Parse("glTF asset.extras is not an object".to_string()))?;
    extras.insert("polycity".to_string(), metadata);

    serde_json::to_string_pretty(&document).map_err(|e| CapabilityError::Parse(e.to_string()))
}
