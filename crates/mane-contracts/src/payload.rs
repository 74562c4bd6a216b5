use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("invalid image reference: {0}")]
    InvalidImageFormat(String),
}

/// Decomposed form of a `data:<mediaType>;base64,<data>` reference.
///
/// This is the only shape image data takes at component boundaries: the raw
/// bytes stay base64-encoded until something actually needs to write them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub media_type: String,
    pub data: String,
}

impl ImagePayload {
    pub fn new(media_type: impl Into<String>, data: impl Into<String>) -> Result<Self, PayloadError> {
        let media_type = media_type.into();
        let data = data.into();
        if !media_type.starts_with("image/") {
            return Err(PayloadError::InvalidImageFormat(format!(
                "media type '{media_type}' is not an image type"
            )));
        }
        if data.is_empty() {
            return Err(PayloadError::InvalidImageFormat(
                "empty image data".to_string(),
            ));
        }
        Ok(Self { media_type, data })
    }

    /// Parses a string of the exact shape `data:<mediaType>;base64,<data>`.
    pub fn from_data_uri(uri: &str) -> Result<Self, PayloadError> {
        let rest = uri.strip_prefix("data:").ok_or_else(|| {
            PayloadError::InvalidImageFormat("missing 'data:' prefix".to_string())
        })?;
        let (header, data) = rest.split_once(',').ok_or_else(|| {
            PayloadError::InvalidImageFormat("missing ',' separator".to_string())
        })?;
        let media_type = header.strip_suffix(";base64").ok_or_else(|| {
            PayloadError::InvalidImageFormat("missing ';base64' marker".to_string())
        })?;
        Self::new(media_type, data)
    }

    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.data)
    }

    /// Reads a local image file, guessing the media type from the extension.
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        let media_type = mime_for_path(path).with_context(|| {
            format!("unsupported image extension: {}", path.display())
        })?;
        Self::new(media_type, BASE64.encode(bytes)).map_err(Into::into)
    }

    pub fn decoded_bytes(&self) -> Result<Vec<u8>, PayloadError> {
        BASE64
            .decode(self.data.as_bytes())
            .map_err(|err| PayloadError::InvalidImageFormat(format!("base64 decode failed: {err}")))
    }

    pub fn file_extension(&self) -> &'static str {
        match self.media_type.as_str() {
            "image/jpeg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "png",
        }
    }
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}
