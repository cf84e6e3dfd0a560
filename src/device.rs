//! Device capabilities the app needs from the platform: a position fix and an image from the media library.

use std::path::PathBuf;
use anyhow::Context;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// A visible map area around a center point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub latitude: f64,
    pub longitude: f64,
    pub latitude_delta: f64,
    pub longitude_delta: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionStatus {
    Granted,
    Denied,
    Undetermined,
}

#[cfg_attr(test, mockall::automock)]
pub trait LocationProvider {

    /// Asks for permission to read the position while the app is in the foreground
    fn request_foreground_permission(&self) -> anyhow::Result<PermissionStatus>;

    /// Reads the current position once
    fn current_position(&self) -> anyhow::Result<Coordinates>;

}

/// The contents of a picked image, as the platform hands it over
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ImageData {
    /// A file on the device
    File(PathBuf),
    /// The image bytes, base64 encoded
    Base64(String),
}

/// An image picked from the media library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickedImage {
    /// The uri of the image, its extension hints at the image format
    pub uri: String,
    pub data: ImageData,
}

impl PickedImage {

    /// A picked image, that lives in a local file
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            uri: path.to_string_lossy().into_owned(),
            data: ImageData::File(path),
        }
    }

    /// The lowercase file extension of the uri, `jpg` if it has none
    pub fn extension(&self) -> String {
        let file_name = self.uri.rsplit('/').next().unwrap_or_default();
        match file_name.rsplit_once('.') {
            Some((_, extension)) if !extension.is_empty() => extension.to_lowercase(),
            _ => "jpg".to_string(),
        }
    }

    pub fn content_type(&self) -> &'static str {
        if self.extension() == "png" { "image/png" } else { "image/jpeg" }
    }

    /// Reads the image bytes
    pub fn read_bytes(&self) -> anyhow::Result<Vec<u8>> {
        match &self.data {
            ImageData::File(path) => std::fs::read(path)
                .with_context(|| format!("Could not read image {}", path.display())),
            ImageData::Base64(encoded) => STANDARD.decode(encoded.trim())
                .context("Image data is not valid base64"),
        }
    }

}

#[cfg_attr(test, mockall::automock)]
pub trait ImagePicker {

    /// Asks for permission to access the media library. Returns if it was granted.
    fn request_media_library_permission(&self) -> anyhow::Result<bool>;

    /// Lets the user pick a single (square cropped) image. Returns `None` if the user cancelled.
    fn pick_image(&self) -> anyhow::Result<Option<PickedImage>>;

}
