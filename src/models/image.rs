use image::ImageFormat;
use std::path::Path;

/// Image formats the analysis service accepts.
pub const ACCEPTED_FORMATS: &[ImageFormat] = &[ImageFormat::Png, ImageFormat::Jpeg, ImageFormat::WebP];

/// An image picked for analysis, either by the user or by a capture.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedImage {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl SelectedImage {
    /// Build from raw bytes, sniffing the content type from the magic bytes.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let content_type = image::guess_format(&bytes)
            .map(|format| format.to_mime_type().to_string())
            .unwrap_or_else(|_| "application/octet-stream".to_string());

        Self {
            name: name.into(),
            content_type,
            bytes,
        }
    }

    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        Ok(Self::from_bytes(name, bytes))
    }

    /// Check the image is something worth sending to the service.
    pub fn validate(&self, max_bytes: usize) -> Result<ImageFormat, ImageValidationError> {
        if self.bytes.is_empty() {
            return Err(ImageValidationError::Empty);
        }

        if self.bytes.len() > max_bytes {
            return Err(ImageValidationError::TooLarge {
                size: self.bytes.len(),
                max: max_bytes,
            });
        }

        if !self.content_type.starts_with("image/") {
            return Err(ImageValidationError::UnsupportedType(self.content_type.clone()));
        }

        let format = image::guess_format(&self.bytes)
            .map_err(|_| ImageValidationError::UnsupportedType(self.content_type.clone()))?;

        if !ACCEPTED_FORMATS.contains(&format) {
            return Err(ImageValidationError::UnsupportedType(
                format.to_mime_type().to_string(),
            ));
        }

        Ok(format)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ImageValidationError {
    #[error("The selected image is empty")]
    Empty,

    #[error("The selected image is too large ({size} bytes, limit {max} bytes)")]
    TooLarge { size: usize, max: usize },

    #[error("Unsupported image type {0}; use a PNG, JPEG or WebP image")]
    UnsupportedType(String),
}
