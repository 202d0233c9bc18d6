//! QR code rendering for pairing codes.

use std::io::Cursor;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use courier_core::{CodeRenderer, RenderError};
use image::{ImageFormat, Luma};
use qrcode::{EcLevel, QrCode};

/// Prefix of every rendered artifact.
pub const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

/// Renders pairing codes as QR PNGs embedded in a data URI.
#[derive(Debug, Clone, Copy)]
pub struct QrPngRenderer {
    size: u32,
    ec_level: EcLevel,
}

impl Default for QrPngRenderer {
    fn default() -> Self {
        Self {
            size: 256,
            ec_level: EcLevel::M,
        }
    }
}

impl QrPngRenderer {
    /// Create a renderer with the default 256px, medium error correction.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CodeRenderer for QrPngRenderer {
    fn render(&self, code: &str) -> Result<String, RenderError> {
        let qr = QrCode::with_error_correction_level(code.as_bytes(), self.ec_level)
            .map_err(|e| RenderError::Encode(e.to_string()))?;
        let image = qr
            .render::<Luma<u8>>()
            .min_dimensions(self.size, self.size)
            .build();

        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| RenderError::Image(e.to_string()))?;

        Ok(format!("{PNG_DATA_URI_PREFIX}{}", BASE64.encode(png)))
    }
}
