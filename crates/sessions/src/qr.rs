use std::{
    io::Cursor,
    time::{Duration, Instant},
};

use {
    anyhow::{Context, Result, anyhow},
    base64::{Engine, engine::general_purpose::STANDARD as BASE64},
    image::{DynamicImage, ImageFormat, Luma},
    qrcode::{EcLevel, QrCode},
    serde::Serialize,
};

/// Smallest edge of the rendered QR image, in pixels.
pub const QR_IMAGE_SIZE: u32 = 256;

/// Render `code` as a PNG QR image and return it base64-encoded.
pub fn render_png_base64(code: &str) -> Result<String> {
    let qr = QrCode::with_error_correction_level(code.as_bytes(), EcLevel::M)
        .map_err(|e| anyhow!("encode QR code: {e:?}"))?;
    let img = qr
        .render::<Luma<u8>>()
        .min_dimensions(QR_IMAGE_SIZE, QR_IMAGE_SIZE)
        .build();

    let mut png = Vec::new();
    DynamicImage::ImageLuma8(img)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .context("write QR PNG")?;
    Ok(BASE64.encode(png))
}

/// Last login code a session rendered.
#[derive(Debug, Clone)]
pub struct QrArtifact {
    pub code: String,
    pub image_base64: String,
    pub captured_at: Instant,
}

impl QrArtifact {
    pub fn new(code: String, image_base64: String) -> Self {
        Self {
            code,
            image_base64,
            captured_at: Instant::now(),
        }
    }

    /// Time left before the artifact goes stale, `None` once it has.
    pub fn remaining(&self, ttl: Duration) -> Option<Duration> {
        ttl.checked_sub(self.captured_at.elapsed())
            .filter(|left| !left.is_zero())
    }
}

/// What the HTTP layer hands out for a fresh artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QrTicket {
    #[serde(skip)]
    pub code: String,
    #[serde(rename = "base64")]
    pub image_base64: String,
    /// Whole seconds of validity left, always at least 1.
    pub expires_in: u64,
}

impl QrTicket {
    pub(crate) fn from_artifact(artifact: &QrArtifact, remaining: Duration) -> Self {
        Self {
            code: artifact.code.clone(),
            image_base64: artifact.image_base64.clone(),
            expires_in: remaining.as_millis().div_ceil(1000).max(1) as u64,
        }
    }
}
