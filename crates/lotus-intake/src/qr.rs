//! QR codes pointing at the public lead form (or any URL).

use base64::Engine;
use lotus_core::error::{LotusError, Result};
use qrcode::QrCode;
use qrcode::render::svg;

/// Minimum rendered edge in pixels.
pub const MIN_SIZE: u32 = 256;

/// Render `text` as a black-on-white SVG QR code with a quiet zone.
pub fn generate_qr_svg(text: &str) -> Result<String> {
    let text = text.trim();
    if text.is_empty() {
        return Err(LotusError::Validation("QR code text is empty".into()));
    }
    let code = QrCode::new(text.as_bytes())
        .map_err(|e| LotusError::Validation(format!("Failed to generate QR code: {e}")))?;
    Ok(code
        .render::<svg::Color<'_>>()
        .min_dimensions(MIN_SIZE, MIN_SIZE)
        .quiet_zone(true)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#ffffff"))
        .build())
}

/// The SVG as a `data:image/svg+xml;base64,…` URL for direct embedding.
pub fn generate_qr_data_url(text: &str) -> Result<String> {
    let svg = generate_qr_svg(text)?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(svg.as_bytes());
    Ok(format!("data:image/svg+xml;base64,{encoded}"))
}
