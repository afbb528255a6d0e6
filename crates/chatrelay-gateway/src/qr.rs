//! Pairing-code rendering — raw pairing strings to scannable image data URIs

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use qrcode::QrCode;
use qrcode::render::svg;
use qrcode::types::QrError;

const SVG_PREFIX: &str = "data:image/svg+xml;base64,";
const TEXT_PREFIX: &str = "data:text/plain;base64,";

/// Render a pairing string as a QR code SVG wrapped in a base64 data URI
pub fn render_data_uri(payload: &str) -> Result<String, QrError> {
    let code = QrCode::new(payload.as_bytes())?;
    let image = code
        .render::<svg::Color<'_>>()
        .min_dimensions(264, 264)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#ffffff"))
        .build();
    Ok(format!("{}{}", SVG_PREFIX, STANDARD.encode(image)))
}

/// Carry the raw pairing string as a text data URI when it cannot be drawn
pub fn text_data_uri(payload: &str) -> String {
    format!("{}{}", TEXT_PREFIX, STANDARD.encode(payload))
}
