//! Terminal rendering of pairing codes.

use qrcode::{Color, QrCode};

/// Render a QR code as pure Unicode block characters (no ANSI escapes).
/// Uses upper/lower half blocks to pack two rows per line.
/// Includes a 4-module quiet zone (white border) required for scanning.
pub fn render_qr_unicode(data: &str) -> Option<String> {
    let code = QrCode::new(data.as_bytes()).ok()?;
    let matrix = code.to_colors();
    let w = code.width();
    let quiet = 4;
    let total = w + quiet * 2;
    let mut out = String::with_capacity(total * (total / 2 + 1) * 3);

    let color_at = |x: usize, y: usize| -> Color {
        if x < quiet || x >= quiet + w || y < quiet || y >= quiet + w {
            Color::Light
        } else {
            matrix[(y - quiet) * w + (x - quiet)]
        }
    };

    for y in (0..total).step_by(2) {
        for x in 0..total {
            let top = color_at(x, y);
            let bottom = if y + 1 < total { color_at(x, y + 1) } else { Color::Light };
            out.push(match (top, bottom) {
                (Color::Light, Color::Light) => ' ',
                (Color::Dark, Color::Dark) => '\u{2588}',
                (Color::Dark, Color::Light) => '\u{2580}',
                (Color::Light, Color::Dark) => '\u{2584}',
            });
        }
        out.push('\n');
    }
    Some(out)
}
