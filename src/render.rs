use std::sync::Arc;

use image::{Rgba, RgbaImage};

use crate::config::OutputConfig;
use crate::error::RenderError;
use crate::font::{self, ADVANCE, GLYPH_HEIGHT, GLYPH_WIDTH};
use crate::measurement::MeasurementKind;
use crate::pixel::{self, BLACK, WHITE};
use crate::snapshot::{Frame, Readings};

pub const BACKGROUND: Rgba<u8> = BLACK;
pub const FOREGROUND: Rgba<u8> = WHITE;

/// Formats the two lines shown on the display.
pub fn compose_screen(readings: &Readings) -> Vec<String> {
    let glyph = |kind: MeasurementKind| readings.get(kind).trend(kind.trend_threshold()).glyph();

    vec![
        format!(
            "{:.1}{} {:.0}{}",
            readings.indoor_temperature.current,
            glyph(MeasurementKind::IndoorTemperature),
            readings.indoor_humidity.current,
            glyph(MeasurementKind::IndoorHumidity),
        ),
        format!(
            "{:.1}{}",
            readings.outdoor_temperature.current,
            glyph(MeasurementKind::OutdoorTemperature),
        ),
    ]
}

/// Draws `text` with its top-left corner at (`x`, `y`). Pixels past the image edges are dropped.
pub fn draw_text(
    img: &mut RgbaImage,
    text: &[u8],
    x: u32,
    y: u32,
    color: Rgba<u8>,
    line: usize,
) -> Result<(), RenderError> {
    let mut cursor = x;
    for &byte in text {
        let columns = font::glyph(byte).ok_or(RenderError::UnknownGlyph { line, byte })?;
        for col in 0..GLYPH_WIDTH {
            for row in 0..GLYPH_HEIGHT {
                if font::is_lit(columns, col, row) {
                    pixel::put_clipped(img, cursor + col, y + row, color);
                }
            }
        }
        cursor = cursor.saturating_add(ADVANCE);
    }
    Ok(())
}

/// Renders `readings` into a fresh frame. Nothing is shared with any earlier frame.
pub fn render(readings: &Readings, output: &OutputConfig) -> Result<Frame, RenderError> {
    let screen = compose_screen(readings);

    let mut img = RgbaImage::from_pixel(output.width, output.height, BACKGROUND);
    let bands = output.height / GLYPH_HEIGHT;
    for (line, text) in screen.iter().enumerate().take(bands as usize) {
        draw_text(
            &mut img,
            text.as_bytes(),
            0,
            line as u32 * GLYPH_HEIGHT,
            FOREGROUND,
            line,
        )?;
    }

    Ok(Frame {
        image: Arc::new(img),
        screen,
    })
}
