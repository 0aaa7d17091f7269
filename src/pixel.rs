use std::fmt::Write as _;

use image::{Rgba, RgbaImage};

pub const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);
pub const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
pub const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Whether the colour is the display background, ignoring alpha.
pub fn is_background(p: &Rgba<u8>) -> bool {
    let [r, g, b, _] = p.0;
    r == 0 && g == 0 && b == 0
}

/// Sets one pixel. Coordinates outside the image are clipped.
pub fn put_clipped(img: &mut RgbaImage, x: u32, y: u32, color: Rgba<u8>) {
    if x < img.width() && y < img.height() {
        img.put_pixel(x, y, color);
    }
}

/// Lists every non-background pixel as `"x y"`, one per line, column by column.
pub fn to_coordinate_text(img: &RgbaImage) -> String {
    let mut out = String::new();
    for x in 0..img.width() {
        for y in 0..img.height() {
            if !is_background(img.get_pixel(x, y)) {
                // Writing to a String cannot fail.
                let _ = writeln!(out, "{x} {y}");
            }
        }
    }
    out
}

/// Magnifies `src` so every pixel becomes a `factor`×`factor` block, leaving a `margin`-pixel
/// transparent border inside each block.
pub fn enlarge(src: &RgbaImage, factor: u32, margin: u32) -> RgbaImage {
    let mut img = RgbaImage::from_pixel(src.width() * factor, src.height() * factor, TRANSPARENT);
    let inner = margin..factor.saturating_sub(margin);
    for (x, y, &val) in src.enumerate_pixels() {
        for i in inner.clone() {
            for j in inner.clone() {
                img.put_pixel(x * factor + i, y * factor + j, val);
            }
        }
    }
    img
}
