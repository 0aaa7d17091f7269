use std::io::Cursor;

use image::{ImageFormat, RgbaImage};
use serde::Serialize;

use crate::error::EncodeError;
use crate::pixel;

/// Body of `/index.json`.
#[derive(Debug, Serialize)]
pub struct ScreenJson<'a> {
    pub screen: &'a [String],
}

pub fn to_json(screen: &[String]) -> Result<Vec<u8>, EncodeError> {
    Ok(serde_json::to_vec(&ScreenJson { screen })?)
}

fn to_image(img: &RgbaImage, format: ImageFormat) -> Result<Vec<u8>, EncodeError> {
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, format)?;
    Ok(out.into_inner())
}

pub fn to_png(img: &RgbaImage) -> Result<Vec<u8>, EncodeError> {
    to_image(img, ImageFormat::Png)
}

pub fn to_bmp(img: &RgbaImage) -> Result<Vec<u8>, EncodeError> {
    to_image(img, ImageFormat::Bmp)
}

pub fn to_text(img: &RgbaImage) -> Vec<u8> {
    pixel::to_coordinate_text(img).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel::{BLACK, WHITE};

    fn buffer() -> RgbaImage {
        let mut img = RgbaImage::from_pixel(4, 2, BLACK);
        img.put_pixel(1, 1, WHITE);
        img
    }

    #[test]
    fn test_png_round_trips_pixels() {
        let png = to_png(&buffer()).unwrap();
        assert!(png.starts_with(b"\x89PNG\r\n\x1a\n"));
        let decoded = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (4, 2));
        assert_eq!(decoded.get_pixel(1, 1).0, [255, 255, 255, 255]);
        assert_eq!(decoded.get_pixel(0, 0).0, [0, 0, 0, 255]);
    }

    #[test]
    fn test_encoders_are_deterministic() {
        let buf = buffer();
        assert_eq!(to_png(&buf).unwrap(), to_png(&buf).unwrap());
        assert_eq!(to_bmp(&buf).unwrap(), to_bmp(&buf).unwrap());
        assert!(to_bmp(&buf).unwrap().starts_with(b"BM"));
    }

    #[test]
    fn test_text_and_json() {
        assert_eq!(to_text(&buffer()), b"1 1\n");
        let screen = vec!["69.0\u{18} 42\u{19}".to_string(), "90.0 ".to_string()];
        assert_eq!(
            String::from_utf8(to_json(&screen).unwrap()).unwrap(),
            r#"{"screen":["69.0\u0018 42\u0019","90.0 "]}"#
        );
    }
}
