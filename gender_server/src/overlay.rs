//! Drawing the current reading onto frames.
use std::{io::Cursor, path::Path};

use anyhow::{anyhow, Context, Result};
use image::{codecs::jpeg::JpegEncoder, ColorType, Rgb, RgbImage};
use imageproc::{
    drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut},
    rect::Rect,
};
use rusttype::{Font, Scale};

use crate::{
    analysis::{FaceRegion, GenderClass},
    decision::Decision,
};

const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const MAGENTA: Rgb<u8> = Rgb([255, 0, 255]);

/// Text color for a reading, white while nothing has been classified yet.
pub fn class_color(class: Option<GenderClass>) -> Rgb<u8> {
    match class {
        Some(GenderClass::Man) => GREEN,
        Some(GenderClass::Woman) => MAGENTA,
        None => WHITE,
    }
}

/// DejaVu Sans Mono, compiled into the binary.
const DEJAVU_MONO: &[u8] = include_bytes!("../../resources/DejaVuSansMono.ttf");

/// Renders the label banner and the face box.
pub struct Overlay {
    font: Font<'static>,
}

impl Overlay {
    /// Overlay with the embedded font.
    pub fn new() -> Result<Self> {
        let font = Font::try_from_bytes(DEJAVU_MONO)
            .ok_or_else(|| anyhow!("embedded font is not usable"))?;
        Ok(Self { font })
    }

    pub fn with_font_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .with_context(|| format!("failed to read font {}", path.display()))?;
        let font = Font::try_from_vec(data)
            .ok_or_else(|| anyhow!("{} is not a usable font", path.display()))?;
        Ok(Self { font })
    }

    pub fn draw(&self, frame: &mut RgbImage, reading: Option<&Decision>, face: Option<&FaceRegion>) {
        let color = class_color(reading.map(|r| r.class));

        if let Some(face) = face.filter(|f| f.width > 0 && f.height > 0) {
            let face_rect = Rect::at(face.x as i32, face.y as i32).of_size(face.width, face.height);
            draw_hollow_rect_mut(frame, face_rect, color);
        }

        // Background box for text visibility
        draw_filled_rect_mut(frame, Rect::at(20, 20).of_size(430, 80), BLACK);

        let font = &self.font;
        let (label, confidence) = match reading {
            Some(r) => (r.label, r.confidence),
            None => ("Initializing...", 0.0),
        };

        draw_text_mut(
            frame,
            color,
            30,
            35,
            Scale { x: 32.0, y: 32.0 },
            font,
            &format!("Gender: {}", label),
        );
        draw_text_mut(
            frame,
            WHITE,
            30,
            75,
            Scale { x: 18.0, y: 18.0 },
            font,
            &format!("Conf: {:.1}%", confidence),
        );
    }
}

pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let (width, height) = frame.dimensions();
    let mut buf = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buf, quality).encode(frame, width, height, ColorType::Rgb8)?;
    Ok(buf.into_inner())
}

#[cfg(test)]
mod test {
    use super::*;

    fn reading(class: GenderClass) -> Decision {
        Decision {
            class,
            label: "Female",
            confidence: 45.0,
            should_log: false,
        }
    }

    #[test]
    fn banner_and_face_box_are_drawn() {
        let mut frame = RgbImage::from_pixel(640, 480, Rgb([200, 200, 200]));
        let face = FaceRegion {
            x: 300,
            y: 200,
            width: 100,
            height: 120,
        };

        Overlay::new()
            .unwrap()
            .draw(&mut frame, Some(&reading(GenderClass::Woman)), Some(&face));

        assert_eq!(frame[(25, 25)], BLACK);
        assert_eq!(frame[(449, 99)], BLACK);
        assert_eq!(frame[(450, 100)], Rgb([200, 200, 200]));
        assert_eq!(frame[(300, 250)], MAGENTA);
        assert_eq!(frame[(350, 250)], Rgb([200, 200, 200]));
    }

    #[test]
    fn small_frames_are_clipped() {
        let mut frame = RgbImage::from_pixel(32, 24, WHITE);
        Overlay::new().unwrap().draw(&mut frame, None, None);
        assert_eq!(frame[(31, 23)], BLACK);
    }

    #[test]
    fn label_text_is_drawn() {
        let mut frame = RgbImage::from_pixel(640, 480, WHITE);
        Overlay::new()
            .unwrap()
            .draw(&mut frame, Some(&reading(GenderClass::Woman)), None);

        let label_pixels = (30..430)
            .flat_map(|x| (35..70).map(move |y| (x, y)))
            .filter(|&(x, y)| frame[(x, y)] != BLACK)
            .count();
        assert!(label_pixels > 100);

        let conf_pixels = (30..200)
            .flat_map(|x| (75..95).map(move |y| (x, y)))
            .filter(|&(x, y)| frame[(x, y)] != BLACK)
            .count();
        assert!(conf_pixels > 20);
    }

    #[test]
    fn colors_follow_class() {
        assert_eq!(class_color(Some(GenderClass::Man)), GREEN);
        assert_eq!(class_color(Some(GenderClass::Woman)), MAGENTA);
        assert_eq!(class_color(None), WHITE);
    }

    #[test]
    fn missing_font_is_an_error() {
        assert!(Overlay::with_font_file("/nonexistent/font.ttf").is_err());
    }

    #[test]
    fn jpeg_roundtrips_dimensions() -> Result<()> {
        let frame = RgbImage::from_pixel(64, 48, GREEN);
        let bytes = encode_jpeg(&frame, 80)?;
        let decoded = image::load_from_memory(&bytes)?;
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
        Ok(())
    }
}
