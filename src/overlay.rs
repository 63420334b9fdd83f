//! Frame annotation for display.
//!
//! Everything here works on a copy of the frame; overlays never feed back
//! into detection or policy state.

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

use crate::detect::{BoundingBox, Category, PixelRect};

pub const FEEDING_COLOUR: Rgb<u8> = Rgb([255, 0, 0]);
pub const PETTING_COLOUR: Rgb<u8> = Rgb([0, 255, 0]);
pub const INTRUDER_COLOUR: Rgb<u8> = Rgb([0, 0, 255]);

const FLAG_INSET: u32 = 50;
const FLAG_STROKE: u32 = 5;
const BOX_STROKE: u32 = 2;
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Stroke a rectangle outline inward from `rect`'s edges.
///
/// The rectangle is clipped to the image; a stroke wider than half the
/// rectangle fills it.
pub fn draw_rect(image: &mut RgbImage, rect: PixelRect, colour: Rgb<u8>, stroke: u32) {
    let x_max = rect.x_max.min(image.width());
    let y_max = rect.y_max.min(image.height());
    if rect.x_min >= x_max || rect.y_min >= y_max || stroke == 0 {
        return;
    }
    for y in rect.y_min..y_max {
        for x in rect.x_min..x_max {
            let on_edge = x < rect.x_min + stroke
                || x + stroke >= x_max
                || y < rect.y_min + stroke
                || y + stroke >= y_max;
            if on_edge {
                image.put_pixel(x, y, colour);
            }
        }
    }
}

/// Border colour for a flagged classifier category, if it gets one.
pub fn category_colour(category: &Category) -> Option<Rgb<u8>> {
    match category {
        Category::Feeding => Some(FEEDING_COLOUR),
        Category::Petting => Some(PETTING_COLOUR),
        Category::Idle | Category::Other(_) => None,
    }
}

/// Draw the inset border used for a flagged feeding/petting frame.
pub fn annotate_category(image: &mut RgbImage, category: &Category) {
    let Some(colour) = category_colour(category) else {
        return;
    };
    if image.width() <= 2 * FLAG_INSET || image.height() <= 2 * FLAG_INSET {
        return;
    }
    let rect = PixelRect {
        x_min: FLAG_INSET,
        y_min: FLAG_INSET,
        x_max: image.width() - FLAG_INSET,
        y_max: image.height() - FLAG_INSET,
    };
    draw_rect(image, rect, colour, FLAG_STROKE);
}

/// Outline every suspicious box.
pub fn annotate_boxes(image: &mut RgbImage, boxes: &[BoundingBox]) {
    let (width, height) = image.dimensions();
    for rect in boxes.iter().filter_map(|b| b.clip_to(width, height)) {
        draw_rect(image, rect, INTRUDER_COLOUR, BOX_STROKE);
    }
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality)
        .encode_image(image)
        .context("encode jpeg")?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draw_rect_strokes_only_the_edges() {
        let mut image = RgbImage::new(10, 10);
        let rect = PixelRect {
            x_min: 2,
            y_min: 2,
            x_max: 8,
            y_max: 8,
        };
        draw_rect(&mut image, rect, INTRUDER_COLOUR, 1);

        assert_eq!(*image.get_pixel(2, 2), INTRUDER_COLOUR);
        assert_eq!(*image.get_pixel(7, 5), INTRUDER_COLOUR);
        assert_eq!(*image.get_pixel(5, 7), INTRUDER_COLOUR);
        assert_eq!(*image.get_pixel(5, 5), Rgb([0, 0, 0]));
        assert_eq!(*image.get_pixel(1, 1), Rgb([0, 0, 0]));
        assert_eq!(*image.get_pixel(8, 8), Rgb([0, 0, 0]));
    }

    #[test]
    fn feeding_border_is_inset() {
        let mut image = RgbImage::new(200, 150);
        annotate_category(&mut image, &Category::Feeding);
        assert_eq!(*image.get_pixel(50, 50), FEEDING_COLOUR);
        assert_eq!(*image.get_pixel(49, 50), Rgb([0, 0, 0]));
        assert_eq!(*image.get_pixel(100, 75), Rgb([0, 0, 0]));

        let mut idle = RgbImage::new(200, 150);
        annotate_category(&mut idle, &Category::Idle);
        assert!(idle.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn boxes_are_clipped_to_the_image() {
        let mut image = RgbImage::new(20, 20);
        annotate_boxes(&mut image, &[BoundingBox::new(-10.0, 5.0, 50.0, 15.0)]);
        assert_eq!(*image.get_pixel(0, 5), INTRUDER_COLOUR);
        assert_eq!(*image.get_pixel(19, 10), INTRUDER_COLOUR);
    }

    #[test]
    fn jpeg_has_magic_bytes() {
        let image = RgbImage::from_pixel(16, 16, Rgb([120, 30, 200]));
        let bytes = encode_jpeg(&image, DEFAULT_JPEG_QUALITY).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }
}
