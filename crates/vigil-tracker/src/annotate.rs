//! Overlay drawing for the live preview.

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use vigil_models::{BoundingBox, Roi};

pub const BODY_COLOR: Rgb<u8> = Rgb([0, 200, 0]);
pub const FACE_COLOR: Rgb<u8> = Rgb([230, 40, 40]);
pub const ROI_COLOR: Rgb<u8> = Rgb([255, 255, 0]);

/// Draw a 2px outline, skipping boxes with nothing inside the frame.
pub fn draw_box(image: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
    let Some((x, y, w, h)) = bbox.clip_to_frame(image.width(), image.height()) else {
        return;
    };
    draw_hollow_rect_mut(image, Rect::at(x as i32, y as i32).of_size(w, h), color);
    if w > 2 && h > 2 {
        draw_hollow_rect_mut(
            image,
            Rect::at(x as i32 + 1, y as i32 + 1).of_size(w - 2, h - 2),
            color,
        );
    }
}

pub fn draw_roi(image: &mut RgbImage, roi: &Roi) {
    let rect = roi.to_pixels(image.width(), image.height());
    draw_box(image, &rect, ROI_COLOR);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_box_outlines() {
        let mut image = RgbImage::new(20, 20);
        draw_box(&mut image, &BoundingBox::new(5.0, 5.0, 10.0, 10.0), BODY_COLOR);
        assert_eq!(image.get_pixel(5, 5), &BODY_COLOR);
        assert_eq!(image.get_pixel(10, 10), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_draw_box_ignores_offscreen() {
        let mut image = RgbImage::new(20, 20);
        draw_box(&mut image, &BoundingBox::new(50.0, 50.0, 10.0, 10.0), FACE_COLOR);
        draw_box(&mut image, &BoundingBox::new(5.0, 5.0, 0.0, 0.0), FACE_COLOR);
        assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }
}
