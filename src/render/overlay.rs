// SPDX-License-Identifier: GPL-3.0-only

//! Detection overlay painter
//!
//! Draws detection boxes into the transparent overlay surface. Boxes, label
//! plates and meters are rasterized with alpha blending; text is not
//! rasterized but recorded as [`Annotation`]s positioned where it would be
//! drawn, so hosts with a text renderer can place it.

use crate::constants::overlay::{
    BOX_STROKE, DASH_LENGTH, DIM_ALPHA, GLYPH_WIDTH, LABEL_HEIGHT, LABEL_PADDING, METER_GAP,
    METER_HEIGHT, METER_MIN_BOX_HEIGHT,
};
use crate::detection::Detection;
use image::{Rgba, RgbaImage};
use serde::Serialize;

const BOX_ALPHA: f32 = 0.9;
const OUTLINE_ALPHA: f32 = 0.8;
const METER_TRACK_ALPHA: f32 = 0.5;
const BANNER_ALPHA: f32 = 0.7;
const BANNER_TOP: i64 = 10;
const BANNER_HEIGHT: u32 = 35;
const BANNER_PADDING: u32 = 15;

const WHITE: [u8; 3] = [255, 255, 255];
const BLACK: [u8; 3] = [0, 0, 0];

/// Text placed on the overlay
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    pub text: String,
    /// Baseline origin in canvas pixels
    pub x: f32,
    pub y: f32,
    pub color: [u8; 4],
}

/// Hue for a label, stable across frames
pub fn label_hue(label: &str) -> u32 {
    label.chars().map(|c| c as u32).sum::<u32>() % 360
}

/// Convert HSL (hue in degrees, saturation and lightness in 0..1) to RGB
pub fn hsl_to_rgb(hue: f32, saturation: f32, lightness: f32) -> [u8; 3] {
    let c = (1.0 - (2.0 * lightness - 1.0).abs()) * saturation;
    let h = (hue % 360.0) / 60.0;
    let x = c * (1.0 - (h % 2.0 - 1.0).abs());
    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = lightness - c / 2.0;
    let to_u8 = |v: f32| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    [to_u8(r), to_u8(g), to_u8(b)]
}

/// Reset every pixel to fully transparent
pub fn clear(canvas: &mut RgbaImage) {
    for pixel in canvas.pixels_mut() {
        *pixel = Rgba([0, 0, 0, 0]);
    }
}

/// Source-over blend of `color` at `alpha` into one pixel
fn blend(pixel: &mut Rgba<u8>, color: [u8; 3], alpha: f32) {
    let dst_alpha = pixel[3] as f32 / 255.0;
    let out_alpha = alpha + dst_alpha * (1.0 - alpha);
    if out_alpha <= 0.0 {
        return;
    }
    for i in 0..3 {
        let src = color[i] as f32 * alpha;
        let dst = pixel[i] as f32 * dst_alpha * (1.0 - alpha);
        pixel[i] = ((src + dst) / out_alpha).round().clamp(0.0, 255.0) as u8;
    }
    pixel[3] = (out_alpha * 255.0).round().clamp(0.0, 255.0) as u8;
}

fn fill_rect(canvas: &mut RgbaImage, x: i64, y: i64, w: i64, h: i64, color: [u8; 3], alpha: f32) {
    let (cw, ch) = (canvas.width() as i64, canvas.height() as i64);
    let (x0, y0) = (x.max(0), y.max(0));
    let (x1, y1) = ((x + w).min(cw), (y + h).min(ch));
    for py in y0..y1 {
        for px in x0..x1 {
            blend(canvas.get_pixel_mut(px as u32, py as u32), color, alpha);
        }
    }
}

/// Outline centred on the rectangle edge, like a canvas `strokeRect`
#[allow(clippy::too_many_arguments)]
fn stroke_rect(
    canvas: &mut RgbaImage,
    x: i64,
    y: i64,
    w: i64,
    h: i64,
    width: u32,
    color: [u8; 3],
    alpha: f32,
) {
    let t = width.max(1) as i64;
    let (ox, oy) = (x - t / 2, y - t / 2);
    let (ow, oh) = (w + t, h + t);
    fill_rect(canvas, ox, oy, ow, t, color, alpha);
    fill_rect(canvas, ox, oy + oh - t, ow, t, color, alpha);
    fill_rect(canvas, ox, oy + t, t, oh - 2 * t, color, alpha);
    fill_rect(canvas, ox + ow - t, oy + t, t, oh - 2 * t, color, alpha);
}

/// One pixel wide dashed outline
fn dash_rect(canvas: &mut RgbaImage, x: i64, y: i64, w: i64, h: i64, color: [u8; 3], alpha: f32) {
    let dash = DASH_LENGTH.max(1) as i64;
    let (cw, ch) = (canvas.width() as i64, canvas.height() as i64);
    let mut plot = |px: i64, py: i64, pos: i64| {
        if (pos / dash) % 2 == 0 && (0..cw).contains(&px) && (0..ch).contains(&py) {
            blend(canvas.get_pixel_mut(px as u32, py as u32), color, alpha);
        }
    };

    for i in 0..=w {
        plot(x + i, y, i);
        plot(x + w - i, y + h, w + h + i);
    }
    for i in 1..h {
        plot(x + w, y + i, w + i);
        plot(x, y + h - i, 2 * w + h + i);
    }
}

fn text_width(text: &str) -> u32 {
    text.chars().count() as u32 * GLYPH_WIDTH
}

/// Paint `detections` onto a cleared canvas and return the text annotations
///
/// An empty list leaves the canvas clear.
pub fn paint_detections(canvas: &mut RgbaImage, detections: &[Detection]) -> Vec<Annotation> {
    clear(canvas);
    let mut annotations = Vec::new();
    if detections.is_empty() {
        return annotations;
    }

    let (cw, ch) = (canvas.width() as i64, canvas.height() as i64);
    fill_rect(canvas, 0, 0, cw, ch, BLACK, DIM_ALPHA);

    for detection in detections {
        let hue = label_hue(&detection.label) as f32;
        let box_color = hsl_to_rgb(hue, 1.0, 0.5);
        let text_color = hsl_to_rgb(hue, 1.0, 0.85);

        let region = detection.region;
        let (x, y) = (region.x.round() as i64, region.y.round() as i64);
        let (w, h) = (region.width.round() as i64, region.height.round() as i64);

        stroke_rect(canvas, x, y, w, h, BOX_STROKE, box_color, BOX_ALPHA);
        dash_rect(canvas, x, y, w, h, WHITE, OUTLINE_ALPHA);

        let text = format!(
            "{}: {}%",
            detection.label,
            (detection.confidence * 100.0).round() as i64
        );
        let plate_width = (text_width(&text) + LABEL_PADDING * 2) as i64;
        let plate_y = (y - LABEL_HEIGHT as i64).max(LABEL_PADDING as i64);
        fill_rect(
            canvas,
            x,
            plate_y,
            plate_width,
            LABEL_HEIGHT as i64,
            box_color,
            BOX_ALPHA,
        );
        stroke_rect(
            canvas,
            x,
            plate_y,
            plate_width,
            LABEL_HEIGHT as i64,
            2,
            WHITE,
            OUTLINE_ALPHA,
        );
        annotations.push(Annotation {
            text,
            x: (x + LABEL_PADDING as i64) as f32,
            y: (plate_y + 20) as f32,
            color: [text_color[0], text_color[1], text_color[2], 255],
        });

        if region.height > METER_MIN_BOX_HEIGHT {
            let meter_y = y + h + METER_GAP as i64;
            let meter_h = METER_HEIGHT as i64;
            fill_rect(canvas, x, meter_y, w, meter_h, BLACK, METER_TRACK_ALPHA);
            let filled = (w as f32 * detection.confidence.clamp(0.0, 1.0)).round() as i64;
            fill_rect(canvas, x, meter_y, filled, meter_h, box_color, BOX_ALPHA);
        }
    }

    let count = detections.len();
    let banner = format!(
        "Detected {} object{}",
        count,
        if count == 1 { "" } else { "s" }
    );
    let banner_text_width = text_width(&banner) as i64;
    let banner_x = (cw - banner_text_width) / 2;
    fill_rect(
        canvas,
        banner_x - BANNER_PADDING as i64,
        BANNER_TOP,
        banner_text_width + 2 * BANNER_PADDING as i64,
        BANNER_HEIGHT as i64,
        BLACK,
        BANNER_ALPHA,
    );
    annotations.push(Annotation {
        text: banner,
        x: banner_x as f32,
        y: 35.0,
        color: [255, 255, 255, 255],
    });

    annotations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BoundingBox;

    fn detection(label: &str, confidence: f32, x: f32, y: f32, w: f32, h: f32) -> Detection {
        Detection::new(
            label,
            confidence,
            BoundingBox {
                x,
                y,
                width: w,
                height: h,
            },
        )
    }

    #[test]
    fn test_label_hue_is_char_sum() {
        // 'c' + 'u' + 'p' = 99 + 117 + 112
        assert_eq!(label_hue("cup"), 328);
        assert_eq!(label_hue(""), 0);
    }

    #[test]
    fn test_hsl_primaries() {
        assert_eq!(hsl_to_rgb(0.0, 1.0, 0.5), [255, 0, 0]);
        assert_eq!(hsl_to_rgb(120.0, 1.0, 0.5), [0, 255, 0]);
        assert_eq!(hsl_to_rgb(240.0, 1.0, 0.5), [0, 0, 255]);
    }

    #[test]
    fn test_empty_list_leaves_canvas_clear() {
        let mut canvas = RgbaImage::from_pixel(16, 16, Rgba([9, 9, 9, 255]));
        let annotations = paint_detections(&mut canvas, &[]);
        assert!(annotations.is_empty());
        assert!(canvas.pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn test_paint_dims_and_annotates() {
        let mut canvas = RgbaImage::new(200, 200);
        let annotations = paint_detections(
            &mut canvas,
            &[
                detection("cup", 0.9, 40.0, 60.0, 80.0, 80.0),
                detection("shaker", 0.6, 10.0, 150.0, 20.0, 20.0),
            ],
        );

        assert_eq!(annotations.len(), 3);
        assert_eq!(annotations[0].text, "cup: 90%");
        assert_eq!(annotations[1].text, "shaker: 60%");
        assert_eq!(annotations[2].text, "Detected 2 objects");

        // Dim layer reaches the far corner
        assert!(canvas.get_pixel(199, 199)[3] > 0);
        // Box stroke uses the label colour
        let edge = canvas.get_pixel(80, 60);
        assert!(edge[3] > 200);
    }

    #[test]
    fn test_label_plate_stays_inside_canvas() {
        let mut canvas = RgbaImage::new(100, 100);
        let annotations =
            paint_detections(&mut canvas, &[detection("cup", 1.0, 0.0, 0.0, 50.0, 20.0)]);
        assert_eq!(annotations[0].y, (LABEL_PADDING + 20) as f32);
        assert_eq!(annotations[1].text, "Detected 1 object");
    }
}
