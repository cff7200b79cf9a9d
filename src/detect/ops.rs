//! Pre- and post-processing for the detection engine.
//!
//! Letterbox resize into the model's fixed input size, decode of the
//! `[4 + num_classes, num_anchors]` output grid, and greedy class-aware
//! non-max suppression. All functions are pure so they can be tested without
//! a loaded model.

use image::imageops::FilterType;
use image::RgbImage;

use crate::detect::backend::{ModelInput, RawModelOutput};
use crate::detect::result::Detection;
use crate::BoundingBox;

/// Pad value for the letterbox border (mid-gray, the YOLO convention).
const PAD_VALUE: u8 = 114;

/// The forward letterbox transform: `model_px = source_px * scale + pad`.
/// Kept so decoded boxes can be mapped back into source-frame pixels.
#[derive(Clone, Copy, Debug)]
pub struct LetterboxTransform {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl LetterboxTransform {
    /// Map a model-input-space box back to source-frame pixels.
    pub fn invert_box(&self, bbox: BoundingBox) -> BoundingBox {
        BoundingBox::new(
            (bbox.x - self.pad_x) / self.scale,
            (bbox.y - self.pad_y) / self.scale,
            bbox.w / self.scale,
            bbox.h / self.scale,
        )
    }
}

/// Letterbox-resize `frame` into a `target_w` x `target_h` tensor, preserving
/// aspect ratio and padding the border with mid-gray. Returns the NCHW input
/// (RGB, normalized to [0, 1]) and the transform used.
pub fn letterbox(frame: &RgbImage, target_w: u32, target_h: u32) -> (ModelInput, LetterboxTransform) {
    let (src_w, src_h) = frame.dimensions();
    let scale = (target_w as f32 / src_w as f32).min(target_h as f32 / src_h as f32);
    let scaled_w = ((src_w as f32 * scale).round() as u32).max(1);
    let scaled_h = ((src_h as f32 * scale).round() as u32).max(1);
    let pad_x = ((target_w - scaled_w) / 2) as f32;
    let pad_y = ((target_h - scaled_h) / 2) as f32;

    let resized = image::imageops::resize(frame, scaled_w, scaled_h, FilterType::Triangle);

    let plane = (target_w * target_h) as usize;
    let mut data = vec![PAD_VALUE as f32 / 255.0; plane * 3];
    for (x, y, pixel) in resized.enumerate_pixels() {
        let tx = x as usize + pad_x as usize;
        let ty = y as usize + pad_y as usize;
        let idx = ty * target_w as usize + tx;
        data[idx] = pixel.0[0] as f32 / 255.0;
        data[plane + idx] = pixel.0[1] as f32 / 255.0;
        data[2 * plane + idx] = pixel.0[2] as f32 / 255.0;
    }

    (
        ModelInput {
            data,
            width: target_w,
            height: target_h,
        },
        LetterboxTransform { scale, pad_x, pad_y },
    )
}

/// Decode the raw output grid into corner-form detections in source-frame
/// pixels. Anchors below `confidence_threshold` are discarded; surviving
/// boxes are rescaled through the inverse letterbox transform and clamped to
/// the source image bounds.
pub fn decode_output(
    raw: &RawModelOutput,
    transform: &LetterboxTransform,
    confidence_threshold: f32,
    source_w: u32,
    source_h: u32,
    class_names: &[String],
    timestamp_ms: u64,
) -> Vec<Detection> {
    let mut detections = Vec::new();

    for anchor in 0..raw.num_anchors {
        let mut best_class = 0usize;
        let mut best_score = f32::MIN;
        for class in 0..raw.num_classes {
            let score = raw.at(4 + class, anchor);
            if score > best_score {
                best_score = score;
                best_class = class;
            }
        }
        if best_score < confidence_threshold {
            continue;
        }

        let cx = raw.at(0, anchor);
        let cy = raw.at(1, anchor);
        let w = raw.at(2, anchor);
        let h = raw.at(3, anchor);

        let bbox = transform
            .invert_box(BoundingBox::from_center(cx, cy, w, h))
            .clamp_to(source_w as f32, source_h as f32);
        if bbox.area() <= 0.0 {
            continue;
        }

        let class_name = class_names
            .get(best_class)
            .map(String::as_str)
            .unwrap_or("unknown");
        detections.push(Detection::new(
            bbox,
            best_score.clamp(0.0, 1.0),
            best_class,
            class_name,
            timestamp_ms,
        ));
    }

    detections
}

/// Greedy class-aware non-max suppression.
///
/// Sort by confidence descending, keep the top detection, drop all same-class
/// detections whose IoU with it exceeds `nms_threshold`, repeat. Idempotent:
/// no same-class pair above the threshold survives a pass.
pub fn non_max_suppression(mut detections: Vec<Detection>, nms_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let suppressed = kept.iter().any(|keep| {
            keep.class_id == candidate.class_id
                && keep.bbox.iou(&candidate.bbox) > nms_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, y: f32, w: f32, h: f32, conf: f32, class: usize) -> Detection {
        Detection::new(BoundingBox::new(x, y, w, h), conf, class, "person", 0)
    }

    #[test]
    fn letterbox_preserves_aspect_and_pads_gray() {
        // 200x100 into 64x64: scale 0.32, scaled 64x32, pad_y 16.
        let frame = RgbImage::from_pixel(200, 100, image::Rgb([255, 0, 0]));
        let (input, transform) = letterbox(&frame, 64, 64);

        assert_eq!(input.data.len(), 64 * 64 * 3);
        assert!((transform.scale - 0.32).abs() < 1e-6);
        assert_eq!(transform.pad_x, 0.0);
        assert_eq!(transform.pad_y, 16.0);

        // Top-left is padding (mid-gray in all channels).
        let pad = PAD_VALUE as f32 / 255.0;
        assert!((input.data[0] - pad).abs() < 1e-6);
        // Center row is image content: red channel saturated, green empty.
        let center = 32 * 64 + 32;
        assert!(input.data[center] > 0.9);
        assert!(input.data[64 * 64 + center] < 0.1);
    }

    #[test]
    fn letterbox_inverse_maps_back_to_source() {
        let frame = RgbImage::new(200, 100);
        let (_, transform) = letterbox(&frame, 64, 64);

        // A box covering the whole scaled image maps back to the full source.
        let model_box = BoundingBox::new(0.0, 16.0, 64.0, 32.0);
        let src = transform.invert_box(model_box);
        assert!((src.x).abs() < 1e-3);
        assert!((src.y).abs() < 1e-3);
        assert!((src.w - 200.0).abs() < 1e-2);
        assert!((src.h - 100.0).abs() < 1e-2);
    }

    #[test]
    fn decode_respects_confidence_threshold() {
        // Two anchors, one class; anchor 0 scores 0.9, anchor 1 scores 0.3.
        let data = vec![
            32.0, 32.0, // cx
            32.0, 32.0, // cy
            10.0, 10.0, // w
            10.0, 10.0, // h
            0.9, 0.3, // class scores
        ];
        let raw = RawModelOutput::new(data, 1, 2).unwrap();
        let transform = LetterboxTransform {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
        };
        let names = vec!["person".to_string()];

        let dets = decode_output(&raw, &transform, 0.5, 64, 64, &names, 0);
        assert_eq!(dets.len(), 1);
        assert!(dets.iter().all(|d| d.confidence >= 0.5));

        let all = decode_output(&raw, &transform, 0.1, 64, 64, &names, 0);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn nms_removes_same_class_overlaps_only() {
        let dets = vec![
            det(0.0, 0.0, 20.0, 20.0, 0.9, 0),
            det(1.0, 1.0, 20.0, 20.0, 0.8, 0), // overlaps class 0, suppressed
            det(1.0, 1.0, 20.0, 20.0, 0.7, 1), // same overlap, other class, kept
            det(100.0, 100.0, 20.0, 20.0, 0.6, 0), // disjoint, kept
        ];
        let kept = non_max_suppression(dets, 0.5);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].confidence, 0.9);
    }

    #[test]
    fn nms_is_idempotent() {
        let dets = vec![
            det(0.0, 0.0, 20.0, 20.0, 0.9, 0),
            det(2.0, 2.0, 20.0, 20.0, 0.8, 0),
            det(50.0, 50.0, 20.0, 20.0, 0.7, 0),
            det(51.0, 51.0, 20.0, 20.0, 0.65, 0),
        ];
        let once = non_max_suppression(dets, 0.4);
        let twice = non_max_suppression(once.clone(), 0.4);
        assert_eq!(once.len(), twice.len());
        for (a, b) in once.iter().zip(twice.iter()) {
            assert_eq!(a.bbox, b.bbox);
            assert_eq!(a.confidence, b.confidence);
        }
    }
}
