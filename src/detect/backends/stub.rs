use anyhow::Result;

use crate::detect::backend::{ExecutionPath, InferenceBackend, ModelInput, RawModelOutput};

/// Stub backend for tests and the synthetic demo pipeline.
///
/// Finds the bright region of the input tensor (luminance above a threshold)
/// and emits one anchor covering it, classed as `class_id` 0. Paired with
/// `SyntheticSource`, which renders a bright person-sized blob, this drives
/// the whole pipeline without model weights.
pub struct StubBackend {
    num_classes: usize,
    luminance_threshold: f32,
    confidence: f32,
}

impl StubBackend {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes: num_classes.max(1),
            luminance_threshold: 0.85,
            confidence: 0.9,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new(1)
    }
}

impl InferenceBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn execution_path(&self) -> ExecutionPath {
        ExecutionPath::Cpu
    }

    fn forward(&mut self, input: &ModelInput) -> Result<RawModelOutput> {
        let plane = (input.width * input.height) as usize;
        let width = input.width as usize;

        let mut min_x = usize::MAX;
        let mut min_y = usize::MAX;
        let mut max_x = 0usize;
        let mut max_y = 0usize;
        let mut hits = 0usize;

        for idx in 0..plane {
            let luminance = 0.299 * input.data[idx]
                + 0.587 * input.data[plane + idx]
                + 0.114 * input.data[2 * plane + idx];
            if luminance >= self.luminance_threshold {
                let x = idx % width;
                let y = idx / width;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
                hits += 1;
            }
        }

        if hits == 0 {
            return RawModelOutput::new(Vec::new(), self.num_classes, 0);
        }

        let w = (max_x - min_x + 1) as f32;
        let h = (max_y - min_y + 1) as f32;
        let cx = min_x as f32 + w / 2.0;
        let cy = min_y as f32 + h / 2.0;

        // One anchor: box rows then per-class scores, all mass on class 0.
        let mut data = vec![cx, cy, w, h];
        data.push(self.confidence);
        data.extend(std::iter::repeat(0.0).take(self.num_classes - 1));
        RawModelOutput::new(data, self.num_classes, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_backend_finds_bright_blob() {
        let width = 32u32;
        let height = 32u32;
        let plane = (width * height) as usize;
        let mut data = vec![0.0f32; plane * 3];
        // White 4x4 blob at (10..14, 20..24) in all three channels.
        for y in 20..24 {
            for x in 10..14 {
                let idx = y * width as usize + x;
                data[idx] = 1.0;
                data[plane + idx] = 1.0;
                data[2 * plane + idx] = 1.0;
            }
        }
        let input = ModelInput { data, width, height };

        let mut backend = StubBackend::new(1);
        let out = backend.forward(&input).unwrap();
        assert_eq!(out.num_anchors, 1);
        assert!((out.at(0, 0) - 12.0).abs() < 1.0); // cx
        assert!((out.at(1, 0) - 22.0).abs() < 1.0); // cy
        assert_eq!(out.at(4, 0), 0.9);
    }

    #[test]
    fn stub_backend_emits_nothing_for_dark_frame() {
        let input = ModelInput {
            data: vec![0.1; 32 * 32 * 3],
            width: 32,
            height: 32,
        };
        let mut backend = StubBackend::default();
        let out = backend.forward(&input).unwrap();
        assert_eq!(out.num_anchors, 0);
    }
}
