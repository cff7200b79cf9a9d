//! Coordinate transforms between image, relative, and canvas space.
//!
//! Three spaces coexist per camera:
//! - image: source-frame pixels, top-left origin
//! - relative: [0,1] x [0,1], resolution independent (zones are stored here)
//! - canvas: on-screen render pixels, letterbox-fitted with centered offsets
//!
//! The mapper recomputes its scale/offset whenever either size changes; a
//! stale transform mis-places every overlay and every zone test, so callers
//! must push resize events through `set_canvas_size` / `set_image_size`.

use anyhow::{anyhow, Result};

use crate::Point;

/// A transformed point plus whether the input had to be clamped into bounds.
/// Out-of-bounds queries are clamped and reported, never extrapolated.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Mapped {
    pub point: Point,
    pub clamped: bool,
}

#[derive(Clone, Debug)]
pub struct CoordinateMapper {
    image_w: f32,
    image_h: f32,
    canvas_w: f32,
    canvas_h: f32,
    /// image px -> canvas px
    scale: f32,
    offset_x: f32,
    offset_y: f32,
}

impl CoordinateMapper {
    pub fn new(image_w: u32, image_h: u32, canvas_w: u32, canvas_h: u32) -> Result<Self> {
        if image_w == 0 || image_h == 0 || canvas_w == 0 || canvas_h == 0 {
            return Err(anyhow!(
                "mapper sizes must be nonzero (image {}x{}, canvas {}x{})",
                image_w,
                image_h,
                canvas_w,
                canvas_h
            ));
        }
        let mut mapper = Self {
            image_w: image_w as f32,
            image_h: image_h as f32,
            canvas_w: canvas_w as f32,
            canvas_h: canvas_h as f32,
            scale: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
        };
        mapper.recompute();
        Ok(mapper)
    }

    /// Update the render-surface size (window resize).
    pub fn set_canvas_size(&mut self, canvas_w: u32, canvas_h: u32) -> Result<()> {
        if canvas_w == 0 || canvas_h == 0 {
            return Err(anyhow!("canvas size must be nonzero"));
        }
        self.canvas_w = canvas_w as f32;
        self.canvas_h = canvas_h as f32;
        self.recompute();
        Ok(())
    }

    /// Update the source-image size (stream resolution change).
    pub fn set_image_size(&mut self, image_w: u32, image_h: u32) -> Result<()> {
        if image_w == 0 || image_h == 0 {
            return Err(anyhow!("image size must be nonzero"));
        }
        self.image_w = image_w as f32;
        self.image_h = image_h as f32;
        self.recompute();
        Ok(())
    }

    fn recompute(&mut self) {
        self.scale = (self.canvas_w / self.image_w).min(self.canvas_h / self.image_h);
        self.offset_x = (self.canvas_w - self.image_w * self.scale) / 2.0;
        self.offset_y = (self.canvas_h - self.image_h * self.scale) / 2.0;
    }

    pub fn image_to_relative(&self, p: Point) -> Mapped {
        let (p, clamped) = clamp_point(p, self.image_w, self.image_h);
        Mapped {
            point: Point::new(p.x / self.image_w, p.y / self.image_h),
            clamped,
        }
    }

    pub fn relative_to_image(&self, p: Point) -> Mapped {
        let (p, clamped) = clamp_point(p, 1.0, 1.0);
        Mapped {
            point: Point::new(p.x * self.image_w, p.y * self.image_h),
            clamped,
        }
    }

    pub fn relative_to_canvas(&self, p: Point) -> Mapped {
        let (p, clamped) = clamp_point(p, 1.0, 1.0);
        Mapped {
            point: Point::new(
                self.offset_x + p.x * self.image_w * self.scale,
                self.offset_y + p.y * self.image_h * self.scale,
            ),
            clamped,
        }
    }

    pub fn canvas_to_image(&self, p: Point) -> Mapped {
        let image = Point::new(
            (p.x - self.offset_x) / self.scale,
            (p.y - self.offset_y) / self.scale,
        );
        let (image, clamped) = clamp_point(image, self.image_w, self.image_h);
        Mapped {
            point: image,
            clamped,
        }
    }

    pub fn image_to_canvas(&self, p: Point) -> Mapped {
        let (p, clamped) = clamp_point(p, self.image_w, self.image_h);
        Mapped {
            point: Point::new(self.offset_x + p.x * self.scale, self.offset_y + p.y * self.scale),
            clamped,
        }
    }

    /// Canvas px per image px scale currently in effect.
    pub fn scale(&self) -> f32 {
        self.scale
    }
}

fn clamp_point(p: Point, max_x: f32, max_y: f32) -> (Point, bool) {
    let clamped_x = p.x.clamp(0.0, max_x);
    let clamped_y = p.y.clamp(0.0, max_y);
    let clamped = clamped_x != p.x || clamped_y != p.y;
    (Point::new(clamped_x, clamped_y), clamped)
}
