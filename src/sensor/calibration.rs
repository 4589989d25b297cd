//! Pinhole calibration for depth → color registration
//!
//! Reference resolution is 640x480 for both cameras. The default profile
//! uses published Kinect v1 factory-average intrinsics and the IR-to-RGB
//! translation; the small inter-camera rotation is ignored.

use serde::{Deserialize, Serialize};

use super::{ColorSpacePoint, Resolution};

/// Camera intrinsics in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

/// Depth camera → color camera calibration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub depth: Intrinsics,
    pub color: Intrinsics,
    /// Depth camera origin expressed in the color camera frame, meters
    pub translation: [f32; 3],
}

impl Calibration {
    pub fn kinect_v1() -> Self {
        Self {
            depth: Intrinsics {
                fx: 594.214_3,
                fy: 591.040_5,
                cx: 339.307_8,
                cy: 242.739_1,
            },
            color: Intrinsics {
                fx: 529.215_1,
                fy: 525.563_9,
                cx: 328.942_7,
                cy: 267.480_7,
            },
            translation: [0.019_985, -0.000_744, -0.010_917],
        }
    }

    /// Both cameras share intrinsics and origin: every pixel maps onto itself.
    pub fn coincident(resolution: Resolution) -> Self {
        let intrinsics = Intrinsics {
            fx: 580.0,
            fy: 580.0,
            cx: (resolution.width as f32 - 1.0) / 2.0,
            cy: (resolution.height as f32 - 1.0) / 2.0,
        };
        Self {
            depth: intrinsics,
            color: intrinsics,
            translation: [0.0; 3],
        }
    }

    /// Project depth pixel (`x`, `y`) with depth `depth_mm` into the color image.
    ///
    /// A zero sample has no 3-D position; it is projected along its viewing
    /// ray at infinity, where the translation has no effect.
    pub fn project(&self, x: u32, y: u32, depth_mm: u16) -> ColorSpacePoint {
        let d = &self.depth;
        let c = &self.color;
        let rx = (x as f32 - d.cx) / d.fx;
        let ry = (y as f32 - d.cy) / d.fy;

        let (u, v) = if depth_mm == 0 {
            (c.fx * rx + c.cx, c.fy * ry + c.cy)
        } else {
            let z = depth_mm as f32 * 0.001;
            let px = rx * z + self.translation[0];
            let py = ry * z + self.translation[1];
            let pz = z + self.translation[2];
            if pz <= 0.0 {
                return ColorSpacePoint::INVALID;
            }
            (c.fx * px / pz + c.cx, c.fy * py / pz + c.cy)
        };

        if !u.is_finite() || !v.is_finite() {
            return ColorSpacePoint::INVALID;
        }
        ColorSpacePoint::new(u.round() as i32, v.round() as i32)
    }

    /// Project a whole raster-order depth frame.
    pub fn project_frame(&self, depth: &[u16], resolution: Resolution, out: &mut [ColorSpacePoint]) {
        let width = resolution.width.max(1) as usize;
        for (i, (sample, point)) in depth.iter().zip(out.iter_mut()).enumerate() {
            *point = self.project((i % width) as u32, (i / width) as u32, *sample);
        }
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self::kinect_v1()
    }
}
