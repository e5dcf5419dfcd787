//! CPU-side cubemap pixel storage, equirect→cubemap projection, and
//! bilinear/trilinear sampling used by the irradiance and prefilter
//! convolution passes.

use glam::Vec3;

/// Packed RGBA-float cube pixel data for all 6 faces and all mip levels.
/// Layout: for each mip (0..`mip_levels`), 6 faces contiguous, each face
/// `face_size>>mip` square RGBA32F; mips packed back-to-back. This is both
/// the CPU importance-sampling source and the disk-cache payload shape.
#[derive(Debug, Clone)]
pub struct CubemapCpuImage {
    pub face_size: u32,
    pub mip_levels: u32,
    pub data: Vec<f32>,
}

impl CubemapCpuImage {
    #[must_use]
    pub fn new_single_mip(face_size: u32) -> Self {
        let len = (face_size * face_size * 4 * 6) as usize;
        Self { face_size, mip_levels: 1, data: vec![0.0; len] }
    }

    #[must_use]
    pub fn mip_size(&self, mip: u32) -> u32 {
        (self.face_size >> mip).max(1)
    }

    fn mip_offset(&self, mip: u32) -> usize {
        let mut offset = 0usize;
        for m in 0..mip {
            let s = self.mip_size(m) as usize;
            offset += s * s * 4 * 6;
        }
        offset
    }

    #[must_use]
    pub fn face_offset(&self, face: u32, mip: u32) -> usize {
        let s = self.mip_size(mip) as usize;
        self.mip_offset(mip) + (face as usize) * s * s * 4
    }

    pub fn set_texel(&mut self, face: u32, mip: u32, x: u32, y: u32, rgba: [f32; 4]) {
        let s = self.mip_size(mip);
        let idx = self.face_offset(face, mip) + ((y * s + x) as usize) * 4;
        self.data[idx..idx + 4].copy_from_slice(&rgba);
    }

    #[must_use]
    pub fn texel(&self, face: u32, mip: u32, x: u32, y: u32) -> [f32; 4] {
        let s = self.mip_size(mip);
        let idx = self.face_offset(face, mip) + ((y * s + x) as usize) * 4;
        [self.data[idx], self.data[idx + 1], self.data[idx + 2], self.data[idx + 3]]
    }

    /// Samples the cube at `direction` and `mip` with nearest-face,
    /// bilinear-within-face filtering (matching the original engine's
    /// `CubemapData::sample`).
    #[must_use]
    pub fn sample(&self, direction: Vec3, mip: u32) -> Vec3 {
        let mip = mip.min(self.mip_levels.saturating_sub(1));
        let size = self.mip_size(mip);
        let (face, u, v) = direction_to_face_uv(direction);
        let fx = u * (size as f32 - 1.0).max(0.0);
        let fy = v * (size as f32 - 1.0).max(0.0);
        let x0 = fx.floor() as u32;
        let y0 = fy.floor() as u32;
        let x1 = (x0 + 1).min(size - 1);
        let y1 = (y0 + 1).min(size - 1);
        let dx = fx - x0 as f32;
        let dy = fy - y0 as f32;

        let c00 = self.texel(face, mip, x0, y0);
        let c10 = self.texel(face, mip, x1, y0);
        let c01 = self.texel(face, mip, x0, y1);
        let c11 = self.texel(face, mip, x1, y1);
        let lerp = |a: [f32; 4], b: [f32; 4], t: f32| {
            [a[0] + (b[0] - a[0]) * t, a[1] + (b[1] - a[1]) * t, a[2] + (b[2] - a[2]) * t]
        };
        let top = lerp(c00, c10, dx);
        let bot = lerp(c01, c11, dx);
        let c = lerp([top[0], top[1], top[2], 0.0], [bot[0], bot[1], bot[2], 0.0], dy);
        Vec3::new(c[0], c[1], c[2])
    }

    /// Manual trilinear sample across two adjacent mips, used by the
    /// split-sum prefilter's solid-angle mip selection.
    #[must_use]
    pub fn sample_trilinear(&self, direction: Vec3, mip_level: f32) -> Vec3 {
        let mip_level = mip_level.clamp(0.0, (self.mip_levels - 1) as f32);
        let mip0 = mip_level.floor() as u32;
        let mip1 = (mip0 + 1).min(self.mip_levels - 1);
        let frac = mip_level - mip0 as f32;
        let c0 = self.sample(direction, mip0);
        let c1 = self.sample(direction, mip1);
        c0.lerp(c1, frac)
    }

    /// Builds a full box-filtered mip chain from this cube's mip 0, matching
    /// the original engine's practice of reading back a GPU-blitted mip
    /// chain before prefilter convolution (`TextureUtils.cpp`'s
    /// `generateCubemapMipmaps` + "read ALL mip levels"). `prefilter_convolve`'s
    /// solid-angle mip selection needs a real chain here, independent of
    /// whatever mips the uploaded GPU texture carries.
    #[must_use]
    pub fn with_box_mips(&self, mip_levels: u32) -> Self {
        let mip_levels = mip_levels.max(1);
        let mut out = Self::new_single_mip(self.face_size);
        out.mip_levels = mip_levels;
        let total_len: usize = (0..mip_levels).map(|m| {
            let s = out.mip_size(m) as usize;
            s * s * 4 * 6
        }).sum();
        out.data = vec![0.0; total_len];
        out.data[..self.data.len().min(out.data.len())].copy_from_slice(&self.data[..self.data.len().min(out.data.len())]);

        for mip in 1..mip_levels {
            let src_size = out.mip_size(mip - 1);
            let dst_size = out.mip_size(mip);
            for face in 0..6u32 {
                for y in 0..dst_size {
                    for x in 0..dst_size {
                        let sx = (x * 2).min(src_size - 1);
                        let sy = (y * 2).min(src_size - 1);
                        let sx1 = (sx + 1).min(src_size - 1);
                        let sy1 = (sy + 1).min(src_size - 1);
                        let c00 = out.texel(face, mip - 1, sx, sy);
                        let c10 = out.texel(face, mip - 1, sx1, sy);
                        let c01 = out.texel(face, mip - 1, sx, sy1);
                        let c11 = out.texel(face, mip - 1, sx1, sy1);
                        let avg = [
                            (c00[0] + c10[0] + c01[0] + c11[0]) * 0.25,
                            (c00[1] + c10[1] + c01[1] + c11[1]) * 0.25,
                            (c00[2] + c10[2] + c01[2] + c11[2]) * 0.25,
                            1.0,
                        ];
                        out.set_texel(face, mip, x, y, avg);
                    }
                }
            }
        }
        out
    }
}

/// Per-face direction convention, matching spec §4.5: `+X,-X,+Y,-Y,+Z,-Z`
/// with the V-flip needed so the cube sampled in a fragment shader matches
/// the equirect source's orientation.
#[must_use]
pub fn face_direction(face: u32, u: f32, v: f32) -> Vec3 {
    match face {
        0 => Vec3::new(1.0, -v, -u),
        1 => Vec3::new(-1.0, -v, u),
        2 => Vec3::new(u, 1.0, v),
        3 => Vec3::new(u, -1.0, -v),
        4 => Vec3::new(u, -v, 1.0),
        5 => Vec3::new(-u, -v, -1.0),
        _ => unreachable!("cube face index must be 0..6"),
    }
    .normalize()
}

/// Inverse of [`face_direction`]: given a world-space direction, finds the
/// dominant axis face and the `(u, v) ∈ [0,1]²` texel-space coordinates
/// within that face. Used by [`CubemapCpuImage::sample`].
#[must_use]
fn direction_to_face_uv(dir: Vec3) -> (u32, f32, f32) {
    let ax = dir.x.abs();
    let ay = dir.y.abs();
    let az = dir.z.abs();
    let (face, u, v, ma) = if ax >= ay && ax >= az {
        if dir.x > 0.0 {
            (0u32, -dir.z, -dir.y, ax)
        } else {
            (1u32, dir.z, -dir.y, ax)
        }
    } else if ay >= ax && ay >= az {
        if dir.y > 0.0 {
            (2u32, dir.x, dir.z, ay)
        } else {
            (3u32, dir.x, -dir.z, ay)
        }
    } else if dir.z > 0.0 {
        (4u32, dir.x, -dir.y, az)
    } else {
        (5u32, -dir.x, -dir.y, az)
    };
    let u = 0.5 * (u / ma + 1.0);
    let v = 0.5 * (v / ma + 1.0);
    (face, u, v)
}

/// Equirectangular source image: RGB float pixels, row-major, `width ×
/// height`, wrapped horizontally and clamped vertically.
pub struct EquirectImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>, // RGB, len = width*height*3
}

impl EquirectImage {
    /// Bilinear sample with horizontal wrap, vertical clamp.
    #[must_use]
    pub fn sample(&self, u: f32, v: f32) -> Vec3 {
        let fx = u.rem_euclid(1.0) * (self.width as f32 - 1.0).max(0.0);
        let fy = v.clamp(0.0, 1.0) * (self.height as f32 - 1.0).max(0.0);
        let x0 = fx.floor() as u32;
        let y0 = fy.floor() as u32;
        let x1 = (x0 + 1) % self.width;
        let y1 = (y0 + 1).min(self.height - 1);
        let dx = fx - x0 as f32;
        let dy = fy - y0 as f32;

        let at = |x: u32, y: u32| -> Vec3 {
            let idx = ((y * self.width + x) * 3) as usize;
            Vec3::new(self.data[idx], self.data[idx + 1], self.data[idx + 2])
        };
        let top = at(x0, y0).lerp(at(x1, y0), dx);
        let bot = at(x0, y1).lerp(at(x1, y1), dx);
        top.lerp(bot, dy)
    }
}

/// Equirect → cubemap face projection (spec §4.5): for each texel, build
/// the per-face direction, convert to spherical `(theta, phi)`, and sample
/// the equirect source bilinearly.
pub fn equirect_to_cube_face(src: &EquirectImage, face: u32, face_size: u32, out: &mut CubemapCpuImage, mip: u32) {
    for y in 0..face_size {
        for x in 0..face_size {
            let u = 2.0 * (x as f32 + 0.5) / face_size as f32 - 1.0;
            let v = 2.0 * (y as f32 + 0.5) / face_size as f32 - 1.0;
            let dir = face_direction(face, u, v);
            let theta = dir.z.atan2(dir.x);
            let phi = dir.y.clamp(-1.0, 1.0).acos();
            let eq_u = (theta + std::f32::consts::PI) / (2.0 * std::f32::consts::PI);
            let eq_v = phi / std::f32::consts::PI;
            let color = src.sample(eq_u, eq_v);
            out.set_texel(face, mip, x, y, [color.x, color.y, color.z, 1.0]);
        }
    }
}

/// Procedural gradient cubemap used when HDR loading fails (spec §4.5,
/// §7's `HdrLoadFailed` recovery).
#[must_use]
pub fn procedural_gradient_cube(face_size: u32) -> CubemapCpuImage {
    let mut cube = CubemapCpuImage::new_single_mip(face_size);
    let sky = Vec3::new(0.4, 0.6, 0.9);
    let ground = Vec3::new(0.15, 0.13, 0.1);
    for face in 0..6u32 {
        for y in 0..face_size {
            for x in 0..face_size {
                let u = 2.0 * (x as f32 + 0.5) / face_size as f32 - 1.0;
                let v = 2.0 * (y as f32 + 0.5) / face_size as f32 - 1.0;
                let dir = face_direction(face, u, v);
                let t = (dir.y * 0.5 + 0.5).clamp(0.0, 1.0);
                let c = ground.lerp(sky, t);
                cube.set_texel(face, 0, x, y, [c.x, c.y, c.z, 1.0]);
            }
        }
    }
    cube
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn face_directions_are_unit_length() {
        for face in 0..6 {
            let d = face_direction(face, 0.3, -0.4);
            assert!((d.length() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn direction_to_face_roundtrips_through_face_direction() {
        for face in 0..6u32 {
            for &(u, v) in &[(0.0_f32, 0.0_f32), (0.5, -0.5), (-0.9, 0.3)] {
                let dir = face_direction(face, u, v);
                let (f, _, _) = direction_to_face_uv(dir);
                assert_eq!(f, face, "face {face} u={u} v={v} resolved to {f}");
            }
        }
    }

    #[test]
    fn cubemap_mip_offsets_are_monotonic() {
        let cube = CubemapCpuImage { face_size: 8, mip_levels: 4, data: vec![0.0; 0] };
        let o0 = cube.mip_offset(0);
        let o1 = cube.mip_offset(1);
        let o2 = cube.mip_offset(2);
        assert!(o0 < o1 && o1 < o2);
    }

    #[test]
    fn box_mips_preserve_constant_color() {
        let mut cube = CubemapCpuImage::new_single_mip(8);
        for face in 0..6u32 {
            for y in 0..8u32 {
                for x in 0..8u32 {
                    cube.set_texel(face, 0, x, y, [0.2, 0.4, 0.6, 1.0]);
                }
            }
        }
        let mipped = cube.with_box_mips(4);
        assert_eq!(mipped.mip_levels, 4);
        for mip in 0..4u32 {
            let c = mipped.texel(0, mip, 0, 0);
            assert!((c[0] - 0.2).abs() < 1e-5);
            assert!((c[1] - 0.4).abs() < 1e-5);
            assert!((c[2] - 0.6).abs() < 1e-5);
        }
    }

    #[test]
    fn box_mips_shrink_face_size_by_half_each_level() {
        let cube = CubemapCpuImage::new_single_mip(16);
        let mipped = cube.with_box_mips(3);
        assert_eq!(mipped.mip_size(0), 16);
        assert_eq!(mipped.mip_size(1), 8);
        assert_eq!(mipped.mip_size(2), 4);
    }
}
