//! CPU importance-sampling math: Hammersley/GGX sampling, irradiance
//! convolution, split-sum prefilter, and the BRDF LUT. Grounded on the
//! original engine's `TextureUtils.cpp` Monte-Carlo implementation.

use glam::Vec3;

use super::cubemap::CubemapCpuImage;

/// Van der Corput radical inverse in base 2, bit-reversal trick.
#[must_use]
pub fn radical_inverse_vdc(bits: u32) -> f32 {
    let mut bits = bits;
    bits = (bits << 16) | (bits >> 16);
    bits = ((bits & 0x5555_5555) << 1) | ((bits & 0xAAAA_AAAA) >> 1);
    bits = ((bits & 0x3333_3333) << 2) | ((bits & 0xCCCC_CCCC) >> 2);
    bits = ((bits & 0x0F0F_0F0F) << 4) | ((bits & 0xF0F0_F0F0) >> 4);
    bits = ((bits & 0x00FF_00FF) << 8) | ((bits & 0xFF00_FF00) >> 8);
    bits as f32 * 2.328_306_4e-10
}

/// Hammersley quasi-random 2D sequence: `(i/N, radicalInverse(i))`.
#[must_use]
pub fn hammersley(i: u32, n: u32) -> (f32, f32) {
    (i as f32 / n as f32, radical_inverse_vdc(i))
}

/// GGX normal distribution function.
#[must_use]
pub fn distribution_ggx(n_dot_h: f32, roughness: f32) -> f32 {
    let a = roughness * roughness;
    let a2 = a * a;
    let n_dot_h2 = n_dot_h * n_dot_h;
    let denom = n_dot_h2 * (a2 - 1.0) + 1.0;
    a2 / (std::f32::consts::PI * denom * denom).max(1e-8)
}

/// Smith-GGX geometry term with the IBL-specific `k = alpha/2` (distinct
/// from the direct-lighting `k`).
#[must_use]
pub fn geometry_schlick_ggx_ibl(n_dot_v: f32, roughness: f32) -> f32 {
    let k = (roughness * roughness) / 2.0;
    n_dot_v / (n_dot_v * (1.0 - k) + k).max(1e-8)
}

#[must_use]
pub fn geometry_smith_ibl(n_dot_v: f32, n_dot_l: f32, roughness: f32) -> f32 {
    geometry_schlick_ggx_ibl(n_dot_v.max(0.0), roughness) * geometry_schlick_ggx_ibl(n_dot_l.max(0.0), roughness)
}

/// Importance-samples a GGX half-vector `H` around normal `n` given a
/// Hammersley sample `(xi_x, xi_y)` and `roughness`.
#[must_use]
pub fn importance_sample_ggx(xi: (f32, f32), n: Vec3, roughness: f32) -> Vec3 {
    let a = roughness * roughness;
    let phi = 2.0 * std::f32::consts::PI * xi.0;
    let cos_theta = ((1.0 - xi.1) / (1.0 + (a * a - 1.0) * xi.1)).max(0.0).sqrt();
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();

    let h_tangent = Vec3::new(phi.cos() * sin_theta, phi.sin() * sin_theta, cos_theta);

    let up = if n.z.abs() < 0.999 { Vec3::Z } else { Vec3::X };
    let tangent = up.cross(n).normalize();
    let bitangent = n.cross(tangent);
    (tangent * h_tangent.x + bitangent * h_tangent.y + n * h_tangent.z).normalize()
}

/// Diffuse irradiance convolution (spec §4.5): Monte-Carlo integral over the
/// hemisphere tangent to `normal`, using `sample_count` uniformly-distributed
/// Hammersley directions, each weighted by `n_dot_w` and normalized by the
/// summed weight — the same uniform-direction, cosine-reweighted estimator
/// `original_source`'s `diffuseConvolution` uses.
#[must_use]
pub fn irradiance_convolve(env: &CubemapCpuImage, normal: Vec3, sample_count: u32) -> Vec3 {
    let up = if normal.z.abs() < 0.999 { Vec3::Z } else { Vec3::X };
    let tangent = up.cross(normal).normalize();
    let bitangent = normal.cross(tangent);

    let mut irradiance = Vec3::ZERO;
    let mut total_weight = 0.0f32;
    // Uniform hemisphere samples via Hammersley over (phi, theta).
    for i in 0..sample_count {
        let (x0, x1) = hammersley(i, sample_count);
        let phi = 2.0 * std::f32::consts::PI * x0;
        let cos_theta = x1;
        let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
        let tangent_dir = Vec3::new(phi.cos() * sin_theta, phi.sin() * sin_theta, cos_theta);
        let sample_dir = (tangent * tangent_dir.x + bitangent * tangent_dir.y + normal * tangent_dir.z).normalize();
        let n_dot_w = normal.dot(sample_dir).max(0.0);
        if n_dot_w > 0.0 {
            irradiance += env.sample(sample_dir, 0) * n_dot_w;
            total_weight += n_dot_w;
        }
    }
    if total_weight > 0.0 {
        irradiance / total_weight
    } else {
        Vec3::ZERO
    }
}

/// `K(m) = prefilter_base_samples * (1 + m * 8)`, the sample-count growth
/// with mip/roughness named in spec §4.5.
#[must_use]
pub fn prefilter_sample_count(base_samples: u32, mip: u32) -> u32 {
    base_samples * (1 + mip * 8)
}

/// Split-sum specular prefilter for one output texel direction at
/// `roughness` (spec §4.5). `mip == 0` must be handled by the caller as a
/// perfect-mirror copy of the base environment mip; this function handles
/// `mip > 0`.
#[must_use]
pub fn prefilter_convolve(env: &CubemapCpuImage, normal: Vec3, roughness: f32, sample_count: u32, env_res: f32) -> Vec3 {
    let n = normal;
    let v = normal;
    let mut total_color = Vec3::ZERO;
    let mut total_weight = 0.0f32;

    for i in 0..sample_count {
        let xi = hammersley(i, sample_count);
        let h = importance_sample_ggx(xi, n, roughness);
        let l = (2.0 * v.dot(h) * h - v).normalize();
        let n_dot_l = n.dot(l).max(0.0);
        if n_dot_l <= 0.0 {
            continue;
        }
        let n_dot_h = n.dot(h).max(0.0);
        let h_dot_v = h.dot(v).max(0.0);
        let d = distribution_ggx(n_dot_h, roughness);
        let pdf = d * n_dot_h / (4.0 * h_dot_v) + 1e-4;

        let sa_texel = 4.0 * std::f32::consts::PI / (6.0 * env_res * env_res);
        let sa_sample = 1.0 / (sample_count as f32 * pdf + 1e-4);
        let mip_level = (0.5 * (sa_sample / sa_texel).log2()).clamp(0.0, (env.mip_levels - 1) as f32);

        let sample_color = env.sample_trilinear(l, mip_level);
        total_color += sample_color * n_dot_l;
        total_weight += n_dot_l;
    }
    if total_weight > 0.0 {
        total_color / total_weight
    } else {
        Vec3::ZERO
    }
}

/// 2x2 Bayer ordered-dither matrix, scaled to `[-0.5, 0.5) / 255`.
const BAYER_2X2: [[f32; 2]; 2] = [[0.0, 2.0], [3.0, 1.0]];

#[must_use]
fn bayer_offset(x: u32, y: u32) -> f32 {
    (BAYER_2X2[(y % 2) as usize][(x % 2) as usize] / 4.0 - 0.5) / 255.0
}

/// BRDF LUT integration (spec §4.5): for texel `(NoV, roughness)`, accumulate
/// the split-sum `(A, B)` factors via `sample_count` GGX importance samples,
/// then apply 2x2 Bayer dithering before quantizing to 8 bits.
#[must_use]
pub fn integrate_brdf(n_o_v: f32, roughness: f32, sample_count: u32) -> (f32, f32) {
    let n_o_v = n_o_v.max(1e-4);
    let v = Vec3::new((1.0 - n_o_v * n_o_v).max(0.0).sqrt(), 0.0, n_o_v);
    let n = Vec3::Z;

    let mut a = 0.0f32;
    let mut b = 0.0f32;
    for i in 0..sample_count {
        let xi = hammersley(i, sample_count);
        let h = importance_sample_ggx(xi, n, roughness);
        let l = (2.0 * v.dot(h) * h - v).normalize();

        let n_dot_l = l.z.max(0.0);
        let n_dot_v = v.z.max(0.0);
        let n_dot_h = h.z.max(0.0);
        let v_dot_h = v.dot(h).max(0.0);

        if n_dot_l > 0.0 {
            let g = geometry_smith_ibl(n_dot_v, n_dot_l, roughness);
            let g_vis = (g * v_dot_h) / (n_dot_h * n_dot_v).max(1e-6);
            let fc = (1.0 - v_dot_h).powi(5);
            a += (1.0 - fc) * g_vis;
            b += fc * g_vis;
        }
    }
    (a / sample_count as f32, b / sample_count as f32)
}

/// Produces one dithered, 8-bit-quantized BRDF LUT texel.
#[must_use]
pub fn brdf_lut_texel_u8(x: u32, y: u32, size: u32, sample_count: u32) -> [u8; 2] {
    let n_o_v = x as f32 / (size - 1).max(1) as f32;
    let roughness = y as f32 / (size - 1).max(1) as f32;
    let (a, b) = integrate_brdf(n_o_v, roughness, sample_count);
    let dither = bayer_offset(x, y);
    let a_u8 = ((a + dither).clamp(0.0, 1.0) * 255.0).round() as u8;
    let b_u8 = ((b + dither).clamp(0.0, 1.0) * 255.0).round() as u8;
    [a_u8, b_u8]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hammersley_first_sample_is_origin() {
        let (x, y) = hammersley(0, 16);
        assert_eq!(x, 0.0);
        assert_eq!(y, 0.0);
    }

    #[test]
    fn radical_inverse_is_bounded() {
        for i in 0..64 {
            let v = radical_inverse_vdc(i);
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn brdf_lut_output_is_clamped_to_unit_range() {
        for y in 0..8 {
            for x in 0..8 {
                let [a, b] = brdf_lut_texel_u8(x, y, 8, 64);
                assert!(a <= 255);
                assert!(b <= 255);
            }
        }
    }

    #[test]
    fn prefilter_sample_count_grows_with_mip() {
        assert_eq!(prefilter_sample_count(32, 0), 32);
        assert_eq!(prefilter_sample_count(32, 1), 32 * 9);
        assert!(prefilter_sample_count(32, 4) > prefilter_sample_count(32, 1));
    }
}
