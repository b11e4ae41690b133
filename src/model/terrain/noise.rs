// noise.rs - seeded value noise and FBM on the unit sphere
//
// All functions here are pure: the same (seed, position) always yields the
// same bits, whatever thread calls them and in whatever order.

use glam::DVec3;

/// Hash a 3D lattice point with a seed into [-1, 1]
fn hash3(seed: u64, x: i64, y: i64, z: i64) -> f64 {
    let mut n = seed
        ^ (x as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15)
        ^ (y as u64).wrapping_mul(0xc2b2_ae3d_27d4_eb4f)
        ^ (z as u64).wrapping_mul(0x1656_67b1_9e37_79f9);
    n = (n ^ (n >> 33)).wrapping_mul(0xff51_afd7_ed55_8ccd);
    n = (n ^ (n >> 33)).wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    n ^= n >> 33;
    ((n >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
}

/// 3D value noise with smooth trilinear interpolation, range [-1, 1]
pub fn noise3d(seed: u64, p: DVec3) -> f64 {
    let ix = p.x.floor();
    let iy = p.y.floor();
    let iz = p.z.floor();
    let fx = p.x - ix;
    let fy = p.y - iy;
    let fz = p.z - iz;
    let (ix, iy, iz) = (ix as i64, iy as i64, iz as i64);

    // Fade curve: smooth interpolation
    let fade = |t: f64| t * t * t * (t * (t * 6.0 - 15.0) + 10.0);
    let u = fade(fx);
    let v = fade(fy);
    let w = fade(fz);

    let lerp = |a: f64, b: f64, t: f64| a + (b - a) * t;
    let h = |dx: i64, dy: i64, dz: i64| hash3(seed, ix + dx, iy + dy, iz + dz);

    let x00 = lerp(h(0, 0, 0), h(1, 0, 0), u);
    let x10 = lerp(h(0, 1, 0), h(1, 1, 0), u);
    let x01 = lerp(h(0, 0, 1), h(1, 0, 1), u);
    let x11 = lerp(h(0, 1, 1), h(1, 1, 1), u);
    lerp(lerp(x00, x10, v), lerp(x01, x11, v), w)
}

/// 3D FBM (Fractional Brownian Motion): layered noise normalised to [-1, 1]
pub fn fbm(seed: u64, p: DVec3, base_freq: f64, gain: f64, octaves: u32) -> f64 {
    let mut result = 0.0;
    let mut amplitude = 1.0;
    let mut frequency = base_freq;
    let mut max_amplitude = 0.0;

    for octave in 0..octaves {
        // decorrelate octaves by shifting the seed
        result += noise3d(seed.wrapping_add(octave as u64), p * frequency) * amplitude;
        max_amplitude += amplitude;
        amplitude *= gain;
        frequency *= 2.0;
    }

    if max_amplitude > 0.0 { result / max_amplitude } else { 0.0 }
}

/// Ridged variant used for mountain ranges, range [0, 1]
pub fn ridged_fbm(seed: u64, p: DVec3, base_freq: f64, gain: f64, octaves: u32) -> f64 {
    let mut result = 0.0;
    let mut amplitude = 1.0;
    let mut frequency = base_freq;
    let mut max_amplitude = 0.0;

    for octave in 0..octaves {
        let n = 1.0 - noise3d(seed.wrapping_add(0x51ed + octave as u64), p * frequency).abs();
        result += n * n * amplitude;
        max_amplitude += amplitude;
        amplitude *= gain;
        frequency *= 2.0;
    }

    if max_amplitude > 0.0 { result / max_amplitude } else { 0.0 }
}
